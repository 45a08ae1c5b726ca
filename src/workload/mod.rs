//! The workload engine collaborator and the data it works on.
//!
//! The bridge treats the inner engine as an opaque unit: it is told when
//! to start, how many instructions it may spend from a given time, and
//! which network batches arrived. In return it hands back a list of
//! [`ExecutionRecord`]s, of which only [`ExecutionRecord::Sent`] matters to
//! the bridge.

pub mod mock;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::event::EventSet;
use crate::types::{EngineTime, HostId, VertexId};

pub use mock::{CallLog, EngineCall, RecordingEngine};

/// Vertices of one or more queries assigned to a single virtual host.
///
/// Read-only once built; the adapter constructed from it owns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Host the placement is pinned to, if any
    pub host: Option<HostId>,
    /// Vertices executed by this placement
    pub vertices: BTreeSet<VertexId>,
    /// Simulated duration of the workload, in whole seconds
    pub duration: u64,
}

impl Placement {
    /// Creates an unpinned placement.
    pub fn new(vertices: impl IntoIterator<Item = VertexId>, duration: u64) -> Self {
        Self {
            host: None,
            vertices: vertices.into_iter().collect(),
            duration,
        }
    }

    /// Pins the placement to a host.
    pub fn on_host(mut self, host: HostId) -> Self {
        self.host = Some(host);
        self
    }

    /// Returns true if the vertex belongs to this placement.
    pub fn contains(&self, vertex: VertexId) -> bool {
        self.vertices.contains(&vertex)
    }
}

/// One entry of an engine's execution output.
///
/// All times are engine milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExecutionRecord {
    /// A producer generated events.
    Produced {
        time_ms: EngineTime,
        vertex: VertexId,
        quantity: f64,
    },
    /// An operator processed events.
    Processed {
        time_ms: EngineTime,
        vertex: VertexId,
        quantity: f64,
    },
    /// A consumer absorbed events.
    Consumed {
        time_ms: EngineTime,
        vertex: VertexId,
        quantity: f64,
    },
    /// A network batch was taken off the input queue of `vertex`.
    Received {
        time_ms: EngineTime,
        vertex: VertexId,
        quantity: f64,
    },
    /// A batch left `origin` for a vertex on another host.
    Sent {
        time_ms: EngineTime,
        origin: VertexId,
        dest: VertexId,
        payload: EventSet,
    },
}

impl ExecutionRecord {
    /// Engine time of the record.
    pub fn time_ms(&self) -> EngineTime {
        match self {
            ExecutionRecord::Produced { time_ms, .. }
            | ExecutionRecord::Processed { time_ms, .. }
            | ExecutionRecord::Consumed { time_ms, .. }
            | ExecutionRecord::Received { time_ms, .. }
            | ExecutionRecord::Sent { time_ms, .. } => *time_ms,
        }
    }

    /// Returns true for outbound network records.
    pub fn is_sent(&self) -> bool {
        matches!(self, ExecutionRecord::Sent { .. })
    }
}

/// The inner workload engine driven by a workload adapter.
///
/// Implementations execute operator semantics; the bridge only feeds them
/// instruction budgets and network input.
pub trait WorkloadEngine: Send {
    /// Prepares the engine to start executing at `start_ms`.
    ///
    /// Called exactly once, before the first `run`.
    fn init(&mut self, start_ms: EngineTime);

    /// Spends up to `instructions` starting at `start_ms`.
    ///
    /// `capacity` is the per-PE speed (MIPS) of the host for this slice.
    fn run(&mut self, instructions: u64, start_ms: EngineTime, capacity: f64) -> Vec<ExecutionRecord>;

    /// Puts a batch that arrived over the network on the input queue of `dest`.
    fn enqueue(&mut self, time_ms: EngineTime, origin: VertexId, dest: VertexId, payload: EventSet);
}
