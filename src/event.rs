//! Event definitions for the bridge.
//!
//! [`NetworkEvent`] is one in-flight message between vertices placed on
//! different hosts. [`DatacenterEvent`] is the set of tags the outer
//! simulator delivers to a routing datacenter.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::adapter::WorkloadAdapter;
use crate::types::{EngineTime, HostId, SimTime, VertexId};

/// A batch of events flowing along one edge of a query graph.
///
/// The bridge never looks inside an event set; it is carried from the
/// sending engine to the receiving engine untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSet {
    /// Number of events in the batch
    pub size: f64,
    /// Engine time (ms) at which the batch was produced
    pub timestamp: EngineTime,
    /// Accumulated latency (ms) of the batch so far
    pub latency: f64,
    /// Events contributed by each producer vertex
    pub totals: BTreeMap<VertexId, f64>,
}

impl EventSet {
    /// Creates an event set with no per-producer totals.
    pub fn new(size: f64, timestamp: EngineTime, latency: f64) -> Self {
        Self {
            size,
            timestamp,
            latency,
            totals: BTreeMap::new(),
        }
    }

    /// Adds the contribution of one producer.
    pub fn with_total(mut self, producer: VertexId, amount: f64) -> Self {
        self.totals.insert(producer, amount);
        self
    }
}

/// One in-flight inter-host message.
///
/// Timestamps are in outer simulator seconds. Events are totally ordered by
/// `dest_timestamp`, then `origin_timestamp`, then origin vertex, then
/// destination vertex, so that deliveries sharing a timestamp are replayed
/// identically on every run. The payload does not take part in the order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub origin_vertex: VertexId,
    pub origin_timestamp: SimTime,
    pub dest_vertex: VertexId,
    pub dest_timestamp: SimTime,
    pub payload: EventSet,
}

impl NetworkEvent {
    pub fn new(
        origin_timestamp: SimTime,
        origin_vertex: VertexId,
        dest_timestamp: SimTime,
        dest_vertex: VertexId,
        payload: EventSet,
    ) -> Self {
        Self {
            origin_vertex,
            origin_timestamp,
            dest_vertex,
            dest_timestamp,
            payload,
        }
    }
}

impl Ord for NetworkEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dest_timestamp
            .total_cmp(&other.dest_timestamp)
            .then_with(|| self.origin_timestamp.total_cmp(&other.origin_timestamp))
            .then_with(|| self.origin_vertex.cmp(&other.origin_vertex))
            .then_with(|| self.dest_vertex.cmp(&other.dest_vertex))
    }
}

impl PartialOrd for NetworkEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NetworkEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NetworkEvent {}

/// Tags a routing datacenter reacts to.
pub enum DatacenterEvent {
    /// A workload bound to `host` is handed over for execution.
    Submit {
        host: HostId,
        adapter: Box<WorkloadAdapter>,
    },
    /// Periodic processing pass; advances every host's scheduler.
    Housekeeping,
    /// A network event has reached its destination host.
    Deliver(NetworkEvent),
}

impl DatacenterEvent {
    /// Short tag name, used in logs and statistics.
    pub fn tag(&self) -> &'static str {
        match self {
            DatacenterEvent::Submit { .. } => "submit",
            DatacenterEvent::Housekeeping => "housekeeping",
            DatacenterEvent::Deliver(_) => "deliver",
        }
    }
}

impl fmt::Debug for DatacenterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatacenterEvent::Submit { host, adapter } => f
                .debug_struct("Submit")
                .field("host", host)
                .field("workload", &adapter.id())
                .finish(),
            DatacenterEvent::Housekeeping => f.write_str("Housekeeping"),
            DatacenterEvent::Deliver(event) => f.debug_tuple("Deliver").field(event).finish(),
        }
    }
}
