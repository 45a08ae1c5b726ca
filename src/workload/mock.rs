//! Mock workload engine for testing.
//!
//! [`RecordingEngine`] logs every call the bridge makes into a shared
//! [`CallLog`], so a test can hand the engine to an adapter and still
//! inspect what happened to it afterwards.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::EventSet;
use crate::types::{EngineTime, VertexId};
use crate::workload::{ExecutionRecord, WorkloadEngine};

/// One call made on a [`RecordingEngine`].
#[derive(Clone, Debug, PartialEq)]
pub enum EngineCall {
    Init {
        start_ms: EngineTime,
    },
    Run {
        instructions: u64,
        start_ms: EngineTime,
        capacity: f64,
    },
    Enqueue {
        time_ms: EngineTime,
        origin: VertexId,
        dest: VertexId,
        payload: EventSet,
    },
}

/// Shared view of the calls made on a [`RecordingEngine`].
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

impl CallLog {
    /// Returns a snapshot of every call, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    /// Start times passed to `init`.
    pub fn inits(&self) -> Vec<EngineTime> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Init { start_ms } => Some(*start_ms),
                _ => None,
            })
            .collect()
    }

    /// `(instructions, start_ms, capacity)` of every `run`.
    pub fn runs(&self) -> Vec<(u64, EngineTime, f64)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Run {
                    instructions,
                    start_ms,
                    capacity,
                } => Some((*instructions, *start_ms, *capacity)),
                _ => None,
            })
            .collect()
    }

    /// `(time_ms, origin, dest)` of every `enqueue`.
    pub fn enqueued(&self) -> Vec<(EngineTime, VertexId, VertexId)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Enqueue {
                    time_ms,
                    origin,
                    dest,
                    ..
                } => Some((*time_ms, *origin, *dest)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }
}

/// A scripted engine that records calls and can emit network traffic.
///
/// On every `run` it reports one `Received` record per batch enqueued since
/// the previous run, then one `Sent` record per configured route, stamped
/// with the run's start time.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    log: CallLog,
    routes: Vec<(VertexId, VertexId)>,
    inbox: Vec<(EngineTime, VertexId, f64)>,
}

impl RecordingEngine {
    /// Creates an engine and the log observing it.
    pub fn new() -> (Self, CallLog) {
        let engine = Self::default();
        let log = engine.log.clone();
        (engine, log)
    }

    /// Makes every run send one batch from `origin` to `dest`.
    pub fn sending(mut self, origin: VertexId, dest: VertexId) -> Self {
        self.routes.push((origin, dest));
        self
    }
}

impl WorkloadEngine for RecordingEngine {
    fn init(&mut self, start_ms: EngineTime) {
        self.log.push(EngineCall::Init { start_ms });
    }

    fn run(&mut self, instructions: u64, start_ms: EngineTime, capacity: f64) -> Vec<ExecutionRecord> {
        self.log.push(EngineCall::Run {
            instructions,
            start_ms,
            capacity,
        });

        let mut records: Vec<ExecutionRecord> = self
            .inbox
            .drain(..)
            .map(|(time_ms, vertex, quantity)| ExecutionRecord::Received {
                time_ms,
                vertex,
                quantity,
            })
            .collect();

        for &(origin, dest) in &self.routes {
            records.push(ExecutionRecord::Sent {
                time_ms: start_ms,
                origin,
                dest,
                payload: EventSet::new(1.0, start_ms, 0.0).with_total(origin, 1.0),
            });
        }

        records
    }

    fn enqueue(&mut self, time_ms: EngineTime, origin: VertexId, dest: VertexId, payload: EventSet) {
        self.inbox.push((time_ms, dest, payload.size));
        self.log.push(EngineCall::Enqueue {
            time_ms,
            origin,
            dest,
            payload,
        });
    }
}
