//! Workload adapter: one placement's engine driven by outer-simulator ticks.
//!
//! The outer simulator only knows that some wall time `[previous, current)`
//! went by and how many instructions the host could spend in it. The
//! adapter turns that into engine calls:
//!
//! 1. the first tick initialises the engine at `previous` (in ms);
//! 2. the elapsed wall time is accumulated;
//! 3. network events that arrived strictly before `previous` are handed
//!    to the engine, in [`NetworkEvent`] order;
//! 4. once the accumulated time reaches the placement duration the
//!    adapter finishes, and the last budget is cut down to the share of
//!    the slice that was still inside the duration;
//! 5. the engine runs and its records are returned.
//!
//! # Example
//!
//! ```
//! use cepbridge::adapter::WorkloadAdapter;
//! use cepbridge::workload::{Placement, RecordingEngine};
//!
//! let (engine, log) = RecordingEngine::new();
//! let mut adapter = WorkloadAdapter::new(1, Placement::new([1, 2], 100), Box::new(engine));
//!
//! adapter.on_tick(80_000_000, 80.0, 0.0, 1.0).unwrap();
//! adapter.on_tick(100_000_000, 180.0, 80.0, 1.0).unwrap();
//!
//! // Only 20 of the last 100 seconds were still inside the workload.
//! assert_eq!(log.runs()[1].0, 20_000_000);
//! assert!(adapter.is_finished());
//! ```

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::fmt;
use std::sync::Arc;

use crate::error::{BridgeError, BridgeResult};
use crate::event::NetworkEvent;
use crate::network::{EventSink, NetworkInterface};
use crate::types::{to_engine_time, SimTime, VertexId, WorkloadId};
use crate::workload::{ExecutionRecord, Placement, WorkloadEngine};

/// Tolerance (in duration units) when deciding a workload has finished.
///
/// Elapsed time is a sum of many floating point slices and drifts below the
/// exact duration. Tunable through [`WorkloadAdapter::with_epsilon`].
pub const COMPLETION_EPSILON: f64 = 0.01;

/// How an adapter's outbound traffic leaves the host.
#[derive(Clone, Default)]
pub enum Transport {
    /// All vertices of the query live in this placement; nothing is sent.
    #[default]
    Isolated,
    /// `Sent` records are forwarded through the given network.
    Networked(Arc<dyn NetworkInterface>),
}

impl Transport {
    /// Returns true if outbound records are forwarded.
    pub fn is_networked(&self) -> bool {
        matches!(self, Transport::Networked(_))
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Isolated => f.write_str("Isolated"),
            Transport::Networked(_) => f.write_str("Networked"),
        }
    }
}

/// Counters kept by an adapter.
#[derive(Clone, Debug, Default)]
pub struct AdapterStats {
    /// Ticks that reached the engine
    pub ticks: u64,
    /// Instructions offered by the scheduler
    pub instructions_offered: u64,
    /// Instructions passed to the engine after proration
    pub instructions_executed: u64,
    /// Network events handed to the engine
    pub events_drained: u64,
    /// Network events received and queued
    pub events_enqueued: u64,
    /// Network events received after the workload finished
    pub events_dropped: u64,
    /// Outbound batches forwarded to the transport
    pub events_sent: u64,
}

/// Bridges one placement's engine to the outer simulator's ticks.
pub struct WorkloadAdapter {
    id: WorkloadId,
    placement: Placement,
    engine: Box<dyn WorkloadEngine>,
    transport: Transport,
    pes: u32,
    epsilon: f64,
    pending_events: BinaryHeap<Reverse<NetworkEvent>>,
    /// `None` until the engine has been initialised
    elapsed_time: Option<SimTime>,
    finished: bool,
    record_history: bool,
    history: Vec<ExecutionRecord>,
    stats: AdapterStats,
}

impl WorkloadAdapter {
    /// Creates an isolated, single-PE adapter owning `engine`.
    pub fn new(id: WorkloadId, placement: Placement, engine: Box<dyn WorkloadEngine>) -> Self {
        Self {
            id,
            placement,
            engine,
            transport: Transport::Isolated,
            pes: 1,
            epsilon: COMPLETION_EPSILON,
            pending_events: BinaryHeap::new(),
            elapsed_time: None,
            finished: false,
            record_history: false,
            history: Vec::new(),
            stats: AdapterStats::default(),
        }
    }

    /// Forwards outbound records through `network`.
    pub fn with_network(self, network: Arc<dyn NetworkInterface>) -> Self {
        self.with_transport(Transport::Networked(network))
    }

    /// Sets the transport variant.
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Sets how many processing elements the workload occupies.
    pub fn with_pes(mut self, pes: u32) -> Self {
        self.pes = pes.max(1);
        self
    }

    /// Overrides the completion tolerance.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon.max(0.0);
        self
    }

    /// Keeps every record returned by the engine.
    pub fn with_history(mut self, record: bool) -> Self {
        self.record_history = record;
        self
    }

    pub fn id(&self) -> WorkloadId {
        self.id
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn vertices(&self) -> &BTreeSet<VertexId> {
        &self.placement.vertices
    }

    /// Placement duration in outer simulator seconds.
    pub fn duration(&self) -> SimTime {
        self.placement.duration as SimTime
    }

    pub fn pes(&self) -> u32 {
        self.pes
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Wall time executed so far, `None` before the first tick.
    pub fn elapsed_time(&self) -> Option<SimTime> {
        self.elapsed_time
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Records kept when history recording is on.
    pub fn history(&self) -> &[ExecutionRecord] {
        &self.history
    }

    pub fn stats(&self) -> &AdapterStats {
        &self.stats
    }

    /// Network events waiting to be handed to the engine.
    pub fn pending_len(&self) -> usize {
        self.pending_events.len()
    }

    /// Seconds left until the placement duration is reached, 0 once finished.
    pub fn estimated_time_to_finish(&self) -> SimTime {
        if self.finished {
            0.0
        } else {
            self.duration() - self.elapsed_time.unwrap_or(0.0)
        }
    }

    /// Remaining instruction length as seen by the outer simulator.
    ///
    /// The true remaining count is unknowable from outside, so a running
    /// workload reports an unbounded length.
    pub fn remaining_length(&self) -> u64 {
        if self.finished {
            0
        } else {
            u64::MAX
        }
    }

    /// Queues an event that reached one of this placement's vertices.
    ///
    /// A finished workload never drains again, so its arrivals are counted
    /// and dropped.
    pub fn enqueue(&mut self, event: NetworkEvent) {
        if self.finished {
            tracing::trace!(
                workload = self.id,
                dest = event.dest_vertex,
                at = event.dest_timestamp,
                "network event dropped, workload finished"
            );
            self.stats.events_dropped += 1;
            return;
        }
        tracing::trace!(
            workload = self.id,
            dest = event.dest_vertex,
            at = event.dest_timestamp,
            "network event queued"
        );
        self.stats.events_enqueued += 1;
        self.pending_events.push(Reverse(event));
    }

    /// Runs the engine over the wall-time slice `[previous_time, current_time)`.
    ///
    /// `instructions` is the budget for the whole slice; `capacity` is the
    /// per-PE speed passed through to the engine. A finished adapter
    /// ignores the call.
    pub fn on_tick(
        &mut self,
        instructions: u64,
        current_time: SimTime,
        previous_time: SimTime,
        capacity: f64,
    ) -> BridgeResult<Vec<ExecutionRecord>> {
        if self.finished {
            return Ok(Vec::new());
        }
        if current_time < previous_time {
            return Err(BridgeError::NonMonotonicTime {
                workload: self.id,
                previous: previous_time,
                current: current_time,
            });
        }

        let start_ms = to_engine_time(previous_time);
        let elapsed = match self.elapsed_time {
            Some(elapsed) => elapsed,
            None => {
                tracing::debug!(workload = self.id, start_ms, "initialising engine");
                self.engine.init(start_ms);
                0.0
            }
        } + (current_time - previous_time);
        self.elapsed_time = Some(elapsed);

        self.drain_network_events(previous_time);

        let mut budget = instructions;
        let duration = self.duration();
        if duration <= elapsed + self.epsilon {
            self.finished = true;
            budget = prorate(instructions, elapsed - duration, current_time - previous_time);
            tracing::info!(
                workload = self.id,
                time = current_time,
                elapsed,
                offered = instructions,
                budget,
                "workload reached its duration"
            );
        }

        let records = self.engine.run(budget, start_ms, capacity);

        self.stats.ticks += 1;
        self.stats.instructions_offered += instructions;
        self.stats.instructions_executed += budget;
        if self.record_history {
            self.history.extend(records.iter().cloned());
        }

        Ok(records)
    }

    /// Forwards the `Sent` records of a tick to the transport.
    ///
    /// Returns how many batches were handed over; always 0 when isolated.
    pub fn forward_outbound(
        &mut self,
        records: &[ExecutionRecord],
        sink: &mut dyn EventSink,
    ) -> BridgeResult<usize> {
        let network = match &self.transport {
            Transport::Isolated => return Ok(0),
            Transport::Networked(network) => Arc::clone(network),
        };

        let mut sent = 0;
        for record in records {
            if let ExecutionRecord::Sent {
                time_ms,
                origin,
                dest,
                payload,
            } = record
            {
                network.send(sink, *time_ms, *origin, *dest, payload.clone())?;
                sent += 1;
            }
        }

        self.stats.events_sent += sent as u64;
        Ok(sent)
    }

    /// Hands events due strictly before `previous_time` to the engine.
    ///
    /// An event due exactly at `previous_time` waits for the next tick.
    fn drain_network_events(&mut self, previous_time: SimTime) {
        while let Some(Reverse(next)) = self.pending_events.peek() {
            if next.dest_timestamp >= previous_time {
                break;
            }
            let Some(Reverse(event)) = self.pending_events.pop() else {
                break;
            };
            self.engine.enqueue(
                to_engine_time(event.dest_timestamp),
                event.origin_vertex,
                event.dest_vertex,
                event.payload,
            );
            self.stats.events_drained += 1;
        }
    }

    /// Exports the adapter's state and counters.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "workload": self.id,
            "duration": self.placement.duration,
            "elapsed_time": self.elapsed_time,
            "finished": self.finished,
            "pending_events": self.pending_events.len(),
            "ticks": self.stats.ticks,
            "instructions_offered": self.stats.instructions_offered,
            "instructions_executed": self.stats.instructions_executed,
            "events_enqueued": self.stats.events_enqueued,
            "events_dropped": self.stats.events_dropped,
            "events_drained": self.stats.events_drained,
            "events_sent": self.stats.events_sent,
        })
    }
}

impl fmt::Debug for WorkloadAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadAdapter")
            .field("id", &self.id)
            .field("placement", &self.placement)
            .field("transport", &self.transport)
            .field("pes", &self.pes)
            .field("elapsed_time", &self.elapsed_time)
            .field("finished", &self.finished)
            .field("pending_events", &self.pending_events.len())
            .finish()
    }
}

/// Cuts the budget of the final slice down to the part inside the duration.
///
/// `overrun` is how far the accumulated time went past the duration. The
/// result stays within `[0, instructions]`.
fn prorate(instructions: u64, overrun: SimTime, span: SimTime) -> u64 {
    if span <= 0.0 {
        return instructions;
    }
    let offered = instructions as f64;
    let budget = offered - overrun * offered / span;
    if budget < 0.0 {
        tracing::warn!(instructions, overrun, span, "proration went negative, clamping to zero");
    }
    budget.clamp(0.0, offered) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventSet;
    use crate::workload::RecordingEngine;

    fn adapter(duration: u64) -> (WorkloadAdapter, crate::workload::CallLog) {
        let (engine, log) = RecordingEngine::new();
        let adapter = WorkloadAdapter::new(1, Placement::new([1, 2], duration), Box::new(engine));
        (adapter, log)
    }

    #[test]
    fn test_prorate() {
        assert_eq!(prorate(100_000_000, 80.0, 100.0), 20_000_000);
        assert_eq!(prorate(100, 0.0, 10.0), 100);
        // Finished slightly early thanks to the tolerance: never add instructions.
        assert_eq!(prorate(100, -0.005, 10.0), 100);
        // Overrun larger than the slice: never go negative.
        assert_eq!(prorate(100, 20.0, 10.0), 0);
        // Zero-length slice: nothing to divide.
        assert_eq!(prorate(100, 1.0, 0.0), 100);
    }

    #[test]
    fn test_update_in_three_slices() {
        let (mut adapter, log) = adapter(100);

        adapter.on_tick(30_000_000, 30.0, 0.0, 1.0).unwrap();
        assert_eq!(log.inits(), vec![0.0]);
        assert_eq!(log.runs()[0], (30_000_000, 0.0, 1.0));
        assert!((adapter.estimated_time_to_finish() - 70.0).abs() < 1e-4);

        adapter.on_tick(30_000_000, 60.0, 30.0, 1.0).unwrap();
        assert_eq!(log.runs()[1], (30_000_000, 30_000.0, 1.0));
        assert!((adapter.estimated_time_to_finish() - 40.0).abs() < 1e-4);

        adapter.on_tick(40_000_000, 100.0, 60.0, 1.0).unwrap();
        assert_eq!(log.runs()[2], (40_000_000, 60_000.0, 1.0));
        assert_eq!(adapter.estimated_time_to_finish(), 0.0);
        assert_eq!(adapter.remaining_length(), 0);
    }

    #[test]
    fn test_update_with_extra_time() {
        let (mut adapter, log) = adapter(100);

        adapter.on_tick(80_000_000, 80.0, 0.0, 1.0).unwrap();
        assert_eq!(log.runs()[0], (80_000_000, 0.0, 1.0));
        assert!((adapter.estimated_time_to_finish() - 20.0).abs() < 1e-4);

        adapter.on_tick(100_000_000, 180.0, 80.0, 1.0).unwrap();
        assert_eq!(log.runs()[1], (20_000_000, 80_000.0, 1.0));
        assert_eq!(adapter.estimated_time_to_finish(), 0.0);
        assert_eq!(adapter.remaining_length(), 0);
    }

    #[test]
    fn test_events_received_before_tick() {
        let (mut adapter, log) = adapter(100);

        let es1 = EventSet::new(1000.0, 1.0, 0.0).with_total(1, 1000.0);
        let es2 = EventSet::new(2000.0, 1.0, 0.0).with_total(1, 2000.0);
        let es3 = EventSet::new(5000.0, 1.0, 0.0).with_total(1, 5000.0);
        adapter.enqueue(NetworkEvent::new(1.0, 1, 15.0, 2, es3));
        adapter.enqueue(NetworkEvent::new(1.0, 1, 6.0, 2, es1));
        adapter.enqueue(NetworkEvent::new(1.0, 1, 8.0, 2, es2));

        adapter.on_tick(100, 20.0, 10.0, 1000.0).unwrap();

        assert_eq!(log.inits(), vec![10_000.0]);
        assert_eq!(log.enqueued(), vec![(6000.0, 1, 2), (8000.0, 1, 2)]);
        assert_eq!(log.runs(), vec![(100, 10_000.0, 1000.0)]);
        assert_eq!(adapter.pending_len(), 1);
    }

    #[test]
    fn test_boundary_event_waits_for_next_tick() {
        let (mut adapter, log) = adapter(100);
        adapter.enqueue(NetworkEvent::new(1.0, 1, 10.0, 2, EventSet::default()));

        adapter.on_tick(100, 20.0, 10.0, 1.0).unwrap();
        assert!(log.enqueued().is_empty());

        adapter.on_tick(100, 30.0, 20.0, 1.0).unwrap();
        assert_eq!(log.enqueued(), vec![(10_000.0, 1, 2)]);
    }

    #[test]
    fn test_engine_initialised_once_even_after_empty_slice() {
        let (mut adapter, log) = adapter(100);
        adapter.on_tick(0, 5.0, 5.0, 1.0).unwrap();
        adapter.on_tick(100, 6.0, 5.0, 1.0).unwrap();
        assert_eq!(log.inits(), vec![5000.0]);
    }

    #[test]
    fn test_finished_adapter_ignores_ticks() {
        let (mut adapter, log) = adapter(10);
        adapter.on_tick(100, 10.0, 0.0, 1.0).unwrap();
        assert!(adapter.is_finished());

        let records = adapter.on_tick(100, 20.0, 10.0, 1.0).unwrap();
        assert!(records.is_empty());
        assert_eq!(log.runs().len(), 1);
        assert_eq!(adapter.estimated_time_to_finish(), 0.0);
    }

    #[test]
    fn test_finished_adapter_drops_arrivals() {
        let (mut adapter, log) = adapter(10);
        adapter.enqueue(NetworkEvent::new(0.0, 3, 2.0, 1, EventSet::default()));
        adapter.on_tick(100, 10.0, 0.0, 1.0).unwrap();
        assert!(adapter.is_finished());
        assert_eq!(adapter.pending_len(), 1);

        for i in 0..5 {
            let at = 11.0 + i as f64;
            adapter.enqueue(NetworkEvent::new(at - 0.5, 3, at, 2, EventSet::default()));
        }

        assert_eq!(adapter.pending_len(), 1);
        assert_eq!(adapter.stats().events_enqueued, 1);
        assert_eq!(adapter.stats().events_dropped, 5);
        assert_eq!(adapter.export_stats()["events_dropped"], 5);
        assert!(log.enqueued().is_empty());
    }

    #[test]
    fn test_non_monotonic_time() {
        let (mut adapter, log) = adapter(100);
        let result = adapter.on_tick(100, 5.0, 10.0, 1.0);
        assert_eq!(
            result,
            Err(BridgeError::NonMonotonicTime {
                workload: 1,
                previous: 10.0,
                current: 5.0
            })
        );
        assert!(log.calls().is_empty());
        assert_eq!(adapter.elapsed_time(), None);
    }

    #[test]
    fn test_history_recording() {
        let (engine, _log) = RecordingEngine::new();
        let mut adapter = WorkloadAdapter::new(1, Placement::new([1], 100), Box::new(engine.sending(1, 2)))
            .with_history(true);

        adapter.on_tick(100, 1.0, 0.0, 1.0).unwrap();
        adapter.on_tick(100, 2.0, 1.0, 1.0).unwrap();
        assert_eq!(adapter.history().len(), 2);
        assert!(adapter.history().iter().all(ExecutionRecord::is_sent));
    }

    #[test]
    fn test_isolated_adapter_does_not_forward() {
        let (engine, _log) = RecordingEngine::new();
        let mut adapter = WorkloadAdapter::new(1, Placement::new([1], 100), Box::new(engine.sending(1, 2)));
        let records = adapter.on_tick(100, 1.0, 0.0, 1.0).unwrap();

        let mut queue = crate::simulation::EventQueue::new();
        assert_eq!(adapter.forward_outbound(&records, &mut queue).unwrap(), 0);
        assert!(queue.is_empty());
        assert!(!adapter.transport().is_networked());
    }
}
