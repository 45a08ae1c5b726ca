//! Minimal outer discrete-event loop.
//!
//! The bridge is meant to sit inside a cloud simulator. This module provides
//! just enough of one to run it end to end: a future-event list ordered by
//! time (FIFO among equal times) and a loop that hands each event to the
//! datacenter it is addressed to.
//!
//! # Example
//!
//! ```
//! use cepbridge::datacenter::{RoutingDatacenter, VirtualHost};
//! use cepbridge::simulation::Simulation;
//!
//! let mut dc = RoutingDatacenter::new(1, 0.1, 0.01);
//! dc.add_host(VirtualHost::new(1, vec![1000.0]));
//!
//! let mut sim = Simulation::new();
//! sim.add_datacenter(dc);
//! let end = sim.run_until(1.0).unwrap();
//!
//! // Idle datacenters keep housekeeping, so the clock reaches the end.
//! assert!(end > 0.9);
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

use crate::broker::Broker;
use crate::datacenter::{EventRoutable, RoutingDatacenter};
use crate::error::{BridgeError, BridgeResult};
use crate::event::DatacenterEvent;
use crate::network::EventSink;
use crate::types::{DatacenterId, SimTime, WorkloadId};

struct Scheduled {
    time: SimTime,
    seq: u64,
    target: DatacenterId,
    event: DatacenterEvent,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

/// Time-ordered future-event list.
///
/// Popping an event moves the clock to its time. Negative delays are
/// treated as zero; the clock never runs backwards.
#[derive(Default)]
pub struct EventQueue {
    now: SimTime,
    seq: u64,
    heap: BinaryHeap<Reverse<Scheduled>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Time of the next event, if any.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|Reverse(s)| s.time)
    }

    /// Removes the next event and advances the clock to it.
    pub fn pop(&mut self) -> Option<(SimTime, DatacenterId, DatacenterEvent)> {
        let Reverse(next) = self.heap.pop()?;
        self.now = next.time;
        Some((next.time, next.target, next.event))
    }
}

impl EventSink for EventQueue {
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule(&mut self, target: DatacenterId, delay: SimTime, event: DatacenterEvent) {
        let time = self.now + delay.max(0.0);
        self.seq += 1;
        self.heap.push(Reverse(Scheduled {
            time,
            seq: self.seq,
            target,
            event,
        }));
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("now", &self.now)
            .field("pending", &self.heap.len())
            .field("next", &self.peek_time())
            .finish()
    }
}

/// Counters kept by a [`Simulation`].
#[derive(Clone, Debug, Default)]
pub struct SimulationStats {
    /// Events handed to datacenters
    pub events_processed: u64,
    /// Non-fatal errors reported by datacenters
    pub contract_violations: u64,
    /// Workloads that finished
    pub completions: u64,
}

/// The outer event loop driving one or more routing datacenters.
#[derive(Debug, Default)]
pub struct Simulation {
    queue: EventQueue,
    datacenters: BTreeMap<DatacenterId, RoutingDatacenter>,
    completed: Vec<(DatacenterId, WorkloadId)>,
    started: bool,
    stats: SimulationStats,
}

impl Simulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_datacenter(&mut self, datacenter: RoutingDatacenter) {
        self.datacenters.insert(EventRoutable::id(&datacenter), datacenter);
    }

    pub fn datacenter(&self, id: DatacenterId) -> Option<&RoutingDatacenter> {
        self.datacenters.get(&id)
    }

    pub fn datacenter_mut(&mut self, id: DatacenterId) -> Option<&mut RoutingDatacenter> {
        self.datacenters.get_mut(&id)
    }

    pub fn datacenters(&self) -> impl Iterator<Item = &RoutingDatacenter> {
        self.datacenters.values()
    }

    pub fn queue_mut(&mut self) -> &mut EventQueue {
        &mut self.queue
    }

    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    /// `(datacenter, workload)` pairs in completion order.
    pub fn completed(&self) -> &[(DatacenterId, WorkloadId)] {
        &self.completed
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Hands the broker's queued workloads to their datacenters.
    ///
    /// Only hosts that a datacenter of this simulation actually owns are
    /// used. Workloads the broker rejects count as contract violations.
    /// Returns the number of workloads scheduled.
    pub fn submit(&mut self, broker: &mut Broker) -> usize {
        let rejected = broker.rejected().len();
        let datacenters = &self.datacenters;
        let count = broker.submit_workloads_where(&mut self.queue, |datacenter, host| {
            datacenters
                .get(&datacenter)
                .is_some_and(|dc| dc.host(host).is_some())
        });
        self.stats.contract_violations += (broker.rejected().len() - rejected) as u64;
        count
    }

    /// Schedules the first housekeeping pass of every datacenter.
    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for &id in self.datacenters.keys() {
            self.queue.schedule(id, 0.0, DatacenterEvent::Housekeeping);
        }
        tracing::info!(datacenters = self.datacenters.len(), "simulation started");
    }

    /// Processes events up to and including `end_time`.
    ///
    /// Errors that only concern one workload are logged and counted; fatal
    /// ones stop the run. Returns the clock after the last processed event.
    pub fn run_until(&mut self, end_time: SimTime) -> BridgeResult<SimTime> {
        self.start();

        while let Some(time) = self.queue.peek_time() {
            if time > end_time {
                break;
            }
            let Some((time, target, event)) = self.queue.pop() else {
                break;
            };
            let Some(datacenter) = self.datacenters.get_mut(&target) else {
                tracing::error!(datacenter = target, time, "event addressed to an unknown datacenter");
                return Err(BridgeError::UnknownDatacenter { datacenter: target });
            };

            let result = datacenter.process_event(&mut self.queue, event);
            self.stats.events_processed += 1;

            for workload in datacenter.take_completed() {
                self.stats.completions += 1;
                self.completed.push((target, workload));
            }

            if let Err(err) = result {
                if err.is_fatal() {
                    tracing::error!(time, error = %err, "aborting simulation");
                    return Err(err);
                }
                tracing::warn!(time, error = %err, "event failed");
                self.stats.contract_violations += 1;
            }
        }

        tracing::info!(
            time = self.queue.now(),
            events = self.stats.events_processed,
            completions = self.stats.completions,
            "simulation paused"
        );
        Ok(self.queue.now())
    }

    /// Exports the simulation, datacenter and host counters.
    pub fn export_stats(&self) -> serde_json::Value {
        let datacenters: serde_json::Map<String, serde_json::Value> = self
            .datacenters
            .iter()
            .map(|(id, dc)| (id.to_string(), dc.export_stats()))
            .collect();

        serde_json::json!({
            "simulation": {
                "current_time": self.queue.now(),
                "pending_events": self.queue.len(),
                "events_processed": self.stats.events_processed,
                "contract_violations": self.stats.contract_violations,
                "completions": self.stats.completions,
            },
            "datacenters": datacenters,
        })
    }
}
