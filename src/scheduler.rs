//! Capacity scheduler: time-shares one virtual host between workload adapters.
//!
//! Every tick the scheduler turns the wall time since its previous tick into
//! an instruction budget per adapter, ticks every active adapter exactly
//! once, then moves the finished ones aside and reports when it next wants
//! to be woken up.
//!
//! Per-PE capacity follows the time-shared rule: the host's total MIPS is
//! split evenly over the PEs in use, but never over fewer PEs than the host
//! actually has powered.

use std::collections::{BTreeMap, HashSet};

use crate::adapter::WorkloadAdapter;
use crate::error::{BridgeError, BridgeResult};
use crate::event::NetworkEvent;
use crate::network::EventSink;
use crate::types::{SimTime, WorkloadId, INSTRUCTION_SCALE};

/// Smallest gap, in seconds, between a tick and the wake-up it requests.
pub const MIN_EVENT_GAP: SimTime = 0.01;

/// Something the outer simulator can hand workloads to and tick.
pub trait Schedulable {
    /// Registers a workload and returns its initial completion estimate.
    fn submit(&mut self, adapter: WorkloadAdapter) -> BridgeResult<SimTime>;

    /// Advances every active workload to `current_time`.
    ///
    /// Returns the time of the next wake-up this host needs, or `None` if
    /// nothing is left to run.
    fn tick(
        &mut self,
        current_time: SimTime,
        mips_share: &[f64],
        sink: &mut dyn EventSink,
    ) -> BridgeResult<Option<SimTime>>;

    /// Drains the workloads that finished since the last call.
    fn take_completed(&mut self) -> Vec<WorkloadId>;
}

/// Counters kept by a [`CapacityScheduler`].
#[derive(Clone, Debug, Default)]
pub struct SchedulerStats {
    /// Calls to `tick`
    pub ticks: u64,
    /// `on_tick` calls made on adapters
    pub adapter_ticks: u64,
    /// Sum of all budgets handed out
    pub instructions_granted: u64,
    /// Records returned by the engines
    pub records: u64,
    /// Workloads signalled as complete
    pub completions: u64,
    /// Finished workloads handed back
    pub reclaims: u64,
    /// Adapter errors observed during ticks
    pub errors: u64,
}

/// Time-shared scheduler for the adapters placed on one host.
#[derive(Debug)]
pub struct CapacityScheduler {
    /// Running adapters, in submission order
    active: Vec<WorkloadAdapter>,
    /// Finished adapters waiting to be reclaimed
    finished: BTreeMap<WorkloadId, WorkloadAdapter>,
    /// Workloads already signalled as complete
    signalled: HashSet<WorkloadId>,
    /// Completions not yet collected
    completed: Vec<WorkloadId>,
    reclaimed: HashSet<WorkloadId>,
    previous_time: SimTime,
    min_event_gap: SimTime,
    last_capacity: f64,
    stats: SchedulerStats,
}

impl Default for CapacityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CapacityScheduler {
    pub fn new() -> Self {
        Self {
            active: Vec::new(),
            finished: BTreeMap::new(),
            signalled: HashSet::new(),
            completed: Vec::new(),
            reclaimed: HashSet::new(),
            previous_time: 0.0,
            min_event_gap: MIN_EVENT_GAP,
            last_capacity: 0.0,
            stats: SchedulerStats::default(),
        }
    }

    /// Overrides the minimum wake-up gap.
    pub fn with_min_event_gap(mut self, gap: SimTime) -> Self {
        self.min_event_gap = gap;
        self
    }

    /// Time of the previous tick.
    pub fn previous_time(&self) -> SimTime {
        self.previous_time
    }

    /// Per-PE capacity used by the last tick.
    pub fn last_capacity(&self) -> f64 {
        self.last_capacity
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Returns true if the workload was ever submitted here.
    pub fn contains(&self, workload: WorkloadId) -> bool {
        self.active.iter().any(|a| a.id() == workload)
            || self.finished.contains_key(&workload)
            || self.reclaimed.contains(&workload)
    }

    /// Looks up a workload that has not been reclaimed yet.
    pub fn adapter(&self, workload: WorkloadId) -> Option<&WorkloadAdapter> {
        self.active
            .iter()
            .find(|a| a.id() == workload)
            .or_else(|| self.finished.get(&workload))
    }

    /// Mutable lookup; reclaimed and unknown workloads are errors.
    pub fn adapter_mut(&mut self, workload: WorkloadId) -> BridgeResult<&mut WorkloadAdapter> {
        if self.reclaimed.contains(&workload) {
            return Err(BridgeError::WorkloadReclaimed { workload });
        }
        if let Some(adapter) = self.active.iter_mut().find(|a| a.id() == workload) {
            return Ok(adapter);
        }
        self.finished
            .get_mut(&workload)
            .ok_or(BridgeError::UnknownWorkload { workload })
    }

    /// Queues a network event on one of this host's workloads.
    pub fn deliver(&mut self, workload: WorkloadId, event: NetworkEvent) -> BridgeResult<()> {
        self.adapter_mut(workload)?.enqueue(event);
        Ok(())
    }

    /// Per-PE capacity for the given MIPS share.
    ///
    /// `sum(mips) / max(pes in use, powered pes)`; 0 when there is nothing
    /// to divide by.
    pub fn capacity(&self, mips_share: &[f64]) -> f64 {
        let total: f64 = mips_share.iter().sum();
        let powered = mips_share.iter().filter(|&&mips| mips > 0.0).count();
        let in_use: usize = self.active.iter().map(|a| a.pes() as usize).sum();
        let divisor = in_use.max(powered);
        if divisor == 0 {
            0.0
        } else {
            total / divisor as f64
        }
    }

    /// Marks a workload complete. Returns false if it already was.
    pub fn signal_completion(&mut self, workload: WorkloadId) -> bool {
        if !self.signalled.insert(workload) {
            tracing::debug!(workload, "completion already signalled");
            return false;
        }
        self.completed.push(workload);
        self.stats.completions += 1;
        true
    }

    /// Hands a finished workload back to the caller, once.
    pub fn reclaim(&mut self, workload: WorkloadId) -> BridgeResult<WorkloadAdapter> {
        if let Some(adapter) = self.finished.remove(&workload) {
            self.reclaimed.insert(workload);
            self.stats.reclaims += 1;
            tracing::debug!(workload, "workload reclaimed");
            return Ok(adapter);
        }
        if self.reclaimed.contains(&workload) {
            Err(BridgeError::WorkloadReclaimed { workload })
        } else if self.active.iter().any(|a| a.id() == workload) {
            Err(BridgeError::WorkloadStillRunning { workload })
        } else {
            Err(BridgeError::UnknownWorkload { workload })
        }
    }

    /// Exports the scheduler counters.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "previous_time": self.previous_time,
            "capacity": self.last_capacity,
            "active": self.active.len(),
            "finished": self.finished.len(),
            "reclaimed": self.reclaimed.len(),
            "ticks": self.stats.ticks,
            "adapter_ticks": self.stats.adapter_ticks,
            "instructions_granted": self.stats.instructions_granted,
            "records": self.stats.records,
            "completions": self.stats.completions,
            "reclaims": self.stats.reclaims,
            "errors": self.stats.errors,
        })
    }
}

impl Schedulable for CapacityScheduler {
    fn submit(&mut self, adapter: WorkloadAdapter) -> BridgeResult<SimTime> {
        let workload = adapter.id();
        if self.contains(workload) {
            return Err(BridgeError::DuplicateWorkload { workload });
        }
        let estimate = adapter.duration();
        tracing::debug!(workload, estimate, pes = adapter.pes(), "workload submitted");
        self.active.push(adapter);
        Ok(estimate)
    }

    fn tick(
        &mut self,
        current_time: SimTime,
        mips_share: &[f64],
        sink: &mut dyn EventSink,
    ) -> BridgeResult<Option<SimTime>> {
        let previous_time = self.previous_time;
        let span = current_time - previous_time;
        let capacity = self.capacity(mips_share);
        self.last_capacity = capacity;

        let mut first_error: Option<BridgeError> = None;
        for adapter in &mut self.active {
            let instructions = budget(capacity, span, adapter.pes());
            self.stats.adapter_ticks += 1;
            self.stats.instructions_granted += instructions;

            let outcome = match adapter.on_tick(instructions, current_time, previous_time, capacity) {
                Ok(records) => {
                    self.stats.records += records.len() as u64;
                    adapter.forward_outbound(&records, &mut *sink).map(|_| ())
                }
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                tracing::warn!(workload = adapter.id(), error = %err, "workload tick failed");
                self.stats.errors += 1;
                keep_worst(&mut first_error, err);
            }
        }

        let (done, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(WorkloadAdapter::is_finished);
        self.active = running;
        for adapter in done {
            let workload = adapter.id();
            if self.signal_completion(workload) {
                tracing::info!(workload, time = current_time, "workload finished");
            }
            self.finished.insert(workload, adapter);
        }

        let floor = current_time + self.min_event_gap;
        let next = self
            .active
            .iter()
            .map(|a| (current_time + a.estimated_time_to_finish()).max(floor))
            .reduce(f64::min);

        tracing::debug!(
            time = current_time,
            span,
            capacity,
            active = self.active.len(),
            next = ?next,
            "host tick"
        );

        self.previous_time = current_time;
        self.stats.ticks += 1;

        match first_error {
            Some(err) => Err(err),
            None => Ok(next),
        }
    }

    fn take_completed(&mut self) -> Vec<WorkloadId> {
        std::mem::take(&mut self.completed)
    }
}

/// Instructions a workload on `pes` PEs can execute during `span` seconds.
pub fn budget(capacity: f64, span: SimTime, pes: u32) -> u64 {
    let instructions = (capacity * span * pes as f64 * INSTRUCTION_SCALE).floor();
    if instructions > 0.0 {
        instructions as u64
    } else {
        0
    }
}

/// Keeps the first error, unless a later one is fatal and the kept one is not.
pub(crate) fn keep_worst(slot: &mut Option<BridgeError>, err: BridgeError) {
    let replace = match slot {
        Some(existing) => err.is_fatal() && !existing.is_fatal(),
        None => true,
    };
    if replace {
        *slot = Some(err);
    }
}
