//! Routing datacenter: hosts, vertex routing and housekeeping.
//!
//! A datacenter owns a set of [`VirtualHost`]s, each with its own
//! [`CapacityScheduler`]. It reacts to three kinds of events:
//!
//! - `Submit`: a workload lands on one of its hosts. Every vertex of the
//!   placement is routed to that workload.
//! - `Deliver`: a network event reached a vertex. It is queued on the
//!   workload the vertex routes to.
//! - `Housekeeping`: every host is ticked up to the current time.
//!
//! Every processing pass re-arms housekeeping one scheduling interval
//! ahead, so the clock keeps moving even when every workload is idle
//! waiting on the network.

use std::collections::{BTreeMap, HashMap};

use crate::adapter::WorkloadAdapter;
use crate::error::{BridgeError, BridgeResult};
use crate::event::{DatacenterEvent, NetworkEvent};
use crate::network::EventSink;
use crate::scheduler::{keep_worst, CapacityScheduler, Schedulable};
use crate::types::{DatacenterId, HostId, SimTime, VertexId, WorkloadId};

/// An entity of the outer simulator that events can be addressed to.
pub trait EventRoutable {
    fn id(&self) -> DatacenterId;

    /// Handles one event at the sink's current time.
    fn process_event(&mut self, sink: &mut dyn EventSink, event: DatacenterEvent) -> BridgeResult<()>;
}

/// A virtual host: a MIPS share per PE and the scheduler multiplexing it.
#[derive(Debug)]
pub struct VirtualHost {
    id: HostId,
    mips_share: Vec<f64>,
    scheduler: CapacityScheduler,
}

impl VirtualHost {
    pub fn new(id: HostId, mips_share: Vec<f64>) -> Self {
        Self {
            id,
            mips_share,
            scheduler: CapacityScheduler::new(),
        }
    }

    /// Overrides the minimum wake-up gap of the host's scheduler.
    pub fn with_min_event_gap(mut self, gap: SimTime) -> Self {
        self.scheduler = self.scheduler.with_min_event_gap(gap);
        self
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn mips_share(&self) -> &[f64] {
        &self.mips_share
    }

    pub fn scheduler(&self) -> &CapacityScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut CapacityScheduler {
        &mut self.scheduler
    }

    /// Ticks the host's scheduler to `now`.
    pub fn update(&mut self, now: SimTime, sink: &mut dyn EventSink) -> BridgeResult<Option<SimTime>> {
        self.scheduler.tick(now, &self.mips_share, sink)
    }
}

/// Where a vertex's network input goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub host: HostId,
    pub workload: WorkloadId,
}

/// Counters kept by a [`RoutingDatacenter`].
#[derive(Clone, Debug, Default)]
pub struct DatacenterStats {
    /// Workloads accepted
    pub submissions: u64,
    /// Network events routed to a workload
    pub deliveries: u64,
    /// Processing passes over all hosts
    pub processing_passes: u64,
    /// Housekeeping events dropped for arriving too soon
    pub housekeeping_skipped: u64,
    /// Housekeeping events scheduled
    pub housekeeping_armed: u64,
}

/// Datacenter that routes vertices to workloads and keeps the clock alive.
#[derive(Debug)]
pub struct RoutingDatacenter {
    id: DatacenterId,
    hosts: BTreeMap<HostId, VirtualHost>,
    routes: HashMap<VertexId, Route>,
    /// Housekeeping period in seconds
    scheduling_interval: SimTime,
    /// Housekeeping closer than this to the last pass is dropped
    min_time_between_events: SimTime,
    last_process_time: Option<SimTime>,
    completed: Vec<WorkloadId>,
    stats: DatacenterStats,
}

impl RoutingDatacenter {
    pub fn new(id: DatacenterId, scheduling_interval: SimTime, min_time_between_events: SimTime) -> Self {
        Self {
            id,
            hosts: BTreeMap::new(),
            routes: HashMap::new(),
            scheduling_interval,
            min_time_between_events,
            last_process_time: None,
            completed: Vec::new(),
            stats: DatacenterStats::default(),
        }
    }

    pub fn add_host(&mut self, host: VirtualHost) {
        self.hosts.insert(host.id(), host);
    }

    pub fn host(&self, id: HostId) -> Option<&VirtualHost> {
        self.hosts.get(&id)
    }

    pub fn host_mut(&mut self, id: HostId) -> Option<&mut VirtualHost> {
        self.hosts.get_mut(&id)
    }

    pub fn host_ids(&self) -> impl Iterator<Item = HostId> + '_ {
        self.hosts.keys().copied()
    }

    /// Returns where input for `vertex` is routed.
    pub fn route(&self, vertex: VertexId) -> Option<Route> {
        self.routes.get(&vertex).copied()
    }

    pub fn scheduling_interval(&self) -> SimTime {
        self.scheduling_interval
    }

    /// Time of the last processing pass.
    pub fn last_process_time(&self) -> Option<SimTime> {
        self.last_process_time
    }

    pub fn stats(&self) -> &DatacenterStats {
        &self.stats
    }

    /// Workloads still running on any host.
    pub fn active_count(&self) -> usize {
        self.hosts.values().map(|h| h.scheduler().active_count()).sum()
    }

    /// Looks up a workload that has not been reclaimed yet.
    pub fn workload(&self, workload: WorkloadId) -> Option<&WorkloadAdapter> {
        self.hosts.values().find_map(|h| h.scheduler().adapter(workload))
    }

    /// Drains the workloads that finished since the last call.
    pub fn take_completed(&mut self) -> Vec<WorkloadId> {
        std::mem::take(&mut self.completed)
    }

    /// Hands a finished workload back to the caller.
    pub fn reclaim(&mut self, workload: WorkloadId) -> BridgeResult<WorkloadAdapter> {
        match self.hosts.values_mut().find(|h| h.scheduler().contains(workload)) {
            Some(host) => host.scheduler_mut().reclaim(workload),
            None => Err(BridgeError::UnknownWorkload { workload }),
        }
    }

    /// Ticks every host to the sink's current time.
    ///
    /// All hosts are processed even if one fails; the first (or first
    /// fatal) error is returned next to the earliest wake-up requested.
    fn update_processing(&mut self, sink: &mut dyn EventSink) -> (Option<SimTime>, BridgeResult<()>) {
        let now = sink.now();
        let mut smallest: Option<SimTime> = None;
        let mut first_error = None;

        for host in self.hosts.values_mut() {
            match host.update(now, sink) {
                Ok(Some(next)) => smallest = Some(smallest.map_or(next, |s| s.min(next))),
                Ok(None) => {}
                Err(err) => keep_worst(&mut first_error, err),
            }
            self.completed.extend(host.scheduler_mut().take_completed());
        }

        self.last_process_time = Some(now);
        self.stats.processing_passes += 1;

        let result = match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        };
        (smallest, result)
    }

    /// Schedules the next housekeeping passes.
    ///
    /// The interval pass is always armed; an earlier wake-up requested by a
    /// workload is armed on top of it.
    fn rearm(&mut self, sink: &mut dyn EventSink, smallest: Option<SimTime>) {
        let now = sink.now();
        if let Some(next) = smallest {
            let delay = next - now;
            if delay < self.scheduling_interval {
                sink.schedule(self.id, delay.max(0.0), DatacenterEvent::Housekeeping);
                self.stats.housekeeping_armed += 1;
            }
        }
        sink.schedule(self.id, self.scheduling_interval, DatacenterEvent::Housekeeping);
        self.stats.housekeeping_armed += 1;
        tracing::trace!(datacenter = self.id, time = now, next = ?smallest, "housekeeping re-armed");
    }

    fn housekeeping(&mut self, sink: &mut dyn EventSink) -> BridgeResult<()> {
        let now = sink.now();
        if let Some(last) = self.last_process_time {
            if now < last + self.min_time_between_events {
                self.stats.housekeeping_skipped += 1;
                return Ok(());
            }
        }
        let (smallest, result) = self.update_processing(sink);
        self.rearm(sink, smallest);
        result
    }

    fn submit(&mut self, sink: &mut dyn EventSink, host: HostId, adapter: WorkloadAdapter) -> BridgeResult<()> {
        // Bring running workloads up to now before the new one shares the host.
        let (smallest, processed) = self.update_processing(sink);
        self.rearm(sink, smallest);

        let workload = adapter.id();
        let vertices: Vec<VertexId> = adapter.vertices().iter().copied().collect();
        let Some(target) = self.hosts.get_mut(&host) else {
            tracing::error!(datacenter = self.id, workload, host, "submission for a host this datacenter does not own");
            return worst_of(processed, BridgeError::UnknownHost { host });
        };
        let estimate = match target.scheduler_mut().submit(adapter) {
            Ok(estimate) => estimate,
            Err(err) => return worst_of(processed, err),
        };

        for vertex in vertices {
            if let Some(previous) = self.routes.insert(vertex, Route { host, workload }) {
                if previous.workload != workload {
                    tracing::warn!(vertex, from = previous.workload, to = workload, "vertex re-routed");
                }
            }
        }

        if estimate > 0.0 && estimate.is_finite() {
            sink.schedule(self.id, estimate, DatacenterEvent::Housekeeping);
            self.stats.housekeeping_armed += 1;
        }

        self.stats.submissions += 1;
        tracing::info!(
            datacenter = self.id,
            time = sink.now(),
            workload,
            host,
            estimate,
            "workload accepted"
        );
        processed
    }

    fn deliver(&mut self, event: NetworkEvent) -> BridgeResult<()> {
        let Some(route) = self.routes.get(&event.dest_vertex).copied() else {
            tracing::error!(
                datacenter = self.id,
                vertex = event.dest_vertex,
                "delivery for a vertex with no workload"
            );
            return Err(BridgeError::VertexNotRouted {
                vertex: event.dest_vertex,
            });
        };
        let host = self
            .hosts
            .get_mut(&route.host)
            .ok_or(BridgeError::UnknownHost { host: route.host })?;

        tracing::trace!(
            datacenter = self.id,
            vertex = event.dest_vertex,
            workload = route.workload,
            at = event.dest_timestamp,
            "delivering network event"
        );
        host.scheduler_mut().deliver(route.workload, event)?;
        self.stats.deliveries += 1;
        Ok(())
    }

    /// Exports the datacenter and per-host counters.
    pub fn export_stats(&self) -> serde_json::Value {
        let hosts: serde_json::Map<String, serde_json::Value> = self
            .hosts
            .iter()
            .map(|(id, host)| (id.to_string(), host.scheduler().export_stats()))
            .collect();

        serde_json::json!({
            "id": self.id,
            "routes": self.routes.len(),
            "last_process_time": self.last_process_time,
            "submissions": self.stats.submissions,
            "deliveries": self.stats.deliveries,
            "processing_passes": self.stats.processing_passes,
            "housekeeping_armed": self.stats.housekeeping_armed,
            "housekeeping_skipped": self.stats.housekeeping_skipped,
            "hosts": hosts,
        })
    }
}

impl EventRoutable for RoutingDatacenter {
    fn id(&self) -> DatacenterId {
        self.id
    }

    fn process_event(&mut self, sink: &mut dyn EventSink, event: DatacenterEvent) -> BridgeResult<()> {
        tracing::trace!(datacenter = self.id, time = sink.now(), event = event.tag(), "processing event");
        match event {
            DatacenterEvent::Submit { host, adapter } => self.submit(sink, host, *adapter),
            DatacenterEvent::Housekeeping => self.housekeeping(sink),
            DatacenterEvent::Deliver(event) => self.deliver(event),
        }
    }
}

/// Merges a submission failure with the result of the pass that preceded it.
fn worst_of(processed: BridgeResult<()>, err: BridgeError) -> BridgeResult<()> {
    let mut worst = processed.err();
    keep_worst(&mut worst, err);
    match worst {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
