//! Placement registry and submission-time broker.
//!
//! The registry records which virtual host every vertex lives on and which
//! datacenter owns every host. It is written by the [`Broker`] when
//! workloads are submitted and read by the transport on every send.
//! Entries are never removed: workloads do not migrate.
//!
//! The registry is shared as [`SharedRegistry`]. There is a single writer
//! (the broker, at submission time); everyone else only reads.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::adapter::WorkloadAdapter;
use crate::error::{BridgeError, BridgeResult};
use crate::event::DatacenterEvent;
use crate::network::EventSink;
use crate::types::{DatacenterId, HostId, VertexId, WorkloadId};

/// Registry shared between the broker, the transport and the datacenters.
pub type SharedRegistry = Arc<RwLock<PlacementRegistry>>;

/// Where a vertex currently runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub host: HostId,
    pub datacenter: DatacenterId,
}

/// Append-only vertex → host and host → datacenter maps.
#[derive(Debug, Default)]
pub struct PlacementRegistry {
    vertex_to_host: HashMap<VertexId, HostId>,
    host_to_datacenter: HashMap<HostId, DatacenterId>,
}

impl PlacementRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry ready to be shared.
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Records that `host` is owned by `datacenter`.
    pub fn register_host(&mut self, host: HostId, datacenter: DatacenterId) {
        self.host_to_datacenter.insert(host, datacenter);
    }

    /// Places `vertex` on `host`.
    ///
    /// Re-placing a vertex on the host it already occupies is a no-op;
    /// moving it elsewhere is rejected.
    pub fn assign(&mut self, vertex: VertexId, host: HostId) -> BridgeResult<()> {
        self.check(std::iter::once(vertex), host)?;
        self.vertex_to_host.insert(vertex, host);
        Ok(())
    }

    /// Places every vertex on `host`, or none of them.
    pub fn assign_all(&mut self, vertices: &[VertexId], host: HostId) -> BridgeResult<()> {
        self.check(vertices.iter().copied(), host)?;
        for &vertex in vertices {
            self.vertex_to_host.insert(vertex, host);
        }
        Ok(())
    }

    /// Returns the first reason the vertices cannot be placed on `host`.
    pub fn check(&self, vertices: impl IntoIterator<Item = VertexId>, host: HostId) -> BridgeResult<()> {
        if !self.host_to_datacenter.contains_key(&host) {
            return Err(BridgeError::UnknownHost { host });
        }
        for vertex in vertices {
            match self.vertex_to_host.get(&vertex) {
                Some(&existing) if existing != host => {
                    return Err(BridgeError::VertexAlreadyPlaced {
                        vertex,
                        host,
                        existing,
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Returns the host a vertex was placed on.
    pub fn host_of(&self, vertex: VertexId) -> Option<HostId> {
        self.vertex_to_host.get(&vertex).copied()
    }

    /// Returns the datacenter owning a host.
    pub fn datacenter_of(&self, host: HostId) -> Option<DatacenterId> {
        self.host_to_datacenter.get(&host).copied()
    }

    /// Resolves a vertex to its host and that host's datacenter.
    pub fn resolve(&self, vertex: VertexId) -> Option<Location> {
        let host = self.host_of(vertex)?;
        let datacenter = self.datacenter_of(host)?;
        Some(Location { host, datacenter })
    }

    /// Number of placed vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertex_to_host.len()
    }

    /// Number of registered hosts.
    pub fn host_count(&self) -> usize {
        self.host_to_datacenter.len()
    }
}

/// Binds workloads to hosts and hands them to the owning datacenters.
///
/// Pinned placements go to their host; the others are spread round-robin
/// over the hosts known to the broker, in registration order.
pub struct Broker {
    registry: SharedRegistry,
    hosts: Vec<HostId>,
    next_host: usize,
    pending: Vec<WorkloadAdapter>,
    submitted: Vec<(WorkloadId, HostId)>,
    rejected: Vec<(WorkloadId, BridgeError)>,
}

impl Broker {
    /// Creates a broker writing into `registry`.
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            hosts: Vec::new(),
            next_host: 0,
            pending: Vec::new(),
            submitted: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Returns the registry this broker writes into.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Makes `host` (owned by `datacenter`) available for placement.
    pub fn add_host(&mut self, host: HostId, datacenter: DatacenterId) {
        self.registry.write().register_host(host, datacenter);
        if !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
    }

    /// Queues a workload for the next submission round.
    pub fn queue(&mut self, adapter: WorkloadAdapter) {
        self.pending.push(adapter);
    }

    /// Number of workloads waiting for a host.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// `(workload, host)` pairs submitted so far, in submission order.
    pub fn submitted(&self) -> &[(WorkloadId, HostId)] {
        &self.submitted
    }

    /// Workloads dropped at submission, with the reason.
    pub fn rejected(&self) -> &[(WorkloadId, BridgeError)] {
        &self.rejected
    }

    /// Places every queued workload and schedules its submission.
    ///
    /// Any host registered with the broker is taken to be able to run
    /// workloads. See [`Broker::submit_workloads_where`].
    pub fn submit_workloads(&mut self, sink: &mut dyn EventSink) -> usize {
        self.submit_workloads_where(sink, |_, _| true)
    }

    /// Places every queued workload on a host `owns` accepts.
    ///
    /// Vertices are registered before the submit event is scheduled, so the
    /// transport can resolve them as soon as the workload starts sending.
    /// Workloads whose host is not available stay queued. A workload that
    /// reuses a submitted id, or whose vertices already live on another
    /// host, is rejected without touching the registry. Returns the number
    /// of workloads scheduled.
    pub fn submit_workloads_where<F>(&mut self, sink: &mut dyn EventSink, owns: F) -> usize
    where
        F: Fn(DatacenterId, HostId) -> bool,
    {
        let mut postponed = Vec::new();
        let mut count = 0;

        for adapter in std::mem::take(&mut self.pending) {
            let workload = adapter.id();
            if self.submitted.iter().any(|&(id, _)| id == workload) {
                self.reject(workload, BridgeError::DuplicateWorkload { workload });
                continue;
            }

            let host = match adapter.placement().host {
                Some(host) => host,
                None if self.hosts.is_empty() => {
                    tracing::warn!(workload, "no host available, postponing");
                    postponed.push(adapter);
                    continue;
                }
                None => {
                    let host = self.hosts[self.next_host];
                    self.next_host = (self.next_host + 1) % self.hosts.len();
                    host
                }
            };

            let owner = self.registry.read().datacenter_of(host);
            let datacenter = match owner {
                Some(datacenter) if owns(datacenter, host) => datacenter,
                _ => {
                    tracing::warn!(workload, host, "bound host not available, postponing");
                    postponed.push(adapter);
                    continue;
                }
            };

            let vertices: Vec<VertexId> = adapter.placement().vertices.iter().copied().collect();
            // Check under the read lock; the write lock is only taken for a
            // placement that goes through whole.
            let checked = self.registry.read().check(vertices.iter().copied(), host);
            let placed = checked.and_then(|()| self.registry.write().assign_all(&vertices, host));
            if let Err(err) = placed {
                self.reject(workload, err);
                continue;
            }

            tracing::info!(
                time = sink.now(),
                workload,
                host,
                datacenter,
                "sending workload to host"
            );
            self.submitted.push((workload, host));
            sink.schedule(
                datacenter,
                0.0,
                DatacenterEvent::Submit {
                    host,
                    adapter: Box::new(adapter),
                },
            );
            count += 1;
        }

        self.pending = postponed;
        count
    }

    fn reject(&mut self, workload: WorkloadId, err: BridgeError) {
        tracing::warn!(workload, error = %err, "workload rejected");
        self.rejected.push((workload, err));
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("hosts", &self.hosts)
            .field("pending", &self.pending.len())
            .field("submitted", &self.submitted)
            .field("rejected", &self.rejected)
            .finish()
    }
}
