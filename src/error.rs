//! Error types for the bridge.
//!
//! Errors fall into three groups:
//!
//! - **Contract violations** (non-monotonic time, use after reclaim): fatal
//!   to one workload, other workloads keep running.
//! - **Consistency violations** ([`BridgeError::UnresolvedDestination`],
//!   [`BridgeError::VertexNotRouted`]): the placement registry and the
//!   routing datacenter disagree. The run cannot be repaired locally.
//! - Lookup failures on identifiers handed in by the caller.
//!
//! Numeric edge cases (zero-length ticks, negative proration) are clamped
//! where they happen and never show up here.

use thiserror::Error;

use crate::types::{DatacenterId, HostId, SimTime, VertexId, WorkloadId};

/// Errors raised by the bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("workload {workload}: tick ends at {current} before it starts at {previous}")]
    NonMonotonicTime {
        workload: WorkloadId,
        previous: SimTime,
        current: SimTime,
    },

    #[error("workload {workload} has already been reclaimed")]
    WorkloadReclaimed { workload: WorkloadId },

    #[error("workload {workload} is still running and cannot be reclaimed")]
    WorkloadStillRunning { workload: WorkloadId },

    #[error("workload {workload} is not known to this scheduler")]
    UnknownWorkload { workload: WorkloadId },

    #[error("workload {workload} was submitted twice")]
    DuplicateWorkload { workload: WorkloadId },

    #[error("host {host} is not registered")]
    UnknownHost { host: HostId },

    #[error("datacenter {datacenter} is not registered")]
    UnknownDatacenter { datacenter: DatacenterId },

    #[error("vertex {vertex} cannot move to host {host}, already placed on host {existing}")]
    VertexAlreadyPlaced {
        vertex: VertexId,
        host: HostId,
        existing: HostId,
    },

    #[error("destination vertex {vertex} has no registered host")]
    UnresolvedDestination { vertex: VertexId },

    #[error("vertex {vertex} is not routed to any workload in this datacenter")]
    VertexNotRouted { vertex: VertexId },
}

impl BridgeError {
    /// Returns true if the error means the whole simulation run is corrupt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::UnresolvedDestination { .. } | BridgeError::VertexNotRouted { .. }
        )
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
