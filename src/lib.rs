//! # cepbridge
//!
//! A co-simulation bridge between an outer, time-stepped cloud simulator and
//! inner event-processing workload engines.
//!
//! The outer simulator advances in variable-length steps and only knows
//! hosts, CPU shares and wall time. A workload engine consumes an
//! instruction budget from a given start time and reports what its
//! operators did. The bridge sits in between:
//!
//! - **Two clocks**: the outer simulator counts seconds, engines count
//!   milliseconds. Every crossing goes through [`types::to_engine_time`]
//!   and [`types::from_engine_time`].
//! - **Completion and proration**: a [`WorkloadAdapter`] tracks wall time
//!   per placement, finishes the workload once its duration is reached and
//!   cuts the last budget down to the part of the slice it actually used.
//! - **Delayed messaging**: outbound batches travel through a
//!   [`FixedDelayTransport`] and are replayed to the receiving engine in a
//!   deterministic order.
//! - **Liveness**: a [`RoutingDatacenter`] re-arms housekeeping every
//!   scheduling interval, so the clock keeps moving while workloads wait on
//!   the network.
//!
//! ## Quick Start
//!
//! ```rust
//! use cepbridge::config::BridgeConfigBuilder;
//! use cepbridge::workload::{Placement, RecordingEngine};
//!
//! let config = BridgeConfigBuilder::new()
//!     .end_time(20.0)
//!     .network_delay(0.05)
//!     .add_host(1, 1, vec![1000.0])
//!     .add_host(1, 2, vec![1000.0])
//!     .build()
//!     .unwrap();
//!
//! let mut deployment = config.build().unwrap();
//!
//! // Vertex 1 on host 1 feeds vertex 2 on host 2.
//! let (sender, _) = RecordingEngine::new();
//! let (receiver, log) = RecordingEngine::new();
//! deployment.queue(1, Placement::new([1], 10).on_host(1), Box::new(sender.sending(1, 2)));
//! deployment.queue(2, Placement::new([2], 10).on_host(2), Box::new(receiver));
//!
//! deployment.run().unwrap();
//!
//! assert_eq!(deployment.simulation.completed().len(), 2);
//! assert!(!log.enqueued().is_empty());
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use cepbridge::config::BridgeConfig;
//!
//! let config = BridgeConfig::from_file("bridge.yaml")?;
//! cepbridge::init_logging(&config.simulation.log_level);
//! let mut deployment = config.build()?;
//! ```

pub mod types;
pub mod error;
pub mod event;
pub mod workload;
pub mod adapter;
pub mod scheduler;
pub mod network;
pub mod broker;
pub mod datacenter;
pub mod simulation;
pub mod config;

// Re-export commonly used types
pub use types::{DatacenterId, EngineTime, HostId, SimTime, VertexId, WorkloadId};
pub use error::{BridgeError, BridgeResult};
pub use event::{DatacenterEvent, EventSet, NetworkEvent};
pub use workload::{ExecutionRecord, Placement, WorkloadEngine};
pub use adapter::{Transport, WorkloadAdapter, COMPLETION_EPSILON};
pub use scheduler::{CapacityScheduler, Schedulable, MIN_EVENT_GAP};
pub use network::{EventSink, FixedDelayTransport, NetworkInterface};
pub use broker::{Broker, PlacementRegistry, SharedRegistry};
pub use datacenter::{EventRoutable, RoutingDatacenter, VirtualHost};
pub use simulation::{EventQueue, Simulation};
pub use config::{BridgeConfig, BridgeConfigBuilder, ConfigError, Deployment};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// takes precedence over `level`.
///
/// # Example
///
/// ```rust,ignore
/// cepbridge::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
