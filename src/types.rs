//! Core type definitions for the co-simulation bridge.
//!
//! Two clocks meet in this crate: the outer cloud simulator counts in
//! seconds, the inner workload engine counts in milliseconds. Every value
//! that crosses the boundary goes through [`to_engine_time`] or
//! [`from_engine_time`].

/// Outer simulator time, in seconds.
pub type SimTime = f64;

/// Workload engine time, in milliseconds.
pub type EngineTime = f64;

/// Identity of one placed processing unit (producer, operator or consumer).
///
/// Only identity and ordering matter here: vertices are map keys and the
/// last tie-breakers of the network event order.
pub type VertexId = u64;

/// Identifier of a virtual host (VM) whose CPU share adapters multiplex.
pub type HostId = u32;

/// Identifier of a datacenter entity in the outer simulator.
pub type DatacenterId = u32;

/// Identifier of a submitted workload (one placement, one adapter).
pub type WorkloadId = u64;

/// Milliseconds per outer-simulator second.
pub const MILLIS_PER_SECOND: f64 = 1000.0;

/// Capacities are expressed in MIPS; budgets are raw instruction counts.
pub const INSTRUCTION_SCALE: f64 = 1_000_000.0;

/// Converts an outer simulator timestamp (s) into engine time (ms).
#[inline]
pub fn to_engine_time(time: SimTime) -> EngineTime {
    time * MILLIS_PER_SECOND
}

/// Converts an engine timestamp (ms) back into outer simulator time (s).
#[inline]
pub fn from_engine_time(time: EngineTime) -> SimTime {
    time / MILLIS_PER_SECOND
}
