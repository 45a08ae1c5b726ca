//! Fixed-latency message delivery between vertices on different hosts.
//!
//! The engine reports outbound batches in milliseconds; the transport
//! converts them to outer simulator seconds, resolves the destination
//! vertex's host through the placement registry, and schedules a
//! [`DatacenterEvent::Deliver`] on the datacenter owning that host.
//!
//! # Example
//!
//! ```
//! use cepbridge::broker::PlacementRegistry;
//! use cepbridge::network::{FixedDelayTransport, NetworkInterface};
//! use cepbridge::simulation::EventQueue;
//! use cepbridge::EventSet;
//!
//! let registry = PlacementRegistry::shared();
//! registry.write().register_host(1, 10);
//! registry.write().assign(2, 1).unwrap();
//!
//! let transport = FixedDelayTransport::new(registry, 0.5);
//! let mut queue = EventQueue::new();
//!
//! // Engine time 100 ms is 0.1 s; delivery lands at 0.6 s.
//! transport.send(&mut queue, 100.0, 1, 2, EventSet::default()).unwrap();
//! let arrival = queue.peek_time().unwrap();
//! assert!((arrival - 0.6).abs() < 1e-9);
//! ```

use crate::broker::SharedRegistry;
use crate::error::{BridgeError, BridgeResult};
use crate::event::{DatacenterEvent, EventSet, NetworkEvent};
use crate::types::{from_engine_time, DatacenterId, EngineTime, SimTime, VertexId};

/// Outbound scheduling seam towards the outer simulator.
///
/// Everything the bridge wants to happen later goes through here: network
/// deliveries, housekeeping passes and workload submissions.
pub trait EventSink {
    /// Current outer simulator time.
    fn now(&self) -> SimTime;

    /// Schedules `event` on datacenter `target`, `delay` seconds from now.
    fn schedule(&mut self, target: DatacenterId, delay: SimTime, event: DatacenterEvent);
}

/// A transport that carries batches from one vertex to another.
pub trait NetworkInterface: Send + Sync {
    /// Sends `payload` produced at engine time `timestamp_ms`.
    ///
    /// Delivery is asynchronous: the call only schedules it.
    fn send(
        &self,
        sink: &mut dyn EventSink,
        timestamp_ms: EngineTime,
        origin: VertexId,
        dest: VertexId,
        payload: EventSet,
    ) -> BridgeResult<()>;
}

/// Delivers every batch after the same propagation delay.
///
/// Bandwidth and contention are not modelled.
#[derive(Clone, Debug)]
pub struct FixedDelayTransport {
    registry: SharedRegistry,
    /// Propagation delay, in seconds
    delay: SimTime,
}

impl FixedDelayTransport {
    /// Creates a transport resolving destinations through `registry`.
    pub fn new(registry: SharedRegistry, delay: SimTime) -> Self {
        Self { registry, delay }
    }

    /// Returns the propagation delay in seconds.
    pub fn delay(&self) -> SimTime {
        self.delay
    }
}

impl NetworkInterface for FixedDelayTransport {
    fn send(
        &self,
        sink: &mut dyn EventSink,
        timestamp_ms: EngineTime,
        origin: VertexId,
        dest: VertexId,
        payload: EventSet,
    ) -> BridgeResult<()> {
        let location = match self.registry.read().resolve(dest) {
            Some(location) => location,
            None => {
                tracing::error!(origin, dest, "destination vertex was never placed");
                return Err(BridgeError::UnresolvedDestination { vertex: dest });
            }
        };

        let start = from_engine_time(timestamp_ms);
        let arrival = start + self.delay;
        // Engines report times inside the slice that just ran, which can
        // lie behind the outer clock; never schedule into the past.
        let wait = (arrival - sink.now()).max(0.0);

        tracing::trace!(
            origin,
            dest,
            host = location.host,
            datacenter = location.datacenter,
            start,
            arrival,
            "scheduling network delivery"
        );

        sink.schedule(
            location.datacenter,
            wait,
            DatacenterEvent::Deliver(NetworkEvent::new(start, origin, arrival, dest, payload)),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PlacementRegistry;

    #[derive(Default)]
    struct RecordingSink {
        now: SimTime,
        scheduled: Vec<(DatacenterId, SimTime, DatacenterEvent)>,
    }

    impl EventSink for RecordingSink {
        fn now(&self) -> SimTime {
            self.now
        }

        fn schedule(&mut self, target: DatacenterId, delay: SimTime, event: DatacenterEvent) {
            self.scheduled.push((target, delay, event));
        }
    }

    fn registry_with(vertex: VertexId, host: u32, datacenter: DatacenterId) -> SharedRegistry {
        let registry = PlacementRegistry::shared();
        registry.write().register_host(host, datacenter);
        registry.write().assign(vertex, host).unwrap();
        registry
    }

    #[test]
    fn test_send_message() {
        let transport = FixedDelayTransport::new(registry_with(2, 5, 1), 0.5);
        let mut sink = RecordingSink::default();
        let payload = EventSet::new(5000.0, 10.0, 1.0).with_total(7, 5000.0);

        transport.send(&mut sink, 100.0, 1, 2, payload.clone()).unwrap();

        assert_eq!(sink.scheduled.len(), 1);
        let (target, delay, event) = &sink.scheduled[0];
        assert_eq!(*target, 1);
        assert!((delay - 0.6).abs() < 1e-12);
        match event {
            DatacenterEvent::Deliver(net) => {
                assert!((net.origin_timestamp - 0.1).abs() < 1e-12);
                assert!((net.dest_timestamp - 0.6).abs() < 1e-12);
                assert_eq!(net.origin_vertex, 1);
                assert_eq!(net.dest_vertex, 2);
                assert_eq!(net.payload, payload);
            }
            other => panic!("expected a delivery, got {other:?}"),
        }
    }

    #[test]
    fn test_delay_is_relative_to_outer_clock() {
        let transport = FixedDelayTransport::new(registry_with(2, 5, 1), 0.5);
        let mut sink = RecordingSink {
            now: 0.4,
            ..Default::default()
        };

        transport.send(&mut sink, 100.0, 1, 2, EventSet::default()).unwrap();
        assert!((sink.scheduled[0].1 - 0.2).abs() < 1e-12);

        // Arrival already behind the clock: deliver now.
        sink.now = 10.0;
        transport.send(&mut sink, 100.0, 1, 2, EventSet::default()).unwrap();
        assert_eq!(sink.scheduled[1].1, 0.0);
    }

    #[test]
    fn test_unresolved_destination() {
        let transport = FixedDelayTransport::new(PlacementRegistry::shared(), 0.5);
        let mut sink = RecordingSink::default();

        let result = transport.send(&mut sink, 100.0, 1, 99, EventSet::default());
        assert_eq!(result, Err(BridgeError::UnresolvedDestination { vertex: 99 }));
        assert!(sink.scheduled.is_empty());
    }
}
