//! Configuration system for the bridge.
//!
//! A deployment (datacenters, hosts, timing and network parameters) can be
//! described in YAML or JSON and turned into a ready-to-run [`Deployment`].
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   end_time: 600
//!   scheduling_interval: 0.1
//!   min_time_between_events: 0.01
//!   log_level: info
//!
//! adapter:
//!   completion_epsilon: 0.01
//!   record_history: false
//!
//! network:
//!   delay: 0.05
//!
//! datacenters:
//!   - id: 1
//!     hosts:
//!       - id: 1
//!         pes: [1000, 1000]
//!       - id: 2
//!         pes: [2000]
//! ```
//!
//! Leaving `network` out makes every workload isolated.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::{WorkloadAdapter, COMPLETION_EPSILON};
use crate::broker::{Broker, PlacementRegistry};
use crate::datacenter::{RoutingDatacenter, VirtualHost};
use crate::error::BridgeResult;
use crate::network::FixedDelayTransport;
use crate::scheduler::MIN_EVENT_GAP;
use crate::simulation::Simulation;
use crate::types::{DatacenterId, HostId, SimTime, WorkloadId};
use crate::workload::{Placement, WorkloadEngine};

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Global simulation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Time (s) at which the run stops
    #[serde(default = "default_end_time")]
    pub end_time: SimTime,

    /// Housekeeping period (s)
    #[serde(default = "default_scheduling_interval")]
    pub scheduling_interval: SimTime,

    /// Housekeeping closer than this (s) to the previous pass is dropped;
    /// also the smallest wake-up gap a host may request
    #[serde(default = "default_min_time_between_events")]
    pub min_time_between_events: SimTime,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_end_time() -> SimTime {
    600.0
}

fn default_scheduling_interval() -> SimTime {
    0.1
}

fn default_min_time_between_events() -> SimTime {
    MIN_EVENT_GAP
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            end_time: default_end_time(),
            scheduling_interval: default_scheduling_interval(),
            min_time_between_events: default_min_time_between_events(),
            log_level: default_log_level(),
        }
    }
}

/// Parameters applied to every workload adapter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterParams {
    /// Tolerance of the completion check, in duration units
    #[serde(default = "default_completion_epsilon")]
    pub completion_epsilon: f64,

    /// Keep every execution record
    #[serde(default)]
    pub record_history: bool,
}

fn default_completion_epsilon() -> f64 {
    COMPLETION_EPSILON
}

impl Default for AdapterParams {
    fn default() -> Self {
        Self {
            completion_epsilon: default_completion_epsilon(),
            record_history: false,
        }
    }
}

/// Fixed-delay network parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Propagation delay (s)
    #[serde(default)]
    pub delay: SimTime,
}

/// A virtual host and the MIPS of each of its PEs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostConfig {
    pub id: HostId,
    pub pes: Vec<f64>,
}

/// A datacenter and its hosts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatacenterConfig {
    pub id: DatacenterId,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

/// Complete bridge configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub simulation: SimulationParams,

    #[serde(default)]
    pub adapter: AdapterParams,

    /// Absent means workloads do not talk to each other
    #[serde(default)]
    pub network: Option<NetworkParams>,

    #[serde(default)]
    pub datacenters: Vec<DatacenterConfig>,
}

impl BridgeConfig {
    /// Creates a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: BridgeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let sim = &self.simulation;
        if !(sim.scheduling_interval > 0.0) {
            return Err(ConfigError::Validation(format!(
                "scheduling_interval must be positive, got {}",
                sim.scheduling_interval
            )));
        }
        if !(sim.min_time_between_events > 0.0) {
            return Err(ConfigError::Validation(format!(
                "min_time_between_events must be positive, got {}",
                sim.min_time_between_events
            )));
        }
        if !(sim.end_time >= 0.0) {
            return Err(ConfigError::Validation(format!(
                "end_time must not be negative, got {}",
                sim.end_time
            )));
        }
        if !(self.adapter.completion_epsilon >= 0.0) {
            return Err(ConfigError::Validation(format!(
                "completion_epsilon must not be negative, got {}",
                self.adapter.completion_epsilon
            )));
        }
        if let Some(network) = &self.network {
            if !(network.delay >= 0.0) {
                return Err(ConfigError::Validation(format!(
                    "network delay must not be negative, got {}",
                    network.delay
                )));
            }
        }

        let mut datacenter_ids = HashSet::new();
        let mut host_ids = HashSet::new();
        for dc in &self.datacenters {
            if !datacenter_ids.insert(dc.id) {
                return Err(ConfigError::Validation(format!("Duplicate datacenter ID: {}", dc.id)));
            }
            for host in &dc.hosts {
                if !host_ids.insert(host.id) {
                    return Err(ConfigError::Validation(format!("Duplicate host ID: {}", host.id)));
                }
                if !host.pes.iter().any(|&mips| mips > 0.0) {
                    return Err(ConfigError::Validation(format!(
                        "Host {} has no PE with positive MIPS",
                        host.id
                    )));
                }
                if host.pes.iter().any(|&mips| !(mips >= 0.0)) {
                    return Err(ConfigError::Validation(format!(
                        "Host {} has a PE with negative MIPS",
                        host.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns the number of hosts across all datacenters.
    pub fn host_count(&self) -> usize {
        self.datacenters.iter().map(|dc| dc.hosts.len()).sum()
    }

    /// Wires datacenters, broker and transport from this configuration.
    pub fn build(&self) -> ConfigResult<Deployment> {
        self.validate()?;
        let sim = &self.simulation;

        let registry = PlacementRegistry::shared();
        let mut broker = Broker::new(registry.clone());
        let mut simulation = Simulation::new();

        for dc in &self.datacenters {
            let mut datacenter =
                RoutingDatacenter::new(dc.id, sim.scheduling_interval, sim.min_time_between_events);
            for host in &dc.hosts {
                datacenter.add_host(
                    VirtualHost::new(host.id, host.pes.clone()).with_min_event_gap(sim.min_time_between_events),
                );
                broker.add_host(host.id, dc.id);
            }
            simulation.add_datacenter(datacenter);
        }

        let transport = self
            .network
            .as_ref()
            .map(|network| Arc::new(FixedDelayTransport::new(registry, network.delay)));

        tracing::debug!(
            datacenters = self.datacenters.len(),
            hosts = self.host_count(),
            networked = transport.is_some(),
            "deployment built"
        );

        Ok(Deployment {
            simulation,
            broker,
            transport,
            adapter: self.adapter.clone(),
            end_time: sim.end_time,
        })
    }
}

/// Builder for creating BridgeConfig programmatically.
#[derive(Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the end of the run.
    pub fn end_time(mut self, time: SimTime) -> Self {
        self.config.simulation.end_time = time;
        self
    }

    /// Sets the housekeeping period.
    pub fn scheduling_interval(mut self, interval: SimTime) -> Self {
        self.config.simulation.scheduling_interval = interval;
        self
    }

    /// Sets the minimum gap between processing passes.
    pub fn min_time_between_events(mut self, gap: SimTime) -> Self {
        self.config.simulation.min_time_between_events = gap;
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    /// Sets the completion tolerance.
    pub fn completion_epsilon(mut self, epsilon: f64) -> Self {
        self.config.adapter.completion_epsilon = epsilon;
        self
    }

    /// Enables execution history on every adapter.
    pub fn record_history(mut self, enable: bool) -> Self {
        self.config.adapter.record_history = enable;
        self
    }

    /// Connects workloads through a fixed-delay network.
    pub fn network_delay(mut self, delay: SimTime) -> Self {
        self.config.network = Some(NetworkParams { delay });
        self
    }

    /// Adds a host to datacenter `datacenter`, creating the datacenter if needed.
    pub fn add_host(mut self, datacenter: DatacenterId, host: HostId, pes: Vec<f64>) -> Self {
        let host = HostConfig { id: host, pes };
        match self.config.datacenters.iter_mut().find(|dc| dc.id == datacenter) {
            Some(dc) => dc.hosts.push(host),
            None => self.config.datacenters.push(DatacenterConfig {
                id: datacenter,
                hosts: vec![host],
            }),
        }
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<BridgeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// A wired simulation: datacenters, broker and (optionally) the network.
#[derive(Debug)]
pub struct Deployment {
    pub simulation: Simulation,
    pub broker: Broker,
    pub transport: Option<Arc<FixedDelayTransport>>,
    adapter: AdapterParams,
    end_time: SimTime,
}

impl Deployment {
    /// Creates an adapter with the configured tolerance, history and transport.
    pub fn adapter(&self, id: WorkloadId, placement: Placement, engine: Box<dyn WorkloadEngine>) -> WorkloadAdapter {
        let adapter = WorkloadAdapter::new(id, placement, engine)
            .with_epsilon(self.adapter.completion_epsilon)
            .with_history(self.adapter.record_history);
        match &self.transport {
            Some(transport) => adapter.with_network(transport.clone()),
            None => adapter,
        }
    }

    /// Builds an adapter and queues it on the broker.
    pub fn queue(&mut self, id: WorkloadId, placement: Placement, engine: Box<dyn WorkloadEngine>) {
        let adapter = self.adapter(id, placement, engine);
        self.broker.queue(adapter);
    }

    pub fn end_time(&self) -> SimTime {
        self.end_time
    }

    /// Submits the queued workloads and runs to the configured end time.
    pub fn run(&mut self) -> BridgeResult<SimTime> {
        self.simulation.submit(&mut self.broker);
        self.simulation.run_until(self.end_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::new();
        assert_eq!(config.simulation.end_time, 600.0);
        assert_eq!(config.simulation.scheduling_interval, 0.1);
        assert_eq!(config.simulation.min_time_between_events, 0.01);
        assert_eq!(config.adapter.completion_epsilon, 0.01);
        assert!(config.network.is_none());
        assert!(config.datacenters.is_empty());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
simulation:
  end_time: 120
  scheduling_interval: 0.5
  log_level: debug

adapter:
  record_history: true

network:
  delay: 0.05

datacenters:
  - id: 1
    hosts:
      - id: 1
        pes: [1000, 1000]
      - id: 2
        pes: [2000]
"#;

        let config = BridgeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.simulation.end_time, 120.0);
        assert_eq!(config.simulation.scheduling_interval, 0.5);
        assert_eq!(config.simulation.min_time_between_events, 0.01);
        assert!(config.adapter.record_history);
        assert_eq!(config.network.as_ref().map(|n| n.delay), Some(0.05));
        assert_eq!(config.host_count(), 2);
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "simulation": {"end_time": 10},
            "datacenters": [
                {"id": 3, "hosts": [{"id": 4, "pes": [500]}]}
            ]
        }"#;

        let config = BridgeConfig::from_json(json).unwrap();
        assert_eq!(config.simulation.end_time, 10.0);
        assert_eq!(config.datacenters[0].hosts[0].pes, vec![500.0]);
    }

    #[test]
    fn test_builder() {
        let config = BridgeConfigBuilder::new()
            .end_time(50.0)
            .network_delay(0.2)
            .add_host(1, 1, vec![1000.0])
            .add_host(1, 2, vec![1000.0])
            .add_host(2, 3, vec![500.0])
            .build()
            .unwrap();

        assert_eq!(config.datacenters.len(), 2);
        assert_eq!(config.host_count(), 3);
    }

    #[test]
    fn test_validation_duplicate_host() {
        let yaml = r#"
datacenters:
  - id: 1
    hosts:
      - id: 1
        pes: [1000]
  - id: 2
    hosts:
      - id: 1
        pes: [1000]
"#;
        assert!(matches!(BridgeConfig::from_yaml(yaml), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_host_without_capacity() {
        let result = BridgeConfigBuilder::new().add_host(1, 1, vec![0.0]).build();
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_bad_timing() {
        assert!(BridgeConfigBuilder::new().scheduling_interval(0.0).build().is_err());
        assert!(BridgeConfigBuilder::new().min_time_between_events(-1.0).build().is_err());
        assert!(BridgeConfigBuilder::new().completion_epsilon(-0.1).build().is_err());
        assert!(BridgeConfigBuilder::new().network_delay(-0.1).build().is_err());
    }

    #[test]
    fn test_unknown_format() {
        assert!(matches!(
            BridgeConfig::from_file("bridge.toml"),
            Err(ConfigError::UnknownFormat(ext)) if ext == "toml"
        ));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = BridgeConfigBuilder::new()
            .end_time(30.0)
            .network_delay(0.1)
            .add_host(1, 1, vec![1000.0, 1000.0])
            .build()
            .unwrap();

        let yaml = config.to_yaml().unwrap();
        let restored = BridgeConfig::from_yaml(&yaml).unwrap();
        assert_eq!(restored.simulation.end_time, 30.0);
        assert_eq!(restored.host_count(), 1);
        assert!(restored.network.is_some());
    }

    #[test]
    fn test_build_deployment() {
        let config = BridgeConfigBuilder::new()
            .network_delay(0.1)
            .add_host(1, 1, vec![1000.0])
            .add_host(2, 2, vec![1000.0])
            .build()
            .unwrap();

        let deployment = config.build().unwrap();
        assert!(deployment.simulation.datacenter(1).is_some());
        assert!(deployment.simulation.datacenter(2).is_some());
        assert_eq!(deployment.broker.registry().read().host_count(), 2);
        assert_eq!(deployment.broker.registry().read().datacenter_of(2), Some(2));
        assert!(deployment.transport.is_some());
    }
}
