//! Configuration file support for fabricd
//!
//! Loads and validates the daemon configuration from a TOML file.
//! Default location: /etc/fabric/fabricd.toml

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use fabric_common::{DeviceClientConfig, FabricError, FabricResult};
use fabric_topology::{SnmpVersion, WalkConfig, DEFAULT_HOST_MARKERS};
use fabric_types::VlanId;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::VlanRanges;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fabric/fabricd.toml";

/// REST listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Entity store backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Entity store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    #[serde(default = "default_redis_db")]
    pub redis_db: u32,

    /// Interval between liveness pings, 0 disables
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

/// SNMP polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpConfig {
    #[serde(default = "default_community")]
    pub community: String,

    #[serde(default)]
    pub version: SnmpVersion,

    #[serde(default = "default_snmp_port")]
    pub port: u16,

    #[serde(default = "default_snmp_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_repetitions")]
    pub max_repetitions: u32,
}

/// Topology refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// System-description substrings marking a neighbor as a host
    #[serde(default = "default_host_os_markers")]
    pub host_os_markers: Vec<String>,
}

/// Local VLAN ranges per sharing class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlanConfig {
    #[serde(default = "default_unshared_min")]
    pub unshared_min: u32,

    #[serde(default = "default_unshared_max")]
    pub unshared_max: u32,

    #[serde(default = "default_shared_min")]
    pub shared_min: u32,

    #[serde(default = "default_shared_max")]
    pub shared_max: u32,

    /// Interval of the orphaned-allocation sweep, 0 disables
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

/// Switch agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Agent base URL; `{mgr}` is replaced by the switch management IP
    #[serde(default = "default_agent_url")]
    pub agent_url: String,

    #[serde(default = "default_device_timeout")]
    pub timeout_secs: u64,

    /// Device type used when a switch record carries none
    #[serde(default = "default_device_type")]
    pub default_device_type: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

/// Complete fabricd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub snmp: SnmpConfig,

    #[serde(default)]
    pub topology: TopologyConfig,

    #[serde(default)]
    pub vlan: VlanConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_db() -> u32 {
    0
}

fn default_keepalive() -> u64 {
    1800
}

fn default_community() -> String {
    "public".to_string()
}

fn default_snmp_port() -> u16 {
    161
}

fn default_snmp_timeout() -> u64 {
    10
}

fn default_max_repetitions() -> u32 {
    10
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_host_os_markers() -> Vec<String> {
    DEFAULT_HOST_MARKERS.iter().map(|m| m.to_string()).collect()
}

fn default_unshared_min() -> u32 {
    2
}

fn default_unshared_max() -> u32 {
    4000
}

fn default_shared_min() -> u32 {
    4002
}

fn default_shared_max() -> u32 {
    4094
}

fn default_reconcile_interval() -> u64 {
    300
}

fn default_agent_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

fn default_device_timeout() -> u64 {
    10
}

fn default_device_type() -> String {
    "h3c".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            redis_db: default_redis_db(),
            keepalive_secs: default_keepalive(),
        }
    }
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            community: default_community(),
            version: SnmpVersion::default(),
            port: default_snmp_port(),
            timeout_secs: default_snmp_timeout(),
            max_repetitions: default_max_repetitions(),
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            host_os_markers: default_host_os_markers(),
        }
    }
}

impl Default for VlanConfig {
    fn default() -> Self {
        Self {
            unshared_min: default_unshared_min(),
            unshared_max: default_unshared_max(),
            shared_min: default_shared_min(),
            shared_max: default_shared_max(),
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            agent_url: default_agent_url(),
            timeout_secs: default_device_timeout(),
            default_device_type: default_device_type(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn optional_interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl FabricConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> FabricResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                FabricError::invalid_config(path.display().to_string(), e.to_string())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(FabricError::invalid_config(
                path.display().to_string(),
                e.to_string(),
            )),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> FabricResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| FabricError::invalid_config("config", e.to_string()))?;
        fs::write(path, content)
            .map_err(|e| FabricError::invalid_config(path.display().to_string(), e.to_string()))
    }

    pub fn listen_addr(&self) -> FabricResult<SocketAddr> {
        self.server
            .listen_addr
            .parse()
            .map_err(|e| FabricError::invalid_config("server.listen_addr", format!("{}", e)))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.topology.refresh_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        optional_interval(self.vlan.reconcile_interval_secs)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        optional_interval(self.store.keepalive_secs)
    }

    pub fn walk_config(&self) -> WalkConfig {
        WalkConfig {
            version: self.snmp.version,
            community: self.snmp.community.clone(),
            port: self.snmp.port,
            timeout: Duration::from_secs(self.snmp.timeout_secs),
            max_repetitions: self.snmp.max_repetitions,
        }
    }

    pub fn device_client_config(&self) -> DeviceClientConfig {
        DeviceClientConfig::new(
            self.device.agent_url.clone(),
            Duration::from_secs(self.device.timeout_secs),
        )
    }

    pub fn vlan_ranges(&self) -> VlanRanges {
        VlanRanges {
            unshared_min: self.vlan.unshared_min,
            unshared_max: self.vlan.unshared_max,
            shared_min: self.vlan.shared_min,
            shared_max: self.vlan.shared_max,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> FabricResult<()> {
        self.listen_addr()?;

        if self.store.backend == StoreBackend::Redis && self.store.redis_port == 0 {
            return Err(FabricError::invalid_config("store.redis_port", "must be > 0"));
        }

        if self.snmp.community.is_empty() {
            return Err(FabricError::invalid_config("snmp.community", "must not be empty"));
        }

        if self.snmp.timeout_secs == 0 {
            return Err(FabricError::invalid_config("snmp.timeout_secs", "must be > 0"));
        }

        if self.snmp.max_repetitions == 0 {
            return Err(FabricError::invalid_config("snmp.max_repetitions", "must be > 0"));
        }

        if self.topology.refresh_interval_secs == 0 {
            return Err(FabricError::invalid_config(
                "topology.refresh_interval_secs",
                "must be > 0",
            ));
        }

        if self.device.timeout_secs == 0 {
            return Err(FabricError::invalid_config("device.timeout_secs", "must be > 0"));
        }

        let bounds = u32::from(VlanId::MIN)..=u32::from(VlanId::MAX);
        let ranges = [
            ("vlan.unshared", self.vlan.unshared_min, self.vlan.unshared_max),
            ("vlan.shared", self.vlan.shared_min, self.vlan.shared_max),
        ];
        for (name, min, max) in ranges {
            if min > max {
                return Err(FabricError::invalid_config(
                    name,
                    format!("min {} is greater than max {}", min, max),
                ));
            }
            if !bounds.contains(&min) || !bounds.contains(&max) {
                return Err(FabricError::invalid_config(
                    name,
                    format!("range {}-{} must lie within 1-4094", min, max),
                ));
            }
        }

        if self.vlan.unshared_min <= self.vlan.shared_max
            && self.vlan.shared_min <= self.vlan.unshared_max
        {
            return Err(FabricError::invalid_config(
                "vlan",
                "shared and unshared ranges overlap",
            ));
        }

        Ok(())
    }
}
