//! Configuration types for the MRC
//!
//! All sections are optional in the configuration file; missing values
//! fall back to the defaults below.

use crate::types::{ReplicationPolicy, StripingPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for an MRC server
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MrcConfig {
    /// Server identity and storage location
    pub server: ServerConfig,
    /// Capability issuing
    pub capability: CapabilityConfig,
    /// Replica-set reconfiguration
    pub coordinator: CoordinatorConfig,
    /// Volumes created at start-up when missing
    pub volumes: Vec<VolumeConfig>,
    /// Statically registered OSDs
    pub osds: Vec<OsdConfig>,
    /// Logging
    pub logging: LoggingConfig,
}

impl MrcConfig {
    /// Check whether requests must be redirected to another MRC
    #[must_use]
    pub fn redirect_target(&self) -> Option<&str> {
        self.server
            .replication_master
            .as_deref()
            .filter(|master| *master != self.server.uuid)
    }
}

/// Server identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UUID of this MRC, used as the client identity of coordinator capabilities
    pub uuid: String,
    /// Listen address of the JSON API
    pub listen: String,
    /// Data directory for the metadata database
    pub data_dir: PathBuf,
    /// UUID of the primary MRC when the database is replicated
    pub replication_master: Option<String>,
    /// Take the client address from `x-mrc-client` instead of the peer
    /// address; only for an MRC behind a trusted gateway
    pub trusted_gateway: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            uuid: "mrc-localhost".to_string(),
            listen: "0.0.0.0:9110".to_string(),
            data_dir: PathBuf::from("/var/lib/mrc"),
            replication_master: None,
            trusted_gateway: false,
        }
    }
}

/// Capability configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Secret shared with the OSDs for capability signatures
    pub secret: String,
    /// Validity of an issued capability, in seconds
    pub timeout_s: u64,
    /// How often a single capability may be renewed
    pub max_renewals: u32,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            secret: "changeme".to_string(),
            timeout_s: 600,
            max_renewals: 64,
        }
    }
}

/// Replica-set reconfiguration configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Upper bound for one invalidation call to an OSD, in milliseconds
    pub invalidate_timeout_ms: u64,
    /// Lease timeout of the OSDs; waited once when no primary responded
    pub lease_timeout_ms: u64,
    /// Capacity of the processing stage queue
    pub queue_depth: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            invalidate_timeout_ms: 5_000,
            lease_timeout_ms: 15_000,
            queue_depth: 1024,
        }
    }
}

/// A volume created at start-up
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub name: String,
    /// Owner of the volume root
    pub owner: String,
    pub default_striping_policy: StripingPolicy,
    pub default_replication_policy: ReplicationPolicy,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            owner: "root".to_string(),
            default_striping_policy: StripingPolicy::default(),
            default_replication_policy: ReplicationPolicy::default(),
        }
    }
}

/// A statically registered OSD
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OsdConfig {
    pub uuid: String,
    /// Base URL of the OSD's management endpoint
    pub address: String,
    /// Failure domain label (rack, host, ...)
    pub failure_domain: String,
    /// Relative selection weight
    pub weight: f64,
}

impl Default for OsdConfig {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            address: String::new(),
            failure_domain: "default".to_string(),
            weight: 1.0,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
