//! Configuration for the Kafka-backed orderer.
//!
//! Loaded once at startup into an immutable [`OrdererConfig`] and passed
//! explicitly to each component constructor.
//!
//! # Config File Format
//!
//! ```toml
//! [general]
//! orderer_type = "kafka"
//! ledger_type = "ram"
//! batch_timeout_ms = 500
//! batch_size = 100
//! queue_size = 100
//! max_window_size = 100
//! listen_address = "127.0.0.1"
//! listen_port = 7050
//! genesis_method = "provisional"
//!
//! [kafka]
//! connector = "kafka"
//! brokers = ["127.0.0.1:9092"]
//! topic = "orderer"
//! partition = 0
//! start_from = "oldest"
//! verbose = false
//! version = "0.11.0.0"
//! request_timeout_ms = 10000
//!
//! [kafka.retry]
//! period_ms = 3000
//! stop_ms = 60000
//!
//! [ram_ledger]
//! history_size = 1000
//! ```

use crate::domain::batch::BatchConfig;
use crate::domain::retry::RetryPolicy;
use crate::domain::value_objects::{ChainPartition, ProtocolVersion, RECORD_BATCH_VERSION};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// The only orderer type this crate implements.
pub const ORDERER_TYPE_KAFKA: &str = "kafka";

/// The only ledger backend shipped with this crate.
pub const LEDGER_TYPE_RAM: &str = "ram";

/// The only supported genesis method.
pub const GENESIS_METHOD_PROVISIONAL: &str = "provisional";

/// Top-level orderer configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdererConfig {
    pub general: GeneralConfig,
    pub kafka: KafkaConfig,
    pub ram_ledger: RamLedgerConfig,
}

/// `[general]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Ordering implementation selector.
    pub orderer_type: String,
    /// Ledger storage backend selector.
    pub ledger_type: String,
    /// Timeout-based cut interval, in milliseconds.
    pub batch_timeout_ms: u64,
    /// Pending payload size (bytes) that triggers a cut.
    pub batch_size: usize,
    /// Pending envelope count that triggers a cut. Also bounds the broadcast queue.
    pub queue_size: usize,
    /// Largest window a delivery client may negotiate.
    pub max_window_size: u64,
    pub listen_address: String,
    pub listen_port: u16,
    /// How the initial block is bootstrapped.
    pub genesis_method: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            orderer_type: ORDERER_TYPE_KAFKA.to_string(),
            ledger_type: LEDGER_TYPE_RAM.to_string(),
            batch_timeout_ms: 500,
            batch_size: 100,
            queue_size: 100,
            max_window_size: 100,
            listen_address: "127.0.0.1".to_string(),
            listen_port: 7050,
            genesis_method: GENESIS_METHOD_PROVISIONAL.to_string(),
        }
    }
}

impl GeneralConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// `address:port` for the client-facing listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            queue_size: self.queue_size,
            batch_timeout: self.batch_timeout(),
        }
    }
}

/// Where the consumer starts when no resume checkpoint exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartFrom {
    #[default]
    Oldest,
    Newest,
}

/// Which replicated-log client the node runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    /// Kafka brokers over the network.
    #[default]
    Kafka,
    /// In-process log private to this node. Single-replica development only.
    Memory,
}

/// `[kafka]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub connector: ConnectorKind,
    /// Replicated-log endpoint addresses.
    pub brokers: Vec<String>,
    /// Topic holding the ordering channel.
    pub topic: String,
    pub partition: i32,
    pub start_from: StartFrom,
    pub retry: RetryConfig,
    /// Debug logging for the broker adapter.
    pub verbose: bool,
    /// Oldest broker release the client may assume. Kafka needs at least 0.11.
    pub version: String,
    /// Per-request deadline on broker calls, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            connector: ConnectorKind::Kafka,
            brokers: vec!["127.0.0.1:9092".to_string()],
            topic: "orderer".to_string(),
            partition: 0,
            start_from: StartFrom::Oldest,
            retry: RetryConfig::default(),
            verbose: false,
            version: "0.11.0.0".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl KafkaConfig {
    pub fn chain_partition(&self) -> ChainPartition {
        ChainPartition::new(self.topic.clone(), self.partition)
    }

    pub fn protocol_version(&self) -> Result<ProtocolVersion, ConfigError> {
        self.version.parse().map_err(|reason| ConfigError::Invalid {
            field: "kafka.version",
            reason,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// `[kafka.retry]` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay between reconnect attempts, in milliseconds.
    pub period_ms: u64,
    /// Total retry budget, in milliseconds.
    pub stop_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            period_ms: 3_000,
            stop_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_millis(self.stop_ms)
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.period(), self.stop())
    }
}

/// `[ram_ledger]` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RamLedgerConfig {
    /// Number of blocks retained before the oldest is evicted.
    pub history_size: usize,
}

impl Default for RamLedgerConfig {
    fn default() -> Self {
        Self { history_size: 1000 }
    }
}

/// Errors that can occur during config loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("Failed to read {path}: {error}")]
    Io { path: String, error: String },

    /// TOML parsing error.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A selector names an implementation this build does not provide.
    #[error("Unsupported {field}: {value:?}")]
    Unsupported { field: &'static str, value: String },

    /// A value is out of range.
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl OrdererConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: OrdererConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the orderer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let general = &self.general;
        if general.orderer_type != ORDERER_TYPE_KAFKA {
            return Err(ConfigError::Unsupported {
                field: "general.orderer_type",
                value: general.orderer_type.clone(),
            });
        }
        if general.ledger_type != LEDGER_TYPE_RAM {
            return Err(ConfigError::Unsupported {
                field: "general.ledger_type",
                value: general.ledger_type.clone(),
            });
        }
        if general.genesis_method != GENESIS_METHOD_PROVISIONAL {
            return Err(ConfigError::Unsupported {
                field: "general.genesis_method",
                value: general.genesis_method.clone(),
            });
        }
        if general.batch_size == 0 {
            return Err(invalid("general.batch_size", "must be greater than zero"));
        }
        if general.queue_size == 0 {
            return Err(invalid("general.queue_size", "must be greater than zero"));
        }
        if general.batch_timeout_ms == 0 {
            return Err(invalid("general.batch_timeout_ms", "must be greater than zero"));
        }
        if general.max_window_size == 0 {
            return Err(invalid("general.max_window_size", "must be greater than zero"));
        }
        if self.kafka.brokers.is_empty() {
            return Err(invalid("kafka.brokers", "at least one broker is required"));
        }
        if self.kafka.topic.is_empty() {
            return Err(invalid("kafka.topic", "must not be empty"));
        }
        if self.kafka.partition < 0 {
            return Err(invalid("kafka.partition", "must not be negative"));
        }
        if self.kafka.retry.period_ms == 0 {
            return Err(invalid("kafka.retry.period_ms", "must be greater than zero"));
        }
        if self.ram_ledger.history_size == 0 {
            return Err(invalid("ram_ledger.history_size", "must be greater than zero"));
        }
        if self.kafka.request_timeout_ms == 0 {
            return Err(invalid("kafka.request_timeout_ms", "must be greater than zero"));
        }
        let version = self.kafka.protocol_version()?;
        if self.kafka.connector == ConnectorKind::Kafka
            && !version.at_least(&RECORD_BATCH_VERSION)
        {
            return Err(ConfigError::Unsupported {
                field: "kafka.version",
                value: self.kafka.version.clone(),
            });
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
