//! # Genesis Block Builder

use kafka_orderer::{LedgerError, LedgerReader, LedgerWriter, OrdererConfig};
use serde::Serialize;
use shared_types::{Block, BlockNumber, Envelope};
use thiserror::Error;
use tracing::info;

/// Genesis block creation errors.
#[derive(Debug, Error)]
pub enum GenesisError {
    /// Only the provisional method is implemented.
    #[error("Unsupported genesis method: {0}")]
    UnsupportedMethod(String),

    #[error("Failed to encode genesis settings: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to store genesis block: {0}")]
    StorageFailed(#[from] LedgerError),
}

/// The part of the configuration that shapes the chain.
///
/// Listen address and broker addresses are left out: they differ per replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenesisSettings {
    pub orderer_type: String,
    pub batch_timeout_ms: u64,
    pub batch_size: usize,
    pub queue_size: usize,
    pub max_window_size: u64,
    pub topic: String,
    pub partition: i32,
    pub version: String,
}

impl GenesisSettings {
    pub fn from_config(config: &OrdererConfig) -> Self {
        Self {
            orderer_type: config.general.orderer_type.clone(),
            batch_timeout_ms: config.general.batch_timeout_ms,
            batch_size: config.general.batch_size,
            queue_size: config.general.queue_size,
            max_window_size: config.general.max_window_size,
            topic: config.kafka.topic.clone(),
            partition: config.kafka.partition,
            version: config.kafka.version.clone(),
        }
    }
}

/// Builder for the provisional genesis block.
pub struct GenesisBuilder {
    settings: GenesisSettings,
}

impl GenesisBuilder {
    pub fn new(config: &OrdererConfig) -> Result<Self, GenesisError> {
        if config.general.genesis_method != kafka_orderer::config::GENESIS_METHOD_PROVISIONAL {
            return Err(GenesisError::UnsupportedMethod(
                config.general.genesis_method.clone(),
            ));
        }
        Ok(Self {
            settings: GenesisSettings::from_config(config),
        })
    }

    pub fn settings(&self) -> &GenesisSettings {
        &self.settings
    }

    /// Unsealed block; the ledger assigns number 0 and the zero parent hash.
    pub fn build(&self) -> Result<Block, GenesisError> {
        let payload = serde_json::to_vec(&self.settings)?;
        Ok(Block::new(vec![Envelope::new(payload)]))
    }
}

/// Append the genesis block if `ledger` is empty.
///
/// Returns the number assigned, or `None` when the ledger already had blocks.
pub fn bootstrap<L>(ledger: &L, config: &OrdererConfig) -> Result<Option<BlockNumber>, GenesisError>
where
    L: LedgerReader + LedgerWriter + ?Sized,
{
    if ledger.newest_available() > 0 {
        info!(
            height = ledger.newest_available(),
            "Ledger already initialised, skipping genesis"
        );
        return Ok(None);
    }
    let block = GenesisBuilder::new(config)?.build()?;
    let number = ledger.append(block)?;
    info!(block_number = number, "Genesis block created");
    Ok(Some(number))
}
