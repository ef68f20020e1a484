//! Outbound Ports (Driven Ports / SPI)
//!
//! The replicated log and the ledger are external collaborators; the core
//! only talks to them through these traits.

use crate::domain::errors::{BrokerError, LedgerError};
use crate::domain::session::LedgerBounds;
use crate::domain::value_objects::{ChainPartition, OffsetRange};
use async_trait::async_trait;
use shared_types::{Block, BlockNumber, LogOffset};

/// One record read from the replicated log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub offset: LogOffset,
    pub payload: Vec<u8>,
}

/// Opens connections to the replicated log.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    type Connection: BrokerConnection;

    /// Connect to the given partition through any of `brokers`.
    async fn connect(
        &self,
        brokers: &[String],
        partition: &ChainPartition,
    ) -> Result<Self::Connection, BrokerError>;
}

/// A live connection to one partition.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Append a record; returns the offset it was written at.
    async fn produce(&self, payload: Vec<u8>) -> Result<LogOffset, BrokerError>;

    /// Currently retained offsets.
    async fn offsets(&self) -> Result<OffsetRange, BrokerError>;

    /// Read the record at `offset`, suspending until it has been written.
    ///
    /// Fails with [`BrokerError::OffsetOutOfRange`] if the offset is below
    /// the oldest retained offset and with [`BrokerError::Unreachable`] if the
    /// connection is lost, including while suspended.
    async fn fetch(&self, offset: LogOffset) -> Result<LogRecord, BrokerError>;
}

/// Appends confirmed blocks. Only the consumer path calls this.
pub trait LedgerWriter: Send + Sync {
    /// Seal and store `block`; returns the number it was assigned.
    fn append(&self, block: Block) -> Result<BlockNumber, LedgerError>;
}

/// Historical block lookup, shared by every delivery session.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    fn get_block(&self, number: BlockNumber) -> Result<Block, LedgerError>;

    /// Earliest retained block number.
    fn oldest_available(&self) -> BlockNumber;

    /// One past the newest committed block number.
    fn newest_available(&self) -> BlockNumber;

    fn bounds(&self) -> LedgerBounds {
        LedgerBounds::new(self.oldest_available(), self.newest_available())
    }

    /// Suspend until `number` is committed, then return it.
    ///
    /// Fails with [`LedgerError::NotFound`] if the block was already evicted.
    async fn wait_for_block(&self, number: BlockNumber) -> Result<Block, LedgerError>;
}

/// Where the consumer left off.
pub trait OffsetCheckpoint: Send + Sync {
    /// Offset of the last record applied to the ledger, if any.
    fn last_processed_offset(&self) -> Option<LogOffset>;
}
