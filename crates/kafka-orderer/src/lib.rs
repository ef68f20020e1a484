//! # Kafka Orderer
//!
//! Ordering core of a permissioned ledger network. Client envelopes are cut
//! into blocks, ordered through a replicated log, and streamed to delivery
//! clients under a sliding acknowledgement window.
//!
//! ## Architecture
//!
//! - **Domain**: `RetryPolicy`, `BatchBuilder`, the delivery session and chain
//!   state machines, error taxonomy
//! - **Ports**: Inbound (`BroadcastApi`, `DeliverApi`) and Outbound
//!   (`BrokerConnector`, `LedgerWriter`, `LedgerReader`, `OffsetCheckpoint`)
//! - **Adapters**: `KafkaConnector` (network client), `MemoryBroker`
//!   (in-process replicated log), `RamLedger`
//! - **Service**: producer and consumer halves of the ordering log, chain
//!   orchestration, delivery sessions
//!
//! ## Ordering
//!
//! The replicated log is the only ordering authority. Every replica runs a
//! consumer that follows the log and is the sole writer of its ledger, so
//! replicas converge on the same block sequence without leader election.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{KafkaConnector, MemoryBroker, RamLedger};
pub use config::{ConfigError, ConnectorKind, OrdererConfig, StartFrom};
pub use domain::errors::*;
pub use domain::{
    BatchBuilder, BatchConfig, ChainEvent, ChainPartition, ChainState, LedgerBounds,
    OffsetRange, ProtocolVersion, RetryPolicy, SessionEvent, SessionState, Window,
};
pub use ports::inbound::{BroadcastApi, DeliverApi};
pub use ports::outbound::{
    BrokerConnection, BrokerConnector, LedgerReader, LedgerWriter, LogRecord, OffsetCheckpoint,
};
pub use service::{
    ChainHandle, ChainStatus, DeliverService, DeliverSession, OrderingConsumer, OrderingProducer,
    SessionInput, SessionOutcome,
};
