//! Ports module: inbound API and outbound SPI.

pub mod inbound;
pub mod outbound;

pub use inbound::{BroadcastApi, DeliverApi};
pub use outbound::{
    BrokerConnection, BrokerConnector, LedgerReader, LedgerWriter, LogRecord, OffsetCheckpoint,
};
