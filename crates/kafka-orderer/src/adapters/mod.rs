//! Adapters: the Kafka network client plus in-memory implementations of the
//! outbound ports.

pub mod kafka_broker;
pub mod memory_broker;
pub mod ram_ledger;

pub use kafka_broker::{KafkaConnection, KafkaConnector};
pub use memory_broker::{MemoryBroker, MemoryConnection};
pub use ram_ledger::RamLedger;
