//! Service layer: the tasks that drive the domain logic against the ports.

pub mod chain;
pub mod consumer;
pub mod deliver;
pub mod producer;

pub use chain::{ChainHandle, ChainStatus};
pub use consumer::OrderingConsumer;
pub use deliver::{DeliverService, DeliverSession, SessionInput, SessionOutcome};
pub use producer::OrderingProducer;
