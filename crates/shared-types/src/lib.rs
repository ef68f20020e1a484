//! # Shared Types Crate
//!
//! Ledger entities and the client message contract used by the orderer core
//! and the node runtime.
//!
//! ## Contents
//!
//! - **Envelope**: opaque signed client payload, immutable once created.
//! - **Block**: ordered envelopes plus header (number, hash linkage) and metadata.
//! - **Protocol**: `DeliverUpdate` / `DeliverResponse` for block delivery and
//!   `BroadcastResponse` for envelope submission.
//!
//! Byte fields serialize as hex strings in human-readable formats (JSON) and as
//! raw bytes in binary formats (bincode), so the same types travel over the
//! client transport and through the replicated log.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod protocol;

mod serde_hex;

pub use entities::*;
pub use envelope::Envelope;
pub use errors::CodecError;
pub use protocol::*;
