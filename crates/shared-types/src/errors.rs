//! # Error Types
//!
//! Errors shared by every crate that encodes or decodes blocks.

use thiserror::Error;

/// Block encoding/decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Block encoding failed: {0}")]
    Encode(String),

    /// Bytes are not a valid block.
    #[error("Block decoding failed: {0}")]
    Decode(String),

    /// Envelopes do not match the header's data hash.
    #[error("Block data hash does not match its envelopes")]
    DataHashMismatch,
}
