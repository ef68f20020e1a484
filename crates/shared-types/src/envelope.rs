//! # Envelope
//!
//! The unit of client submission. The orderer never looks inside the payload:
//! validation and endorsement happen elsewhere, ordering only needs its size.

use serde::{Deserialize, Serialize};

/// Opaque signed payload (transaction or configuration update).
///
/// Immutable once created; contained in exactly one block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Marshalled payload.
    #[serde(with = "crate::serde_hex::bytes")]
    pub payload: Vec<u8>,
    /// Creator signature over the payload.
    #[serde(default, with = "crate::serde_hex::bytes")]
    pub signature: Vec<u8>,
}

impl Envelope {
    /// Create an unsigned envelope around a payload.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            signature: Vec::new(),
        }
    }

    /// Attach a signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<Vec<u8>>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Size in bytes counted against the batch size threshold.
    pub fn size(&self) -> usize {
        self.payload.len() + self.signature.len()
    }
}
