//! # Ledger Entities
//!
//! Blocks as they move through the ordering pipeline:
//!
//! ```text
//! BatchBuilder ──Block::new──→ OrderingLog ──decode──→ Ledger ──seal──→ committed Block
//!   (data_hash)                 (log record)            (number, previous_hash)
//! ```
//!
//! A cut block only carries its `data_hash`. The ledger is the single party that
//! knows the previously committed block, so it seals `number` and
//! `previous_hash` when appending. The log record itself is never modified.

use crate::errors::CodecError;
use crate::envelope::Envelope;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// Block sequence number within a ledger.
pub type BlockNumber = u64;

/// Position within the replicated log.
pub type LogOffset = i64;

/// Block header: sequence number and hash linkage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Sequence number, assigned by the ledger on append.
    pub number: BlockNumber,
    /// Header hash of the previous block (zero for genesis).
    #[serde(with = "crate::serde_hex::hash")]
    pub previous_hash: Hash,
    /// Hash over the envelopes in order.
    #[serde(with = "crate::serde_hex::hash")]
    pub data_hash: Hash,
}

impl BlockHeader {
    /// Hash of this header; the next block links to it.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.number.to_be_bytes());
        hasher.update(self.previous_hash);
        hasher.update(self.data_hash);
        hasher.finalize().into()
    }
}

/// Ordered envelopes of a block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockData {
    pub envelopes: Vec<Envelope>,
}

impl BlockData {
    /// Hash over every envelope, length-prefixed so boundaries are unambiguous.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        for env in &self.envelopes {
            hasher.update((env.payload.len() as u64).to_be_bytes());
            hasher.update(&env.payload);
            hasher.update((env.signature.len() as u64).to_be_bytes());
            hasher.update(&env.signature);
        }
        hasher.finalize().into()
    }
}

/// Orderer metadata attached to a committed block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Log offset the block was confirmed at. `None` for blocks that never went
    /// through the log (genesis).
    #[serde(default)]
    pub log_offset: Option<LogOffset>,
}

/// A block of ordered envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub data: BlockData,
    #[serde(default)]
    pub metadata: BlockMetadata,
}

impl Block {
    /// Cut a new block from envelopes. Number and linkage are sealed later by the ledger.
    pub fn new(envelopes: Vec<Envelope>) -> Self {
        let data = BlockData { envelopes };
        Self {
            header: BlockHeader {
                number: 0,
                previous_hash: [0u8; 32],
                data_hash: data.hash(),
            },
            data,
            metadata: BlockMetadata::default(),
        }
    }

    /// Seal sequence number and hash linkage.
    #[must_use]
    pub fn seal(mut self, number: BlockNumber, previous_hash: Hash) -> Self {
        self.header.number = number;
        self.header.previous_hash = previous_hash;
        self
    }

    /// Record the log offset this block was confirmed at.
    #[must_use]
    pub fn with_log_offset(mut self, offset: LogOffset) -> Self {
        self.metadata.log_offset = Some(offset);
        self
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Header hash.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Number of envelopes.
    pub fn len(&self) -> usize {
        self.data.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.envelopes.is_empty()
    }

    /// True when `data_hash` matches the envelopes.
    pub fn verify_data_hash(&self) -> bool {
        self.header.data_hash == self.data.hash()
    }

    /// Binary encoding used for log records.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode a log record, rejecting payloads whose data hash does not match.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let block: Block =
            bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        if !block.verify_data_hash() {
            return Err(CodecError::DataHashMismatch);
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelopes(contents: &[&str]) -> Vec<Envelope> {
        contents.iter().map(|c| Envelope::new(c.as_bytes().to_vec())).collect()
    }

    #[test]
    fn test_new_block_carries_data_hash() {
        let block = Block::new(envelopes(&["a", "b"]));
        assert!(block.verify_data_hash());
        assert_eq!(block.number(), 0);
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn test_data_hash_depends_on_order() {
        let ab = Block::new(envelopes(&["a", "b"]));
        let ba = Block::new(envelopes(&["b", "a"]));
        assert_ne!(ab.header.data_hash, ba.header.data_hash);
    }

    #[test]
    fn test_data_hash_respects_envelope_boundaries() {
        let split = Block::new(envelopes(&["ab", "c"]));
        let joined = Block::new(envelopes(&["a", "bc"]));
        assert_ne!(split.header.data_hash, joined.header.data_hash);
    }

    #[test]
    fn test_seal_links_to_previous() {
        let first = Block::new(envelopes(&["x"])).seal(0, [0u8; 32]);
        let second = Block::new(envelopes(&["y"])).seal(1, first.hash());
        assert_eq!(second.header.previous_hash, first.hash());
        assert_ne!(first.hash(), second.hash());
    }

    #[test]
    fn test_decode_rejects_tampered_data() {
        let mut block = Block::new(envelopes(&["x"]));
        block.data.envelopes.push(Envelope::new(b"smuggled".to_vec()));
        let bytes = bincode::serialize(&block).unwrap();
        assert!(matches!(
            Block::decode(&bytes),
            Err(CodecError::DataHashMismatch)
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Block::decode(&[0xff, 0x01]),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_log_offset_survives_encoding() {
        let block = Block::new(envelopes(&["x"])).with_log_offset(42);
        let decoded = Block::decode(&block.encode().unwrap()).unwrap();
        assert_eq!(decoded.metadata.log_offset, Some(42));
    }
}
