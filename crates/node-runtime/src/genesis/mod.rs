//! # Genesis Module
//!
//! Provisional bootstrap of block 0.
//!
//! When the ledger is empty at startup, block 0 is a genesis block whose
//! single envelope is the JSON encoding of the ordering settings. The content
//! depends only on configuration, so replicas configured alike start from the
//! same block 0 and their hash chains line up from there.

pub mod builder;

pub use builder::{bootstrap, GenesisBuilder, GenesisError, GenesisSettings};
