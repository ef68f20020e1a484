//! Bounded in-memory ledger.
//!
//! Keeps the newest `history_size` blocks. Readers waiting for a block that
//! has not been committed yet park on a watch channel carrying the ledger
//! height and wake on each append.

use crate::domain::errors::LedgerError;
use crate::domain::session::LedgerBounds;
use crate::ports::outbound::{LedgerReader, LedgerWriter, OffsetCheckpoint};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{Block, BlockNumber, LogOffset};
use std::collections::VecDeque;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    blocks: VecDeque<Block>,
    /// Number of `blocks.front()`.
    oldest: BlockNumber,
}

impl Inner {
    fn height(&self) -> BlockNumber {
        self.oldest + self.blocks.len() as BlockNumber
    }

    fn lookup(&self, number: BlockNumber) -> Result<&Block, LedgerError> {
        if number < self.oldest {
            return Err(LedgerError::NotFound { number });
        }
        self.blocks
            .get((number - self.oldest) as usize)
            .ok_or(LedgerError::NotFound { number })
    }
}

#[derive(Debug)]
pub struct RamLedger {
    inner: RwLock<Inner>,
    history_size: usize,
    height: watch::Sender<BlockNumber>,
}

impl RamLedger {
    pub fn new(history_size: usize) -> Self {
        let (height, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Inner::default()),
            history_size: history_size.max(1),
            height,
        }
    }

    /// Number of retained blocks.
    pub fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().height() == 0
    }
}

impl LedgerWriter for RamLedger {
    fn append(&self, block: Block) -> Result<BlockNumber, LedgerError> {
        if !block.verify_data_hash() {
            return Err(LedgerError::Append("data hash does not match envelopes".into()));
        }
        let (number, height) = {
            let mut inner = self.inner.write();
            let number = inner.height();
            let previous = inner.blocks.back().map(Block::hash).unwrap_or([0u8; 32]);
            inner.blocks.push_back(block.seal(number, previous));
            while inner.blocks.len() > self.history_size {
                inner.blocks.pop_front();
                inner.oldest += 1;
            }
            (number, inner.height())
        };
        debug!(block_number = number, "Appended block");
        self.height.send_replace(height);
        Ok(number)
    }
}

#[async_trait]
impl LedgerReader for RamLedger {
    fn get_block(&self, number: BlockNumber) -> Result<Block, LedgerError> {
        self.inner.read().lookup(number).cloned()
    }

    fn oldest_available(&self) -> BlockNumber {
        self.inner.read().oldest
    }

    fn newest_available(&self) -> BlockNumber {
        self.inner.read().height()
    }

    /// Both ends under one read lock, so an evicting append cannot land between them.
    fn bounds(&self) -> LedgerBounds {
        let inner = self.inner.read();
        LedgerBounds::new(inner.oldest, inner.height())
    }

    async fn wait_for_block(&self, number: BlockNumber) -> Result<Block, LedgerError> {
        loop {
            let mut height = self.height.subscribe();
            {
                let inner = self.inner.read();
                if number < inner.height() {
                    return inner.lookup(number).cloned();
                }
            }
            if height.changed().await.is_err() {
                return Err(LedgerError::Closed);
            }
        }
    }
}

impl OffsetCheckpoint for RamLedger {
    fn last_processed_offset(&self) -> Option<LogOffset> {
        self.inner
            .read()
            .blocks
            .iter()
            .rev()
            .find_map(|b| b.metadata.log_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Envelope;
    use std::sync::Arc;
    use std::time::Duration;

    fn block(tag: u8) -> Block {
        Block::new(vec![Envelope::new(vec![tag])])
    }

    #[test]
    fn test_append_seals_number_and_linkage() {
        let ledger = RamLedger::new(10);
        assert_eq!(ledger.append(block(1)).unwrap(), 0);
        assert_eq!(ledger.append(block(2)).unwrap(), 1);

        let first = ledger.get_block(0).unwrap();
        let second = ledger.get_block(1).unwrap();
        assert_eq!(first.header.previous_hash, [0u8; 32]);
        assert_eq!(second.header.previous_hash, first.hash());
        assert_eq!(second.number(), 1);
        assert_eq!(ledger.newest_available(), 2);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let ledger = RamLedger::new(3);
        for tag in 0..5 {
            ledger.append(block(tag)).unwrap();
        }
        assert_eq!(ledger.oldest_available(), 2);
        assert_eq!(ledger.newest_available(), 5);
        assert_eq!(ledger.len(), 3);
        assert_eq!(
            ledger.get_block(1),
            Err(LedgerError::NotFound { number: 1 })
        );
        assert_eq!(ledger.get_block(4).unwrap().data.envelopes[0].payload, vec![4]);
        assert_eq!(
            ledger.get_block(5),
            Err(LedgerError::NotFound { number: 5 })
        );
    }

    #[test]
    fn test_linkage_survives_eviction() {
        let ledger = RamLedger::new(1);
        ledger.append(block(0)).unwrap();
        let kept = ledger.get_block(0).unwrap();
        ledger.append(block(1)).unwrap();
        assert_eq!(ledger.get_block(1).unwrap().header.previous_hash, kept.hash());
    }

    #[test]
    fn test_rejects_tampered_block() {
        let ledger = RamLedger::new(3);
        let mut bad = block(1);
        bad.data.envelopes.push(Envelope::new(vec![9]));
        assert!(matches!(ledger.append(bad), Err(LedgerError::Append(_))));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_checkpoint_from_metadata() {
        let ledger = RamLedger::new(10);
        assert_eq!(ledger.last_processed_offset(), None);
        ledger.append(block(0)).unwrap();
        assert_eq!(ledger.last_processed_offset(), None);
        ledger.append(block(1).with_log_offset(41)).unwrap();
        ledger.append(block(2).with_log_offset(42)).unwrap();
        assert_eq!(ledger.last_processed_offset(), Some(42));
    }

    #[test]
    fn test_bounds_are_a_consistent_snapshot() {
        let ledger = Arc::new(RamLedger::new(4));
        let writer = {
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || {
                for tag in 0..20_000u32 {
                    ledger
                        .append(Block::new(vec![Envelope::new(tag.to_be_bytes().to_vec())]))
                        .unwrap();
                }
            })
        };
        while !writer.is_finished() {
            let bounds = ledger.bounds();
            assert!(bounds.oldest <= bounds.newest);
            assert!(bounds.newest - bounds.oldest <= 4, "{bounds:?}");
        }
        writer.join().unwrap();
        let bounds = ledger.bounds();
        assert_eq!((bounds.oldest, bounds.newest), (19_996, 20_000));
    }

    #[tokio::test]
    async fn test_wait_for_block_wakes_on_append() {
        let ledger = Arc::new(RamLedger::new(10));
        let waiter = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.wait_for_block(1).await })
        };
        tokio::task::yield_now().await;
        ledger.append(block(0)).unwrap();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        ledger.append(block(1)).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.number(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_evicted_block_fails() {
        let ledger = RamLedger::new(2);
        for tag in 0..4 {
            ledger.append(block(tag)).unwrap();
        }
        assert_eq!(
            ledger.wait_for_block(0).await,
            Err(LedgerError::NotFound { number: 0 })
        );
    }
}
