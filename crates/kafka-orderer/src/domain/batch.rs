//! Block cutting.
//!
//! Pending envelopes are cut into a block when the next envelope would push
//! the pending payload past `batch_size` bytes, when the pending count reaches
//! `queue_size`, or when `batch_timeout` has elapsed since the first pending
//! envelope arrived. The builder holds no timer: callers pass `now` and drive
//! [`BatchBuilder::tick`] from their own clock.

use shared_types::{Block, Envelope};
use std::mem;
use std::time::Duration;
use tokio::time::Instant;

/// Cut thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum pending payload in bytes.
    pub batch_size: usize,
    /// Pending envelope count that forces a cut.
    pub queue_size: usize,
    pub batch_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            queue_size: 100,
            batch_timeout: Duration::from_millis(500),
        }
    }
}

/// Accumulates envelopes for one chain.
#[derive(Debug)]
pub struct BatchBuilder {
    config: BatchConfig,
    pending: Vec<Envelope>,
    pending_bytes: usize,
    first_pending_at: Option<Instant>,
}

impl BatchBuilder {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            pending_bytes: 0,
            first_pending_at: None,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Queue an envelope and return the blocks it caused to be cut, in order.
    ///
    /// Usually zero or one block. An envelope larger than `batch_size` on its
    /// own cuts whatever is pending and then a block holding just itself.
    pub fn submit(&mut self, envelope: Envelope, now: Instant) -> Vec<Block> {
        let mut cut = Vec::new();
        let size = envelope.size();

        if size > self.config.batch_size {
            cut.extend(self.cut());
            cut.push(Block::new(vec![envelope]));
            return cut;
        }

        if self.pending_bytes + size > self.config.batch_size {
            cut.extend(self.cut());
        }

        if self.pending.is_empty() {
            self.first_pending_at = Some(now);
        }
        self.pending.push(envelope);
        self.pending_bytes += size;

        if self.pending.len() >= self.config.queue_size {
            cut.extend(self.cut());
        }
        cut
    }

    /// Cut on timeout. An idle builder never emits.
    pub fn tick(&mut self, now: Instant) -> Option<Block> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.cut(),
            _ => None,
        }
    }

    /// Forced cut; `None` when nothing is pending.
    pub fn flush(&mut self) -> Option<Block> {
        self.cut()
    }

    /// When the pending batch times out, if anything is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.first_pending_at
            .map(|first| first + self.config.batch_timeout)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    fn cut(&mut self) -> Option<Block> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending_bytes = 0;
        self.first_pending_at = None;
        Some(Block::new(mem::take(&mut self.pending)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn env(tag: u8, size: usize) -> Envelope {
        let mut payload = vec![0u8; size];
        if let Some(first) = payload.first_mut() {
            *first = tag;
        }
        Envelope::new(payload)
    }

    fn builder(batch_size: usize, queue_size: usize) -> BatchBuilder {
        BatchBuilder::new(BatchConfig {
            batch_size,
            queue_size,
            batch_timeout: Duration::from_millis(500),
        })
    }

    #[test]
    fn test_overflow_cuts_previous_and_starts_next_batch() {
        let now = Instant::now();
        let mut b = builder(100, 10);
        for tag in 1..=3 {
            assert!(b.submit(env(tag, 30), now).is_empty());
        }
        assert_eq!(b.pending_bytes(), 90);

        let cut = b.submit(env(4, 30), now);
        assert_eq!(cut.len(), 1);
        let tags: Vec<u8> = cut[0].data.envelopes.iter().map(|e| e.payload[0]).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert_eq!(b.pending_len(), 1);
        assert_eq!(b.pending_bytes(), 30);
    }

    #[test]
    fn test_exact_fit_does_not_overflow() {
        let now = Instant::now();
        let mut b = builder(100, 10);
        assert!(b.submit(env(1, 50), now).is_empty());
        assert!(b.submit(env(2, 50), now).is_empty());
        assert_eq!(b.pending_len(), 2);
    }

    #[test]
    fn test_queue_size_cuts_immediately() {
        let now = Instant::now();
        let mut b = builder(1_000, 3);
        assert!(b.submit(env(1, 1), now).is_empty());
        assert!(b.submit(env(2, 1), now).is_empty());
        let cut = b.submit(env(3, 1), now);
        assert_eq!(cut.len(), 1);
        assert_eq!(cut[0].len(), 3);
        assert!(b.is_idle());
    }

    #[test]
    fn test_oversized_envelope_is_cut_alone() {
        let now = Instant::now();
        let mut b = builder(100, 10);
        b.submit(env(1, 10), now);

        let cut = b.submit(env(2, 250), now);
        assert_eq!(cut.len(), 2);
        assert_eq!(cut[0].len(), 1);
        assert_eq!(cut[0].data.envelopes[0].payload[0], 1);
        assert_eq!(cut[1].len(), 1);
        assert_eq!(cut[1].data.envelopes[0].payload.len(), 250);
        assert!(b.is_idle());
    }

    #[test]
    fn test_oversized_envelope_on_idle_builder() {
        let mut b = builder(100, 10);
        let cut = b.submit(env(1, 101), Instant::now());
        assert_eq!(cut.len(), 1);
        assert!(b.is_idle());
    }

    #[test]
    fn test_timeout_measured_from_first_pending() {
        let start = Instant::now();
        let mut b = builder(100, 10);
        b.submit(env(1, 10), start);
        b.submit(env(2, 10), start + Duration::from_millis(400));

        assert_eq!(b.deadline(), Some(start + Duration::from_millis(500)));
        assert!(b.tick(start + Duration::from_millis(499)).is_none());
        let block = b.tick(start + Duration::from_millis(500)).unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(b.deadline(), None);
    }

    #[test]
    fn test_idle_builder_never_emits() {
        let start = Instant::now();
        let mut b = builder(100, 10);
        assert!(b.tick(start + Duration::from_secs(3600)).is_none());
        assert!(b.flush().is_none());
    }

    #[test]
    fn test_flush_drains_pending() {
        let mut b = builder(100, 10);
        b.submit(env(1, 10), Instant::now());
        let block = b.flush().unwrap();
        assert_eq!(block.len(), 1);
        assert!(block.verify_data_hash());
        assert!(b.flush().is_none());
    }

    proptest! {
        #[test]
        fn prop_order_and_exactly_once(
            sizes in prop::collection::vec(0usize..160, 0..200),
            batch_size in 1usize..128,
            queue_size in 1usize..12,
        ) {
            let now = Instant::now();
            let mut b = builder(batch_size, queue_size);
            let submitted: Vec<Envelope> = sizes
                .iter()
                .enumerate()
                .map(|(i, &size)| {
                    let mut payload = (i as u32).to_be_bytes().to_vec();
                    payload.resize(size.max(4), 0);
                    Envelope::new(payload)
                })
                .collect();

            let mut blocks = Vec::new();
            for e in submitted.iter().cloned() {
                blocks.extend(b.submit(e, now));
            }
            blocks.extend(b.flush());

            for block in &blocks {
                prop_assert!(!block.is_empty());
                prop_assert!(block.len() <= queue_size);
                let bytes: usize = block.data.envelopes.iter().map(Envelope::size).sum();
                prop_assert!(block.len() == 1 || bytes <= batch_size);
            }

            let emitted: Vec<Envelope> = blocks
                .into_iter()
                .flat_map(|block| block.data.envelopes)
                .collect();
            prop_assert_eq!(emitted, submitted);
        }
    }
}
