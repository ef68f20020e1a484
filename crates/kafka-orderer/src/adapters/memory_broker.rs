//! In-process replicated log.
//!
//! Offset-addressed, append-only partitions with retention truncation and an
//! availability switch. Taking the broker offline invalidates every open
//! connection, including fetches suspended on a future offset, the same way
//! a dropped TCP session would.

use crate::domain::errors::BrokerError;
use crate::domain::value_objects::{ChainPartition, OffsetRange};
use crate::ports::outbound::{BrokerConnection, BrokerConnector, LogRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::LogOffset;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct PartitionLog {
    oldest: LogOffset,
    records: VecDeque<Vec<u8>>,
}

impl PartitionLog {
    fn newest(&self) -> LogOffset {
        self.oldest + self.records.len() as LogOffset
    }

    fn range(&self) -> OffsetRange {
        OffsetRange::new(self.oldest, self.newest())
    }

    fn get(&self, offset: LogOffset) -> Option<&Vec<u8>> {
        if offset < self.oldest {
            return None;
        }
        self.records.get((offset - self.oldest) as usize)
    }
}

#[derive(Debug)]
struct BrokerState {
    partitions: HashMap<ChainPartition, PartitionLog>,
    available: bool,
    /// Bumped whenever the broker goes offline; connections from an older
    /// epoch are dead.
    epoch: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<BrokerState>,
    /// Ticks on every append, truncation and availability change.
    changed: watch::Sender<u64>,
}

impl Shared {
    fn notify(&self) {
        self.changed.send_modify(|tick| *tick = tick.wrapping_add(1));
    }
}

/// Shared handle to an in-memory broker. Clones see the same partitions.
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState {
                    partitions: HashMap::new(),
                    available: true,
                    epoch: 0,
                }),
                changed,
            }),
        }
    }

    /// Replace a partition's contents; the first payload lands at `oldest`.
    pub fn seed<I>(&self, partition: &ChainPartition, oldest: LogOffset, payloads: I)
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let log = PartitionLog {
            oldest,
            records: payloads.into_iter().collect(),
        };
        info!(partition = %partition, oldest, newest = log.newest(), "Seeded partition");
        self.shared
            .state
            .lock()
            .partitions
            .insert(partition.clone(), log);
        self.shared.notify();
    }

    /// Drop every record below `offset`, as retention would.
    pub fn truncate_before(&self, partition: &ChainPartition, offset: LogOffset) {
        {
            let mut state = self.shared.state.lock();
            let log = state.partitions.entry(partition.clone()).or_default();
            while log.oldest < offset && !log.records.is_empty() {
                log.records.pop_front();
                log.oldest += 1;
            }
            if log.records.is_empty() && log.oldest < offset {
                log.oldest = offset;
            }
            info!(partition = %partition, oldest = log.oldest, "Truncated partition");
        }
        self.shared.notify();
    }

    /// Take the broker offline or bring it back.
    pub fn set_available(&self, available: bool) {
        {
            let mut state = self.shared.state.lock();
            if state.available == available {
                return;
            }
            state.available = available;
            if !available {
                state.epoch += 1;
            }
        }
        info!(available, "Broker availability changed");
        self.shared.notify();
    }

    /// Retained offsets of a partition, if it exists.
    pub fn offsets(&self, partition: &ChainPartition) -> Option<OffsetRange> {
        self.shared
            .state
            .lock()
            .partitions
            .get(partition)
            .map(PartitionLog::range)
    }

    /// Copy of the record at `offset`, if retained.
    pub fn record(&self, partition: &ChainPartition, offset: LogOffset) -> Option<Vec<u8>> {
        self.shared
            .state
            .lock()
            .partitions
            .get(partition)
            .and_then(|log| log.get(offset).cloned())
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        brokers: &[String],
        partition: &ChainPartition,
    ) -> Result<MemoryConnection, BrokerError> {
        if brokers.is_empty() {
            return Err(BrokerError::Rejected("no broker addresses given".into()));
        }
        let mut state = self.shared.state.lock();
        if !state.available {
            return Err(BrokerError::Unreachable(format!(
                "no broker reachable among {brokers:?}"
            )));
        }
        state.partitions.entry(partition.clone()).or_default();
        debug!(partition = %partition, epoch = state.epoch, "Connected to partition");
        Ok(MemoryConnection {
            shared: Arc::clone(&self.shared),
            partition: partition.clone(),
            epoch: state.epoch,
        })
    }
}

/// Connection to one partition of a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    partition: ChainPartition,
    epoch: u64,
}

impl MemoryConnection {
    fn check(&self, state: &BrokerState) -> Result<(), BrokerError> {
        if !state.available || state.epoch != self.epoch {
            return Err(BrokerError::Unreachable(format!(
                "connection to {} lost",
                self.partition
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn produce(&self, payload: Vec<u8>) -> Result<LogOffset, BrokerError> {
        let offset = {
            let mut state = self.shared.state.lock();
            self.check(&state)?;
            let log = state.partitions.entry(self.partition.clone()).or_default();
            let offset = log.newest();
            log.records.push_back(payload);
            offset
        };
        debug!(partition = %self.partition, offset, "Produced record");
        self.shared.notify();
        Ok(offset)
    }

    async fn offsets(&self) -> Result<OffsetRange, BrokerError> {
        let state = self.shared.state.lock();
        self.check(&state)?;
        Ok(state
            .partitions
            .get(&self.partition)
            .map(PartitionLog::range)
            .unwrap_or(OffsetRange::new(0, 0)))
    }

    async fn fetch(&self, offset: LogOffset) -> Result<LogRecord, BrokerError> {
        loop {
            // Subscribe before looking so a write between the check and the
            // wait is not missed.
            let mut changed = self.shared.changed.subscribe();
            {
                let state = self.shared.state.lock();
                self.check(&state)?;
                if let Some(log) = state.partitions.get(&self.partition) {
                    if offset < log.oldest {
                        return Err(BrokerError::OffsetOutOfRange {
                            requested: offset,
                            oldest: log.oldest,
                        });
                    }
                    if let Some(payload) = log.get(offset) {
                        return Ok(LogRecord {
                            offset,
                            payload: payload.clone(),
                        });
                    }
                }
            }
            if changed.changed().await.is_err() {
                return Err(BrokerError::Unreachable("broker shut down".into()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn brokers() -> Vec<String> {
        vec!["127.0.0.1:9092".to_string()]
    }

    #[tokio::test]
    async fn test_produce_then_fetch() {
        let broker = MemoryBroker::new();
        let partition = ChainPartition::default();
        let conn = broker.connect(&brokers(), &partition).await.unwrap();

        assert_eq!(conn.produce(b"a".to_vec()).await.unwrap(), 0);
        assert_eq!(conn.produce(b"b".to_vec()).await.unwrap(), 1);
        assert_eq!(conn.offsets().await.unwrap(), OffsetRange::new(0, 2));
        assert_eq!(conn.fetch(1).await.unwrap().payload, b"b".to_vec());
    }

    #[tokio::test]
    async fn test_seeded_offsets() {
        let broker = MemoryBroker::new();
        let partition = ChainPartition::default();
        broker.seed(&partition, 100, (0..1000).map(|i: u32| i.to_be_bytes().to_vec()));
        let conn = broker.connect(&brokers(), &partition).await.unwrap();

        assert_eq!(conn.offsets().await.unwrap(), OffsetRange::new(100, 1100));
        assert_eq!(conn.fetch(100).await.unwrap().payload, 0u32.to_be_bytes().to_vec());
        assert_eq!(
            conn.fetch(99).await,
            Err(BrokerError::OffsetOutOfRange {
                requested: 99,
                oldest: 100
            })
        );
    }

    #[tokio::test]
    async fn test_fetch_waits_for_record() {
        let broker = MemoryBroker::new();
        let partition = ChainPartition::default();
        let reader = broker.connect(&brokers(), &partition).await.unwrap();
        let writer = broker.connect(&brokers(), &partition).await.unwrap();

        let pending = tokio::spawn(async move { reader.fetch(0).await });
        tokio::task::yield_now().await;
        writer.produce(b"late".to_vec()).await.unwrap();

        let record = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(record.payload, b"late".to_vec());
    }

    #[tokio::test]
    async fn test_outage_kills_connections() {
        let broker = MemoryBroker::new();
        let partition = ChainPartition::default();
        let conn = broker.connect(&brokers(), &partition).await.unwrap();
        let waiting = broker.connect(&brokers(), &partition).await.unwrap();
        let pending = tokio::spawn(async move { waiting.fetch(0).await });
        tokio::task::yield_now().await;

        broker.set_available(false);
        assert!(matches!(
            conn.produce(vec![1]).await,
            Err(BrokerError::Unreachable(_))
        ));
        assert!(matches!(
            pending.await.unwrap(),
            Err(BrokerError::Unreachable(_))
        ));
        assert!(broker.connect(&brokers(), &partition).await.is_err());

        broker.set_available(true);
        assert!(conn.offsets().await.is_err(), "old connection stays dead");
        let fresh = broker.connect(&brokers(), &partition).await.unwrap();
        assert!(fresh.produce(vec![1]).await.is_ok());
    }

    #[tokio::test]
    async fn test_truncate_advances_oldest() {
        let broker = MemoryBroker::new();
        let partition = ChainPartition::default();
        broker.seed(&partition, 0, (0..10u8).map(|i| vec![i]));
        broker.truncate_before(&partition, 4);
        assert_eq!(broker.offsets(&partition), Some(OffsetRange::new(4, 10)));
        assert_eq!(broker.record(&partition, 4), Some(vec![4]));
        assert_eq!(broker.record(&partition, 3), None);
    }

    #[tokio::test]
    async fn test_connect_requires_brokers() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker.connect(&[], &ChainPartition::default()).await,
            Err(BrokerError::Rejected(_))
        ));
    }
}
