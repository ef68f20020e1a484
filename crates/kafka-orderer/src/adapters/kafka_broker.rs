//! Kafka client over the network.
//!
//! One bootstrap client per [`BrokerConnector::connect`], narrowed to a
//! single partition. Every broker call carries the configured request
//! timeout, so a silent broker surfaces as [`BrokerError::Unreachable`] and
//! the retry policy above decides what happens next.
//!
//! The client speaks record batches only, which brokers older than 0.11 do
//! not understand; the connector refuses a configured version below that.

use crate::config::{ConfigError, KafkaConfig};
use crate::domain::errors::BrokerError;
use crate::domain::value_objects::{ChainPartition, OffsetRange, ProtocolVersion};
use crate::ports::outbound::{BrokerConnection, BrokerConnector, LogRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use rskafka::client::partition::{Compression, OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::ClientBuilder;
use rskafka::record::Record;
use shared_types::LogOffset;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Upper bound on one fetch response.
const MAX_FETCH_BYTES: i32 = 1024 * 1024;

/// Opens partition connections against real brokers.
#[derive(Clone, Debug)]
pub struct KafkaConnector {
    version: ProtocolVersion,
    request_timeout: Duration,
}

impl KafkaConnector {
    pub fn new(version: ProtocolVersion, request_timeout: Duration) -> Result<Self, ConfigError> {
        if !version.supports_record_batches() {
            return Err(ConfigError::Unsupported {
                field: "kafka.version",
                value: version.to_string(),
            });
        }
        Ok(Self {
            version,
            request_timeout,
        })
    }

    pub fn from_config(config: &KafkaConfig) -> Result<Self, ConfigError> {
        Self::new(config.protocol_version()?, config.request_timeout())
    }

    pub fn version(&self) -> &ProtocolVersion {
        &self.version
    }

    /// Long-poll wait handed to the broker; kept under the request timeout
    /// so an idle fetch returns empty instead of timing out.
    fn max_wait_ms(&self) -> i32 {
        let half = self.request_timeout.as_millis() / 2;
        i32::try_from(half).unwrap_or(i32::MAX).max(1)
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    type Connection = KafkaConnection;

    async fn connect(
        &self,
        brokers: &[String],
        partition: &ChainPartition,
    ) -> Result<KafkaConnection, BrokerError> {
        if brokers.is_empty() {
            return Err(BrokerError::Rejected("no broker addresses given".into()));
        }
        let bootstrap = within(
            self.request_timeout,
            "bootstrap",
            ClientBuilder::new(brokers.to_vec()).build(),
        )
        .await?;
        let client = within(
            self.request_timeout,
            "partition lookup",
            bootstrap.partition_client(
                partition.topic.clone(),
                partition.partition,
                UnknownTopicHandling::Error,
            ),
        )
        .await?;
        info!(
            partition = %partition,
            brokers = ?brokers,
            version = %self.version,
            "Connected to Kafka partition"
        );
        Ok(KafkaConnection {
            client,
            partition: partition.clone(),
            request_timeout: self.request_timeout,
            max_wait_ms: self.max_wait_ms(),
            read_ahead: Mutex::new(ReadAhead::default()),
        })
    }
}

/// Connection to one Kafka partition.
pub struct KafkaConnection {
    client: PartitionClient,
    partition: ChainPartition,
    request_timeout: Duration,
    max_wait_ms: i32,
    read_ahead: Mutex<ReadAhead>,
}

impl fmt::Debug for KafkaConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaConnection")
            .field("partition", &self.partition)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl KafkaConnection {
    async fn earliest(&self) -> Result<LogOffset, BrokerError> {
        within(
            self.request_timeout,
            "list earliest offset",
            self.client.get_offset(OffsetAt::Earliest),
        )
        .await
    }
}

#[async_trait]
impl BrokerConnection for KafkaConnection {
    async fn produce(&self, payload: Vec<u8>) -> Result<LogOffset, BrokerError> {
        let record = Record {
            key: None,
            value: Some(payload),
            headers: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        };
        let offsets = within(
            self.request_timeout,
            "produce",
            self.client.produce(vec![record], Compression::NoCompression),
        )
        .await?;
        let offset = offsets
            .first()
            .copied()
            .ok_or_else(|| BrokerError::Rejected("produce returned no offset".into()))?;
        debug!(partition = %self.partition, offset, "Produced record");
        Ok(offset)
    }

    async fn offsets(&self) -> Result<OffsetRange, BrokerError> {
        let oldest = self.earliest().await?;
        let newest = within(
            self.request_timeout,
            "list latest offset",
            self.client.get_offset(OffsetAt::Latest),
        )
        .await?;
        Ok(OffsetRange::new(oldest, newest))
    }

    async fn fetch(&self, offset: LogOffset) -> Result<LogRecord, BrokerError> {
        loop {
            let buffered = self.read_ahead.lock().take(offset);
            if let Some(record) = buffered {
                return Ok(record);
            }

            let oldest = self.earliest().await?;
            if offset < oldest {
                return Err(BrokerError::OffsetOutOfRange {
                    requested: offset,
                    oldest,
                });
            }

            let (records, high_watermark) = within(
                self.request_timeout,
                "fetch",
                self.client
                    .fetch_records(offset, 1..MAX_FETCH_BYTES, self.max_wait_ms),
            )
            .await?;
            trace!(
                partition = %self.partition,
                offset,
                fetched = records.len(),
                high_watermark,
                "Fetch returned"
            );
            let fetched = records
                .into_iter()
                .map(|r| LogRecord {
                    offset: r.offset,
                    payload: r.record.value.unwrap_or_default(),
                })
                .collect();
            self.read_ahead.lock().refill(offset, fetched)?;
        }
    }
}

/// Run one broker call under `limit`, folding client errors into
/// [`BrokerError::Unreachable`].
async fn within<T, E, F>(limit: Duration, what: &str, call: F) -> Result<T, BrokerError>
where
    E: fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(BrokerError::Unreachable(format!("{what}: {e}"))),
        Err(_) => Err(BrokerError::Unreachable(format!(
            "{what}: no reply within {limit:?}"
        ))),
    }
}

/// Records fetched past the one asked for, served before the next round trip.
#[derive(Debug, Default)]
struct ReadAhead {
    records: VecDeque<LogRecord>,
}

impl ReadAhead {
    /// The buffered record at `offset`, dropping anything before it. `None`
    /// means the caller has to go to the broker.
    fn take(&mut self, offset: LogOffset) -> Option<LogRecord> {
        while let Some(front) = self.records.front() {
            if front.offset < offset {
                self.records.pop_front();
                continue;
            }
            if front.offset == offset {
                return self.records.pop_front();
            }
            // Buffered run starts past the reader; it was filled for another position.
            self.records.clear();
        }
        None
    }

    /// Replace the buffer with records fetched for `requested`.
    ///
    /// Batches may start before the requested offset; those records are
    /// dropped. A run that starts after it means the partition skipped
    /// offsets, which the ordering log never does.
    fn refill(
        &mut self,
        requested: LogOffset,
        mut fetched: Vec<LogRecord>,
    ) -> Result<(), BrokerError> {
        fetched.retain(|r| r.offset >= requested);
        fetched.sort_by_key(|r| r.offset);
        if let Some(first) = fetched.first() {
            if first.offset != requested {
                return Err(BrokerError::Rejected(format!(
                    "log skipped from offset {requested} to {}",
                    first.offset
                )));
            }
        }
        self.records = fetched.into();
        Ok(())
    }
}
