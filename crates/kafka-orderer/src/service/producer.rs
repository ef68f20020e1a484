//! Producer half of the ordering log.

use crate::domain::errors::{BrokerError, OrderingLogError, RetryError};
use crate::domain::retry::RetryPolicy;
use crate::domain::value_objects::ChainPartition;
use crate::ports::outbound::{BrokerConnection, BrokerConnector};
use shared_types::{Block, LogOffset};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Publishes cut blocks to the ordering partition.
///
/// Holds at most one connection, opened lazily and dropped after a transient
/// failure so the next attempt reconnects.
pub struct OrderingProducer<C: BrokerConnector> {
    connector: Arc<C>,
    brokers: Vec<String>,
    partition: ChainPartition,
    retry: RetryPolicy,
    connection: Mutex<Option<C::Connection>>,
}

impl<C: BrokerConnector> OrderingProducer<C> {
    pub fn new(
        connector: Arc<C>,
        brokers: Vec<String>,
        partition: ChainPartition,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            connector,
            brokers,
            partition,
            retry,
            connection: Mutex::new(None),
        }
    }

    /// Append `block` to the log and return its offset.
    ///
    /// On error the block must be treated as not ordered.
    pub async fn produce(&self, block: &Block) -> Result<LogOffset, OrderingLogError> {
        let payload = block.encode().map_err(OrderingLogError::Encode)?;
        let offset = self
            .retry
            .attempt_while(
                "produce",
                || self.try_produce(payload.clone()),
                BrokerError::is_transient,
            )
            .await
            .map_err(|e| match e {
                RetryError::Aborted { error, .. } => OrderingLogError::Broker(error),
                exhausted => OrderingLogError::Unreachable(exhausted),
            })?;
        debug!(offset, envelopes = block.len(), "Produced block");
        Ok(offset)
    }

    /// Drop the broker connection.
    pub async fn close(&self) {
        if self.connection.lock().await.take().is_some() {
            info!(partition = %self.partition, "Producer connection released");
        }
    }

    async fn try_produce(&self, payload: Vec<u8>) -> Result<LogOffset, BrokerError> {
        let mut slot = self.connection.lock().await;
        if slot.is_none() {
            *slot = Some(
                self.connector
                    .connect(&self.brokers, &self.partition)
                    .await?,
            );
        }
        let Some(conn) = slot.as_ref() else {
            return Err(BrokerError::Unreachable("producer has no connection".into()));
        };
        let result = conn.produce(payload).await;
        if matches!(&result, Err(e) if e.is_transient()) {
            *slot = None;
        }
        result
    }
}
