//! Consumer half of the ordering log.
//!
//! The consumer is the only ledger writer. It tails the ordering partition in
//! offset order and appends each record exactly once; on connection loss it
//! reconnects and resumes at the first unprocessed offset, and refuses to
//! resume past a gap.

use super::chain::ChainStatus;
use crate::config::StartFrom;
use crate::domain::chain_state::ChainEvent;
use crate::domain::errors::{BrokerError, OrderingLogError, RetryError};
use crate::domain::retry::RetryPolicy;
use crate::domain::value_objects::{ChainPartition, OffsetRange};
use crate::ports::outbound::{
    BrokerConnection, BrokerConnector, LedgerWriter, LogRecord, OffsetCheckpoint,
};
use shared_types::{Block, LogOffset};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct OrderingConsumer<C: BrokerConnector, L> {
    connector: Arc<C>,
    brokers: Vec<String>,
    partition: ChainPartition,
    retry: RetryPolicy,
    start_from: StartFrom,
    ledger: Arc<L>,
    status: ChainStatus,
}

impl<C, L> OrderingConsumer<C, L>
where
    C: BrokerConnector,
    L: LedgerWriter + OffsetCheckpoint,
{
    pub fn new(
        connector: Arc<C>,
        brokers: Vec<String>,
        partition: ChainPartition,
        retry: RetryPolicy,
        start_from: StartFrom,
        ledger: Arc<L>,
        status: ChainStatus,
    ) -> Self {
        Self {
            connector,
            brokers,
            partition,
            retry,
            start_from,
            ledger,
            status,
        }
    }

    /// Where tailing starts: one past the checkpoint, else the configured end
    /// of the retained range.
    pub fn start_offset(&self, range: OffsetRange) -> Result<LogOffset, OrderingLogError> {
        match self.ledger.last_processed_offset() {
            Some(last) => {
                let resume_from = last + 1;
                check_resume(resume_from, range)?;
                Ok(resume_from)
            }
            None => Ok(match self.start_from {
                StartFrom::Oldest => range.oldest,
                StartFrom::Newest => range.newest,
            }),
        }
    }

    /// Tail the partition until `shutdown` flips to true or a fatal error.
    ///
    /// On shutdown, records already in the log are applied before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), OrderingLogError> {
        let (mut conn, range) = tokio::select! {
            biased;
            _ = shutdown_signal(&mut shutdown) => return Ok(()),
            attached = self.attach() => attached?,
        };
        let mut next = self.start_offset(range)?;
        info!(
            partition = %self.partition,
            offset = next,
            oldest = range.oldest,
            newest = range.newest,
            "Consumer started"
        );
        self.status.apply(ChainEvent::Connected { next_offset: next });

        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown_signal(&mut shutdown) => {
                    return self.drain(&conn, next).await;
                }
                fetched = conn.fetch(next) => fetched,
            };

            match fetched {
                Ok(record) => {
                    self.apply(record)?;
                    self.status.apply(ChainEvent::Confirmed { offset: next });
                    next += 1;
                }
                Err(BrokerError::OffsetOutOfRange { oldest, .. }) => {
                    return Err(OrderingLogError::ContinuityLost {
                        resume_from: next,
                        oldest,
                    });
                }
                Err(e) if e.is_transient() => {
                    warn!(offset = next, error = %e, "Lost replicated log connection, reconnecting");
                    self.status
                        .apply(ChainEvent::ConnectionLost { resume_from: next });
                    let (fresh, range) = tokio::select! {
                        biased;
                        _ = shutdown_signal(&mut shutdown) => return Ok(()),
                        attached = self.attach() => attached?,
                    };
                    check_resume(next, range)?;
                    conn = fresh;
                    info!(offset = next, "Consumer resumed");
                    self.status.apply(ChainEvent::Connected { next_offset: next });
                }
                Err(e) => return Err(OrderingLogError::Broker(e)),
            }
        }
    }

    /// Connect and read the retained range, retrying transient failures.
    async fn attach(&self) -> Result<(C::Connection, OffsetRange), OrderingLogError> {
        self.retry
            .attempt_while(
                "connect",
                || async {
                    let conn = self
                        .connector
                        .connect(&self.brokers, &self.partition)
                        .await?;
                    let range = conn.offsets().await?;
                    Ok::<_, BrokerError>((conn, range))
                },
                BrokerError::is_transient,
            )
            .await
            .map_err(|e| match e {
                RetryError::Aborted { error, .. } => OrderingLogError::Broker(error),
                exhausted => OrderingLogError::Unreachable(exhausted),
            })
    }

    fn apply(&self, record: LogRecord) -> Result<(), OrderingLogError> {
        let offset = record.offset;
        let block = Block::decode(&record.payload)
            .map_err(|source| OrderingLogError::Codec { offset, source })?;
        let number = self
            .ledger
            .append(block.with_log_offset(offset))
            .map_err(|source| OrderingLogError::Ledger { offset, source })?;
        debug!(offset, block_number = number, "Confirmed block");
        Ok(())
    }

    /// Apply whatever is already in the log, then stop.
    async fn drain(&self, conn: &C::Connection, mut next: LogOffset) -> Result<(), OrderingLogError> {
        let newest = match conn.offsets().await {
            Ok(range) => range.newest,
            Err(e) => {
                warn!(offset = next, error = %e, "Skipping drain, log unreachable");
                return Ok(());
            }
        };
        while next < newest {
            match conn.fetch(next).await {
                Ok(record) => {
                    self.apply(record)?;
                    self.status.apply(ChainEvent::Confirmed { offset: next });
                    next += 1;
                }
                Err(e) => {
                    warn!(offset = next, error = %e, "Drain stopped early");
                    break;
                }
            }
        }
        info!(offset = next, "Consumer stopped");
        Ok(())
    }
}

fn check_resume(resume_from: LogOffset, range: OffsetRange) -> Result<(), OrderingLogError> {
    if range.can_resume_at(resume_from) {
        return Ok(());
    }
    if resume_from < range.oldest {
        Err(OrderingLogError::ContinuityLost {
            resume_from,
            oldest: range.oldest,
        })
    } else {
        Err(OrderingLogError::OffsetBeyondLog {
            resume_from,
            newest: range.newest,
        })
    }
}

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
