//! One ordering channel.
//!
//! ```text
//! broadcast ──mpsc(queue_size)──→ batcher task ──produce──→ replicated log
//!                                 (BatchBuilder + timer)          │
//!                                                                 ▼
//!          delivery sessions ←── ledger ←──append── consumer task (tail)
//! ```
//!
//! The batcher never touches the ledger. Blocks reach the ledger only through
//! the consumer, so every replica applies the same records in the same order,
//! including the blocks it produced itself.

use super::consumer::{shutdown_signal, OrderingConsumer};
use super::producer::OrderingProducer;
use crate::config::OrdererConfig;
use crate::domain::batch::BatchBuilder;
use crate::domain::chain_state::{ChainEvent, ChainState};
use crate::domain::errors::ChainError;
use crate::ports::inbound::BroadcastApi;
use crate::ports::outbound::{BrokerConnector, LedgerWriter, OffsetCheckpoint};
use async_trait::async_trait;
use shared_types::{Block, BroadcastResponse, Envelope, Status};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Observable chain state shared by the chain tasks.
#[derive(Clone, Debug)]
pub struct ChainStatus {
    tx: Arc<watch::Sender<ChainState>>,
}

impl Default for ChainStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStatus {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ChainState::Starting);
        Self { tx: Arc::new(tx) }
    }

    /// Run `event` through the state machine and publish the result.
    pub fn apply(&self, event: ChainEvent) {
        self.tx.send_if_modified(|state| {
            let next = state.clone().apply(event);
            if next == *state {
                return false;
            }
            if next.name() != state.name() {
                info!(from = state.name(), to = next.name(), "Chain state changed");
            }
            *state = next;
            true
        });
    }

    pub fn current(&self) -> ChainState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChainState> {
        self.tx.subscribe()
    }
}

struct ChainTasks {
    batcher: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

/// Handle to a running chain.
pub struct ChainHandle {
    ingress: mpsc::Sender<Envelope>,
    status: ChainStatus,
    batcher_stop: watch::Sender<bool>,
    consumer_stop: watch::Sender<bool>,
    tasks: Mutex<Option<ChainTasks>>,
}

impl ChainHandle {
    /// Spawn the batcher and consumer tasks for one ordering channel.
    pub fn start<C, L>(config: &OrdererConfig, connector: Arc<C>, ledger: Arc<L>) -> Self
    where
        C: BrokerConnector,
        L: LedgerWriter + OffsetCheckpoint + 'static,
    {
        let status = ChainStatus::new();
        let partition = config.kafka.chain_partition();
        let retry = config.kafka.retry.policy();
        let (ingress, envelopes) = mpsc::channel(config.general.queue_size.max(1));
        let (batcher_stop, batcher_stop_rx) = watch::channel(false);
        let (consumer_stop, consumer_stop_rx) = watch::channel(false);

        let producer = OrderingProducer::new(
            Arc::clone(&connector),
            config.kafka.brokers.clone(),
            partition.clone(),
            retry,
        );
        let consumer = OrderingConsumer::new(
            connector,
            config.kafka.brokers.clone(),
            partition.clone(),
            retry,
            config.kafka.start_from,
            ledger,
            status.clone(),
        );

        let batcher = tokio::spawn(run_batcher(
            BatchBuilder::new(config.general.batch_config()),
            envelopes,
            producer,
            status.clone(),
            batcher_stop_rx,
        ));
        let consumer = {
            let status = status.clone();
            tokio::spawn(async move {
                if let Err(e) = consumer.run(consumer_stop_rx).await {
                    error!(error = %e, "Consumer failed, halting chain");
                    status.apply(ChainEvent::Fatal(e.to_string()));
                }
            })
        };

        info!(partition = %partition, "Chain started");
        Self {
            ingress,
            status,
            batcher_stop,
            consumer_stop,
            tasks: Mutex::new(Some(ChainTasks { batcher, consumer })),
        }
    }

    pub fn state(&self) -> ChainState {
        self.status.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChainState> {
        self.status.subscribe()
    }

    /// Flush pending envelopes, let the consumer apply what is already in the
    /// log, then stop both tasks. Idempotent.
    pub async fn shutdown(&self) -> Result<(), ChainError> {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return Ok(());
        };
        info!("Chain shutting down");

        self.batcher_stop.send_replace(true);
        let batcher = tasks.batcher.await;
        self.consumer_stop.send_replace(true);
        let consumer = tasks.consumer.await;

        if let ChainState::Halted { reason } = self.status.current() {
            return Err(ChainError::Halted { reason });
        }
        self.status.apply(ChainEvent::Shutdown);

        batcher.map_err(|e| ChainError::Task {
            task: "batcher",
            reason: e.to_string(),
        })?;
        consumer.map_err(|e| ChainError::Task {
            task: "consumer",
            reason: e.to_string(),
        })?;
        info!("Chain stopped");
        Ok(())
    }
}

#[async_trait]
impl BroadcastApi for ChainHandle {
    async fn broadcast(&self, envelope: Envelope) -> BroadcastResponse {
        if envelope.payload.is_empty() {
            debug!("Rejected envelope with empty payload");
            return BroadcastResponse::new(Status::BadRequest);
        }
        if *self.batcher_stop.borrow() || !self.status.current().is_accepting() {
            return BroadcastResponse::new(Status::ServiceUnavailable);
        }
        // Waits while the queue is full; fails once the batcher has exited.
        match self.ingress.send(envelope).await {
            Ok(()) => BroadcastResponse::new(Status::Success),
            Err(_) => {
                warn!("Batcher gone, rejecting envelope");
                BroadcastResponse::new(Status::ServiceUnavailable)
            }
        }
    }
}

enum BatcherStep {
    Envelope(Envelope),
    Tick,
    Shutdown,
}

async fn run_batcher<C: BrokerConnector>(
    mut builder: BatchBuilder,
    mut envelopes: mpsc::Receiver<Envelope>,
    producer: OrderingProducer<C>,
    status: ChainStatus,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let deadline = builder.deadline();
        let step = tokio::select! {
            biased;
            _ = shutdown_signal(&mut stop) => BatcherStep::Shutdown,
            envelope = envelopes.recv() => match envelope {
                Some(envelope) => BatcherStep::Envelope(envelope),
                None => BatcherStep::Shutdown,
            },
            _ = sleep_until_deadline(deadline) => BatcherStep::Tick,
        };

        let blocks = match step {
            BatcherStep::Envelope(envelope) => builder.submit(envelope, Instant::now()),
            BatcherStep::Tick => builder.tick(Instant::now()).into_iter().collect(),
            BatcherStep::Shutdown => {
                envelopes.close();
                let now = Instant::now();
                let mut blocks = Vec::new();
                while let Ok(envelope) = envelopes.try_recv() {
                    blocks.extend(builder.submit(envelope, now));
                }
                blocks.extend(builder.flush());
                for block in blocks {
                    if !produce(&producer, &status, block).await {
                        break;
                    }
                }
                producer.close().await;
                return;
            }
        };

        for block in blocks {
            if !produce(&producer, &status, block).await {
                producer.close().await;
                return;
            }
        }
    }
}

/// Returns false once the chain has halted.
async fn produce<C: BrokerConnector>(
    producer: &OrderingProducer<C>,
    status: &ChainStatus,
    block: Block,
) -> bool {
    match producer.produce(&block).await {
        Ok(offset) => {
            debug!(offset, envelopes = block.len(), "Block handed to the log");
            true
        }
        Err(e) => {
            error!(error = %e, envelopes = block.len(), "Produce failed, halting chain");
            status.apply(ChainEvent::Fatal(e.to_string()));
            false
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryBroker, RamLedger};

    #[test]
    fn test_status_ignores_redundant_events() {
        let status = ChainStatus::new();
        let mut rx = status.subscribe();
        status.apply(ChainEvent::Connected { next_offset: 3 });
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        status.apply(ChainEvent::Connected { next_offset: 3 });
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_empty_payload_is_bad_request() {
        let chain = ChainHandle::start(
            &OrdererConfig::default(),
            Arc::new(MemoryBroker::new()),
            Arc::new(RamLedger::new(10)),
        );
        let reply = chain.broadcast(Envelope::new(Vec::new())).await;
        assert_eq!(reply.status, Status::BadRequest);
        chain.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_after_shutdown_is_unavailable() {
        let chain = ChainHandle::start(
            &OrdererConfig::default(),
            Arc::new(MemoryBroker::new()),
            Arc::new(RamLedger::new(10)),
        );
        chain.shutdown().await.unwrap();
        assert_eq!(chain.state(), ChainState::Stopped);

        let reply = chain.broadcast(Envelope::new(b"late".to_vec())).await;
        assert_eq!(reply.status, Status::ServiceUnavailable);
        assert!(chain.shutdown().await.is_ok());
    }
}
