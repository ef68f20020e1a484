//! # Node Runtime
//!
//! Wires the ledger, genesis, ordering chain, delivery service and client
//! API into one running orderer.
//!
//! ## Startup
//!
//! 1. Create the RAM ledger and append the genesis block if it is empty
//! 2. Start the ordering chain (batcher, producer, consumer) on the
//!    connector named by `kafka.connector`
//! 3. Bind the client API listener and start serving
//!
//! ## Shutdown
//!
//! The listener stops first so no new envelopes arrive, then the chain
//! flushes its pending batch and drains the log.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kafka_orderer::{
    BrokerConnector, ChainHandle, ConnectorKind, DeliverService, KafkaConnector, MemoryBroker,
    OrdererConfig, RamLedger,
};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::genesis;
use crate::server::{self, AppState};

/// How long open client connections get to finish on shutdown.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running orderer node.
pub struct NodeRuntime {
    config: OrdererConfig,
    local_addr: SocketAddr,
    ledger: Arc<RamLedger>,
    chain: Arc<ChainHandle>,
    shutdown_tx: watch::Sender<bool>,
    server: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl NodeRuntime {
    /// Start a node on the replicated log selected by `kafka.connector`.
    pub async fn start(config: OrdererConfig) -> Result<Self> {
        match config.kafka.connector {
            ConnectorKind::Kafka => {
                let connector = KafkaConnector::from_config(&config.kafka)
                    .context("Invalid Kafka client settings")?;
                Self::start_with_connector(config, Arc::new(connector)).await
            }
            ConnectorKind::Memory => {
                warn!("Using the in-process log; it is not shared with other orderers");
                Self::start_with_connector(config, Arc::new(MemoryBroker::new())).await
            }
        }
    }

    /// Start a node on a caller-supplied connector, e.g. one `MemoryBroker`
    /// shared by several nodes.
    pub async fn start_with_connector<C: BrokerConnector>(
        config: OrdererConfig,
        connector: Arc<C>,
    ) -> Result<Self> {
        let version = config.kafka.protocol_version()?;
        info!(
            orderer_type = %config.general.orderer_type,
            connector = ?config.kafka.connector,
            partition = %config.kafka.chain_partition(),
            brokers = ?config.kafka.brokers,
            version = %version,
            "Starting orderer"
        );

        let ledger = Arc::new(RamLedger::new(config.ram_ledger.history_size));
        genesis::bootstrap(ledger.as_ref(), &config).context("Genesis bootstrap failed")?;

        let chain = Arc::new(ChainHandle::start(&config, connector, Arc::clone(&ledger)));
        let deliver = Arc::new(DeliverService::new(
            Arc::clone(&ledger),
            config.general.max_window_size,
        ));

        let listen_addr = config.general.listen_addr();
        let listener = TcpListener::bind(&listen_addr)
            .await
            .with_context(|| format!("Failed to bind {listen_addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read bound address")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = AppState::new(Arc::clone(&chain), deliver);
        let server = tokio::spawn(server::serve(listener, state, shutdown_rx));
        info!(addr = %local_addr, "Orderer listening");

        Ok(Self {
            config,
            local_addr,
            ledger,
            chain,
            shutdown_tx,
            server: Mutex::new(Some(server)),
        })
    }

    pub fn config(&self) -> &OrdererConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn ledger(&self) -> &Arc<RamLedger> {
        &self.ledger
    }

    pub fn chain(&self) -> &Arc<ChainHandle> {
        &self.chain
    }

    /// Stop serving, then shut the chain down. Safe to call twice.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send_replace(true);
        if let Some(server) = self.server.lock().await.take() {
            match tokio::time::timeout(SERVER_DRAIN_TIMEOUT, server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!(error = %e, "Client API server failed"),
                Ok(Err(e)) => warn!(error = %e, "Client API task panicked"),
                Err(_) => warn!("Client connections still open after drain timeout"),
            }
        }
        self.chain
            .shutdown()
            .await
            .context("Chain did not shut down cleanly")?;
        info!("Orderer stopped");
        Ok(())
    }
}
