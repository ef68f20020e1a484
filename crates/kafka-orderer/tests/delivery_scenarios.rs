//! # Delivery Session Scenarios
//!
//! End-to-end seek/stream/acknowledge behaviour against a RAM ledger holding
//! blocks 100..1100 (1100 appended, history of 1000).

use std::sync::Arc;
use std::time::Duration;

use kafka_orderer::{
    DeliverApi, DeliverService, LedgerReader, LedgerWriter, RamLedger, SessionError,
    SessionInput, SessionOutcome, SessionState,
};
use shared_types::{Block, DeliverResponse, DeliverUpdate, Envelope, SeekInfo, Status};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const QUIET: Duration = Duration::from_millis(100);

fn populated_ledger() -> Arc<RamLedger> {
    let ledger = Arc::new(RamLedger::new(1000));
    for i in 0..1100u32 {
        ledger
            .append(Block::new(vec![Envelope::new(i.to_be_bytes().to_vec())]))
            .unwrap();
    }
    assert_eq!(ledger.oldest_available(), 100);
    assert_eq!(ledger.newest_available(), 1100);
    ledger
}

struct Client {
    updates: mpsc::Sender<SessionInput>,
    responses: mpsc::Receiver<DeliverResponse>,
    session: JoinHandle<SessionOutcome>,
}

impl Client {
    fn connect(service: &DeliverService<RamLedger>) -> Self {
        let (updates, inputs) = mpsc::channel(16);
        let (out, responses) = mpsc::channel(16);
        let session = service.deliver(inputs, out);
        Self {
            updates,
            responses,
            session,
        }
    }

    async fn send(&self, update: DeliverUpdate) {
        self.updates.send(update.into()).await.unwrap();
    }

    async fn next(&mut self) -> DeliverResponse {
        timeout(Duration::from_secs(2), self.responses.recv())
            .await
            .expect("response within timeout")
            .expect("stream still open")
    }

    async fn next_block_number(&mut self) -> u64 {
        match self.next().await {
            DeliverResponse::Block(block) => block.number(),
            other => panic!("expected block, got {other:?}"),
        }
    }

    async fn assert_quiet(&mut self) {
        assert!(
            timeout(QUIET, self.responses.recv()).await.is_err(),
            "session sent beyond its window"
        );
    }

    async fn finish(self) -> SessionOutcome {
        drop(self.updates);
        timeout(Duration::from_secs(2), self.session)
            .await
            .expect("session ends")
            .unwrap()
    }
}

#[tokio::test]
async fn test_scenario_a_oldest_with_window_of_ten() {
    let service = DeliverService::new(populated_ledger(), 100);
    let mut client = Client::connect(&service);

    client.send(DeliverUpdate::seek(SeekInfo::oldest(10))).await;
    for expected in 100..110 {
        assert_eq!(client.next_block_number().await, expected);
    }
    client.assert_quiet().await;

    client.send(DeliverUpdate::ack(100)).await;
    assert_eq!(client.next_block_number().await, 110);
    client.assert_quiet().await;

    let outcome = client.finish().await;
    assert_eq!(outcome.blocks_sent, 11);
    assert_eq!(outcome.final_state, SessionState::Closed);
}

#[tokio::test]
async fn test_scenario_b_specified_start() {
    let service = DeliverService::new(populated_ledger(), 100);
    let mut client = Client::connect(&service);

    client.send(DeliverUpdate::seek(SeekInfo::specified(600, 10))).await;
    let first = client.next().await;
    match first {
        DeliverResponse::Block(block) => {
            assert_eq!(block.number(), 600);
            assert_eq!(block.data.envelopes[0].payload, 600u32.to_be_bytes().to_vec());
        }
        other => panic!("expected block 600, got {other:?}"),
    }
}

#[tokio::test]
async fn test_scenario_c_specified_below_oldest() {
    let service = DeliverService::new(populated_ledger(), 100);
    let mut client = Client::connect(&service);

    client.send(DeliverUpdate::seek(SeekInfo::specified(50, 10))).await;
    assert_eq!(client.next().await, DeliverResponse::Error(Status::BadRequest));
    assert!(client.responses.recv().await.is_none(), "stream closes after error");

    let outcome = client.finish().await;
    assert_eq!(outcome.blocks_sent, 0);
    assert!(matches!(
        outcome.final_state,
        SessionState::Errored(SessionError::SeekOutOfRange { requested: 50, .. })
    ));
}

#[tokio::test]
async fn test_acknowledgements_slide_window_in_order() {
    let service = DeliverService::new(populated_ledger(), 100);
    let mut client = Client::connect(&service);

    client.send(DeliverUpdate::seek(SeekInfo::specified(1000, 3))).await;
    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(client.next_block_number().await);
    }
    client.assert_quiet().await;

    client.send(DeliverUpdate::ack(1001)).await;
    received.push(client.next_block_number().await);
    received.push(client.next_block_number().await);
    client.assert_quiet().await;

    assert_eq!(received, vec![1000, 1001, 1002, 1003, 1004]);
}

#[tokio::test]
async fn test_regressive_ack_errors_session() {
    let service = DeliverService::new(populated_ledger(), 100);
    let mut client = Client::connect(&service);

    client.send(DeliverUpdate::seek(SeekInfo::specified(200, 2))).await;
    assert_eq!(client.next_block_number().await, 200);
    assert_eq!(client.next_block_number().await, 201);
    client.send(DeliverUpdate::ack(201)).await;
    assert_eq!(client.next_block_number().await, 202);
    assert_eq!(client.next_block_number().await, 203);

    client.send(DeliverUpdate::ack(200)).await;
    assert_eq!(client.next().await, DeliverResponse::Error(Status::BadRequest));

    let outcome = client.finish().await;
    assert_eq!(outcome.blocks_sent, 4);
    assert!(matches!(
        outcome.final_state,
        SessionState::Errored(SessionError::AckRegressed { number: 200, last: 201 })
    ));
}

#[tokio::test]
async fn test_window_larger_than_maximum_is_rejected() {
    let service = DeliverService::new(populated_ledger(), 100);
    let mut client = Client::connect(&service);

    client.send(DeliverUpdate::seek(SeekInfo::oldest(101))).await;
    assert_eq!(client.next().await, DeliverResponse::Error(Status::BadRequest));
}

#[tokio::test]
async fn test_reseek_restarts_stream() {
    let service = DeliverService::new(populated_ledger(), 100);
    let mut client = Client::connect(&service);

    client.send(DeliverUpdate::seek(SeekInfo::oldest(2))).await;
    assert_eq!(client.next_block_number().await, 100);
    assert_eq!(client.next_block_number().await, 101);
    client.assert_quiet().await;

    client.send(DeliverUpdate::seek(SeekInfo::specified(900, 2))).await;
    assert_eq!(client.next_block_number().await, 900);
    assert_eq!(client.next_block_number().await, 901);
    client.assert_quiet().await;
}

#[tokio::test]
async fn test_newest_waits_for_next_commit() {
    let ledger = populated_ledger();
    let service = DeliverService::new(Arc::clone(&ledger), 100);
    let mut client = Client::connect(&service);

    client.send(DeliverUpdate::seek(SeekInfo::newest(5))).await;
    client.assert_quiet().await;

    ledger
        .append(Block::new(vec![Envelope::new(b"next".to_vec())]))
        .unwrap();
    assert_eq!(client.next_block_number().await, 1100);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let service = DeliverService::new(populated_ledger(), 100);
    let mut healthy = Client::connect(&service);
    let mut broken = Client::connect(&service);

    healthy.send(DeliverUpdate::seek(SeekInfo::specified(500, 1))).await;
    broken.send(DeliverUpdate::ack(7)).await;

    assert_eq!(broken.next().await, DeliverResponse::Error(Status::BadRequest));
    assert_eq!(healthy.next_block_number().await, 500);
    healthy.send(DeliverUpdate::ack(500)).await;
    assert_eq!(healthy.next_block_number().await, 501);

    let outcome = broken.finish().await;
    assert_eq!(
        outcome.final_state,
        SessionState::Errored(SessionError::AckBeforeSeek)
    );
}
