//! Delivery sessions.
//!
//! Each client gets its own task running a [`DeliverSession`]. The task waits
//! on two things at once: the next client update and, while streaming, the
//! next block from the ledger. In `WindowBlocked` only the client side is
//! awaited, so a blocked session is idle.

use crate::domain::errors::{LedgerError, SessionError};
use crate::domain::session::{SessionEvent, SessionState};
use crate::ports::inbound::DeliverApi;
use crate::ports::outbound::LedgerReader;
use shared_types::{Block, BlockNumber, DeliverResponse, DeliverUpdate};
use std::mem;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// What the transport hands to a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionInput {
    Update(DeliverUpdate),
    /// A frame that did not parse as a [`DeliverUpdate`].
    Malformed(String),
}

impl From<DeliverUpdate> for SessionInput {
    fn from(update: DeliverUpdate) -> Self {
        SessionInput::Update(update)
    }
}

/// Summary returned when a session ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    pub id: Uuid,
    pub blocks_sent: u64,
    pub final_state: SessionState,
}

enum Step {
    Input(Option<SessionInput>),
    Block(Result<Block, LedgerError>),
    ClientGone,
}

/// Seek-then-stream protocol for one client.
pub struct DeliverSession<R> {
    id: Uuid,
    ledger: Arc<R>,
    max_window: u64,
    state: SessionState,
    blocks_sent: u64,
}

impl<R: LedgerReader + 'static> DeliverSession<R> {
    pub fn new(ledger: Arc<R>, max_window: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            ledger,
            max_window,
            state: SessionState::AwaitingSeek,
            blocks_sent: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Serve the client until it disconnects or violates the protocol.
    ///
    /// An errored session sends one final [`DeliverResponse::Error`].
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<SessionInput>,
        responses: mpsc::Sender<DeliverResponse>,
    ) -> SessionOutcome {
        info!(session_id = %self.id, "Delivery session opened");

        while !self.state.is_terminal() {
            let next = self.state.next_block();
            let ledger = Arc::clone(&self.ledger);
            let step = tokio::select! {
                biased;
                input = inputs.recv() => Step::Input(input),
                _ = responses.closed() => Step::ClientGone,
                block = next_block(ledger, next) => Step::Block(block),
            };

            let event = match step {
                Step::Input(None) | Step::ClientGone => SessionEvent::Disconnected,
                Step::Input(Some(SessionInput::Malformed(reason))) => {
                    SessionEvent::Malformed(reason)
                }
                Step::Input(Some(SessionInput::Update(DeliverUpdate::Seek(info)))) => {
                    SessionEvent::Seek {
                        info,
                        bounds: self.ledger.bounds(),
                    }
                }
                Step::Input(Some(SessionInput::Update(DeliverUpdate::Acknowledgement(ack)))) => {
                    SessionEvent::Ack(ack.number)
                }
                Step::Block(Ok(block)) => {
                    let number = block.number();
                    if responses.send(DeliverResponse::Block(block)).await.is_err() {
                        SessionEvent::Disconnected
                    } else {
                        trace!(session_id = %self.id, block_number = number, "Sent block");
                        self.blocks_sent += 1;
                        SessionEvent::BlockSent(number)
                    }
                }
                Step::Block(Err(LedgerError::NotFound { number })) => {
                    SessionEvent::Failed(SessionError::BlockUnavailable { number })
                }
                Step::Block(Err(e)) => SessionEvent::Failed(SessionError::Internal(e.to_string())),
            };
            self.transition(event);
        }

        if let SessionState::Errored(e) = &self.state {
            // The client may already be gone; nothing else to do then.
            let _ = responses.send(DeliverResponse::Error(e.status())).await;
        }
        info!(
            session_id = %self.id,
            blocks_sent = self.blocks_sent,
            state = self.state.name(),
            "Delivery session closed"
        );
        SessionOutcome {
            id: self.id,
            blocks_sent: self.blocks_sent,
            final_state: self.state,
        }
    }

    fn transition(&mut self, event: SessionEvent) {
        match &event {
            SessionEvent::Seek { info, bounds } => debug!(
                session_id = %self.id,
                start = ?info.start,
                specified_number = info.specified_number,
                window_size = info.window_size,
                oldest = bounds.oldest,
                newest = bounds.newest,
                "Seek requested"
            ),
            SessionEvent::Ack(number) => {
                trace!(session_id = %self.id, block_number = *number, "Acknowledgement")
            }
            _ => {}
        }

        let before = self.state.name();
        let state = mem::replace(&mut self.state, SessionState::Closed).apply(event, self.max_window);
        match &state {
            SessionState::Errored(e) => warn!(
                session_id = %self.id,
                error = %e,
                status = e.status().code(),
                "Delivery session failed"
            ),
            SessionState::Streaming(w) if before != "streaming" => debug!(
                session_id = %self.id,
                block_number = w.next_to_send,
                outstanding = w.outstanding(),
                "Streaming"
            ),
            SessionState::WindowBlocked(w) if before != "window_blocked" => debug!(
                session_id = %self.id,
                block_number = w.next_to_send,
                window_size = w.window_size,
                "Window full"
            ),
            _ => {}
        }
        self.state = state;
    }
}

async fn next_block<R: LedgerReader>(
    ledger: Arc<R>,
    next: Option<BlockNumber>,
) -> Result<Block, LedgerError> {
    match next {
        Some(number) => ledger.wait_for_block(number).await,
        None => std::future::pending().await,
    }
}

/// Spawns one [`DeliverSession`] per client.
pub struct DeliverService<R> {
    ledger: Arc<R>,
    max_window: u64,
}

impl<R: LedgerReader + 'static> DeliverService<R> {
    pub fn new(ledger: Arc<R>, max_window: u64) -> Self {
        Self { ledger, max_window }
    }
}

impl<R: LedgerReader + 'static> DeliverApi for DeliverService<R> {
    fn deliver(
        &self,
        inputs: mpsc::Receiver<SessionInput>,
        responses: mpsc::Sender<DeliverResponse>,
    ) -> JoinHandle<SessionOutcome> {
        let session = DeliverSession::new(Arc::clone(&self.ledger), self.max_window);
        tokio::spawn(session.run(inputs, responses))
    }
}
