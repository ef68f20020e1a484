//! Inbound Ports (Driving Ports / API)
//!
//! What the client transport calls into.

use crate::service::deliver::{SessionInput, SessionOutcome};
use async_trait::async_trait;
use shared_types::{BroadcastResponse, DeliverResponse, Envelope};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Envelope submission.
#[async_trait]
pub trait BroadcastApi: Send + Sync {
    /// Queue an envelope for ordering. `Success` means accepted, not yet ordered.
    async fn broadcast(&self, envelope: Envelope) -> BroadcastResponse;
}

/// Block delivery.
pub trait DeliverApi: Send + Sync {
    /// Start a session that reads client updates from `inputs` and writes
    /// responses to `responses` until the client leaves or errs.
    fn deliver(
        &self,
        inputs: mpsc::Receiver<SessionInput>,
        responses: mpsc::Sender<DeliverResponse>,
    ) -> JoinHandle<SessionOutcome>;
}
