//! Error types for the ordering core.
//!
//! Taxonomy:
//! - transient connectivity: [`BrokerError::Unreachable`], retried by [`RetryPolicy`](super::retry::RetryPolicy)
//! - ordering continuity: [`OrderingLogError::ContinuityLost`], fatal for the chain
//! - protocol violation: [`SessionError`], fatal for one delivery session only

use shared_types::{BlockNumber, CodecError, LogOffset, Status};
use std::time::Duration;
use thiserror::Error;

/// Outcome of a retried operation that never succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError<E> {
    /// The stop budget ran out.
    #[error("gave up {what} after {attempts} attempts in {elapsed:?}: {last_error}")]
    Exhausted {
        what: &'static str,
        attempts: u32,
        elapsed: Duration,
        last_error: E,
    },

    /// The budget ran out while an attempt was still in flight.
    #[error("gave up {what} after {attempts} attempts in {elapsed:?}: last attempt did not complete")]
    DeadlineExceeded {
        what: &'static str,
        attempts: u32,
        elapsed: Duration,
    },

    /// The operation failed with an error that retrying cannot fix.
    #[error("{what} failed permanently on attempt {attempts}: {error}")]
    Aborted {
        what: &'static str,
        attempts: u32,
        error: E,
    },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::DeadlineExceeded { attempts, .. }
            | RetryError::Aborted { attempts, .. } => *attempts,
        }
    }
}

/// Errors reported by a replicated-log connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Connection refused or lost.
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    /// The requested offset was evicted by retention.
    #[error("offset {requested} is below the oldest retained offset {oldest}")]
    OffsetOutOfRange {
        requested: LogOffset,
        oldest: LogOffset,
    },

    /// The broker refused the request.
    #[error("broker rejected request: {0}")]
    Rejected(String),
}

impl BrokerError {
    /// Worth retrying after a reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Unreachable(_))
    }
}

/// Errors from the local ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The block was evicted or never written.
    #[error("block {number} not found")]
    NotFound { number: BlockNumber },

    #[error("append failed: {0}")]
    Append(String),

    /// The ledger is shutting down.
    #[error("ledger closed")]
    Closed,
}

/// Errors from the produce/consume halves of the ordering log.
#[derive(Debug, Error)]
pub enum OrderingLogError {
    /// Connecting or reconnecting used up the retry budget.
    #[error("replicated log unreachable: {0}")]
    Unreachable(#[from] RetryError<BrokerError>),

    /// The resume offset was evicted; resuming later would leave a gap.
    #[error("ordering continuity lost: resume offset {resume_from} is below oldest retained offset {oldest}")]
    ContinuityLost {
        resume_from: LogOffset,
        oldest: LogOffset,
    },

    /// The checkpoint is ahead of the log, which means the log was replaced.
    #[error("resume offset {resume_from} is beyond the end of the log ({newest})")]
    OffsetBeyondLog {
        resume_from: LogOffset,
        newest: LogOffset,
    },

    #[error(transparent)]
    Broker(BrokerError),

    #[error("record at offset {offset} is not a valid block: {source}")]
    Codec {
        offset: LogOffset,
        #[source]
        source: CodecError,
    },

    #[error("failed to encode block for produce: {0}")]
    Encode(#[source] CodecError),

    #[error("ledger append failed for offset {offset}: {source}")]
    Ledger {
        offset: LogOffset,
        #[source]
        source: LedgerError,
    },
}

impl OrderingLogError {
    /// Fatal errors halt the chain.
    pub fn is_fatal(&self) -> bool {
        match self {
            OrderingLogError::Broker(e) => !e.is_transient(),
            _ => true,
        }
    }
}

/// Chain-level failures.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The chain stopped ordering after a fatal error.
    #[error("chain halted: {reason}")]
    Halted { reason: String },

    /// A chain task panicked or was cancelled.
    #[error("chain task {task} failed: {reason}")]
    Task { task: &'static str, reason: String },
}

/// Per-session delivery errors. Each maps to the status sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("window size must be positive")]
    ZeroWindow,

    #[error("window size {requested} exceeds maximum {max}")]
    WindowTooLarge { requested: u64, max: u64 },

    #[error("seek to block {requested} outside retained range [{oldest}, {newest}]")]
    SeekOutOfRange {
        requested: BlockNumber,
        oldest: BlockNumber,
        newest: BlockNumber,
    },

    #[error("acknowledgement received before seek")]
    AckBeforeSeek,

    #[error("acknowledgement {number} regresses below previous acknowledgement {last}")]
    AckRegressed { number: BlockNumber, last: BlockNumber },

    #[error("acknowledgement {number} is below the lowest unacknowledged block {low_water}")]
    AckBelowWindow {
        number: BlockNumber,
        low_water: BlockNumber,
    },

    #[error("acknowledgement {number} covers unsent blocks (next to send {next_to_send})")]
    AckForUnsent {
        number: BlockNumber,
        next_to_send: BlockNumber,
    },

    #[error("malformed request: {0}")]
    Malformed(String),

    /// The block was evicted from the ledger while the session waited.
    #[error("block {number} is no longer available")]
    BlockUnavailable { number: BlockNumber },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Terminal status reported to the client.
    pub fn status(&self) -> Status {
        match self {
            SessionError::BlockUnavailable { .. } => Status::NotFound,
            SessionError::Internal(_) => Status::InternalServerError,
            _ => Status::BadRequest,
        }
    }
}
