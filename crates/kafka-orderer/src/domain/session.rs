//! Delivery session state machine.
//!
//! ```text
//! AwaitingSeek ──Seek──→ Streaming ──BlockSent (window full)──→ WindowBlocked
//!                          ↑  └───────────Ack (window frees)────────┘
//!                          └──Seek (restart, from any non-terminal state)
//! any non-terminal ──Disconnected──→ Closed
//! any non-terminal ──violation─────→ Errored
//! ```
//!
//! [`SessionState::apply`] is the only way to change state. It is pure: the
//! ledger bounds a seek is resolved against travel inside the event, so every
//! transition can be tested without a ledger or a socket.

use super::errors::SessionError;
use shared_types::{BlockNumber, SeekInfo, SeekStart};

/// Ledger range a seek is resolved against.
///
/// `newest` is one past the newest committed block, the number the next
/// append will receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerBounds {
    pub oldest: BlockNumber,
    pub newest: BlockNumber,
}

impl LedgerBounds {
    pub fn new(oldest: BlockNumber, newest: BlockNumber) -> Self {
        Self { oldest, newest }
    }

    /// Resolve a seek to its starting block number.
    pub fn resolve(&self, seek: &SeekInfo) -> Result<BlockNumber, SessionError> {
        match seek.start {
            SeekStart::Oldest => Ok(self.oldest),
            SeekStart::Newest => Ok(self.newest),
            SeekStart::Specified => {
                let n = seek.specified_number;
                if n < self.oldest || n > self.newest {
                    Err(SessionError::SeekOutOfRange {
                        requested: n,
                        oldest: self.oldest,
                        newest: self.newest,
                    })
                } else {
                    Ok(n)
                }
            }
        }
    }
}

/// Sliding acknowledgement window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    /// First block of this seek.
    pub start: BlockNumber,
    pub next_to_send: BlockNumber,
    pub window_size: u64,
    /// Highest acknowledged block, if any.
    pub acked_through: Option<BlockNumber>,
}

impl Window {
    pub fn new(start: BlockNumber, window_size: u64) -> Self {
        Self {
            start,
            next_to_send: start,
            window_size,
            acked_through: None,
        }
    }

    /// Lowest sent-but-unacknowledged block number.
    pub fn low_water(&self) -> BlockNumber {
        self.acked_through.map_or(self.start, |n| n + 1)
    }

    /// Blocks sent but not yet acknowledged.
    pub fn outstanding(&self) -> u64 {
        self.next_to_send.saturating_sub(self.low_water())
    }

    pub fn is_full(&self) -> bool {
        self.outstanding() >= self.window_size
    }
}

/// Inputs to the session state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Client seek, with the ledger range at the moment it was received.
    Seek { info: SeekInfo, bounds: LedgerBounds },
    /// Client acknowledged everything up to and including this block.
    Ack(BlockNumber),
    /// The session wrote this block to the client.
    BlockSent(BlockNumber),
    /// The client sent something that is not a valid update.
    Malformed(String),
    /// Client went away.
    Disconnected,
    /// The session could not continue (block evicted, internal fault).
    Failed(SessionError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    AwaitingSeek,
    Streaming(Window),
    WindowBlocked(Window),
    Closed,
    Errored(SessionError),
}

impl SessionState {
    /// Exhaustive transition function.
    pub fn apply(self, event: SessionEvent, max_window: u64) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (terminal @ (S::Closed | S::Errored(_)), _) => terminal,

            (_, E::Disconnected) => S::Closed,
            (_, E::Failed(error)) => S::Errored(error),
            (_, E::Malformed(reason)) => S::Errored(SessionError::Malformed(reason)),

            (_, E::Seek { info, bounds }) => seek(&info, &bounds, max_window),

            (S::AwaitingSeek, E::Ack(_)) => S::Errored(SessionError::AckBeforeSeek),
            (S::Streaming(w) | S::WindowBlocked(w), E::Ack(n)) => acknowledge(w, n),

            (S::Streaming(mut w), E::BlockSent(n)) => {
                if n != w.next_to_send {
                    return S::Errored(SessionError::Internal(format!(
                        "sent block {n}, expected {}",
                        w.next_to_send
                    )));
                }
                w.next_to_send += 1;
                gate(w)
            }
            (S::AwaitingSeek | S::WindowBlocked(_), E::BlockSent(n)) => S::Errored(
                SessionError::Internal(format!("block {n} sent while not streaming")),
            ),
        }
    }

    /// Block the session should send next, when it is allowed to send.
    pub fn next_block(&self) -> Option<BlockNumber> {
        match self {
            SessionState::Streaming(w) => Some(w.next_to_send),
            _ => None,
        }
    }

    pub fn window(&self) -> Option<&Window> {
        match self {
            SessionState::Streaming(w) | SessionState::WindowBlocked(w) => Some(w),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored(_))
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            SessionState::Errored(e) => Some(e),
            _ => None,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::AwaitingSeek => "awaiting_seek",
            SessionState::Streaming(_) => "streaming",
            SessionState::WindowBlocked(_) => "window_blocked",
            SessionState::Closed => "closed",
            SessionState::Errored(_) => "errored",
        }
    }
}

fn seek(info: &SeekInfo, bounds: &LedgerBounds, max_window: u64) -> SessionState {
    if info.window_size == 0 {
        return SessionState::Errored(SessionError::ZeroWindow);
    }
    if info.window_size > max_window {
        return SessionState::Errored(SessionError::WindowTooLarge {
            requested: info.window_size,
            max: max_window,
        });
    }
    match bounds.resolve(info) {
        Ok(start) => SessionState::Streaming(Window::new(start, info.window_size)),
        Err(e) => SessionState::Errored(e),
    }
}

/// Apply acknowledgement `n`.
///
/// Repeating the last acknowledged number is tolerated as a no-op, since a
/// client may resend its high-water mark. Anything below the last
/// acknowledgement or below the window's low-water mark is a violation, as is
/// acknowledging a block that was never sent.
fn acknowledge(mut w: Window, n: BlockNumber) -> SessionState {
    if let Some(last) = w.acked_through {
        if n == last {
            return gate(w);
        }
        if n < last {
            return SessionState::Errored(SessionError::AckRegressed { number: n, last });
        }
    }
    if n < w.low_water() {
        return SessionState::Errored(SessionError::AckBelowWindow {
            number: n,
            low_water: w.low_water(),
        });
    }
    if n >= w.next_to_send {
        return SessionState::Errored(SessionError::AckForUnsent {
            number: n,
            next_to_send: w.next_to_send,
        });
    }
    w.acked_through = Some(n);
    gate(w)
}

fn gate(w: Window) -> SessionState {
    if w.is_full() {
        SessionState::WindowBlocked(w)
    } else {
        SessionState::Streaming(w)
    }
}
