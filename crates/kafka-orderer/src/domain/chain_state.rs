//! Chain lifecycle.
//!
//! ```text
//! Starting ──Connected──→ Running{next_offset} ⇄ Reconnecting{resume_from}
//!     │                         │                       │
//!     └──────── Fatal ──────────┴───────────────────────┴──→ Halted{reason}
//!     └──────── Shutdown ───────┴───────────────────────┴──→ Stopped
//! ```

use shared_types::LogOffset;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainState {
    Starting,
    /// Tailing the log; `next_offset` is the next record to apply.
    Running { next_offset: LogOffset },
    /// Connection lost; will resume at `resume_from`.
    Reconnecting { resume_from: LogOffset },
    /// Stopped ordering after a fatal error.
    Halted { reason: String },
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    /// Consumer attached to the log and will read `next_offset` next.
    Connected { next_offset: LogOffset },
    /// Record at `offset` was appended to the ledger.
    Confirmed { offset: LogOffset },
    ConnectionLost { resume_from: LogOffset },
    Fatal(String),
    Shutdown,
}

impl ChainState {
    pub fn apply(self, event: ChainEvent) -> ChainState {
        use ChainEvent as E;
        use ChainState as S;

        match (self, event) {
            (terminal @ (S::Halted { .. } | S::Stopped), _) => terminal,
            (_, E::Fatal(reason)) => S::Halted { reason },
            (_, E::Shutdown) => S::Stopped,
            (_, E::Connected { next_offset }) => S::Running { next_offset },
            (_, E::ConnectionLost { resume_from }) => S::Reconnecting { resume_from },
            (S::Running { next_offset }, E::Confirmed { offset }) => S::Running {
                next_offset: next_offset.max(offset + 1),
            },
            (state @ (S::Starting | S::Reconnecting { .. }), E::Confirmed { .. }) => state,
        }
    }

    /// Broadcast accepts envelopes in every non-terminal state.
    pub fn is_accepting(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainState::Halted { .. } | ChainState::Stopped)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChainState::Starting => "starting",
            ChainState::Running { .. } => "running",
            ChainState::Reconnecting { .. } => "reconnecting",
            ChainState::Halted { .. } => "halted",
            ChainState::Stopped => "stopped",
        }
    }
}
