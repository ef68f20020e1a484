//! Domain module for the ordering core
//!
//! Pure logic: retry schedule, block cutting, and the session and chain state
//! machines. Nothing here performs I/O except the retry sleeps.

pub mod batch;
pub mod chain_state;
pub mod errors;
pub mod retry;
pub mod session;
pub mod value_objects;

pub use batch::{BatchBuilder, BatchConfig};
pub use chain_state::{ChainEvent, ChainState};
pub use errors::*;
pub use retry::RetryPolicy;
pub use session::{LedgerBounds, SessionEvent, SessionState, Window};
pub use value_objects::*;
