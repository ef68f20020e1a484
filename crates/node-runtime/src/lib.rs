//! # Node Runtime
//!
//! The orderer process around the `kafka-orderer` core: configuration
//! loading, tracing setup, provisional genesis, and the WebSocket client API.

pub mod config;
pub mod genesis;
pub mod logging;
pub mod runtime;
pub mod server;

pub use runtime::NodeRuntime;
