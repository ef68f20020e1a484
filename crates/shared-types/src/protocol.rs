//! # Client Message Contract
//!
//! One oneof-style request per message on the delivery stream:
//!
//! ```text
//! client ──DeliverUpdate::Seek{start, specified_number, window_size}──→ orderer
//! client ←─────────DeliverResponse::Block(block) × window─────────────── orderer
//! client ──DeliverUpdate::Acknowledgement{number}─────────────────────→ orderer
//! client ←─────────DeliverResponse::Error(status) (terminal)──────────── orderer
//! ```
//!
//! Broadcast is request/response: every submitted `Envelope` gets exactly one
//! `BroadcastResponse`.

use crate::entities::{Block, BlockNumber};
use serde::{Deserialize, Serialize};

/// Where a delivery session starts streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeekStart {
    /// Earliest block still retained by the ledger.
    Oldest,
    /// The next block to be committed.
    Newest,
    /// The block given in `specified_number`.
    Specified,
}

/// Seek request negotiating start position and window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekInfo {
    pub start: SeekStart,
    /// Meaningful only when `start` is `Specified`.
    #[serde(default)]
    pub specified_number: BlockNumber,
    /// Maximum number of sent-but-unacknowledged blocks.
    pub window_size: u64,
}

impl SeekInfo {
    pub fn oldest(window_size: u64) -> Self {
        Self {
            start: SeekStart::Oldest,
            specified_number: 0,
            window_size,
        }
    }

    pub fn newest(window_size: u64) -> Self {
        Self {
            start: SeekStart::Newest,
            specified_number: 0,
            window_size,
        }
    }

    pub fn specified(number: BlockNumber, window_size: u64) -> Self {
        Self {
            start: SeekStart::Specified,
            specified_number: number,
            window_size,
        }
    }
}

/// Highest block number the client has fully consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub number: BlockNumber,
}

/// Client → orderer message on the delivery stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverUpdate {
    Seek(SeekInfo),
    Acknowledgement(Acknowledgement),
}

impl DeliverUpdate {
    pub fn seek(info: SeekInfo) -> Self {
        Self::Seek(info)
    }

    pub fn ack(number: BlockNumber) -> Self {
        Self::Acknowledgement(Acknowledgement { number })
    }
}

/// Response status codes (HTTP-style values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    BadRequest,
    NotFound,
    InternalServerError,
    ServiceUnavailable,
}

impl Status {
    /// Numeric code.
    pub fn code(&self) -> u16 {
        match self {
            Status::Success => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

/// Orderer → client message on the delivery stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverResponse {
    Block(Block),
    /// Terminal status; the stream closes after it.
    Error(Status),
}

impl DeliverResponse {
    pub fn block_number(&self) -> Option<BlockNumber> {
        match self {
            DeliverResponse::Block(block) => Some(block.number()),
            DeliverResponse::Error(_) => None,
        }
    }
}

/// Reply to a submitted envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub status: Status,
}

impl BroadcastResponse {
    pub fn new(status: Status) -> Self {
        Self { status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_json_shape() {
        let update = DeliverUpdate::seek(SeekInfo::specified(600, 10));
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(
            json,
            r#"{"seek":{"start":"SPECIFIED","specified_number":600,"window_size":10}}"#
        );
    }

    #[test]
    fn test_ack_from_json() {
        let update: DeliverUpdate =
            serde_json::from_str(r#"{"acknowledgement":{"number":100}}"#).unwrap();
        assert_eq!(update, DeliverUpdate::ack(100));
    }

    #[test]
    fn test_unknown_start_mode_is_rejected() {
        let parsed: Result<DeliverUpdate, _> =
            serde_json::from_str(r#"{"seek":{"start":"LATEST","window_size":1}}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Success.code(), 200);
        assert_eq!(Status::BadRequest.code(), 400);
        assert_eq!(Status::NotFound.code(), 404);
        assert_eq!(Status::ServiceUnavailable.code(), 503);
        assert!(Status::Success.is_success());
        assert!(!Status::NotFound.is_success());
    }

    #[test]
    fn test_error_response_has_no_block_number() {
        assert_eq!(DeliverResponse::Error(Status::BadRequest).block_number(), None);
    }
}
