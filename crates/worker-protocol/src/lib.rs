//! Wire frames exchanged between a worker node and the coordinator.
//!
//! All frames are JSON text over a single bidirectional stream. Every frame
//! carries a discriminator field `type`; [`Frame`] decodes that discriminator
//! first and then the case-specific payload, so the dispatcher in
//! `worker-node` can match exhaustively instead of duck-typing fields out of
//! a loose JSON value.

use serde::{Deserialize, Serialize};

/// One frame of the wire protocol, tagged on `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "register")]
    Register(Register),
    #[serde(rename = "heartbeat")]
    Heartbeat(Heartbeat),
    #[serde(rename = "store_request")]
    StoreRequest(StoreRequest),
    #[serde(rename = "store_response")]
    StoreResponse(StoreResponse),
    #[serde(rename = "search_request")]
    SearchRequest(SearchRequest),
    #[serde(rename = "search_response")]
    SearchResponse(SearchResponse),
    #[serde(rename = "challenge_request")]
    ChallengeRequest(ChallengeRequest),
    #[serde(rename = "challenge_response")]
    ChallengeResponse(ChallengeResponse),
    #[serde(rename = "error")]
    Error(ErrorFrame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Register {
    pub node_id: String,
    pub capacity_gb: u64,
    pub embedding_dim: usize,
    pub index_version: u32,
    pub secret: String,
    pub sui_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sui_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: String,
    pub vectors_stored: u64,
    pub bytes_used: u64,
    /// ISO-8601 UTC, e.g. `2026-07-28T12:34:56Z`.
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub request_id: String,
    pub collection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<String>,
    pub doc_ids: Vec<String>,
    pub vectors_b64: String,
    pub shape: (usize, usize),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    Ok,
    Full,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResponse {
    pub request_id: String,
    pub node_id: String,
    pub stored_count: usize,
    pub status: StoreStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub request_id: String,
    pub collection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<String>,
    pub query_b64: String,
    pub shape: (usize,),
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub doc_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub request_id: String,
    pub node_id: String,
    pub results: Vec<SearchResultItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub challenge_id: String,
    /// Hex-encoded seed.
    pub epoch_seed: String,
    pub offsets: Vec<u64>,
    pub chunk_size: usize,
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge_id: String,
    pub chunks: Vec<String>,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "STORAGE_FULL")]
    StorageFull,
    #[serde(rename = "INDEX_CORRUPTED")]
    IndexCorrupted,
    #[serde(rename = "UNKNOWN_COLLECTION")]
    UnknownCollection,
    #[serde(rename = "INVALID_MESSAGE")]
    InvalidMessage,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub error_code: ErrorCode,
    pub error_message: String,
}

impl ErrorFrame {
    pub fn new(error_code: ErrorCode, error_message: impl Into<String>) -> Self {
        Self {
            request_id: None,
            node_id: None,
            error_code,
            error_message: error_message.into(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_round_trips_through_tagged_frame() {
        let frame = Frame::Register(Register {
            node_id: "node-1".into(),
            capacity_gb: 4,
            embedding_dim: 384,
            index_version: 1,
            secret: "s".into(),
            sui_address: "0xabc".into(),
            sui_signature: None,
            timestamp: None,
            referral_code: None,
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"register\""));
        let back: Frame = serde_json::from_str(&json).unwrap();
        match back {
            Frame::Register(r) => assert_eq!(r.node_id, "node-1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn search_request_defaults_top_k_to_ten() {
        let json = r#"{"type":"search_request","request_id":"r1","collection_id":"c1","query_b64":"","shape":[4]}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        match frame {
            Frame::SearchRequest(req) => assert_eq!(req.top_k, 10),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = r#"{"type":"not_a_real_type"}"#;
        assert!(serde_json::from_str::<Frame>(json).is_err());
    }

    #[test]
    fn error_frame_round_trips() {
        let frame = Frame::Error(ErrorFrame::new(ErrorCode::InvalidMessage, "bad frame"));
        let json = serde_json::to_string(&frame).unwrap();
        let back: Frame = serde_json::from_str(&json).unwrap();
        match back {
            Frame::Error(e) => {
                assert_eq!(e.error_code, ErrorCode::InvalidMessage);
                assert_eq!(e.error_message, "bad frame");
            }
            _ => panic!("wrong variant"),
        }
    }
}
