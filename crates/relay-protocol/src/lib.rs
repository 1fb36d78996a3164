//! relay-protocol: wire message shapes for the panel/SDK relay hub.
//!
//! All envelopes share one untagged shape keyed by `type`; payload bodies
//! are opaque JSON until a handler decides which variant to parse them as.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known envelope `type` values. Any other string is passed through
/// unexamined by the hub (reads: ignored by the panel loop, broadcast
/// verbatim by the SDK loop).
pub mod kinds {
    pub const ACTION: &str = "action";
    pub const ACTION_ACK: &str = "action_ack";
    pub const REGISTER: &str = "register";
    pub const ERROR: &str = "error";
}

pub mod error_codes {
    pub const ACTION_FORWARD_FAILED: &str = "ACTION_FORWARD_FAILED";
}

/// Top-level wire message. Field names and the `payload` escape hatch are
/// contractual; the hub never mutates a field before relaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// `payload` of an `action` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Overrides the routing table for this one action when non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

/// `payload` of an `action_ack` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionAckPayload {
    pub action_msg_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `payload` of a `register` envelope, sent by an SDK to (re)advertise
/// its reachable URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub target_id: String,
    pub sdk_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<std::collections::HashMap<String, String>>,
}

/// `payload` of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl Envelope {
    pub fn is_action(&self) -> bool {
        self.kind == kinds::ACTION
    }

    /// Builds the `error` envelope broadcast on a forwarding failure,
    /// mirroring the triggering envelope's identity fields.
    pub fn forward_failed(source: &Envelope, reason: impl Into<String>, now_ms: i64) -> Envelope {
        Envelope {
            msg_id: source.msg_id.clone(),
            trace_id: source.trace_id.clone(),
            kind: kinds::ERROR.to_owned(),
            target_id: source.target_id.clone(),
            timestamp: now_ms,
            payload: serde_json::to_value(ErrorPayload {
                code: error_codes::ACTION_FORWARD_FAILED.to_owned(),
                message: reason.into(),
            })
            .ok(),
        }
    }

    /// Builds the synthesized `action_ack` broadcast when a duplicate
    /// `msg_id` is seen.
    pub fn duplicate_ack(source: &Envelope, now_ms: i64) -> Envelope {
        Envelope {
            msg_id: source.msg_id.clone(),
            trace_id: source.trace_id.clone(),
            kind: kinds::ACTION_ACK.to_owned(),
            target_id: source.target_id.clone(),
            timestamp: now_ms,
            payload: serde_json::to_value(ActionAckPayload {
                action_msg_id: source.msg_id.clone(),
                success: true,
                message: Some("duplicate ignored".to_owned()),
            })
            .ok(),
        }
    }
}
