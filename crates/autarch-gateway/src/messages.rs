//! Control-plane wire messages (spec §6): UTF-8 JSON, one object per frame,
//! every payload carrying a `type` discriminator. Shaped after the
//! teacher's tagged-enum convention for WebSocket payloads
//! (`dchrnv-neurograph-os-mvp`'s `ClientMessage`/`ServerMessage`).

use autarch_types::{ErrorKind, Event};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Register {
        node_type: String,
        resources: serde_json::Value,
        capabilities: HashSet<String>,
        nonce: String,
        timestamp: DateTime<Utc>,
        /// Base64 (standard, padded) encoding of the HMAC-SHA3-256 tag.
        signature: String,
    },
    Heartbeat {
        node_id: String,
        resources: serde_json::Value,
        signature: String,
    },
    Intent {
        intent: String,
    },
    Result {
        node_id: String,
        task_id: String,
        ok: bool,
        #[serde(default)]
        data: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<serde_json::Value>,
    },
    SubscribeEvents {
        client_id: String,
        event_type: String,
    },
    UnsubscribeEvents {
        client_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Registered {
        node_id: String,
    },
    Dispatch {
        task_id: String,
        tool: String,
        args: serde_json::Value,
        deadline: DateTime<Utc>,
    },
    Event {
        event: Event,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    Pong,
    /// Direct success reply to an `intent` message; not in the spec's
    /// outbound-types table verbatim but is the natural counterpart to it
    /// (an intent that isn't one of `error`/`event`/`dispatch` still needs
    /// a reply).
    IntentResult {
        result: serde_json::Value,
    },
}
