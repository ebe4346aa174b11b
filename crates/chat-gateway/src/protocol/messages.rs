//! Gateway message format
//!
//! Defines the structure for all WebSocket frames.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chat_core::RealtimeEvent;

use super::{CloseCode, HelloPayload, OpCode};

/// Gateway message format
///
/// All frames sent over the WebSocket connection follow this format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event name (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Per-connection sequence number (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event data payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,

    /// Client correlation token, echoed on the direct reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl GatewayMessage {
    fn bare(op: OpCode) -> Self {
        Self {
            op,
            t: None,
            s: None,
            d: None,
            nonce: None,
        }
    }

    // === Server Messages ===

    /// Create a Dispatch message (op=0); the sequence is stamped when it is written
    #[must_use]
    pub fn dispatch(event_name: impl Into<String>, data: Value) -> Self {
        Self {
            t: Some(event_name.into()),
            d: Some(data),
            ..Self::bare(OpCode::Dispatch)
        }
    }

    /// Wrap a realtime event as a Dispatch frame
    pub fn from_event(event: &RealtimeEvent) -> serde_json::Result<Self> {
        Ok(Self::dispatch(event.name(), event.payload()?))
    }

    /// Create a Hello message (op=10)
    pub fn hello(payload: &HelloPayload) -> serde_json::Result<Self> {
        Ok(Self {
            d: Some(serde_json::to_value(payload)?),
            ..Self::bare(OpCode::Hello)
        })
    }

    /// Create a Heartbeat ACK message (op=11)
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::bare(OpCode::HeartbeatAck)
    }

    /// Attach a correlation nonce
    #[must_use]
    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    // === Parsing Client Messages ===

    /// Decode the `d` field into a typed payload (missing `d` decodes as null)
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(self.d.clone().unwrap_or(Value::Null))
    }

    /// Try to parse the heartbeat sequence number (op=1)
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_u64))
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Create an error close frame
    #[must_use]
    pub fn close_frame(code: CloseCode) -> (u16, String) {
        (code.as_u16(), code.reason().to_string())
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
