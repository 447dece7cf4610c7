use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::PlatformMetadata;
use crate::json;

/// Opcodes for gateway frames.
pub mod opcode {
    pub const DISPATCH: u64 = 0;
    pub const HEARTBEAT: u64 = 1;
    pub const IDENTIFY: u64 = 2;
    pub const RESUME: u64 = 6;
    pub const RECONNECT: u64 = 7;
    pub const INVALID_SESSION: u64 = 9;
    pub const HELLO: u64 = 10;
    pub const HEARTBEAT_ACK: u64 = 11;
}

/// Close codes.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    /// Used by the client when it drops a connection it intends to resume.
    pub const RESUMABLE: u16 = 4000;
    pub const UNKNOWN_OPCODE: u16 = 4001;
    pub const DECODE_ERROR: u16 = 4002;
    pub const NOT_AUTHENTICATED: u16 = 4003;
    pub const AUTH_FAILED: u16 = 4004;
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    pub const INVALID_SEQ: u16 = 4007;
    pub const RATE_LIMITED: u16 = 4008;
    pub const SESSION_TIMED_OUT: u16 = 4009;
    pub const INVALID_SHARD: u16 = 4010;
    pub const SHARDING_REQUIRED: u16 = 4011;
    pub const INVALID_VERSION: u16 = 4012;
    pub const INVALID_INTENTS: u16 = 4013;
    pub const DISALLOWED_INTENTS: u16 = 4014;

    /// Whether the session may be resumed after the server closed with `code`.
    pub fn can_resume(code: u16) -> bool {
        !matches!(
            code,
            AUTH_FAILED | INVALID_SEQ | SESSION_TIMED_OUT | INVALID_SHARD..=DISALLOWED_INTENTS
        )
    }
}

/// Gateway frame envelope: `{ "op", "d", "s", "t" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub op: u64,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Frame {
    pub fn new(op: u64, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::new(opcode::HEARTBEAT, json!(sequence))
    }

    pub fn identify(token: &str, platform: &PlatformMetadata, intents: u64) -> Self {
        Self::new(
            opcode::IDENTIFY,
            json!({
                "token": token,
                "properties": {
                    "os": platform.os,
                    "browser": platform.browser,
                    "device": platform.device
                },
                "intents": intents
            }),
        )
    }

    pub fn resume(token: &str, session_id: &str, sequence: u64) -> Self {
        Self::new(
            opcode::RESUME,
            json!({
                "token": token,
                "session_id": session_id,
                "seq": sequence
            }),
        )
    }

    /// Parses a frame from untrusted bytes. Anything that is not JSON text or
    /// does not carry an opcode yields `None`.
    pub fn parse(bytes: &[u8]) -> Option<Frame> {
        if !json::is_structured_text(bytes) {
            return None;
        }
        let value = json::decode(bytes).ok()?;
        serde_json::from_value(value).ok()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        json::format_json(self)
    }
}

/// HELLO (opcode 10) payload data.
#[derive(Debug, Deserialize)]
pub struct HelloData {
    pub heartbeat_interval: u64,
}

/// READY dispatch payload fields needed to resume later.
#[derive(Debug, Deserialize)]
pub struct ReadyData {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Events delivered to the hosting application.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// The socket is open; the handshake has not happened yet.
    Connected,
    Ready {
        session_id: String,
    },
    Resumed,
    Dispatch {
        name: String,
        sequence: Option<u64>,
        data: Value,
    },
    LatencyUpdate(Duration),
    Reconnecting {
        resumable: bool,
    },
    Disconnected,
}
