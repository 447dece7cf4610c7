use std::fmt;

use tokio_tungstenite::tungstenite;

#[derive(Debug)]
pub enum ClientError {
    Http(reqwest::Error),
    WebSocket(tungstenite::Error),
    Json(serde_json::Error),
    InvalidHeader(String),
    AlreadyConnected,
    GatewayUnavailable(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Http(e) => write!(f, "HTTP error: {e}"),
            ClientError::WebSocket(e) => write!(f, "websocket error: {e}"),
            ClientError::Json(e) => write!(f, "JSON error: {e}"),
            ClientError::InvalidHeader(name) => write!(f, "invalid header: {name}"),
            ClientError::AlreadyConnected => write!(f, "gateway session is already running"),
            ClientError::GatewayUnavailable(msg) => write!(f, "gateway unavailable: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Http(e) => Some(e),
            ClientError::WebSocket(e) => Some(e),
            ClientError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Http(e)
    }
}

impl From<tungstenite::Error> for ClientError {
    fn from(e: tungstenite::Error) -> Self {
        ClientError::WebSocket(e)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Json(e)
    }
}

/// Stable codes for caller-supplied MFA input that was rejected before any request was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaErrorCode {
    NoProtocol,
    BadProtocol,
    Unsupported,
    NoCode,
}

impl MfaErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            MfaErrorCode::NoProtocol => -1,
            MfaErrorCode::BadProtocol => -2,
            MfaErrorCode::Unsupported => -3,
            MfaErrorCode::NoCode => -4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MfaErrorCode::NoProtocol => "MFA_NO_PROTOCOL",
            MfaErrorCode::BadProtocol => "MFA_BAD_PROTOCOL",
            MfaErrorCode::Unsupported => "MFA_UNSUPPORTED",
            MfaErrorCode::NoCode => "MFA_NO_CODE",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            MfaErrorCode::NoProtocol => "no MFA protocol specified",
            MfaErrorCode::BadProtocol => "MFA protocol unavailable",
            MfaErrorCode::Unsupported => "MFA protocol not supported",
            MfaErrorCode::NoCode => "no MFA code specified",
        }
    }
}

impl fmt::Display for MfaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaError {
    pub code: MfaErrorCode,
    pub message: String,
}

impl From<MfaErrorCode> for MfaError {
    fn from(code: MfaErrorCode) -> Self {
        MfaError {
            code,
            message: code.message().to_string(),
        }
    }
}

impl fmt::Display for MfaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.code.code(), self.message)
    }
}
