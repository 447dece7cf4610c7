use std::fmt;

use serde_json::{json, Map, Value};

use crate::error::{ClientError, MfaError, MfaErrorCode};
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Login fields sent to `POST /auth/login`. Any extra field the service
/// accepts can be attached with `with_field`.
#[derive(Clone)]
pub struct Credentials {
    fields: Map<String, Value>,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("login".to_string(), Value::String(login.into()));
        fields.insert("password".to_string(), Value::String(password.into()));
        Self { fields }
    }

    /// Attach an MFA ticket obtained earlier (e.g. from a previous challenge).
    pub fn with_ticket(self, ticket: impl Into<String>) -> Self {
        self.with_field("ticket", Value::String(ticket.into()))
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    fn into_body(self) -> Value {
        Value::Object(self.fields)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum LoginResult {
    Authenticated { token: String },
    MfaRequired(MfaChallenge),
    /// The response did not have the expected shape; the raw response is kept
    /// for the caller to inspect.
    Failure(ApiResponse),
}

impl LoginResult {
    pub fn success(&self) -> bool {
        !matches!(self, LoginResult::Failure(_))
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            LoginResult::Authenticated { token } => Some(token),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MfaResult {
    Completed { token: String },
    /// Caller input was rejected before any request was made.
    Rejected(MfaError),
    Failure(ApiResponse),
}

impl MfaResult {
    pub fn success(&self) -> bool {
        matches!(self, MfaResult::Completed { .. })
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            MfaResult::Completed { token } => Some(token),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<MfaErrorCode> {
        match self {
            MfaResult::Rejected(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Names of every field other than `mfa` whose value is literally `true`.
pub fn offered_protocols(body: &Value) -> Vec<String> {
    body.as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(key, value)| key.as_str() != "mfa" && **value == Value::Bool(true))
                .map(|(key, _)| key.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Second-factor challenge issued by a login. The ticket and login instance
/// are fixed when the challenge is created.
#[derive(Clone)]
pub struct MfaChallenge {
    transport: Transport,
    pub protocols: Vec<String>,
    pub ticket: String,
    pub login_instance_id: String,
}

impl fmt::Debug for MfaChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MfaChallenge")
            .field("protocols", &self.protocols)
            .field("login_instance_id", &self.login_instance_id)
            .finish_non_exhaustive()
    }
}

impl MfaChallenge {
    /// Builds a challenge from a login response. Returns `None` unless both
    /// `ticket` and `login_instance_id` are non-empty strings.
    pub fn from_response(transport: Transport, body: &Value) -> Option<Self> {
        let text = |name: &str| {
            body.get(name)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            protocols: offered_protocols(body),
            ticket: text("ticket")?,
            login_instance_id: text("login_instance_id")?,
            transport,
        })
    }

    pub fn offers(&self, protocol: &str) -> bool {
        self.protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(protocol))
    }

    fn validate(&self, protocol: &str, code: &str) -> Result<String, MfaErrorCode> {
        let protocol = protocol.trim();
        if protocol.is_empty() {
            return Err(MfaErrorCode::NoProtocol);
        }
        let protocol = protocol.to_lowercase();
        if !self.offers(&protocol) {
            return Err(MfaErrorCode::BadProtocol);
        }
        if protocol == "sms" {
            return Err(MfaErrorCode::Unsupported);
        }
        if code.trim().is_empty() {
            return Err(MfaErrorCode::NoCode);
        }
        Ok(protocol)
    }

    /// Submits `code` for `protocol`. Codes are single use; nothing is retried.
    pub async fn complete(&self, protocol: &str, code: &str) -> Result<MfaResult, ClientError> {
        let protocol = match self.validate(protocol, code) {
            Ok(p) => p,
            Err(rejected) => {
                tracing::debug!("mfa input rejected: {rejected}");
                return Ok(MfaResult::Rejected(rejected.into()));
            }
        };

        let req = ApiRequest::post(format!("/auth/mfa/{protocol}")).json(json!({
            "code": code.trim(),
            "login_instance_id": self.login_instance_id,
            "ticket": self.ticket,
        }));
        let resp = self.transport.request(req).await?;

        match resp.field("token").and_then(|v| v.as_str()) {
            Some(token) => {
                tracing::info!("mfa completed via {protocol}");
                Ok(MfaResult::Completed {
                    token: token.to_string(),
                })
            }
            None => {
                tracing::warn!(status = resp.status, "mfa response carried no token");
                Ok(MfaResult::Failure(resp))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthClient {
    transport: Transport,
}

impl AuthClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub async fn login(&self, credentials: Credentials) -> Result<LoginResult, ClientError> {
        let resp = self
            .transport
            .request(ApiRequest::post("/auth/login").json(credentials.into_body()))
            .await?;

        match resp.field("mfa") {
            None | Some(Value::Null) => {
                tracing::warn!(status = resp.status, "login response has no mfa field");
                Ok(LoginResult::Failure(resp))
            }
            Some(Value::Bool(true)) => {
                let challenge = resp
                    .body
                    .as_json()
                    .and_then(|body| MfaChallenge::from_response(self.transport.clone(), body));
                let Some(challenge) = challenge else {
                    tracing::warn!(status = resp.status, "mfa login response has no ticket");
                    return Ok(LoginResult::Failure(resp));
                };
                tracing::info!(protocols = ?challenge.protocols, "login requires mfa");
                Ok(LoginResult::MfaRequired(challenge))
            }
            Some(_) => match resp.field("token").and_then(|v| v.as_str()) {
                Some(token) => {
                    tracing::info!("login succeeded");
                    Ok(LoginResult::Authenticated {
                        token: token.to_string(),
                    })
                }
                None => {
                    tracing::warn!(status = resp.status, "login response has no token");
                    Ok(LoginResult::Failure(resp))
                }
            },
        }
    }
}
