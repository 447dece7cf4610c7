#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{OriginalUri, Path, RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use cordlink::gateway::events::GatewayEvent;
use cordlink::gateway::session::{ConnectionState, SessionSnapshot};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};

pub const WAIT: Duration = Duration::from_secs(5);
pub const MFA_CODE: &str = "123456";
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0xff];

#[derive(Clone)]
struct MockState {
    sockets: mpsc::UnboundedSender<ServerSocket>,
    gateway_url: String,
}

/// Chat service stand-in: a handful of REST routes plus a gateway endpoint
/// whose sockets are handed to the test to drive by hand.
pub struct MockServer {
    pub addr: SocketAddr,
    sockets: mpsc::UnboundedReceiver<ServerSocket>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        let state = MockState {
            sockets: tx,
            gateway_url: format!("ws://{addr}/gateway"),
        };

        let app = Router::new()
            .route("/api/v10/auth/login", post(login))
            .route("/api/v10/auth/mfa/{protocol}", post(mfa))
            .route("/api/v10/gateway", get(gateway_info))
            .route("/api/v10/echo", any(echo))
            .route("/echo", any(echo))
            .route("/api/v10/avatar.png", get(avatar))
            .route("/api/v10/empty", get(empty))
            .route("/api/v10/text", get(text))
            .route("/gateway", get(gateway_ws))
            .route("/resume", get(gateway_ws))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, sockets: rx }
    }

    pub fn api_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn gateway_url(&self) -> String {
        format!("ws://{}/gateway", self.addr)
    }

    pub fn resume_url(&self) -> String {
        format!("ws://{}/resume", self.addr)
    }

    pub async fn accept(&mut self) -> ServerSocket {
        tokio::time::timeout(WAIT, self.sockets.recv())
            .await
            .expect("timed out waiting for a gateway connection")
            .expect("mock server stopped")
    }

    pub async fn try_accept(&mut self, wait: Duration) -> Option<ServerSocket> {
        tokio::time::timeout(wait, self.sockets.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Server end of one gateway connection.
pub struct ServerSocket {
    ws: WebSocket,
    pub path: String,
    pub query: String,
}

impl ServerSocket {
    pub async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    pub async fn send_binary(&mut self, bytes: &[u8]) {
        self.ws
            .send(Message::Binary(bytes.to_vec().into()))
            .await
            .unwrap();
    }

    pub async fn hello(&mut self, interval_ms: u64) {
        self.send_json(json!({"op": 10, "d": {"heartbeat_interval": interval_ms}}))
            .await;
    }

    pub async fn dispatch(&mut self, name: &str, seq: u64, data: Value) {
        self.send_json(json!({"op": 0, "t": name, "s": seq, "d": data}))
            .await;
    }

    pub async fn close(&mut self, code: u16) {
        let _ = self
            .ws
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: "".into(),
            })))
            .await;
    }

    /// Next text frame from the client, parsed. Returns `None` once the client
    /// has closed the connection.
    pub async fn next_frame(&mut self) -> Option<Value> {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.recv())
                .await
                .expect("timed out waiting for a client frame");
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).unwrap())
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Skips frames until one with opcode `op` arrives.
    pub async fn next_op(&mut self, op: u64) -> Value {
        loop {
            let frame = self
                .next_frame()
                .await
                .unwrap_or_else(|| panic!("connection closed while waiting for op {op}"));
            if frame["op"] == op {
                return frame;
            }
        }
    }

    /// Reads until the client closes and returns the close code it sent.
    pub async fn closed_with(&mut self) -> Option<u16> {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.recv())
                .await
                .expect("timed out waiting for the client to close");
            match msg {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code),
                None | Some(Err(_)) => return None,
                Some(Ok(_)) => continue,
            }
        }
    }
}

async fn gateway_ws(
    ws: WebSocketUpgrade,
    OriginalUri(uri): OriginalUri,
    RawQuery(query): RawQuery,
    State(state): State<MockState>,
) -> Response {
    let path = uri.path().to_string();
    let query = query.unwrap_or_default();
    ws.on_upgrade(move |ws| async move {
        let _ = state.sockets.send(ServerSocket { ws, path, query });
    })
}

async fn gateway_info(State(state): State<MockState>) -> Json<Value> {
    Json(json!({ "url": state.gateway_url }))
}

async fn login(Json(body): Json<Value>) -> Response {
    let login = body["login"].as_str().unwrap_or_default();
    match (login, body["password"].as_str()) {
        ("plain@example.com", Some("pw")) => {
            Json(json!({"mfa": false, "token": "plain-token", "user_id": "1"})).into_response()
        }
        ("mfa@example.com", Some("pw")) => Json(json!({
            "mfa": true,
            "token": null,
            "ticket": "tk",
            "login_instance_id": "li",
            "totp": true,
            "sms": false,
            "backup": true,
            "webauthn": null
        }))
        .into_response(),
        ("odd@example.com", _) => Json(json!({"user_id": "1"})).into_response(),
        ("notoken@example.com", _) => Json(json!({"mfa": false})).into_response(),
        ("noticket@example.com", _) => {
            Json(json!({"mfa": true, "totp": true})).into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 50035, "message": "Invalid Form Body"})),
        )
            .into_response(),
    }
}

async fn mfa(Path(protocol): Path<String>, Json(body): Json<Value>) -> Response {
    let valid = body["code"] == MFA_CODE
        && body["ticket"] == "tk"
        && body["login_instance_id"] == "li";
    if valid {
        Json(json!({"token": format!("{protocol}-token")})).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 60008, "message": "Invalid two-factor code"})),
        )
            .into_response()
    }
}

async fn echo(
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: String,
) -> Json<Value> {
    let header = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "authorization": header(header::AUTHORIZATION),
        "content_type": header(header::CONTENT_TYPE),
        "content_length": header(header::CONTENT_LENGTH),
        "x_custom": headers.get("x-custom").and_then(|v| v.to_str().ok()),
        "body": body,
    }))
}

async fn avatar() -> Response {
    ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES).into_response()
}

async fn empty() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn text() -> &'static str {
    "hello"
}

pub async fn wait_for_state(rx: &mut watch::Receiver<SessionSnapshot>, state: ConnectionState) {
    tokio::time::timeout(WAIT, rx.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {state:?}"))
        .expect("session dropped");
}

/// Skips events until `matches` accepts one.
pub async fn next_event(
    rx: &mut broadcast::Receiver<GatewayEvent>,
    matches: impl Fn(&GatewayEvent) -> bool,
) -> GatewayEvent {
    loop {
        let event = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a gateway event")
            .expect("event channel closed");
        if matches(&event) {
            return event;
        }
    }
}
