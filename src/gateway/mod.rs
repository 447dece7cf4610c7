pub mod events;
pub mod heartbeat;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::GatewayConfig;
use crate::error::ClientError;
use crate::transport::Transport;
use events::{close_code, opcode, Frame, GatewayEvent, HelloData, ReadyData};
use heartbeat::{Heartbeat, HeartbeatAction};
use session::{ConnectionState, SessionSnapshot, SessionState};

pub const GATEWAY_VERSION: u8 = 10;
const EVENT_BUFFER: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

enum Command {
    Shutdown,
}

enum ConnectionEnd {
    Shutdown,
    Reconnect { resume: bool },
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

/// Appends the protocol version and encoding unless the URL already has a query.
pub fn gateway_endpoint(base: &str) -> String {
    if base.contains('?') {
        return base.to_string();
    }
    let authority_and_path = base.split_once("://").map_or(base, |(_, rest)| rest);
    let separator = if authority_and_path.contains('/') { "?" } else { "/?" };
    format!("{base}{separator}v={GATEWAY_VERSION}&encoding=json")
}

/// A long-lived gateway connection. Reconnects and resumes on its own until
/// `disconnect` is called.
pub struct GatewaySession {
    config: Arc<GatewayConfig>,
    transport: Transport,
    events: broadcast::Sender<GatewayEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    worker: Option<Worker>,
}

impl GatewaySession {
    pub fn new(config: GatewayConfig, transport: Transport) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            config: Arc::new(config),
            transport,
            events,
            snapshot,
            worker: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub async fn connect(&mut self, token: impl Into<String>) -> Result<(), ClientError> {
        if self.is_running() {
            return Err(ClientError::AlreadyConnected);
        }

        let gateway_url = match &self.config.gateway_url {
            Some(url) => url.clone(),
            None => self.transport.gateway_url().await?,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.snapshot.send_replace(SessionSnapshot {
            state: ConnectionState::Connecting,
            ..SessionSnapshot::default()
        });

        let runner = Runner {
            config: self.config.clone(),
            token: token.into(),
            gateway_url,
            session: SessionState::default(),
            state: ConnectionState::Disconnected,
            latency: None,
            events: self.events.clone(),
            snapshot: self.snapshot.clone(),
            commands: rx,
        };
        let handle = tokio::spawn(runner.run());
        self.worker = Some(Worker {
            commands: tx,
            handle,
        });
        Ok(())
    }

    /// Closes the connection with a normal closure and cancels every timer and
    /// pending reconnect. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.commands.send(Command::Shutdown);
        if let Err(e) = worker.handle.await {
            tracing::error!("gateway worker ended abnormally: {e}");
        }
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(Command::Shutdown);
        }
    }
}

struct Runner {
    config: Arc<GatewayConfig>,
    token: String,
    gateway_url: String,
    session: SessionState,
    state: ConnectionState,
    latency: Option<Duration>,
    events: broadcast::Sender<GatewayEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Runner {
    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let url = self.connect_url();
            tracing::info!(url = %url, resuming = self.session.can_resume(), "connecting to gateway");

            let connected = tokio::select! {
                _ = self.commands.recv() => None,
                result = connect_async(url.as_str()) => Some(result),
            };

            let end = match connected {
                None => ConnectionEnd::Shutdown,
                Some(Ok((ws, _))) => {
                    self.emit(GatewayEvent::Connected);
                    self.set_state(ConnectionState::AwaitingHello);
                    self.drive(ws).await
                }
                Some(Err(e)) => {
                    tracing::warn!("gateway connection failed: {e}");
                    ConnectionEnd::Reconnect { resume: true }
                }
            };

            match end {
                ConnectionEnd::Shutdown => break,
                ConnectionEnd::Reconnect { resume } => {
                    if !resume {
                        self.session.invalidate();
                    }
                    self.latency = None;
                    self.set_state(ConnectionState::Reconnecting);
                    let resumable = self.session.can_resume();
                    self.emit(GatewayEvent::Reconnecting { resumable });
                    tracing::info!(
                        delay_ms = self.config.reconnect_delay.as_millis() as u64,
                        resumable,
                        "gateway reconnect scheduled"
                    );

                    let cancelled = tokio::select! {
                        _ = self.commands.recv() => true,
                        _ = sleep(self.config.reconnect_delay) => false,
                    };
                    if cancelled {
                        break;
                    }
                }
            }
        }

        self.session = SessionState::default();
        self.latency = None;
        self.set_state(ConnectionState::Disconnected);
        self.emit(GatewayEvent::Disconnected);
        tracing::info!("gateway session closed");
    }

    fn connect_url(&self) -> String {
        let base = match &self.session.resume_url {
            Some(url) if self.session.can_resume() => url,
            _ => &self.gateway_url,
        };
        gateway_endpoint(base)
    }

    async fn drive(&mut self, ws: WsStream) -> ConnectionEnd {
        let (mut sink, mut stream): (WsSink, WsSource) = ws.split();
        let mut heartbeat: Option<Heartbeat> = None;

        loop {
            let deadline = heartbeat.as_ref().map(Heartbeat::deadline);

            tokio::select! {
                _ = self.commands.recv() => {
                    close(&mut sink, close_code::NORMAL, "disconnect").await;
                    return ConnectionEnd::Shutdown;
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(end) = self.on_heartbeat_timer(&mut sink, &mut heartbeat).await {
                        return end;
                    }
                }
                msg = stream.next() => {
                    let step = match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.on_payload(text.as_bytes(), &mut sink, &mut heartbeat).await
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            self.on_payload(&bytes, &mut sink, &mut heartbeat).await
                        }
                        Some(Ok(Message::Close(frame))) => Some(self.on_close(frame)),
                        Some(Ok(_)) => None,
                        Some(Err(e)) => {
                            tracing::warn!("gateway socket error: {e}");
                            Some(ConnectionEnd::Reconnect { resume: true })
                        }
                        None => {
                            tracing::warn!("gateway socket ended without a close frame");
                            Some(ConnectionEnd::Reconnect { resume: true })
                        }
                    };
                    if let Some(end) = step {
                        return end;
                    }
                }
            }
        }
    }

    async fn on_heartbeat_timer(
        &mut self,
        sink: &mut WsSink,
        heartbeat: &mut Option<Heartbeat>,
    ) -> Option<ConnectionEnd> {
        let hb = heartbeat.as_mut()?;
        match hb.poll(Instant::now()) {
            HeartbeatAction::Wait => None,
            HeartbeatAction::Send => self.send_heartbeat(sink, hb).await,
            HeartbeatAction::Dead => {
                tracing::warn!("heartbeat not acknowledged, dropping connection");
                close(sink, close_code::RESUMABLE, "heartbeat timeout").await;
                Some(ConnectionEnd::Reconnect { resume: true })
            }
        }
    }

    async fn send_heartbeat(
        &mut self,
        sink: &mut WsSink,
        hb: &mut Heartbeat,
    ) -> Option<ConnectionEnd> {
        let frame = Frame::heartbeat(self.session.sequence);
        if let Err(e) = self.send_frame(sink, &frame).await {
            tracing::warn!("failed to send heartbeat: {e}");
            return Some(ConnectionEnd::Reconnect { resume: true });
        }
        let now = Instant::now();
        hb.record_sent(now);
        self.session.last_heartbeat_sent_at = Some(now);
        self.publish();
        None
    }

    async fn send_frame(&self, sink: &mut WsSink, frame: &Frame) -> Result<(), ClientError> {
        let text = frame.encode()?;
        if self.config.verbose_logging {
            tracing::debug!(op = frame.op, "gateway frame sent");
        }
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn on_payload(
        &mut self,
        bytes: &[u8],
        sink: &mut WsSink,
        heartbeat: &mut Option<Heartbeat>,
    ) -> Option<ConnectionEnd> {
        let Some(frame) = Frame::parse(bytes) else {
            tracing::warn!(len = bytes.len(), "ignoring undecodable gateway frame");
            return None;
        };
        if self.config.verbose_logging {
            tracing::debug!(op = frame.op, seq = ?frame.s, event = ?frame.t, "gateway frame received");
        }

        match frame.op {
            opcode::HELLO => self.on_hello(frame, sink, heartbeat).await,
            opcode::DISPATCH => {
                self.on_dispatch(frame);
                None
            }
            opcode::HEARTBEAT => match heartbeat.as_mut() {
                Some(hb) => self.send_heartbeat(sink, hb).await,
                None => {
                    tracing::warn!("heartbeat requested before HELLO");
                    None
                }
            },
            opcode::HEARTBEAT_ACK => {
                self.on_heartbeat_ack(heartbeat);
                None
            }
            opcode::RECONNECT => {
                tracing::info!("server requested reconnect");
                close(sink, close_code::RESUMABLE, "reconnect requested").await;
                Some(ConnectionEnd::Reconnect { resume: true })
            }
            opcode::INVALID_SESSION => {
                tracing::warn!("session invalidated by server");
                close(sink, close_code::NORMAL, "session invalidated").await;
                Some(ConnectionEnd::Reconnect { resume: false })
            }
            other => {
                tracing::warn!(op = other, "ignoring unexpected gateway opcode");
                None
            }
        }
    }

    async fn on_hello(
        &mut self,
        frame: Frame,
        sink: &mut WsSink,
        heartbeat: &mut Option<Heartbeat>,
    ) -> Option<ConnectionEnd> {
        if self.state != ConnectionState::AwaitingHello {
            tracing::warn!(state = ?self.state, "ignoring unexpected HELLO");
            return None;
        }
        let hello = match serde_json::from_value::<HelloData>(frame.d) {
            Ok(hello) if hello.heartbeat_interval > 0 => hello,
            Ok(_) => {
                tracing::warn!("ignoring HELLO with zero heartbeat interval");
                return None;
            }
            Err(e) => {
                tracing::warn!("ignoring malformed HELLO: {e}");
                return None;
            }
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        let now = Instant::now();
        let hb = Heartbeat::start(interval, self.config.heartbeat_ack_timeout, now);
        tracing::debug!(
            interval_ms = hello.heartbeat_interval,
            first_beat_ms = hb.next_beat().saturating_duration_since(now).as_millis() as u64,
            "heartbeat scheduled"
        );
        *heartbeat = Some(hb);
        self.session.heartbeat_interval = Some(interval);

        let handshake = match self.session.resume_point() {
            Some((session_id, seq)) => {
                let frame = Frame::resume(&self.token, session_id, seq);
                self.set_state(ConnectionState::Resuming);
                frame
            }
            None => {
                // Nothing from an unfinished earlier session may carry over.
                self.session.invalidate();
                let frame = Frame::identify(&self.token, &self.config.platform, self.config.intents);
                self.set_state(ConnectionState::Identifying);
                frame
            }
        };

        if let Err(e) = self.send_frame(sink, &handshake).await {
            tracing::warn!("failed to send handshake: {e}");
            return Some(ConnectionEnd::Reconnect { resume: true });
        }
        None
    }

    fn on_dispatch(&mut self, frame: Frame) {
        if let Some(seq) = frame.s {
            if !self.session.record_sequence(seq) {
                tracing::warn!(seq, current = ?self.session.sequence, "ignoring lower sequence number");
            }
        }

        let name = frame.t.unwrap_or_default();
        match name.as_str() {
            "READY" => match serde_json::from_value::<ReadyData>(frame.d.clone()) {
                Ok(ready) => {
                    self.session
                        .capture_ready(ready.session_id.clone(), ready.resume_gateway_url);
                    self.set_state(ConnectionState::Ready);
                    tracing::info!(session_id = %ready.session_id, "gateway session ready");
                    self.emit(GatewayEvent::Ready {
                        session_id: ready.session_id,
                    });
                }
                Err(e) => tracing::warn!("READY without a session id: {e}"),
            },
            "RESUMED" => {
                self.set_state(ConnectionState::Ready);
                tracing::info!(seq = ?self.session.sequence, "gateway session resumed");
                self.emit(GatewayEvent::Resumed);
            }
            _ => {}
        }

        self.publish();
        self.emit(GatewayEvent::Dispatch {
            name,
            sequence: frame.s,
            data: frame.d,
        });
    }

    fn on_heartbeat_ack(&mut self, heartbeat: &mut Option<Heartbeat>) {
        let Some(hb) = heartbeat.as_mut() else {
            tracing::warn!("heartbeat ack before HELLO");
            return;
        };
        let now = Instant::now();
        self.session.last_heartbeat_ack_at = Some(now);
        if let Some(latency) = hb.record_ack(now) {
            if self.config.verbose_logging {
                tracing::debug!(latency_ms = latency.as_millis() as u64, "heartbeat acknowledged");
            }
            self.latency = Some(latency);
            self.publish();
            self.emit(GatewayEvent::LatencyUpdate(latency));
        }
    }

    fn on_close(&self, frame: Option<CloseFrame>) -> ConnectionEnd {
        let code = frame.as_ref().map(|f| u16::from(f.code));
        let reason = frame
            .as_ref()
            .map(|f| f.reason.to_string())
            .unwrap_or_default();
        match code {
            Some(code) if !close_code::can_resume(code) => {
                tracing::warn!(code, reason = %reason, "gateway closed, session cannot be resumed");
                ConnectionEnd::Reconnect { resume: false }
            }
            _ => {
                tracing::info!(code = ?code, reason = %reason, "gateway closed");
                ConnectionEnd::Reconnect { resume: true }
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state && self.config.verbose_logging {
            tracing::debug!(from = ?self.state, to = ?state, "gateway state");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(SessionSnapshot {
            state: self.state,
            session: self.session.clone(),
            latency: self.latency,
        });
    }

    fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }
}

async fn close(sink: &mut WsSink, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        tracing::debug!("close frame not delivered: {e}");
    }
}
