use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Ready,
    Reconnecting,
}

/// Resumable state of a gateway session. Survives reconnects; cleared when the
/// server invalidates the session or the host disconnects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub sequence: Option<u64>,
    pub resume_url: Option<String>,
    pub heartbeat_interval: Option<Duration>,
    pub last_heartbeat_sent_at: Option<Instant>,
    pub last_heartbeat_ack_at: Option<Instant>,
}

impl SessionState {
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    /// Stores `seq` unless it is lower than the one already seen.
    pub fn record_sequence(&mut self, seq: u64) -> bool {
        match self.sequence {
            Some(current) if seq < current => false,
            _ => {
                self.sequence = Some(seq);
                true
            }
        }
    }

    pub fn capture_ready(&mut self, session_id: String, resume_url: Option<String>) {
        self.session_id = Some(session_id);
        self.resume_url = resume_url;
    }

    pub fn invalidate(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_url = None;
    }

    /// `(session_id, sequence)` when a RESUME is possible.
    pub fn resume_point(&self) -> Option<(&str, u64)> {
        Some((self.session_id.as_deref()?, self.sequence?))
    }
}

/// Point-in-time view of a session, published to the host on every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub session: SessionState,
    pub latency: Option<Duration>,
}
