use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Wait,
    Send,
    /// The last heartbeat went unacknowledged past its deadline.
    Dead,
}

/// Heartbeat timer for one connection. Created on HELLO; the first beat is
/// delayed by `interval * jitter` so clients do not beat in lockstep.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    ack_timeout: Duration,
    next_beat: Instant,
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
    awaiting_ack: bool,
}

impl Heartbeat {
    pub fn start(interval: Duration, ack_timeout: Duration, now: Instant) -> Self {
        let jitter: f64 = rand::thread_rng().gen();
        Self::with_jitter(interval, ack_timeout, now, jitter)
    }

    pub fn with_jitter(interval: Duration, ack_timeout: Duration, now: Instant, jitter: f64) -> Self {
        let jitter = jitter.clamp(0.0, 1.0);
        Self {
            interval,
            ack_timeout,
            next_beat: now + interval.mul_f64(jitter),
            last_sent: None,
            last_ack: None,
            awaiting_ack: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_beat(&self) -> Instant {
        self.next_beat
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    pub fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    fn ack_deadline(&self) -> Option<Instant> {
        if !self.awaiting_ack {
            return None;
        }
        self.last_sent
            .map(|sent| sent + self.interval.min(self.ack_timeout))
    }

    /// The next instant at which `poll` can return something other than `Wait`.
    pub fn deadline(&self) -> Instant {
        match self.ack_deadline() {
            Some(ack) => ack.min(self.next_beat),
            None => self.next_beat,
        }
    }

    pub fn poll(&self, now: Instant) -> HeartbeatAction {
        if let Some(ack) = self.ack_deadline() {
            if now >= ack {
                return HeartbeatAction::Dead;
            }
        }
        if now >= self.next_beat {
            HeartbeatAction::Send
        } else {
            HeartbeatAction::Wait
        }
    }

    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
        self.awaiting_ack = true;
        self.next_beat = now + self.interval;
    }

    /// Returns the round trip since the last heartbeat, if one was sent.
    pub fn record_ack(&mut self, now: Instant) -> Option<Duration> {
        self.last_ack = Some(now);
        self.awaiting_ack = false;
        self.last_sent
            .map(|sent| now.saturating_duration_since(sent))
    }
}
