//! Connection lifecycle state machine
//!
//! The machine performs no I/O. The driver in [`crate::client`] feeds it
//! [`Event`]s observed on the socket and timer and carries out the returned
//! [`Action`]s, in order.
//!
//! ```text
//! disconnected -> connecting -> authenticating -> authenticated
//!                     ^                                 |
//!                     |  timer                          | unexpected close
//!                     +------ reconnect-pending <-------+
//! ```
//!
//! Authentication failures (rejected ack, close codes 4001/4002, missing
//! credential) land in a terminal [`ConnectionStatus::Error`] and are never
//! retried automatically. Teardown is terminal for the machine.

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::errors::SessionError;

/// Close code sent by the server when the token is invalid.
pub const CLOSE_AUTH_INVALID: u16 = 4001;
/// Close code sent by the server when the token has expired.
pub const CLOSE_AUTH_EXPIRED: u16 = 4002;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Linear reconnect backoff with a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt`: `min(base_delay * attempt, max_delay)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

/// Connection state as seen by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected, no attempt scheduled
    Disconnected,
    /// Socket handshake in progress
    Connecting,
    /// Socket open, waiting for the auth acknowledgment
    Authenticating,
    /// Session usable
    Authenticated,
    /// Socket failed, waiting for the close
    Closing,
    /// Reconnect timer armed
    ReconnectPending { attempt: u32, delay: Duration },
    /// Terminal failure for this session
    Error(SessionError),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// A socket exists (or is being established) in this state.
    fn has_socket(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Authenticated | Self::Closing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Closing => "closing",
            Self::ReconnectPending { .. } => "reconnect-pending",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReconnectPending { attempt, delay } => {
                write!(f, "reconnect-pending (attempt {attempt}, in {delay:?})")
            }
            Self::Error(e) => write!(f, "error: {e}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Something that happened to the socket, timer or client.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Explicit (re)connect request
    Connect { has_credential: bool },
    /// Socket handshake completed
    Opened,
    /// Auth acknowledgment frame
    AuthAck {
        success: bool,
        reason: Option<String>,
    },
    /// Socket-level failure, a close follows
    TransportError(String),
    /// Socket closed, `code` is absent for abnormal termination
    Closed { code: Option<u16> },
    /// Reconnect timer fired
    TimerElapsed { has_credential: bool },
    /// Owner is going away
    Teardown,
}

/// Side effect requested by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenSocket,
    CloseSocket,
    ScheduleReconnect(Duration),
    CancelTimer,
    ClearSnapshot,
}

/// Per-client connection session state.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    status: ConnectionStatus,
    attempt: u32,
    last_error: Option<SessionError>,
    policy: ReconnectPolicy,
    torn_down: bool,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            last_error: None,
            policy,
            torn_down: false,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Reconnect attempts since the last successful authentication.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Most recent failure, fatal or not.
    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// The error to show the user, present only in a terminal error state.
    pub fn fatal_error(&self) -> Option<&SessionError> {
        match &self.status {
            ConnectionStatus::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Apply an event and return the actions to perform, in order.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        if self.torn_down {
            debug!("Ignoring {:?} after teardown", event);
            return Vec::new();
        }

        match event {
            Event::Connect { has_credential } => self.connect(has_credential),
            Event::TimerElapsed { has_credential } => {
                if matches!(self.status, ConnectionStatus::ReconnectPending { .. }) {
                    self.connect(has_credential)
                } else {
                    debug!("Ignoring stale reconnect timer in state {}", self.status);
                    Vec::new()
                }
            }
            Event::Opened => self.opened(),
            Event::AuthAck { success, reason } => self.auth_ack(success, reason),
            Event::TransportError(reason) => self.transport_error(reason),
            Event::Closed { code } => self.closed(code),
            Event::Teardown => self.teardown(),
        }
    }

    fn connect(&mut self, has_credential: bool) -> Vec<Action> {
        let mut actions = Vec::new();
        if matches!(self.status, ConnectionStatus::ReconnectPending { .. }) {
            actions.push(Action::CancelTimer);
        }
        if self.status.has_socket() {
            actions.push(Action::CloseSocket);
        }

        if !has_credential {
            error!("No access token available, not connecting");
            self.fail(SessionError::NoCredential);
            actions.push(Action::ClearSnapshot);
            return actions;
        }

        info!("Connecting to vessel feed (attempt {})", self.attempt);
        self.status = ConnectionStatus::Connecting;
        actions.push(Action::OpenSocket);
        actions
    }

    fn opened(&mut self) -> Vec<Action> {
        if self.status != ConnectionStatus::Connecting {
            debug!("Ignoring open in state {}", self.status);
            return Vec::new();
        }
        info!("Socket open, waiting for authentication");
        self.status = ConnectionStatus::Authenticating;
        self.last_error = None;
        Vec::new()
    }

    fn auth_ack(&mut self, success: bool, reason: Option<String>) -> Vec<Action> {
        let authenticating = self.status == ConnectionStatus::Authenticating;
        match (authenticating, success) {
            (true, true) => {
                info!("Authenticated");
                self.status = ConnectionStatus::Authenticated;
                self.attempt = 0;
                self.last_error = None;
                Vec::new()
            }
            (_, false) if authenticating || self.status.is_connected() => {
                error!("Authentication rejected: {:?}", reason);
                self.fail(SessionError::AuthRejected { reason });
                vec![Action::CloseSocket, Action::ClearSnapshot]
            }
            _ => {
                debug!("Ignoring auth ack (success={}) in state {}", success, self.status);
                Vec::new()
            }
        }
    }

    fn transport_error(&mut self, reason: String) -> Vec<Action> {
        if !self.status.has_socket() {
            debug!("Ignoring transport error in state {}: {}", self.status, reason);
            return Vec::new();
        }
        warn!("Connection error: {}", reason);
        self.status = ConnectionStatus::Closing;
        self.last_error = Some(SessionError::Transport(reason));
        Vec::new()
    }

    fn closed(&mut self, code: Option<u16>) -> Vec<Action> {
        if !self.status.has_socket() {
            debug!("Ignoring close {:?} in state {}", code, self.status);
            return Vec::new();
        }

        if let Some(code @ (CLOSE_AUTH_INVALID | CLOSE_AUTH_EXPIRED)) = code {
            error!("Session closed by server with code {}, not reconnecting", code);
            self.fail(SessionError::SessionExpired { code });
            return vec![Action::ClearSnapshot];
        }

        self.attempt = self.attempt.saturating_add(1);
        let delay = self.policy.delay(self.attempt);
        if self.last_error.is_none() {
            self.last_error = Some(SessionError::Transport(match code {
                Some(code) => format!("connection closed with code {code}"),
                None => "connection closed".to_string(),
            }));
        }
        info!(
            "Connection closed ({:?}), reconnecting in {:?} (attempt {})",
            code, delay, self.attempt
        );
        self.status = ConnectionStatus::ReconnectPending {
            attempt: self.attempt,
            delay,
        };
        vec![Action::ScheduleReconnect(delay)]
    }

    fn teardown(&mut self) -> Vec<Action> {
        info!("Tearing down connection");
        self.torn_down = true;
        self.status = ConnectionStatus::Disconnected;
        vec![Action::CancelTimer, Action::CloseSocket]
    }

    fn fail(&mut self, error: SessionError) {
        self.last_error = Some(error.clone());
        self.status = ConnectionStatus::Error(error);
    }
}
