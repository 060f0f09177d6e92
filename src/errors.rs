//! Errors for the vessel feed client
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("WebSocket error")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Invalid feed URL")]
    UrlError(#[from] url::ParseError),

    #[error("Invalid MMSI")]
    InvalidMmsi(String),

    #[error("Connection attempt timed out")]
    ConnectTimeout,

    #[error("Feed client has been torn down")]
    TornDown,
}

/// Failure to turn one inbound text frame into a [`crate::decoder::FeedMessage`].
///
/// Decode errors are local to the frame: the caller logs and drops it.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("frame is not valid JSON")]
    Syntax(#[source] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("malformed `{frame_type}` frame")]
    Malformed {
        frame_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Session-level error as exposed to the UI layer.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SessionError {
    #[error("no access token available")]
    NoCredential,

    #[error("authentication rejected{}", reason_suffix(.reason))]
    AuthRejected { reason: Option<String> },

    #[error("session expired (close code {code})")]
    SessionExpired { code: u16 },

    #[error("connection error: {0}")]
    Transport(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

impl SessionError {
    /// Fatal errors end the session and are never retried automatically.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_not_fatal() {
        assert!(!SessionError::Transport("reset".to_string()).is_fatal());
        assert!(SessionError::NoCredential.is_fatal());
        assert!(SessionError::AuthRejected { reason: None }.is_fatal());
        assert!(SessionError::SessionExpired { code: 4002 }.is_fatal());
    }

    #[test]
    fn auth_rejected_message_includes_reason() {
        let err = SessionError::AuthRejected {
            reason: Some("bad token".to_string()),
        };
        assert_eq!(err.to_string(), "authentication rejected: bad token");
        assert_eq!(
            SessionError::AuthRejected { reason: None }.to_string(),
            "authentication rejected"
        );
    }
}
