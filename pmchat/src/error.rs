//! Error types.

use std::fmt;

use thiserror::Error;

use crate::models::ChatId;

/// Why a send was refused before or while reaching the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    /// Text was empty or whitespace only.
    EmptyText,
    /// No conversation is selected.
    NoConversation,
    /// A previous send has not finished.
    InFlight,
    /// The active conversation has no live connection.
    NotConnected,
    /// The transport refused the frame.
    Transport,
}

impl fmt::Display for SendRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SendRejection::EmptyText => "message is empty",
            SendRejection::NoConversation => "no conversation selected",
            SendRejection::InFlight => "a message is already being sent",
            SendRejection::NotConnected => "not connected",
            SendRejection::Transport => "transport refused the message",
        };
        f.write_str(reason)
    }
}

/// The main error type for pmchat operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-related error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Chat API returned a non-success status.
    #[error("Chat API error [{code}]: {message}")]
    Api { code: String, message: String },

    /// Failed to parse response data.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Operation requires authentication but none was provided.
    #[error("Authentication required")]
    AuthRequired,

    /// A required field was missing in the response.
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Invalid argument passed to an API method.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Malformed realtime frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No live connection for the conversation.
    #[error("Not connected to chat {0}")]
    NotConnected(ChatId),

    /// A send was refused.
    #[error("Message not sent: {0}")]
    SendRejected(SendRejection),

    /// The engine or the connection task has gone away.
    #[error("Channel closed")]
    Closed,
}

impl Error {
    /// Create a chat API error.
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a missing field error.
    pub fn missing(field: impl Into<String>) -> Self {
        Error::MissingField(field.into())
    }

    /// Check if this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::WebSocket(_) | Error::NotConnected(_) => true,
            Error::Api { code, .. } => code.starts_with('5'),
            _ => false,
        }
    }

    /// Check if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        match self {
            Error::AuthRequired => true,
            Error::Api { code, .. } => code == "401" || code == "403",
            _ => false,
        }
    }
}

/// Result type alias for pmchat operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::api("400", "receiver_id is required");
        assert_eq!(format!("{}", e), "Chat API error [400]: receiver_id is required");

        let e = Error::SendRejected(SendRejection::NotConnected);
        assert_eq!(format!("{}", e), "Message not sent: not connected");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::api("503", "unavailable").is_retryable());
        assert!(!Error::api("400", "bad request").is_retryable());
        assert!(Error::NotConnected(ChatId::new("c1")).is_retryable());
    }

    #[test]
    fn test_auth_error() {
        assert!(Error::AuthRequired.is_auth_error());
        assert!(Error::api("401", "expired").is_auth_error());
        assert!(!Error::api("500", "boom").is_auth_error());
    }
}
