//! Real-time chat client for the Prosjektmarkedet marketplace.
//!
//! Keeps one Socket.IO link per conversation, reconciles optimistic sends
//! with server echoes and history, and maintains an ordered conversation
//! list with unread counts.

pub mod api;
pub mod client;
pub mod error;
pub mod models;
pub mod protocol;
pub mod sync;
pub mod transport;

// Re-export main types
pub use client::{AuthInfo, ChatClient, ChatClientBuilder, HttpConfig};
pub use error::{Error, Result, SendRejection};

// Re-export commonly used models
pub use models::{ChatId, ChatSummary, Contact, Message, MessageId, MessageRecord, Placeholder, UserId};

// Re-export engine types
pub use api::{SessionApi, SessionDirectory, SessionPage, SessionQuery};
pub use sync::{ChatHandle, DisplayGroup, DisplayMessage, EngineConfig, SessionState, Snapshot};
pub use transport::{MemoryTransport, SocketIoTransport, Transport, TransportConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = ChatClient::builder().build();
        assert!(client.is_ok());

        let client = client.unwrap();
        assert!(!client.is_authenticated());
    }

    #[test]
    fn test_client_with_auth() {
        let client = ChatClient::builder()
            .auth("test_token", "u-12345")
            .build()
            .unwrap();

        assert!(client.is_authenticated());
        assert_eq!(client.auth_info().map(|a| a.user_id.as_str()), Some("u-12345"));
    }
}
