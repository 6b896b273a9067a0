//! Typed realtime events.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Packet, SocketPacket};
use crate::error::{Error, Result};
use crate::models::{ChatId, MessageRecord, UserId, NORMAL_MESSAGE_TYPE};

/// Wire event names.
pub mod names {
    pub const SEND_MESSAGE: &str = "sendMessage";
    pub const CHAT_HISTORY: &str = "chatHistory";
    pub const USER_TYPING: &str = "userTyping";
    pub const USER_STOPPED_TYPING: &str = "userStoppedTyping";
    pub const RECEIVED_MESSAGE: &str = "receivedMessage";
    pub const USER_DISCONNECTED: &str = "userDisconnected";
}

/// Payload of `sendMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessage {
    pub chat_id: ChatId,
    pub sender: UserId,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub image: String,
    /// Temporary id of the optimistic entry, for servers that echo it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

impl SendMessage {
    /// A plain text message.
    pub fn text(chat_id: ChatId, sender: UserId, message: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender,
            message: message.into(),
            kind: NORMAL_MESSAGE_TYPE.to_owned(),
            image: String::new(),
            client_ref: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_client_ref(mut self, client_ref: impl Into<String>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }
}

/// Payload of an outbound `chatHistory` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub chat_id: ChatId,
}

/// Payload of outbound `userTyping` / `userStoppedTyping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub chat_id: ChatId,
    pub sender: UserId,
}

/// Payload of inbound `userTyping` / `userStoppedTyping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingNotice {
    pub sender: UserId,
}

#[derive(Debug, Deserialize)]
struct DisconnectNotice {
    #[serde(rename = "clientId")]
    client_id: String,
}

/// Client to server events.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    SendMessage(SendMessage),
    ChatHistory(HistoryRequest),
    UserTyping(TypingSignal),
    UserStoppedTyping(TypingSignal),
}

impl ClientEvent {
    /// Request the full history of a conversation.
    pub fn history(chat_id: ChatId) -> Self {
        ClientEvent::ChatHistory(HistoryRequest { chat_id })
    }

    /// Signal that `sender` started typing.
    pub fn typing(chat_id: ChatId, sender: UserId) -> Self {
        ClientEvent::UserTyping(TypingSignal { chat_id, sender })
    }

    /// Signal that `sender` stopped typing.
    pub fn stopped_typing(chat_id: ChatId, sender: UserId) -> Self {
        ClientEvent::UserStoppedTyping(TypingSignal { chat_id, sender })
    }

    /// Wire event name.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage(_) => names::SEND_MESSAGE,
            ClientEvent::ChatHistory(_) => names::CHAT_HISTORY,
            ClientEvent::UserTyping(_) => names::USER_TYPING,
            ClientEvent::UserStoppedTyping(_) => names::USER_STOPPED_TYPING,
        }
    }

    /// Conversation the event is addressed to.
    pub fn chat_id(&self) -> &ChatId {
        match self {
            ClientEvent::SendMessage(p) => &p.chat_id,
            ClientEvent::ChatHistory(p) => &p.chat_id,
            ClientEvent::UserTyping(p) | ClientEvent::UserStoppedTyping(p) => &p.chat_id,
        }
    }

    /// JSON payload.
    pub fn payload(&self) -> Result<Value> {
        Ok(match self {
            ClientEvent::SendMessage(p) => serde_json::to_value(p)?,
            ClientEvent::ChatHistory(p) => serde_json::to_value(p)?,
            ClientEvent::UserTyping(p) | ClientEvent::UserStoppedTyping(p) => {
                serde_json::to_value(p)?
            }
        })
    }

    /// Wrap as an Engine.IO frame.
    pub fn to_packet(&self) -> Result<Packet> {
        Ok(Packet::Message(SocketPacket::event(
            self.name(),
            self.payload()?,
        )))
    }
}

/// Server to client events.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// New or echoed message.
    ReceivedMessage(MessageRecord),
    /// Response to a history request.
    ChatHistory(Vec<MessageRecord>),
    UserTyping { sender: UserId },
    UserStoppedTyping { sender: UserId },
    /// A peer connection dropped.
    UserDisconnected { client_id: String },
}

impl ServerEvent {
    /// Decode a named event.
    ///
    /// Unknown names yield `Ok(None)`. Known names with a payload that does
    /// not fit the schema yield an error.
    pub fn decode(name: &str, payload: Value) -> Result<Option<ServerEvent>> {
        let event = match name {
            names::RECEIVED_MESSAGE => ServerEvent::ReceivedMessage(serde_json::from_value(payload)?),
            names::CHAT_HISTORY => ServerEvent::ChatHistory(decode_history(payload)?),
            names::USER_TYPING => {
                let notice: TypingNotice = serde_json::from_value(payload)?;
                ServerEvent::UserTyping {
                    sender: notice.sender,
                }
            }
            names::USER_STOPPED_TYPING => {
                let notice: TypingNotice = serde_json::from_value(payload)?;
                ServerEvent::UserStoppedTyping {
                    sender: notice.sender,
                }
            }
            names::USER_DISCONNECTED => {
                let notice: DisconnectNotice = serde_json::from_value(payload)?;
                ServerEvent::UserDisconnected {
                    client_id: notice.client_id,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Decode a history array, skipping individual records that do not parse.
fn decode_history(payload: Value) -> Result<Vec<MessageRecord>> {
    let items = match payload {
        Value::Array(items) => items,
        other => {
            return Err(Error::protocol(format!(
                "chatHistory payload is not an array: {other}"
            )))
        }
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<MessageRecord>(item) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Dropping malformed history record: {e}"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_send_message_payload() {
        let event = ClientEvent::SendMessage(
            SendMessage::text("c1".into(), "u1".into(), "hello").with_client_ref("temp-1-0"),
        );
        assert_eq!(event.name(), "sendMessage");
        assert_eq!(
            event.payload().unwrap(),
            json!({
                "chat_id": "c1",
                "sender": "u1",
                "message": "hello",
                "type": "normal",
                "image": "",
                "client_ref": "temp-1-0"
            })
        );
    }

    #[test]
    fn test_typing_payload() {
        let event = ClientEvent::stopped_typing("c1".into(), "u1".into());
        assert_eq!(event.name(), "userStoppedTyping");
        assert_eq!(event.chat_id().as_str(), "c1");
        assert_eq!(
            event.payload().unwrap(),
            json!({"chat_id": "c1", "sender": "u1"})
        );
    }

    #[test]
    fn test_decode_received_message() {
        let payload = json!({
            "_id": "m9", "chat_id": "c2", "sender_id": "u2",
            "message": "hi", "createdAt": "2024-03-01T08:00:00.000Z"
        });
        match ServerEvent::decode("receivedMessage", payload).unwrap() {
            Some(ServerEvent::ReceivedMessage(record)) => {
                assert_eq!(record.chat_id.as_str(), "c2");
                assert_eq!(record.message, "hi");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_history_skips_bad_records() {
        let payload = json!([
            {"_id": "m1", "chat_id": "c1", "sender_id": "u1", "message": "a"},
            {"oops": true},
            {"_id": "m2", "chat_id": "c1", "sender_id": "u2", "message": "b"}
        ]);
        match ServerEvent::decode("chatHistory", payload).unwrap() {
            Some(ServerEvent::ChatHistory(records)) => assert_eq!(records.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_malformed_and_ignores_unknown() {
        assert!(ServerEvent::decode("userTyping", json!("u2")).is_err());
        assert!(ServerEvent::decode("chatHistory", json!({})).is_err());
        assert_eq!(ServerEvent::decode("presence", json!({})).unwrap(), None);
        assert_eq!(
            ServerEvent::decode("userDisconnected", json!({"clientId": "x1"})).unwrap(),
            Some(ServerEvent::UserDisconnected {
                client_id: "x1".into()
            })
        );
    }
}
