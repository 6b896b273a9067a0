//! Chat message models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::{ChatId, MessageId, UserId};

/// Default `type` of a plain text message on the wire.
pub const NORMAL_MESSAGE_TYPE: &str = "normal";

/// A message record as the chat server sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Server-assigned message id.
    #[serde(rename = "_id")]
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub chat_id: ChatId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Text body.
    #[serde(default, deserialize_with = "string_or_null")]
    pub message: String,
    /// Message type, `normal` for text.
    #[serde(rename = "type", default, deserialize_with = "string_or_null")]
    pub kind: String,
    /// Attached image identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Delivery status reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Creation time. Unparseable values are treated as absent.
    #[serde(
        rename = "createdAt",
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    /// Correlation id echoed back from an outbound send, when the server supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

impl MessageRecord {
    /// Whether the local user wrote this message.
    pub fn is_from(&self, user_id: &UserId) -> bool {
        &self.sender_id == user_id
    }
}

fn string_or_null<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }))
}

/// A message in a reconciled conversation sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// Server id, or a `temp-` id while unconfirmed.
    pub id: MessageId,
    /// Text body.
    pub text: String,
    /// Whether the local user sent it.
    pub is_outgoing: bool,
    /// Creation time; receipt time when the server gave none.
    pub created_at: DateTime<Utc>,
    /// Arrival counter, breaks ties between equal timestamps.
    #[serde(skip)]
    pub(crate) arrival: u64,
}

impl Message {
    /// Build a message from a server record as seen by `me`.
    pub fn from_record(
        record: &MessageRecord,
        me: &UserId,
        received_at: DateTime<Utc>,
        arrival: u64,
    ) -> Self {
        Self {
            id: record.id.clone(),
            text: record.message.clone(),
            is_outgoing: record.is_from(me),
            created_at: record.created_at.unwrap_or(received_at),
            arrival,
        }
    }

    /// Build a locally-originated message that has not been confirmed yet.
    pub fn optimistic(id: MessageId, text: impl Into<String>, created_at: DateTime<Utc>, arrival: u64) -> Self {
        Self {
            id,
            text: text.into(),
            is_outgoing: true,
            created_at,
            arrival,
        }
    }

    /// Whether this entry still awaits server confirmation.
    pub fn is_pending(&self) -> bool {
        self.id.is_temporary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_from_wire() {
        let raw = r#"{
            "_id": "m1",
            "chat_id": "c1",
            "sender_id": "u2",
            "message": "hi",
            "type": "normal",
            "image": "",
            "createdAt": "2024-01-08T10:15:00.000Z",
            "updatedAt": "2024-01-08T10:15:00.000Z"
        }"#;
        let record: MessageRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.id.as_str(), "m1");
        assert_eq!(record.chat_id.as_str(), "c1");
        assert_eq!(record.message, "hi");
        assert_eq!(
            record.created_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 8, 10, 15, 0).unwrap())
        );
        assert!(record.client_ref.is_none());
    }

    #[test]
    fn test_record_tolerates_nulls_and_bad_dates() {
        let raw = r#"{"_id":"m1","chat_id":"c1","sender_id":"u2","message":null,"createdAt":"yesterday"}"#;
        let record: MessageRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.message, "");
        assert!(record.created_at.is_none());
    }

    #[test]
    fn test_direction_and_fallback_time() {
        let record = MessageRecord {
            id: "m1".into(),
            chat_id: "c1".into(),
            sender_id: "me".into(),
            message: "hello".into(),
            kind: NORMAL_MESSAGE_TYPE.into(),
            image: None,
            status: None,
            created_at: None,
            client_ref: None,
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let msg = Message::from_record(&record, &UserId::new("me"), now, 0);
        assert!(msg.is_outgoing);
        assert_eq!(msg.created_at, now);
        assert!(!msg.is_pending());
    }
}
