//! Conversation list models.

use serde::{Deserialize, Serialize};

use super::{ChatId, UserId};

/// Display name used when the server knows no name for a counterpart.
pub const UNKNOWN_USER: &str = "Unknown User";

/// Preview text for a conversation without messages.
pub const NO_MESSAGES_YET: &str = "No messages yet";

/// An entry in the ordered conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Chat session id.
    pub chat_id: ChatId,
    /// The other participant.
    pub receiver_id: UserId,
    /// The other participant's display name.
    pub name: String,
    /// Avatar reference.
    pub avatar: Option<String>,
    /// Last message preview.
    pub last_message: String,
    /// Messages received since the conversation was last opened.
    pub unread_count: u32,
}

/// Stand-in list entry for a counterpart whose session is still being created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    /// Counterpart the session is being created with.
    pub receiver_id: UserId,
    /// Best-effort display name.
    pub name: String,
    /// Avatar reference, if known.
    pub avatar: Option<String>,
}

impl Placeholder {
    /// Create a placeholder with a display name.
    pub fn new(receiver_id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            receiver_id: receiver_id.into(),
            name: name.into(),
            avatar: None,
        }
    }
}

/// A participant object embedded in legacy list items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Participant {
    /// User id.
    #[serde(rename = "_id")]
    pub id: UserId,
    /// Full name.
    pub full_name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Profile image reference.
    pub profile_image: Option<String>,
}

/// Last message summary embedded in legacy list items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastMessage {
    /// Text body.
    pub message: Option<String>,
    /// Creation time as sent by the server.
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
}

/// A conversation summary returned by the list-sessions call.
///
/// Both the flat shape (`user_id`, `name`, `last_message`) and the legacy
/// shape (`sender`/`receiver` objects, `lastMessage`) are accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSummary {
    /// Chat session id.
    #[serde(rename = "_id")]
    pub id: ChatId,
    /// Legacy copy of the session id.
    pub chat_id: Option<ChatId>,
    /// The other participant's id.
    pub user_id: Option<UserId>,
    /// The other participant's name.
    pub name: Option<String>,
    /// The other participant's profile image.
    pub profile_image: Option<String>,
    /// Last message text.
    pub last_message: Option<String>,
    /// Legacy sender id.
    pub sender_id: Option<UserId>,
    /// Legacy receiver id.
    pub receiver_id: Option<UserId>,
    /// Legacy sender object.
    pub sender: Option<Participant>,
    /// Legacy receiver object.
    pub receiver: Option<Participant>,
    /// Legacy last message object.
    #[serde(rename = "lastMessage")]
    pub last_message_detail: Option<LastMessage>,
    /// Unread messages for the local user.
    #[serde(rename = "unreadCount")]
    pub unread_count: Option<u32>,
    /// Creation time.
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    /// Last update time.
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

impl ChatSummary {
    /// Whether the local user started this session in the legacy shape.
    fn sent_by(&self, me: &UserId) -> bool {
        self.sender_id.as_ref() == Some(me)
    }

    /// The legacy participant object describing the counterpart.
    fn counterpart(&self, me: &UserId) -> Option<&Participant> {
        if self.sent_by(me) {
            self.receiver.as_ref()
        } else {
            self.sender.as_ref()
        }
    }

    /// Resolve the counterpart id from whichever shape the server used.
    pub fn counterpart_id(&self, me: &UserId) -> UserId {
        if let Some(id) = self.user_id.as_ref().filter(|id| !id.is_empty()) {
            return id.clone();
        }
        let legacy = if self.sent_by(me) {
            self.receiver_id.as_ref()
        } else {
            self.sender_id.as_ref()
        };
        legacy.cloned().unwrap_or_default()
    }

    /// Convert into a list entry as seen by `me`.
    pub fn to_contact(&self, me: &UserId) -> Contact {
        let counterpart = self.counterpart(me);

        let name = non_empty(self.name.as_ref())
            .or_else(|| counterpart.and_then(|p| non_empty(p.full_name.as_ref())))
            .unwrap_or(UNKNOWN_USER)
            .to_owned();

        let avatar = non_empty(self.profile_image.as_ref())
            .or_else(|| counterpart.and_then(|p| non_empty(p.profile_image.as_ref())))
            .map(str::to_owned);

        let last_message = non_empty(self.last_message.as_ref())
            .or_else(|| {
                self.last_message_detail
                    .as_ref()
                    .and_then(|m| non_empty(m.message.as_ref()))
            })
            .unwrap_or(NO_MESSAGES_YET)
            .to_owned();

        Contact {
            chat_id: self.id.clone(),
            receiver_id: self.counterpart_id(me),
            name,
            avatar,
            last_message,
            unread_count: self.unread_count.unwrap_or(0),
        }
    }
}
