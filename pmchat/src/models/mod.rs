//! Data models for chat entities.

mod contact;
mod ids;
mod message;

pub use contact::{
    ChatSummary, Contact, LastMessage, Participant, Placeholder, NO_MESSAGES_YET, UNKNOWN_USER,
};
pub use ids::{ChatId, MessageId, UserId, TEMP_ID_PREFIX};
pub use message::{Message, MessageRecord, NORMAL_MESSAGE_TYPE};
