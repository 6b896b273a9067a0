//! Type-safe ID wrappers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix that marks a message id as client-generated and not yet confirmed.
pub const TEMP_ID_PREFIX: &str = "temp-";

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new ID from a string.
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            /// Check if this ID is blank.
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }

            /// Get the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_owned())
            }
        }

        impl From<&String> for $name {
            fn from(s: &String) -> Self {
                $name(s.clone())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(ChatId, "A chat session identifier.");
define_id!(UserId, "A user identifier.");
define_id!(MessageId, "A message identifier.");

impl MessageId {
    /// Create a client-side temporary id for an unconfirmed message.
    pub fn temporary(millis: i64, seq: u64) -> Self {
        MessageId(format!("{TEMP_ID_PREFIX}{millis}-{seq}"))
    }

    /// Whether this id was generated locally and awaits a server echo.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation() {
        let id = ChatId::new("65f0c2");
        assert_eq!(id.as_str(), "65f0c2");
        assert_eq!(format!("{}", id), "65f0c2");
    }

    #[test]
    fn test_id_is_empty() {
        assert!(ChatId::new("").is_empty());
        assert!(ChatId::new("  ").is_empty());
        assert!(!ChatId::new("c1").is_empty());
    }

    #[test]
    fn test_temporary_message_id() {
        let temp = MessageId::temporary(1_700_000_000_000, 3);
        assert_eq!(temp.as_str(), "temp-1700000000000-3");
        assert!(temp.is_temporary());
        assert!(!MessageId::new("6612ab").is_temporary());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&UserId::new("u1")).unwrap();
        assert_eq!(json, "\"u1\"");
    }
}
