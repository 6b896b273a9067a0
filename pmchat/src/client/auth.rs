//! Authentication state management.

use crate::models::UserId;

/// Bearer token plus the identity it belongs to.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    /// Bearer token for REST calls.
    pub token: String,
    /// Local user id, used to tell own messages from the counterpart's.
    pub user_id: UserId,
}

impl AuthInfo {
    /// Create new auth info.
    pub fn new(token: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }

    /// Check if auth looks valid.
    pub fn is_valid(&self) -> bool {
        !self.token.trim().is_empty() && !self.user_id.is_empty()
    }

    /// Value of the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_info_validity() {
        let valid = AuthInfo::new("token123", "u-1");
        assert!(valid.is_valid());

        let empty_token = AuthInfo::new("  ", "u-1");
        assert!(!empty_token.is_valid());

        let empty_user = AuthInfo::new("token123", "");
        assert!(!empty_user.is_valid());
    }

    #[test]
    fn test_bearer_header() {
        assert_eq!(AuthInfo::new("abc", "u").bearer(), "Bearer abc");
    }
}
