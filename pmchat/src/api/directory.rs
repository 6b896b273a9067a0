//! Session directory abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::models::{ChatId, ChatSummary, UserId};

/// Parameters of a list-sessions call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionQuery {
    #[serde(rename = "sortKey")]
    pub sort_key: String,
    #[serde(rename = "sortValue")]
    pub sort_value: String,
    pub page: u32,
    pub limit: u32,
    pub search: String,
}

impl Default for SessionQuery {
    fn default() -> Self {
        Self {
            sort_key: "_id".to_owned(),
            sort_value: "desc".to_owned(),
            page: 1,
            limit: 10,
            search: String::new(),
        }
    }
}

/// One page of conversation summaries.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionPage {
    #[serde(default)]
    pub items: Vec<ChatSummary>,
    #[serde(rename = "totalCount", default)]
    pub total_count: u64,
    #[serde(rename = "itemsCount", default)]
    pub items_count: u64,
    #[serde(rename = "currentPage", default)]
    pub current_page: u32,
    #[serde(rename = "totalPage", default)]
    pub total_page: u32,
    #[serde(rename = "pageSize", default)]
    pub page_size: u32,
}

/// Where chat sessions are created and listed.
#[async_trait]
pub trait SessionDirectory: Send + Sync + fmt::Debug {
    /// Create (or look up) the session with `receiver_id`.
    async fn create_session(&self, receiver_id: &UserId) -> Result<ChatId>;

    /// Fetch one page of the local user's sessions.
    async fn list_sessions(&self, query: &SessionQuery) -> Result<SessionPage>;
}
