//! Chat session API.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::directory::{SessionDirectory, SessionPage, SessionQuery};
use crate::{
    client::ChatClientInner,
    error::{Error, Result},
    models::{ChatId, UserId},
};

const CREATE_SESSION: &str = "chat/create-session";
const LIST_SESSIONS: &str = "chat/list";
const UNREAD_COUNT: &str = "chat/unread-count";

/// API for chat session operations.
#[derive(Clone)]
pub struct SessionApi {
    client: Arc<ChatClientInner>,
}

impl std::fmt::Debug for SessionApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionApi")
            .field("base_url", &self.client.config.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    id: ChatId,
}

#[derive(Debug, Deserialize)]
struct UnreadCount {
    #[serde(default)]
    count: u32,
}

impl SessionApi {
    pub(crate) fn new(client: Arc<ChatClientInner>) -> Self {
        Self { client }
    }

    /// Create (or look up) the session with `receiver_id`.
    pub async fn create(&self, receiver_id: &UserId) -> Result<ChatId> {
        if receiver_id.is_empty() {
            return Err(Error::InvalidArgument("receiver_id is empty".into()));
        }
        let auth = self.client.require_auth()?;
        let created: CreatedSession = self
            .client
            .executor()
            .post_json(CREATE_SESSION, &json!({ "receiver_id": receiver_id }), auth)
            .await?;
        if created.id.is_empty() {
            return Err(Error::missing("id"));
        }
        Ok(created.id)
    }

    /// List sessions.
    pub fn list(&self) -> SessionListBuilder {
        SessionListBuilder {
            client: self.client.clone(),
            query: SessionQuery::default(),
        }
    }

    /// Total unread messages across all sessions.
    pub async fn unread_count(&self) -> Result<u32> {
        let auth = self.client.require_auth()?;
        let unread: UnreadCount = self
            .client
            .executor()
            .get_json(UNREAD_COUNT, auth)
            .await?;
        Ok(unread.count)
    }

    async fn fetch(&self, query: &SessionQuery) -> Result<SessionPage> {
        fetch_page(&self.client, query).await
    }
}

async fn fetch_page(client: &ChatClientInner, query: &SessionQuery) -> Result<SessionPage> {
    let auth = client.require_auth()?;
    client
        .executor()
        .post_json(LIST_SESSIONS, query, auth)
        .await
}

#[async_trait]
impl SessionDirectory for SessionApi {
    async fn create_session(&self, receiver_id: &UserId) -> Result<ChatId> {
        self.create(receiver_id).await
    }

    async fn list_sessions(&self, query: &SessionQuery) -> Result<SessionPage> {
        self.fetch(query).await
    }
}

/// Builder for list-sessions requests.
pub struct SessionListBuilder {
    client: Arc<ChatClientInner>,
    query: SessionQuery,
}

impl SessionListBuilder {
    /// Field to sort by.
    pub fn sort_key(mut self, key: impl Into<String>) -> Self {
        self.query.sort_key = key.into();
        self
    }

    /// `asc` or `desc`.
    pub fn sort_value(mut self, value: impl Into<String>) -> Self {
        self.query.sort_value = value.into();
        self
    }

    /// Set the page number.
    pub fn page(mut self, page: u32) -> Self {
        self.query.page = page.max(1);
        self
    }

    /// Set the page size.
    pub fn limit(mut self, limit: u32) -> Self {
        self.query.limit = limit.max(1);
        self
    }

    /// Filter by counterpart name.
    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.query.search = term.into();
        self
    }

    /// The query this builder would send.
    pub fn query(&self) -> &SessionQuery {
        &self.query
    }

    /// Execute the request.
    pub async fn send(self) -> Result<SessionPage> {
        fetch_page(&self.client, &self.query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatClient;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_list_query_serialization() {
        let client = ChatClient::builder().auth("t", "me").build().unwrap();
        let builder = client
            .sessions()
            .list()
            .sort_key("updatedAt")
            .page(0)
            .limit(100)
            .search("acme");
        assert_eq!(
            serde_json::to_value(builder.query()).unwrap(),
            json!({
                "sortKey": "updatedAt",
                "sortValue": "desc",
                "page": 1,
                "limit": 100,
                "search": "acme",
            })
        );
    }

    #[test]
    fn test_default_query() {
        let query = SessionQuery::default();
        assert_eq!(query.sort_key, "_id");
        assert_eq!(query.limit, 10);
        assert_eq!(query.search, "");
    }

    #[test]
    fn test_page_parse() {
        let raw = r#"{
            "items": [{"_id": "c1", "user_id": "b7", "name": "Acme"}],
            "totalCount": 1, "itemsCount": 1, "currentPage": 1, "totalPage": 1, "pageSize": 100
        }"#;
        let page: SessionPage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, ChatId::new("c1"));
        assert_eq!(page.page_size, 100);
    }

    #[tokio::test]
    async fn test_requires_auth() {
        let client = ChatClient::builder().build().unwrap();
        let err = client.sessions().unread_count().await.unwrap_err();
        assert!(matches!(err, Error::AuthRequired));
    }
}
