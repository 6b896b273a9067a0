//! Chat session handlers.

use anyhow::{Context, Result};
use pmchat::{ChatClient, EngineConfig, UserId};
use serde::Serialize;

use crate::output::ContactRow;

/// Session list result.
#[derive(Debug, Clone, Serialize)]
pub struct SessionListResult {
    pub page: u32,
    pub total_pages: u32,
    pub total_count: u64,
    pub sessions: Vec<ContactRow>,
}

/// Session creation result.
#[derive(Debug, Clone, Serialize)]
pub struct StartSessionResult {
    pub receiver_id: String,
    pub chat_id: String,
}

/// Unread count result.
#[derive(Debug, Clone, Serialize)]
pub struct UnreadResult {
    pub unread: u32,
}

fn local_user(client: &ChatClient) -> Result<UserId> {
    client
        .auth_info()
        .map(|a| a.user_id.clone())
        .context("Authentication required. Run 'pmchat auth login' first.")
}

/// List chat sessions, most recently active first.
pub async fn list_sessions(
    client: &ChatClient,
    search: Option<&str>,
    page: u32,
    limit: u32,
) -> Result<SessionListResult> {
    let me = local_user(client)?;
    let defaults = EngineConfig::default();
    let result = client
        .sessions()
        .list()
        .sort_key(defaults.sort_key)
        .sort_value(defaults.sort_value)
        .search(search.unwrap_or_default())
        .page(page)
        .limit(limit)
        .send()
        .await?;

    Ok(SessionListResult {
        page,
        total_pages: result.total_page,
        total_count: result.total_count,
        sessions: result
            .items
            .iter()
            .map(|item| ContactRow::from(&item.to_contact(&me)))
            .collect(),
    })
}

/// Create (or look up) the session with a counterpart.
pub async fn start_session(client: &ChatClient, receiver_id: &str) -> Result<StartSessionResult> {
    let chat_id = client.sessions().create(&UserId::new(receiver_id)).await?;
    Ok(StartSessionResult {
        receiver_id: receiver_id.to_owned(),
        chat_id: chat_id.to_string(),
    })
}

/// Total unread messages.
pub async fn unread_count(client: &ChatClient) -> Result<UnreadResult> {
    let unread = client.sessions().unread_count().await?;
    Ok(UnreadResult { unread })
}
