//! HTTP client and configuration.

mod auth;
mod http;

pub use auth::AuthInfo;
pub use http::{HttpConfig, DEFAULT_BASE_URL, DEFAULT_USER_AGENT};

use crate::api::SessionApi;
use crate::error::{Error, Result};
use crate::sync::{ChatEngine, ChatHandle, EngineConfig};
use crate::transport::{SocketIoTransport, Transport, TransportConfig};
use http::{build_client, HttpExecutor};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating ChatClient.
pub struct ChatClientBuilder {
    auth: Option<AuthInfo>,
    http_config: HttpConfig,
    transport_config: TransportConfig,
    engine_config: EngineConfig,
}

impl std::fmt::Debug for ChatClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClientBuilder")
            .field("auth", &self.auth.as_ref().map(|a| &a.user_id))
            .field("http_config", &self.http_config)
            .field("transport_config", &self.transport_config)
            .field("engine_config", &self.engine_config)
            .finish()
    }
}

impl Default for ChatClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            auth: None,
            http_config: HttpConfig::default(),
            transport_config: TransportConfig::default(),
            engine_config: EngineConfig::default(),
        }
    }

    /// Set authentication.
    pub fn auth(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.auth = Some(AuthInfo::new(token, user_id.into()));
        self
    }

    /// Set authentication from AuthInfo.
    pub fn with_auth(mut self, auth: AuthInfo) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Set base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.http_config.base_url = url.into();
        self
    }

    /// Set the realtime server URL instead of deriving it from the base URL.
    pub fn socket_url(mut self, url: impl Into<String>) -> Self {
        self.http_config.socket_url = Some(url.into());
        self
    }

    /// Set custom user agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.http_config.custom_user_agent = Some(ua.into());
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.http_config.connect_timeout = timeout;
        self
    }

    /// Set read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.http_config.read_timeout = timeout;
        self
    }

    /// Set realtime reconnection policy.
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    /// Set engine timings.
    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Build ChatClient.
    pub fn build(self) -> Result<ChatClient> {
        let http_client = build_client(&self.http_config)?;

        Ok(ChatClient {
            inner: Arc::new(ChatClientInner {
                http: http_client,
                config: self.http_config,
                auth: self.auth,
                transport_config: self.transport_config,
                engine_config: self.engine_config,
            }),
        })
    }
}

/// Internal client state.
pub(crate) struct ChatClientInner {
    pub http: reqwest::Client,
    pub config: HttpConfig,
    pub auth: Option<AuthInfo>,
    pub transport_config: TransportConfig,
    pub engine_config: EngineConfig,
}

impl ChatClientInner {
    /// Get auth info or error.
    pub fn require_auth(&self) -> Result<&AuthInfo> {
        self.auth
            .as_ref()
            .filter(|a| a.is_valid())
            .ok_or(Error::AuthRequired)
    }

    /// Create HTTP executor.
    pub fn executor(&self) -> HttpExecutor<'_> {
        HttpExecutor::new(&self.http, &self.config)
    }
}

/// Chat client: REST calls plus the realtime engine.
#[derive(Clone)]
pub struct ChatClient {
    pub(crate) inner: Arc<ChatClientInner>,
}

impl ChatClient {
    /// Create a new client builder.
    pub fn builder() -> ChatClientBuilder {
        ChatClientBuilder::new()
    }

    /// Get the session API.
    pub fn sessions(&self) -> SessionApi {
        SessionApi::new(self.inner.clone())
    }

    /// Start the realtime engine over Socket.IO.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Result<ChatHandle> {
        let url = self.inner.config.socket_url()?;
        let transport = SocketIoTransport::new(url, self.inner.transport_config.clone());
        self.connect_with(Arc::new(transport))
    }

    /// Start the realtime engine over a caller-supplied transport.
    pub fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<ChatHandle> {
        let auth = self.inner.require_auth()?;
        Ok(ChatEngine::spawn(
            auth.user_id.clone(),
            transport,
            Arc::new(self.sessions()),
            self.inner.engine_config.clone(),
        ))
    }

    /// Check if the client is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.inner.require_auth().is_ok()
    }

    /// Get the current authentication info.
    pub fn auth_info(&self) -> Option<&AuthInfo> {
        self.inner.auth.as_ref()
    }

    /// Get the configuration in use.
    pub fn config(&self) -> &HttpConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("authenticated", &self.is_authenticated())
            .field("base_url", &self.inner.config.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let client = ChatClient::builder().build().unwrap();
        assert!(!client.is_authenticated());
        assert_eq!(client.config().base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_connect_requires_auth() {
        let client = ChatClient::builder().build().unwrap();
        let err = client.connect().unwrap_err();
        assert!(matches!(err, Error::AuthRequired));
    }
}
