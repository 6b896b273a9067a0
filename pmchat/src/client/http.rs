//! HTTP client configuration and request execution.

use crate::error::{Error, Result};
use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::AuthInfo;

/// Default REST base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api/";

/// Default user agent.
pub const DEFAULT_USER_AGENT: &str = concat!("pmchat/", env!("CARGO_PKG_VERSION"));

/// Envelope status codes that count as success.
const SUCCESS_CODES: [u16; 3] = [200, 201, 202];

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL for API requests.
    pub base_url: String,
    /// Explicit realtime server URL. Derived from `base_url` when unset.
    pub socket_url: Option<String>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read timeout.
    pub read_timeout: Duration,
    /// Custom user agent.
    pub custom_user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            socket_url: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
            custom_user_agent: None,
        }
    }
}

impl HttpConfig {
    /// User agent sent with every request.
    pub fn user_agent(&self) -> &str {
        self.custom_user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    /// Resolve a relative API path to a full URL.
    pub fn resolve_url(&self, api: &str) -> Result<Url> {
        if api.starts_with("http://") || api.starts_with("https://") {
            return Url::parse(api).map_err(Error::Url);
        }

        let base = if self.base_url.ends_with('/') {
            Url::parse(&self.base_url)
        } else {
            Url::parse(&format!("{}/", self.base_url))
        };
        base.and_then(|b| b.join(api.trim_start_matches('/')))
            .map_err(Error::Url)
    }

    /// Realtime server URL.
    ///
    /// Without an explicit `socket_url`, the base URL minus a trailing
    /// `/api` segment, on the matching `ws`/`wss` scheme.
    pub fn socket_url(&self) -> Result<Url> {
        if let Some(ref explicit) = self.socket_url {
            return Url::parse(explicit).map_err(Error::Url);
        }

        let mut url = Url::parse(&self.base_url)?;
        let trimmed = url.path().trim_end_matches('/');
        let path = trimmed.strip_suffix("/api").unwrap_or(trimmed).to_owned();
        url.set_path(if path.is_empty() { "/" } else { &path });
        url.set_query(None);

        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => other,
        }
        .to_owned();
        url.set_scheme(&scheme)
            .map_err(|_| Error::InvalidArgument(format!("cannot derive socket URL from {}", self.base_url)))?;
        Ok(url)
    }
}

/// Build a reqwest client with the given configuration.
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .gzip(true)
        .build()
        .map_err(Error::Network)
}

/// HTTP request executor.
pub struct HttpExecutor<'a> {
    client: &'a Client,
    config: &'a HttpConfig,
}

impl<'a> HttpExecutor<'a> {
    /// Create a new executor.
    pub fn new(client: &'a Client, config: &'a HttpConfig) -> Self {
        Self { client, config }
    }

    /// Build a request with common headers.
    fn build_request(&self, method: Method, url: Url, auth: &AuthInfo) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("User-Agent", self.config.user_agent())
            .header("Authorization", auth.bearer())
            .header("Accept", "application/json")
    }

    /// POST a JSON body and unwrap the response envelope.
    pub async fn post_json<B, T>(&self, api: &str, body: &B, auth: &AuthInfo) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.config.resolve_url(api)?;
        debug!("POST {url}");
        let response = self
            .build_request(Method::POST, url, auth)
            .json(body)
            .send()
            .await
            .map_err(Error::Network)?;
        self.handle_response(response).await
    }

    /// GET and unwrap the response envelope.
    pub async fn get_json<T: DeserializeOwned>(&self, api: &str, auth: &AuthInfo) -> Result<T> {
        let url = self.config.resolve_url(api)?;
        debug!("GET {url}");
        let response = self
            .build_request(Method::GET, url, auth)
            .send()
            .await
            .map_err(Error::Network)?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await.map_err(Error::Network)?;
        parse_envelope(status.as_u16(), status.canonical_reason(), &text)
    }
}

/// `{ statusCode, message, data }` wrapper around every response.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "statusCode", default)]
    status_code: Option<u16>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
}

impl Envelope {
    /// Message text; validation errors arrive as a list.
    fn message(&self) -> Option<String> {
        match self.message.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                (!parts.is_empty()).then(|| parts.join("; "))
            }
            _ => None,
        }
    }
}

/// Unwrap an envelope body.
///
/// The envelope's own `statusCode` wins over the HTTP status when present.
pub(crate) fn parse_envelope<T: DeserializeOwned>(
    http_status: u16,
    reason: Option<&str>,
    body: &str,
) -> Result<T> {
    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) if SUCCESS_CODES.contains(&http_status) => return Err(Error::Json(e)),
        Err(_) => {
            return Err(Error::api(
                http_status.to_string(),
                reason.unwrap_or("Request failed"),
            ))
        }
    };

    let code = envelope.status_code.unwrap_or(http_status);
    if !SUCCESS_CODES.contains(&code) {
        let message = envelope
            .message()
            .or_else(|| reason.map(str::to_owned))
            .unwrap_or_else(|| "Request failed".to_owned());
        return Err(Error::api(code.to_string(), message));
    }

    let data = envelope.data.ok_or_else(|| Error::missing("data"))?;
    serde_json::from_value(data).map_err(Error::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Created {
        id: String,
    }

    #[test]
    fn test_resolve_url() {
        let config = HttpConfig::default();
        let url = config.resolve_url("chat/list").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/chat/list");

        let config = HttpConfig {
            base_url: "https://example.com/api".to_owned(),
            ..HttpConfig::default()
        };
        let url = config.resolve_url("/chat/unread-count").unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/chat/unread-count");
    }

    #[test]
    fn test_socket_url_derivation() {
        let config = HttpConfig::default();
        assert_eq!(config.socket_url().unwrap().as_str(), "ws://localhost:3000/");

        let config = HttpConfig {
            base_url: "https://chat.example.com/v2/api/".to_owned(),
            ..HttpConfig::default()
        };
        assert_eq!(
            config.socket_url().unwrap().as_str(),
            "wss://chat.example.com/v2"
        );

        let config = HttpConfig {
            socket_url: Some("wss://rt.example.com".to_owned()),
            ..HttpConfig::default()
        };
        assert_eq!(config.socket_url().unwrap().as_str(), "wss://rt.example.com/");
    }

    #[test]
    fn test_envelope_success() {
        let body = r#"{"statusCode":201,"message":"Created","data":{"id":"c1"}}"#;
        let created: Created = parse_envelope(200, Some("OK"), body).unwrap();
        assert_eq!(created, Created { id: "c1".into() });
    }

    #[test]
    fn test_envelope_status_overrides_http() {
        let body = r#"{"statusCode":400,"message":["receiver_id must be a string"],"data":null}"#;
        let err = parse_envelope::<Created>(200, Some("OK"), body).unwrap_err();
        match err {
            Error::Api { code, message } => {
                assert_eq!(code, "400");
                assert_eq!(message, "receiver_id must be a string");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_envelope_http_error_without_body() {
        let err = parse_envelope::<Created>(401, Some("Unauthorized"), "").unwrap_err();
        assert!(err.is_auth_error());
    }

    #[test]
    fn test_envelope_missing_data() {
        let err = parse_envelope::<Created>(200, None, r#"{"statusCode":200}"#).unwrap_err();
        assert!(matches!(err, Error::MissingField(_)));
    }
}
