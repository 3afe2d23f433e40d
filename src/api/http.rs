//! reqwest implementation of [`Backend`]
//!
//! All REST calls go through [`HttpBackend::send_envelope`], which maps
//! transport failures to [`SheikhError::Network`], non-2xx statuses and
//! non-zero envelope codes to [`SheikhError::Server`], and undecodable
//! bodies to [`SheikhError::Parse`].
//!
//! Streaming replies are requested with `Accept: text/event-stream`. An SSE
//! response is decoded lazily through [`sse_events`]; a plain JSON reply to
//! the same endpoint is accepted too and surfaces as one chunk followed by
//! `done`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::api::sse::sse_events;
use crate::api::types::{
    ApiEnvelope, ChatReply, ChatRequest, CreatedSession, RenameRequest, SessionDetail,
    SessionList, SessionSummary,
};
use crate::api::{Backend, FrameStream};
use crate::config::ServerConfig;
use crate::error::{Result, SheikhError};
use crate::stream::StreamFrame;

/// HTTP client for the Sheikh backend
///
/// # Examples
///
/// ```
/// use sheikh_chat::api::HttpBackend;
/// use sheikh_chat::config::ServerConfig;
///
/// let backend = HttpBackend::new(&ServerConfig::default()).unwrap();
/// assert_eq!(backend.base_url().as_str(), "http://127.0.0.1:8000/");
/// ```
#[derive(Debug, Clone)]
pub struct HttpBackend {
    /// Client for REST round trips, bounded by the configured timeout
    client: Client,
    /// Client for push connections; only the connect phase is bounded
    stream_client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Create a backend client from configuration
    ///
    /// # Errors
    ///
    /// Returns [`SheikhError::Config`] if the base URL is invalid and
    /// [`SheikhError::Network`] if the HTTP client cannot be built.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            SheikhError::Config(format!("Invalid base URL '{}': {}", config.base_url, e))
        })?;

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| SheikhError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let stream_client = Client::builder()
            .connect_timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| SheikhError::Network(format!("Failed to create HTTP client: {}", e)))?;

        tracing::debug!("Initialized HTTP backend: base_url={}", base_url);

        Ok(Self {
            client,
            stream_client,
            base_url,
        })
    }

    /// Base URL every endpoint is resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| {
            SheikhError::Config(format!("Invalid endpoint path '{}': {}", path, e)).into()
        })
    }

    fn session_endpoint(&self, session_id: &str, suffix: &str) -> Result<Url> {
        let mut url = self.endpoint("api/v1/sessions/")?;
        url.path_segments_mut()
            .map_err(|_| SheikhError::Config("Base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .push(session_id);
        if !suffix.is_empty() {
            url.path_segments_mut()
                .map_err(|_| SheikhError::Config("Base URL cannot carry a path".to_string()))?
                .push(suffix);
        }
        Ok(url)
    }

    /// Send a request and unwrap its response envelope
    async fn send_envelope<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> Result<Option<T>> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!("{} request failed: {}", operation, e);
            SheikhError::Network(format!("{} request failed: {}", operation, e))
        })?;

        let body = read_success_body(response, operation).await?;
        let envelope: ApiEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse {} response: {}", operation, e);
            SheikhError::Parse(format!("Failed to parse {} response: {}", operation, e))
        })?;

        envelope.into_result().map_err(|e| {
            tracing::warn!("{} rejected: {}", operation, e);
            e.into()
        })
    }
}

/// Read a response body, mapping non-2xx statuses to [`SheikhError::Server`]
async fn read_success_body(response: Response, operation: &str) -> Result<String> {
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        SheikhError::Network(format!("failed to read {} response body: {}", operation, e))
    })?;

    if !status.is_success() {
        tracing::error!("{} returned HTTP {}: {}", operation, status, body);
        return Err(SheikhError::Server {
            code: i64::from(status.as_u16()),
            message: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        }
        .into());
    }

    Ok(body)
}

#[async_trait]
impl Backend for HttpBackend {
    async fn create_session(&self) -> Result<String> {
        let url = self.endpoint("api/v1/sessions")?;
        tracing::debug!("PUT {}", url);
        let created: Option<CreatedSession> = self
            .send_envelope(self.client.put(url), "create session")
            .await?;
        created
            .map(|c| c.session_id)
            .ok_or_else(|| SheikhError::Parse("create session response carried no data".into()).into())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let url = self.endpoint("api/v1/sessions")?;
        tracing::debug!("GET {}", url);
        let list: Option<SessionList> = self
            .send_envelope(self.client.get(url), "list sessions")
            .await?;
        Ok(list.map(|l| l.sessions).unwrap_or_default())
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionDetail> {
        let url = self.session_endpoint(session_id, "")?;
        tracing::debug!("GET {}", url);
        let detail: Option<SessionDetail> = self
            .send_envelope(self.client.get(url), "get session")
            .await?;
        detail.ok_or_else(|| SheikhError::Parse("get session response carried no data".into()).into())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let url = self.session_endpoint(session_id, "")?;
        tracing::debug!("DELETE {}", url);
        self.send_envelope::<serde_json::Value>(self.client.delete(url), "delete session")
            .await?;
        Ok(())
    }

    async fn stop_session(&self, session_id: &str) -> Result<()> {
        let url = self.session_endpoint(session_id, "stop")?;
        tracing::debug!("POST {}", url);
        self.send_envelope::<serde_json::Value>(self.client.post(url), "stop session")
            .await?;
        Ok(())
    }

    async fn rename_session(&self, session_id: &str, title: &str) -> Result<()> {
        let url = self.session_endpoint(session_id, "")?;
        tracing::debug!("PATCH {}", url);
        let request = self.client.patch(url).json(&RenameRequest { title });
        self.send_envelope::<serde_json::Value>(request, "rename session")
            .await?;
        Ok(())
    }

    async fn chat(&self, session_id: &str, request: &ChatRequest) -> Result<ChatReply> {
        let url = self.session_endpoint(session_id, "chat")?;
        tracing::debug!("POST {} (non-streaming)", url);
        let reply: Option<ChatReply> = self
            .send_envelope(
                self.client
                    .post(url)
                    .header("Accept", "application/json")
                    .json(request),
                "chat",
            )
            .await?;
        reply.ok_or_else(|| SheikhError::Parse("chat response carried no data".into()).into())
    }

    async fn open_chat_stream(
        &self,
        session_id: &str,
        request: &ChatRequest,
    ) -> Result<FrameStream> {
        let url = self.session_endpoint(session_id, "chat")?;
        tracing::debug!("POST {} (streaming)", url);

        let response = self
            .stream_client
            .post(url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to open chat stream: {}", e);
                SheikhError::StreamTransport(format!("failed to open chat stream: {}", e))
            })?;

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.contains("text/event-stream") {
            // The backend answered with a plain envelope instead of a stream.
            let body = read_success_body(response, "chat").await?;
            let envelope: ApiEnvelope<ChatReply> = serde_json::from_str(&body)
                .map_err(|e| SheikhError::Parse(format!("Failed to parse chat response: {}", e)))?;
            let reply = envelope.into_data("chat")?;
            let frames = vec![Ok(StreamFrame::chunk(reply.response)), Ok(StreamFrame::Done)];
            return Ok(Box::pin(futures::stream::iter(frames)));
        }

        let status = response.status();
        if !status.is_success() {
            return Err(SheikhError::StreamTransport(format!(
                "chat stream returned HTTP {}",
                status
            ))
            .into());
        }

        let frames = sse_events(response.bytes_stream()).filter_map(|event| {
            futures::future::ready(match event {
                Ok(event) => StreamFrame::from_sse(&event).transpose(),
                Err(e) => Some(Err(e)),
            })
        });

        Ok(Box::pin(frames))
    }
}
