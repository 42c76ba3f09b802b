//! HTTP client for the PicSort API
//!
//! Implements the two network collaborators of the event cache: the cheap
//! `eventmeta` version check and the full `eventdata` fetch.

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use piccache::{EventId, EventSource, RawEventPayload, SourceError, VersionOracle, VersionToken};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::session::Session;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_META_PATH: &str = "/api/event/eventmeta";
const EVENT_DATA_PATH: &str = "/api/event/eventdata";

#[derive(Serialize)]
struct EventRequest {
    event_id: EventId,
}

#[derive(Debug, Deserialize)]
struct EventMeta {
    updated_at: String,
}

/// Failure talking to the API
#[derive(Debug)]
pub enum ApiError {
    /// Request never got a response
    Network(reqwest::Error),

    /// Server answered with a non-success status
    Status {
        /// HTTP status
        status: StatusCode,
        /// Message extracted from the response body
        message: String,
    },

    /// Response body did not have the expected shape
    Decode(reqwest::Error),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Network(e) => write!(f, "Network error: {}", e),
            ApiError::Status { message, .. } => f.write_str(message),
            ApiError::Decode(e) => write!(f, "Unexpected response: {}", e),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Network(e) | ApiError::Decode(e) => Some(e),
            ApiError::Status { .. } => None,
        }
    }
}

/// Pick a display message for an error response: the body's `error` field,
/// then its `message` field, then the status text.
pub fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for field in ["error", "message"] {
            if let Some(Value::String(text)) = map.get(field) {
                if !text.is_empty() {
                    return text.clone();
                }
            }
        }
    }

    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

/// API client shared by the version check and the full fetch
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Session,
}

impl ApiClient {
    /// Create a client for the API at `base_url`
    pub fn new(base_url: &str, session: Session) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_event<T: DeserializeOwned>(
        &self,
        path: &str,
        event_id: EventId,
    ) -> Result<T, ApiError> {
        let mut request = self
            .http
            .post(self.endpoint(path))
            .json(&EventRequest { event_id });
        if let Some(bearer) = self.session.bearer() {
            request = request.header(AUTHORIZATION, bearer);
        }

        let response = request.send().await.map_err(ApiError::Network)?;
        let status = response.status();

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                warn!("Unauthorized - token may be expired or invalid");
            }
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status,
                message: error_message(status, &body),
            });
        }

        response.json::<T>().await.map_err(ApiError::Decode)
    }
}

#[async_trait]
impl VersionOracle for ApiClient {
    async fn fetch_event_version(&self, event_id: EventId) -> Result<VersionToken, SourceError> {
        let meta: EventMeta = self.post_event(EVENT_META_PATH, event_id).await?;
        Ok(VersionToken::new(meta.updated_at))
    }
}

#[async_trait]
impl EventSource for ApiClient {
    async fn fetch_event_payload(
        &self,
        event_id: EventId,
    ) -> Result<RawEventPayload, SourceError> {
        let payload = self.post_event(EVENT_DATA_PATH, event_id).await?;
        Ok(payload)
    }
}
