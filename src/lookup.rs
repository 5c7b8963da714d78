//! Session metadata from the surrounding application's REST API, fetched once
//! at session start for display.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub helper: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<String>,
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("invalid lookup url: {0}")]
    InvalidUrl(String),
    #[error("session lookup request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("session lookup returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait SessionLookup: Send + Sync {
    async fn fetch(&self, session_id: &str) -> Result<SessionInfo, LookupError>;
}

pub struct HttpSessionLookup {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpSessionLookup {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self, LookupError> {
        let base_url = base_url.into();
        let base_url = Url::parse(&base_url).map_err(|e| LookupError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(LookupError::InvalidUrl(format!("{base_url} cannot carry a path")));
        }
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// `{base}/sessions/{id}` with the id percent-encoded as one segment.
    fn session_url(&self, session_id: &str) -> Result<Url, LookupError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LookupError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("sessions")
            .push(session_id);
        Ok(url)
    }
}

#[async_trait]
impl SessionLookup for HttpSessionLookup {
    async fn fetch(&self, session_id: &str) -> Result<SessionInfo, LookupError> {
        let url = self.session_url(session_id)?;
        debug!("fetching session metadata from {url}");
        let mut request = self.client.get(url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status().as_u16()));
        }
        Ok(response.json::<SessionInfo>().await?)
    }
}
