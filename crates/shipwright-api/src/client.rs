//! HTTP client for the workflow backend

use async_trait::async_trait;
use reqwest::Url;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{Error, Result},
    types::{SendRequest, SendResponse, WorkflowStatus},
};

/// Environment variable that overrides the backend base URL
pub const BASE_URL_ENV: &str = "SHIPWRIGHT_BASE_URL";

/// Location of the backend endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Scheme and host, e.g. `http://localhost:8000`
    pub base_url: String,
    /// Starts a workflow from a chat message
    pub send_path: String,
    /// Prefix of the per-workflow status endpoint
    pub status_path: String,
    /// Repository directory listing
    pub repositories_path: String,
    /// Prefix of the per-workflow approval endpoint
    pub approvals_path: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            send_path: "/api/chat/send".to_string(),
            status_path: "/api/workflow/status".to_string(),
            repositories_path: "/api/repositories".to_string(),
            approvals_path: "/api/approvals".to_string(),
        }
    }
}

impl Endpoints {
    /// Default endpoints rooted at `base_url`
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    fn base(&self) -> Result<Url> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(Error::InvalidConfig("base URL is empty".to_string()));
        }
        let url = Url::parse(base)
            .map_err(|e| Error::InvalidConfig(format!("invalid base URL '{}': {}", base, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }
        Ok(url)
    }

    /// Join an endpoint path onto the base URL
    pub fn url(&self, path: &str) -> Result<Url> {
        self.url_with_segment(path, None)
    }

    /// Join an endpoint path plus one percent-encoded trailing segment
    pub fn url_with_segment(&self, path: &str, segment: Option<&str>) -> Result<Url> {
        let mut url = self.base()?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::InvalidConfig("base URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            if let Some(segment) = segment {
                segments.push(segment);
            }
        }
        Ok(url)
    }
}

/// The two calls the reconciler needs from the workflow backend
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    /// Submit a chat message, possibly starting a workflow
    async fn start_workflow(&self, request: &SendRequest) -> Result<SendResponse>;

    /// Fetch the current status and message log of a workflow
    async fn workflow_status(&self, workflow_id: &str) -> Result<WorkflowStatus>;
}

/// reqwest-backed client for the workflow, repository and approval endpoints
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpClient {
    /// Create a client for the given endpoints
    pub fn new(endpoints: Endpoints) -> Result<Self> {
        // Fail fast on a bad base URL instead of on the first request.
        endpoints.base()?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoints,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }

    pub(crate) async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        tracing::debug!("POST {}", url);
        let response = self.client.post(url).json(body).send().await?;
        Self::decode(response).await
    }

    /// POST and check the status, ignoring any response body
    pub(crate) async fn post<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<()> {
        tracing::debug!("POST {}", url);
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            return Err(Error::status(status.as_u16(), text));
        }
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::status(status.as_u16(), text));
        }
        // Some endpoints answer an empty 2xx body; treat it as `null`.
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }
}

#[async_trait]
impl WorkflowApi for HttpClient {
    async fn start_workflow(&self, request: &SendRequest) -> Result<SendResponse> {
        let url = self.endpoints.url(&self.endpoints.send_path)?;
        let response: Option<SendResponse> = self.post_json(url, request).await?;
        Ok(response.unwrap_or_default())
    }

    async fn workflow_status(&self, workflow_id: &str) -> Result<WorkflowStatus> {
        let url = self
            .endpoints
            .url_with_segment(&self.endpoints.status_path, Some(workflow_id))?;
        self.get_json(url).await
    }
}
