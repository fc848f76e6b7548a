//! The Transport Port and its HTTP implementation.
//!
//! The lifecycle engine only ever sees [`Transport`]. [`HttpTransport`] speaks
//! the AI-Horde video API; tests and embedders can plug in anything else.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::descriptor::JobDescriptor;
use crate::errors::{HordeVideoError, Result};
use crate::lifecycle::JobId;
use crate::models::{ErrorBody, ModelsResponse, StatusResponse, StatusSnapshot, SubmitBody, SubmitResponse};

pub const DEFAULT_BASE_URL: &str = "https://aihorde.net/api";
/// Key the network accepts for anonymous, lowest-priority requests.
pub const ANONYMOUS_API_KEY: &str = "0000000000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const SUBMIT_PATH: &str = "/v2/generate/video/async";
const STATUS_PATH: &str = "/v2/generate/video/status";
const MODELS_PATH: &str = "/v2/status/video/models";

/// One request/response exchange with the remote network per call.
///
/// Implementations must not retry; retry policy belongs to the scheduler.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand a descriptor to the network and return the identifier it assigned.
    async fn submit(&self, descriptor: &JobDescriptor) -> Result<JobId>;

    /// Fetch the current status of a job.
    async fn status(&self, id: &JobId) -> Result<StatusSnapshot>;

    /// Ask the network to release a job. Best effort.
    async fn cancel(&self, id: &JobId) -> Result<()>;

    /// Models currently served by at least one worker.
    async fn models(&self) -> Result<Vec<String>>;
}

/// [`Transport`] over the AI-Horde REST API.
pub struct HttpTransport {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(HordeVideoError::Http)?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("apikey"),
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| HordeVideoError::invalid("API key contains invalid header characters"))?,
        );
        headers.insert(
            HeaderName::from_static("client-agent"),
            HeaderValue::from_static(concat!("horde-video:", env!("CARGO_PKG_VERSION"))),
        );
        Ok(headers)
    }

    /// Execute one HTTP exchange and map the outcome onto the error taxonomy.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "Sending request");

        let mut req = self.http.request(method, &url).headers(self.headers()?);
        if let Some(ref b) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(b);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_connect() {
                HordeVideoError::Unreachable { message: e.to_string() }
            } else {
                HordeVideoError::Transport { message: e.to_string() }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| HordeVideoError::Transport {
                message: format!("malformed response body: {e}"),
            });
        }

        let status_code = status.as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok());
        let response_text = response.text().await.unwrap_or_default();
        let parsed_body: Option<serde_json::Value> = serde_json::from_str(&response_text).ok();

        let message = parsed_body
            .as_ref()
            .and_then(|b| serde_json::from_value::<ErrorBody>(b.clone()).ok())
            .and_then(|b| b.message)
            .unwrap_or(response_text);

        Err(match status_code {
            400 | 422 => HordeVideoError::InvalidRequest { message },
            401 | 403 => HordeVideoError::Authentication { message },
            404 => HordeVideoError::NotFound { message },
            429 => HordeVideoError::RateLimit { message, retry_after },
            _ => HordeVideoError::Api {
                status_code,
                message,
                body: parsed_body,
            },
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, descriptor: &JobDescriptor) -> Result<JobId> {
        let body = serde_json::to_value(SubmitBody::from(descriptor))
            .map_err(|e| HordeVideoError::invalid(format!("unserializable descriptor: {e}")))?;
        let resp: SubmitResponse = self.request(Method::POST, SUBMIT_PATH, Some(body)).await?;

        for warning in resp.warnings.iter().flatten() {
            tracing::warn!(job_id = %resp.id, warning = %warning, "Network accepted job with warning");
        }
        tracing::debug!(
            job_id = %resp.id,
            kudos = resp.kudos,
            message = resp.message.as_deref().unwrap_or(""),
            "Submission accepted",
        );

        Ok(JobId::new(resp.id))
    }

    async fn status(&self, id: &JobId) -> Result<StatusSnapshot> {
        let resp: StatusResponse = self
            .request(Method::GET, &format!("{STATUS_PATH}/{id}"), None)
            .await?;
        if !resp.is_possible {
            tracing::warn!(job_id = %id, "No active worker can currently serve this job");
        }
        Ok(resp.into())
    }

    async fn cancel(&self, id: &JobId) -> Result<()> {
        let _: serde_json::Value = self
            .request(Method::DELETE, &format!("{STATUS_PATH}/{id}"), None)
            .await?;
        Ok(())
    }

    async fn models(&self) -> Result<Vec<String>> {
        let resp: ModelsResponse = self.request(Method::GET, MODELS_PATH, None).await?;
        Ok(resp.models)
    }
}
