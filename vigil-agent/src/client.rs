//! HTTP client for the Vigil kernel
//!
//! Wraps the three kernel endpoints (ingest, tail, hosts) plus the latency
//! probe. Identity headers are attached to every call; the kernel resolves the
//! owner from them.

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::AgentConfig;
use crate::metrics::Sample;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("kernel rejected caller identity")]
    Unauthenticated,
    #[error("kernel rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Submission seam used by the uploader
pub trait Submitter: Send + Sync + 'static {
    /// Send one batch for `host`, returning the number of samples stored
    fn submit(&self, host: String, samples: Vec<Sample>) -> BoxFuture<'static, Result<usize, ClientError>>;

    /// Measure one request/response round trip
    fn ping(&self) -> BoxFuture<'static, Result<Duration, ClientError>>;
}

#[derive(Debug, Serialize)]
struct IngestBody<'a> {
    host: &'a str,
    samples: &'a [Sample],
}

#[derive(Debug, Deserialize)]
struct IngestAck {
    inserted: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct KernelClient {
    http: reqwest::Client,
    base_url: String,
    ping_url: String,
    user_id: Option<String>,
    session_id: Option<String>,
    api_key: Option<String>,
}

impl KernelClient {
    pub fn from_config(config: &AgentConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.kernel.request_timeout_secs))
            .build()?;
        let base_url = config.kernel.url.trim_end_matches('/').to_string();
        let ping_url = config
            .kernel
            .ping_url
            .clone()
            .unwrap_or_else(|| format!("{base_url}/health"));

        Ok(Self {
            http,
            base_url,
            ping_url,
            user_id: config.identity.user_id.clone(),
            session_id: config.identity.session_id.clone(),
            api_key: config.identity.api_key.clone(),
        })
    }

    fn with_identity(&self, req: RequestBuilder) -> RequestBuilder {
        let mut req = req;
        if let Some(user) = &self.user_id {
            req = req.header("x-user-id", user);
        }
        if let Some(session) = &self.session_id {
            req = req.header("x-session-id", session);
        }
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        req
    }

    pub async fn ingest(&self, host: &str, samples: &[Sample]) -> Result<usize, ClientError> {
        let req = self
            .http
            .post(format!("{}/metrics/ingest", self.base_url))
            .json(&IngestBody { host, samples });
        let resp = check(self.with_identity(req).send().await?).await?;
        Ok(resp.json::<IngestAck>().await?.inserted)
    }

    /// Samples for `host` with `ts >= since_ms`, ascending, at most `limit`
    pub async fn tail(&self, host: &str, since_ms: i64, limit: usize) -> Result<Vec<Sample>, ClientError> {
        let req = self.http.get(format!("{}/metrics/tail", self.base_url)).query(&[
            ("host", host.to_string()),
            ("sinceMs", since_ms.to_string()),
            ("limit", limit.to_string()),
        ]);
        let resp = check(self.with_identity(req).send().await?).await?;
        Ok(resp.json().await?)
    }

    pub async fn hosts(&self) -> Result<Vec<String>, ClientError> {
        let req = self.http.get(format!("{}/metrics/hosts", self.base_url));
        let resp = check(self.with_identity(req).send().await?).await?;
        Ok(resp.json().await?)
    }

    /// HEAD round trip; any HTTP response counts, only transport failures error
    pub async fn measure_ping(&self) -> Result<Duration, ClientError> {
        let started = Instant::now();
        self.http.head(&self.ping_url).send().await?;
        Ok(started.elapsed())
    }
}

async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthenticated);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    Err(ClientError::Rejected { status: status.as_u16(), message })
}

impl Submitter for KernelClient {
    fn submit(&self, host: String, samples: Vec<Sample>) -> BoxFuture<'static, Result<usize, ClientError>> {
        let client = self.clone();
        async move { client.ingest(&host, &samples).await }.boxed()
    }

    fn ping(&self) -> BoxFuture<'static, Result<Duration, ClientError>> {
        let client = self.clone();
        async move { client.measure_ping().await }.boxed()
    }
}
