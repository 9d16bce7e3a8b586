//! HTTP engine: pooled request execution, retry policy, and response dispatch.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::time::sleep;

use crate::audio::AudioClient;
use crate::billing::BillingClient;
use crate::characters::CharactersClient;
use crate::chat::ChatClient;
use crate::config::Config;
use crate::embeddings::EmbeddingsClient;
use crate::errors::{Error, ErrorContext, Result};
use crate::http::{classify_response, rate_limit_remaining, retry_after_seconds, RetryPolicy};
use crate::images::ImagesClient;
use crate::keys::ApiKeysClient;
use crate::metrics::{RateLimitEvent, RateLimitMetrics};
use crate::models::ModelsClient;
use crate::sse::EventStream;
use crate::video::VideoClient;

/// Venice API client.
///
/// Cheap to clone; every clone shares one connection pool and one rate-limit
/// recorder, and is safe to use from many tasks concurrently.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
    metrics: Arc<RateLimitMetrics>,
}

impl Client {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_maxsize)
            .user_agent(crate::USER_AGENT)
            .build()
            .map_err(|err| {
                Error::connection("failed to build http client", ErrorContext::new(), Some(err))
            })?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                api_key: config.api_key.clone(),
                http,
                timeout: config.timeout,
                retry: config.retry_policy(),
                metrics: Arc::new(RateLimitMetrics::new(config.metrics_retention)),
            }),
        })
    }

    /// Build a client from the layered configuration sources (environment,
    /// `./.env`, gated global dotenv).
    pub fn from_env() -> Result<Self> {
        Self::new(Config::builder().load()?)
    }

    /// Rate-limit recorder shared by every clone of this client.
    pub fn metrics(&self) -> &RateLimitMetrics {
        &self.inner.metrics
    }

    /// GET a JSON endpoint.
    pub async fn get(
        &self,
        path: &str,
        query: Option<&[(&str, &str)]>,
    ) -> Result<serde_json::Value> {
        self.inner
            .request_json(Method::GET, path, query, None, None)
            .await
    }

    /// POST a JSON endpoint.
    pub async fn post(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.inner
            .request_json(Method::POST, path, None, body, None)
            .await
    }

    /// POST an endpoint that answers with a binary body (audio, downloads).
    pub async fn post_raw(&self, path: &str, body: Option<&serde_json::Value>) -> Result<Bytes> {
        self.inner
            .request_bytes(Method::POST, path, body, None)
            .await
    }

    /// POST an endpoint that answers with `text/event-stream`.
    pub async fn stream(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<EventStream> {
        self.inner.request_stream(path, body, None).await
    }

    pub fn chat(&self) -> ChatClient {
        ChatClient {
            inner: self.inner.clone(),
        }
    }

    pub fn models(&self) -> ModelsClient {
        ModelsClient {
            inner: self.inner.clone(),
        }
    }

    pub fn embeddings(&self) -> EmbeddingsClient {
        EmbeddingsClient {
            inner: self.inner.clone(),
        }
    }

    pub fn images(&self) -> ImagesClient {
        ImagesClient {
            inner: self.inner.clone(),
        }
    }

    pub fn audio(&self) -> AudioClient {
        AudioClient {
            inner: self.inner.clone(),
        }
    }

    pub fn video(&self) -> VideoClient {
        VideoClient {
            inner: self.inner.clone(),
        }
    }

    pub fn characters(&self) -> CharactersClient {
        CharactersClient {
            inner: self.inner.clone(),
        }
    }

    pub fn api_keys(&self) -> ApiKeysClient {
        ApiKeysClient {
            inner: self.inner.clone(),
        }
    }

    pub fn billing(&self) -> BillingClient {
        BillingClient {
            inner: self.inner.clone(),
        }
    }
}

impl ClientInner {
    fn endpoint_url(&self, path: &str) -> Result<Url> {
        let full = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        };
        Url::parse(&full).map_err(|err| Error::config(format!("invalid request url {full:?}: {err}")))
    }

    /// Issue a request, consulting the retry policy on retryable statuses and
    /// transport errors. Exactly one rate-limit event is recorded per 429
    /// response, retried or not.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&serde_json::Value>,
        timeout: Option<Duration>,
        streaming: bool,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint_url(path)?;
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let mut builder = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(&self.api_key)
                .timeout(timeout.unwrap_or(self.timeout))
                .header(
                    ACCEPT,
                    if streaming {
                        "text/event-stream"
                    } else {
                        "application/json"
                    },
                );
            if let Some(query) = query {
                builder = builder.query(query);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(method = %method, path, attempt, max_attempts, "sending request");

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(method = %method, path, status = %status, "request completed");
                        return Ok(resp);
                    }

                    let retry_after = retry_after_seconds(resp.headers());
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        self.metrics.record(
                            RateLimitEvent::new(path, status.as_u16(), method.as_str())
                                .with_retry_after(retry_after)
                                .with_remaining_requests(rate_limit_remaining(resp.headers())),
                        );
                    }

                    if self.retry.should_retry_status(status) && attempt < max_attempts {
                        let hint = (status == StatusCode::TOO_MANY_REQUESTS)
                            .then(|| retry_after.map(Duration::from_secs))
                            .flatten();
                        sleep(self.retry.delay_for_attempt(attempt, hint)).await;
                        continue;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::warn!(method = %method, path, status = %status, attempt, "request failed");
                    let headers = resp.headers().clone();
                    let bytes = resp.bytes().await.unwrap_or_default();
                    return Err(classify_response(
                        status,
                        &headers,
                        &bytes,
                        method.as_str(),
                        path,
                    ));
                }
                Err(err) => {
                    if attempt < max_attempts {
                        sleep(self.retry.delay_for_attempt(attempt, None)).await;
                        continue;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::warn!(method = %method, path, attempt, error = %err, "transport error");
                    let mut context = ErrorContext::new()
                        .with("method", method.as_str())
                        .with("path", path)
                        .with("attempts", attempt.to_string());
                    if err.is_timeout() {
                        context.insert("reason", "deadline");
                    }
                    return Err(Error::connection(
                        format!("request failed: {err}"),
                        context,
                        Some(err),
                    ));
                }
            }
        }
    }

    pub(crate) async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let resp = self
            .execute(method.clone(), path, query, body, timeout, false)
            .await?;
        let bytes = self.read_body(resp, &method, path).await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            Error::decode(
                "response body was not valid JSON",
                &String::from_utf8_lossy(&bytes),
                Some(err),
            )
        })
    }

    pub(crate) async fn request_bytes(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        let resp = self
            .execute(method.clone(), path, None, body, timeout, false)
            .await?;
        self.read_body(resp, &method, path).await
    }

    pub(crate) async fn request_stream(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<EventStream> {
        let resp = self
            .execute(Method::POST, path, None, body, timeout, true)
            .await?;
        Ok(EventStream::new(resp))
    }

    /// Fetch an absolute URL (video artifacts) as a streaming response.
    /// Artifact hosts are external, so no bearer token is attached.
    pub(crate) async fn fetch_external(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let parsed = Url::parse(url)
            .map_err(|err| Error::config(format!("invalid download url {url:?}: {err}")))?;
        let resp = self
            .http
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| {
                let mut context = ErrorContext::new().with("url", url);
                if err.is_timeout() {
                    context.insert("reason", "deadline");
                }
                Error::connection(format!("download failed: {err}"), context, Some(err))
            })?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let bytes = resp.bytes().await.unwrap_or_default();
            return Err(classify_response(status, &headers, &bytes, "GET", url));
        }
        Ok(resp)
    }

    async fn read_body(
        &self,
        resp: reqwest::Response,
        method: &Method,
        path: &str,
    ) -> Result<Bytes> {
        resp.bytes().await.map_err(|err| {
            Error::connection(
                format!("failed to read response body: {err}"),
                ErrorContext::new()
                    .with("method", method.as_str())
                    .with("path", path),
                Some(err),
            )
        })
    }
}
