//! Asynchronous video generation: queue, poll, and download.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, Instant};

use crate::client::ClientInner;
use crate::errors::{ApiFailure, Error, ErrorContext, Result};

/// Default delay between `retrieve` polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default wait budget applied by [`VideoClient::complete`].
pub const DEFAULT_COMPLETE_TIMEOUT: Duration = Duration::from_secs(900);

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Consecutive retrieve failures tolerated before the poll loop surfaces them.
const POLL_FAILURE_BUDGET: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    Other(String),
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Other(s) => s,
        }
    }

    /// Terminal states are one-way; a terminal job is never revived.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => JobState::Queued,
            "processing" => JobState::Processing,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            _ => JobState::Other(s),
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoMetadata {
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Server-side record of one generation job.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoJob {
    pub job_id: String,
    #[serde(rename = "status")]
    pub state: JobState,
    /// Percent complete in `[0, 100]`, when the service reports it.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub estimated_time_remaining: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: Option<VideoMetadata>,
}

impl VideoJob {
    pub fn is_completed(&self) -> bool {
        self.state == JobState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.state == JobState::Failed
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoQuote {
    pub estimated_cost: f64,
    pub currency: String,
    #[serde(default)]
    pub estimated_duration: Option<u64>,
    #[serde(default)]
    pub pricing_breakdown: Option<Value>,
}

/// Request body shared by `video/queue`, `video/quote`, and `video/complete`.
///
/// Either `prompt` (text-to-video) or `image` (image-to-video, URL or data
/// URI) is required.
#[derive(Debug, Clone, Serialize)]
pub struct VideoGenerationRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Duration in the service's `"5s"` form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
}

impl VideoGenerationRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: None,
            image: None,
            duration: None,
            resolution: None,
            audio: false,
            seed: None,
            negative_prompt: None,
            aspect_ratio: None,
            fps: None,
        }
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn duration_secs(mut self, secs: u32) -> Self {
        self.duration = Some(format!("{secs}s"));
        self
    }

    pub fn resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn audio(mut self, audio: bool) -> Self {
        self.audio = audio;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::config("model is required"));
        }
        if self.prompt.is_none() && self.image.is_none() {
            return Err(Error::config(
                "either prompt (text-to-video) or image (image-to-video) is required",
            ));
        }
        Ok(())
    }
}

/// Tuning for [`VideoClient::wait`].
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub max_wait: Option<Duration>,
    on_update: Option<Box<dyn FnMut(&VideoJob) + Send>>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
            on_update: None,
        }
    }
}

impl WaitOptions {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Invoked on every observed state transition or progress change.
    pub fn on_update(mut self, callback: impl FnMut(&VideoJob) + Send + 'static) -> Self {
        self.on_update = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for WaitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitOptions")
            .field("poll_interval", &self.poll_interval)
            .field("max_wait", &self.max_wait)
            .field("on_update", &self.on_update.as_ref().map(|_| "callback"))
            .finish()
    }
}

#[derive(Clone)]
pub struct VideoClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl VideoClient {
    /// Queue a generation job; returns immediately with the job id.
    pub async fn queue(&self, request: VideoGenerationRequest) -> Result<VideoJob> {
        request.validate()?;
        let body = serde_json::to_value(&request)
            .map_err(|err| Error::decode("failed to serialize video request", "", Some(err)))?;
        let job: VideoJob = self
            .inner
            .request_json(Method::POST, "video/queue", None, Some(&body), None)
            .await?;
        if job.job_id.is_empty() {
            return Err(Error::decode(
                "queue response did not include a job_id",
                "",
                None,
            ));
        }
        Ok(job)
    }

    /// Fetch the current state of a job.
    pub async fn retrieve(&self, job_id: &str) -> Result<VideoJob> {
        if job_id.trim().is_empty() {
            return Err(Error::config("job_id is required"));
        }
        let body = serde_json::json!({ "job_id": job_id });
        self.inner
            .request_json(Method::POST, "video/retrieve", None, Some(&body), None)
            .await
    }

    /// Price a generation without queueing it.
    pub async fn quote(&self, request: VideoGenerationRequest) -> Result<VideoQuote> {
        request.validate()?;
        let body = serde_json::to_value(&request)
            .map_err(|err| Error::decode("failed to serialize video request", "", Some(err)))?;
        self.inner
            .request_json(Method::POST, "video/quote", None, Some(&body), None)
            .await
    }

    /// Poll until the job reaches a terminal state or the wait budget runs out.
    ///
    /// `Connection` and `Server` retrieve failures are tolerated up to three
    /// consecutive polls; a 429 stretches the next delay to its `Retry-After`.
    pub async fn wait(&self, job_id: &str, mut options: WaitOptions) -> Result<VideoJob> {
        let started = Instant::now();
        let mut last_seen: Option<(JobState, Option<f64>)> = None;
        let mut consecutive_failures = 0u32;

        loop {
            let mut delay = options.poll_interval;
            match self.retrieve(job_id).await {
                Ok(job) => {
                    consecutive_failures = 0;
                    let observed = (job.state.clone(), job.progress);
                    if last_seen.as_ref() != Some(&observed) {
                        if let Some(on_update) = options.on_update.as_mut() {
                            on_update(&job);
                        }
                        last_seen = Some(observed);
                    }
                    if job.is_terminal() {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(job_id, state = job.state.as_str(), "job reached terminal state");
                        return Ok(job);
                    }
                }
                Err(err @ (Error::Connection { .. } | Error::Server(_))) => {
                    consecutive_failures += 1;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(job_id, consecutive_failures, error = %err, "retrieve failed");
                    if consecutive_failures >= POLL_FAILURE_BUDGET {
                        return Err(err);
                    }
                }
                Err(err @ Error::RateLimited(_)) => {
                    if let Some(hint) = err.retry_after().map(Duration::from_secs) {
                        delay = delay.max(hint);
                    }
                }
                Err(err) => return Err(err),
            }

            if let Some(max_wait) = options.max_wait {
                if started.elapsed() >= max_wait {
                    let mut context = ErrorContext::new()
                        .with("job_id", job_id)
                        .with("waited_secs", started.elapsed().as_secs().to_string());
                    if let Some((state, _)) = &last_seen {
                        context.insert("state", state.as_str());
                    }
                    return Err(Error::timeout(
                        "timed out waiting for video generation",
                        context,
                    ));
                }
            }
            sleep(delay).await;
        }
    }

    /// Queue a job and wait for it, with a 900 second default budget.
    pub async fn complete(&self, request: VideoGenerationRequest) -> Result<VideoJob> {
        let job = self.queue(request).await?;
        self.wait(
            &job.job_id,
            WaitOptions::default().max_wait(DEFAULT_COMPLETE_TIMEOUT),
        )
        .await
    }

    /// Stream a completed job's artifact into `path`. Returns the byte count.
    pub async fn download(&self, job: &VideoJob, path: impl AsRef<Path>) -> Result<u64> {
        if !job.is_completed() {
            return Err(Error::InvalidRequest(ApiFailure::new(format!(
                "cannot download video: job status is {:?} (expected completed)",
                job.state.as_str()
            ))));
        }
        let url = job.video_url.as_deref().ok_or_else(|| {
            Error::InvalidRequest(ApiFailure::new("no video URL available for download"))
        })?;

        let resp = self.inner.fetch_external(url, DOWNLOAD_TIMEOUT).await?;
        let path = path.as_ref();
        let mut file = tokio::fs::File::create(path).await.map_err(|err| {
            Error::connection(
                format!("failed to create {}: {err}", path.display()),
                ErrorContext::new().with("path", path.display().to_string()),
                None,
            )
        })?;

        let mut body = Box::pin(resp.bytes_stream());
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| {
                Error::connection(
                    format!("download interrupted: {err}"),
                    ErrorContext::new().with("url", url),
                    Some(err),
                )
            })?;
            file.write_all(&chunk).await.map_err(|err| {
                Error::connection(
                    format!("failed to write {}: {err}", path.display()),
                    ErrorContext::new().with("path", path.display().to_string()),
                    None,
                )
            })?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|err| {
            Error::connection(
                format!("failed to flush {}: {err}", path.display()),
                ErrorContext::new().with("path", path.display().to_string()),
                None,
            )
        })?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_round_trips_through_strings() {
        assert_eq!(JobState::from("queued".to_string()), JobState::Queued);
        assert_eq!(JobState::from("completed".to_string()), JobState::Completed);
        assert_eq!(
            JobState::from("paused".to_string()),
            JobState::Other("paused".to_string())
        );
        assert_eq!(String::from(JobState::Failed), "failed");
    }

    #[test]
    fn terminal_states_are_completed_and_failed() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(!JobState::Other("paused".to_string()).is_terminal());
    }

    #[test]
    fn request_requires_prompt_or_image() {
        let bare = VideoGenerationRequest::new("kling-2.6-pro");
        assert!(matches!(bare.validate(), Err(Error::Config(_))));
        assert!(bare.clone().prompt("a sunrise").validate().is_ok());
        assert!(bare.image("data:image/png;base64,AAAA").validate().is_ok());
    }

    #[test]
    fn job_deserializes_with_sparse_fields() {
        let job: VideoJob =
            serde_json::from_str(r#"{"job_id":"j1","status":"queued"}"#).unwrap();
        assert_eq!(job.job_id, "j1");
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.progress, None);
        assert!(!job.is_terminal());
    }

    #[test]
    fn duration_builder_uses_the_service_form() {
        let request = VideoGenerationRequest::new("m").prompt("p").duration_secs(5);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["duration"], "5s");
    }
}
