//! Text-to-speech. Responses are raw audio bytes, never JSON.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;

use crate::client::ClientInner;
use crate::errors::{Error, ErrorContext, Result};

#[derive(Debug, Clone, Serialize)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl SpeechRequest {
    pub fn new(
        model: impl Into<String>,
        input: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            voice: voice.into(),
            response_format: None,
            speed: None,
        }
    }
}

#[derive(Clone)]
pub struct AudioClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl AudioClient {
    /// Synthesize speech and return the audio bytes.
    pub async fn speech(&self, request: SpeechRequest) -> Result<Bytes> {
        if request.input.trim().is_empty() {
            return Err(Error::config("input is required"));
        }
        let body = serde_json::to_value(&request)
            .map_err(|err| Error::decode("failed to serialize speech request", "", Some(err)))?;
        self.inner
            .request_bytes(Method::POST, "audio/speech", Some(&body), None)
            .await
    }

    /// Synthesize speech and write it to `path`. Returns the byte count.
    pub async fn speech_to_file(
        &self,
        request: SpeechRequest,
        path: impl AsRef<Path>,
    ) -> Result<u64> {
        let audio = self.speech(request).await?;
        let path = path.as_ref();
        tokio::fs::write(path, &audio).await.map_err(|err| {
            Error::connection(
                format!("failed to write {}: {err}", path.display()),
                ErrorContext::new().with("path", path.display().to_string()),
                None,
            )
        })?;
        Ok(audio.len() as u64)
    }
}
