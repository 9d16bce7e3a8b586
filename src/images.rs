//! Image generation, editing, and upscaling.
//!
//! Responses carry either a URL or a base64 payload depending on the
//! requested `response_format`; both are forwarded undecoded.

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ClientInner;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_preset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

impl ImageGenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            negative_prompt: None,
            width: None,
            height: None,
            steps: None,
            seed: None,
            style_preset: None,
            response_format: None,
        }
    }
}

/// Edit request; `image` is a URL or base64 data URI.
#[derive(Debug, Clone, Serialize)]
pub struct ImageEditRequest {
    pub prompt: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUpscaleRequest {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
}

#[derive(Deserialize)]
struct StylesResponse {
    data: Vec<String>,
}

#[derive(Clone)]
pub struct ImagesClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ImagesClient {
    pub async fn generate(&self, request: ImageGenerationRequest) -> Result<Value> {
        if request.prompt.trim().is_empty() {
            return Err(Error::config("prompt is required"));
        }
        self.post_value("image/generate", &request).await
    }

    pub async fn edit(&self, request: ImageEditRequest) -> Result<Value> {
        if request.image.trim().is_empty() {
            return Err(Error::config("image is required"));
        }
        self.post_value("image/edit", &request).await
    }

    pub async fn upscale(&self, request: ImageUpscaleRequest) -> Result<Value> {
        if request.image.trim().is_empty() {
            return Err(Error::config("image is required"));
        }
        self.post_value("image/upscale", &request).await
    }

    /// Available style presets (`GET image/styles`).
    pub async fn styles(&self) -> Result<Vec<String>> {
        let payload: StylesResponse = self
            .inner
            .request_json(Method::GET, "image/styles", None, None, None)
            .await?;
        Ok(payload.data)
    }

    async fn post_value<T: Serialize>(&self, path: &str, request: &T) -> Result<Value> {
        let body = serde_json::to_value(request)
            .map_err(|err| Error::decode("failed to serialize image request", "", Some(err)))?;
        self.inner
            .request_json(Method::POST, path, None, Some(&body), None)
            .await
    }
}
