//! Embedding generation.

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ClientInner;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EmbeddingsInput {
    Single(String),
    Batch(Vec<String>),
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: EmbeddingsInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
}

impl EmbeddingsRequest {
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: EmbeddingsInput::Single(input.into()),
            encoding_format: None,
        }
    }

    pub fn batch(model: impl Into<String>, inputs: Vec<String>) -> Self {
        Self {
            model: model.into(),
            input: EmbeddingsInput::Batch(inputs),
            encoding_format: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Embedding {
    #[serde(default)]
    pub index: Option<usize>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsResponse {
    pub data: Vec<Embedding>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<Value>,
}

#[derive(Clone)]
pub struct EmbeddingsClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl EmbeddingsClient {
    pub async fn generate(&self, request: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        if request.model.trim().is_empty() {
            return Err(Error::config("model is required"));
        }
        if let EmbeddingsInput::Batch(inputs) = &request.input {
            if inputs.is_empty() {
                return Err(Error::config("input cannot be empty"));
            }
        }
        let body = serde_json::to_value(&request)
            .map_err(|err| Error::decode("failed to serialize embeddings request", "", Some(err)))?;
        self.inner
            .request_json(Method::POST, "embeddings/generate", None, Some(&body), None)
            .await
    }
}
