//! Model discovery.

use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

use crate::client::ClientInner;
use crate::errors::Result;

/// Catalog entry returned by `GET models`.
#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub model_spec: Option<Value>,
}

#[derive(Deserialize)]
struct ModelsListResponse {
    data: Vec<Model>,
}

#[derive(Clone)]
pub struct ModelsClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ModelsClient {
    /// List available models, optionally filtered by type (`text`, `image`, ...).
    pub async fn list(&self, kind: Option<&str>) -> Result<Vec<Model>> {
        let query: Vec<(&str, &str)> = kind.map(|k| ("type", k)).into_iter().collect();
        let query = (!query.is_empty()).then_some(query.as_slice());
        let payload: ModelsListResponse = self
            .inner
            .request_json(Method::GET, "models", query, None, None)
            .await?;
        Ok(payload.data)
    }

    /// Trait name to model id mapping (`GET models/traits`).
    pub async fn traits(&self) -> Result<Value> {
        self.inner
            .request_json(Method::GET, "models/traits", None, None, None)
            .await
    }

    /// External model name to Venice model id mapping.
    pub async fn compatibility_mapping(&self) -> Result<Value> {
        self.inner
            .request_json(Method::GET, "models/compatibility_mapping", None, None, None)
            .await
    }
}
