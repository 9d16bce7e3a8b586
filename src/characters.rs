//! Character retrieval.

use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

use crate::client::ClientInner;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Character {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub stats: Option<Value>,
}

impl Character {
    /// `venice_parameters` fragment that selects this character in a chat call.
    pub fn to_venice_parameters(&self) -> Value {
        serde_json::json!({ "character_slug": self.slug })
    }
}

#[derive(Deserialize)]
struct CharactersListResponse {
    data: Vec<Character>,
}

#[derive(Clone)]
pub struct CharactersClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl CharactersClient {
    pub async fn list(&self) -> Result<Vec<Character>> {
        let payload: CharactersListResponse = self
            .inner
            .request_json(Method::GET, "characters", None, None, None)
            .await?;
        Ok(payload.data)
    }

    pub async fn get(&self, slug: &str) -> Result<Character> {
        if slug.trim().is_empty() {
            return Err(Error::config("slug is required"));
        }
        let path = format!("characters/{slug}");
        let payload: Value = self
            .inner
            .request_json(Method::GET, &path, None, None, None)
            .await?;
        // Single-character responses arrive either bare or wrapped in `data`
        // (sometimes as a one-element list).
        let raw = match payload.get("data") {
            Some(Value::Array(items)) => items.first().cloned().unwrap_or(Value::Null),
            Some(data) => data.clone(),
            None => payload,
        };
        serde_json::from_value(raw.clone()).map_err(|err| {
            Error::decode(
                "character response had an unexpected shape",
                &raw.to_string(),
                Some(err),
            )
        })
    }
}
