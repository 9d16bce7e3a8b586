//! API key administration and rate-limit introspection.

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ClientInner;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "apiKeyType")]
    pub api_key_type: Option<String>,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default, rename = "lastUsedAt")]
    pub last_used_at: Option<String>,
    /// Full key material; present only in creation responses.
    #[serde(default, rename = "apiKey")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyCreateRequest {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "apiKeyType")]
    pub api_key_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "expiresAt")]
    pub expires_at: Option<String>,
}

impl ApiKeyCreateRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            api_key_type: None,
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Web3KeyRequest {
    pub address: String,
    pub signature: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Clone)]
pub struct ApiKeysClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ApiKeysClient {
    pub async fn list(&self) -> Result<Vec<ApiKey>> {
        let payload: DataEnvelope<Vec<ApiKey>> = self
            .inner
            .request_json(Method::GET, "api_keys", None, None, None)
            .await?;
        Ok(payload.data)
    }

    pub async fn create(&self, request: ApiKeyCreateRequest) -> Result<ApiKey> {
        if request.description.trim().is_empty() {
            return Err(Error::config("description is required"));
        }
        let body = serde_json::to_value(&request)
            .map_err(|err| Error::decode("failed to serialize key request", "", Some(err)))?;
        let payload: DataEnvelope<ApiKey> = self
            .inner
            .request_json(Method::POST, "api_keys", None, Some(&body), None)
            .await?;
        Ok(payload.data)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::config("id is required"));
        }
        let path = format!("api_keys/{id}");
        // Deletion responses may have an empty body, so skip JSON decoding.
        self.inner
            .request_bytes(Method::DELETE, &path, None, None)
            .await
            .map(|_| ())
    }

    /// Exchange a wallet signature for an API key.
    pub async fn generate_web3_key(&self, request: Web3KeyRequest) -> Result<ApiKey> {
        let body = serde_json::to_value(&request)
            .map_err(|err| Error::decode("failed to serialize web3 key request", "", Some(err)))?;
        let payload: DataEnvelope<ApiKey> = self
            .inner
            .request_json(
                Method::POST,
                "api_keys/generate_web3_key",
                None,
                Some(&body),
                None,
            )
            .await?;
        Ok(payload.data)
    }

    /// Current rate limits for the authenticated key.
    pub async fn rate_limits(&self) -> Result<Value> {
        self.inner
            .request_json(Method::GET, "api_keys/rate_limits", None, None, None)
            .await
    }

    /// Recent rate-limit violations logged by the service.
    pub async fn rate_limits_log(&self) -> Result<Value> {
        self.inner
            .request_json(Method::GET, "api_keys/rate_limits/log", None, None, None)
            .await
    }
}
