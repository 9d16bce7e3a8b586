//! Chat completions, blocking and streaming.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ClientInner;
use crate::errors::{Error, Result};
use crate::sse::{EventStream, RawEventStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Request body for `POST chat/completions`.
///
/// Tool definitions and `venice_parameters` are forwarded verbatim; the
/// service validates their shape.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venice_parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stop: None,
            tools: None,
            tool_choice: None,
            venice_parameters: None,
            stream: None,
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn tools(mut self, tools: Value) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn venice_parameters(mut self, params: Value) -> Self {
        self.venice_parameters = Some(params);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::config("model is required"));
        }
        if self.messages.is_empty() {
            return Err(Error::config("messages cannot be empty"));
        }
        Ok(())
    }

    fn body(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|err| Error::decode("failed to serialize chat request", "", Some(err)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: AssistantMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

impl ChatCompletion {
    /// Assistant text of the first choice.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.message.content.as_deref())
    }
}

/// Content delta carried by a parsed streaming chunk, if any.
pub fn delta_content(chunk: &Value) -> Option<&str> {
    chunk
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}

#[derive(Clone)]
pub struct ChatClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ChatClient {
    pub async fn complete(&self, request: ChatCompletionRequest) -> Result<ChatCompletion> {
        request.validate()?;
        let body = request.body()?;
        self.inner
            .request_json(Method::POST, "chat/completions", None, Some(&body), None)
            .await
    }

    /// Stream a completion as parsed SSE chunks.
    pub async fn stream(&self, mut request: ChatCompletionRequest) -> Result<ChatStream> {
        request.validate()?;
        request.stream = Some(true);
        let body = request.body()?;
        let events = self
            .inner
            .request_stream("chat/completions", Some(&body), None)
            .await?;
        Ok(ChatStream { inner: events })
    }
}

/// Streaming chat handle yielding one parsed chunk per SSE event.
pub struct ChatStream {
    inner: EventStream,
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream").finish_non_exhaustive()
    }
}

impl ChatStream {
    /// Adapter yielding the raw `data:` payload strings instead.
    pub fn into_raw(self) -> RawEventStream {
        self.inner.into_raw()
    }

    /// Drain the stream, concatenating `choices[0].delta.content` of every
    /// chunk.
    pub async fn collect_content(mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            if let Some(delta) = delta_content(&chunk) {
                out.push_str(delta);
            }
        }
        Ok(out)
    }
}

impl Stream for ChatStream {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
