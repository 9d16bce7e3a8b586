//! Rust SDK for the Venice AI API.
//!
//! Thin typed wrappers over the Venice HTTP surface — chat completions
//! (including SSE streaming), embeddings, image generation, text-to-speech,
//! async video generation, characters, model discovery, API key
//! administration, and billing — riding on a shared transport core with
//! connection pooling, typed errors, bounded retries, and rate-limit metrics.
//!
//! ```rust,ignore
//! use venice::{ChatCompletionRequest, ChatMessage, Client};
//!
//! let client = Client::from_env()?;
//! let reply = client
//!     .chat()
//!     .complete(ChatCompletionRequest::new(
//!         "llama-3.3-70b",
//!         vec![ChatMessage::user("Why is the sky blue?")],
//!     ))
//!     .await?;
//! println!("{}", reply.content().unwrap_or_default());
//! ```

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.venice.ai/api/v1";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Default retention bound for the rate-limit recorder, in events.
pub const DEFAULT_METRICS_RETENTION: usize = 10_000;

/// User-Agent header value sent with every request.
pub(crate) const USER_AGENT: &str = concat!("venice-rust/", env!("CARGO_PKG_VERSION"));

mod audio;
mod billing;
mod characters;
mod chat;
mod client;
mod config;
mod embeddings;
mod errors;
mod http;
mod images;
mod keys;
mod metrics;
mod models;
mod sse;
mod video;

pub use audio::{AudioClient, SpeechRequest};
pub use billing::{BillingClient, UsageQuery};
pub use characters::{Character, CharactersClient};
pub use chat::{
    delta_content, AssistantMessage, ChatChoice, ChatClient, ChatCompletion,
    ChatCompletionRequest, ChatMessage, ChatStream, MessageRole,
};
pub use client::Client;
pub use config::{
    credential_path, read_api_key, write_api_key, Config, ConfigBuilder, ConfigSource,
    CredentialScope, DotenvSource, EnvSource, ENV_API_KEY, ENV_BASE_URL, ENV_MAX_RETRIES,
    ENV_POOL_CONNECTIONS, ENV_POOL_MAXSIZE, ENV_RETRY_BACKOFF_FACTOR, ENV_RETRY_STATUS_CODES,
    ENV_TIMEOUT, ENV_USE_GLOBAL_CONFIG,
};
pub use embeddings::{
    Embedding, EmbeddingsClient, EmbeddingsInput, EmbeddingsRequest, EmbeddingsResponse,
};
pub use errors::{ApiFailure, Error, ErrorContext, Result};
pub use http::{RetryPolicy, DEFAULT_RETRY_STATUS_CODES};
pub use images::{
    ImageEditRequest, ImageGenerationRequest, ImageUpscaleRequest, ImagesClient,
};
pub use keys::{ApiKey, ApiKeyCreateRequest, ApiKeysClient, Web3KeyRequest};
pub use metrics::{EndpointSummary, RateLimitEvent, RateLimitMetrics, RateLimitSummary};
pub use models::{Model, ModelsClient};
pub use sse::{EventStream, RawEventStream, SseEvent, DONE_SENTINEL};
pub use video::{
    JobState, VideoClient, VideoGenerationRequest, VideoJob, VideoMetadata, VideoQuote,
    WaitOptions, DEFAULT_COMPLETE_TIMEOUT, DEFAULT_POLL_INTERVAL,
};
