//! SSE streaming tests: parsed and raw modes over the same wire bytes.

use std::collections::HashMap;

use futures_util::StreamExt;
use serde_json::json;
use venice::{delta_content, ChatCompletionRequest, ChatMessage, Client, Config, Error};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAT_BODY: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n\
data: [DONE]\n\n";

fn client_for(server: &MockServer) -> Client {
    let config = Config::builder()
        .api_key("vk-test")
        .base_url(server.uri())
        .max_retries(0)
        .retry_backoff_factor(0.01)
        .resolve_layered(&HashMap::new(), None, None)
        .expect("config should resolve");
    Client::new(config).expect("client creation should succeed")
}

async fn mount_chat_stream(server: &MockServer, body: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream"),
        )
        .mount(server)
        .await;
}

fn chat_request() -> ChatCompletionRequest {
    ChatCompletionRequest::new("llama-3.3-70b", vec![ChatMessage::user("greet me")])
}

#[tokio::test]
async fn parsed_mode_yields_chunks_until_done() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, CHAT_BODY).await;

    let client = client_for(&server);
    let mut stream = client.chat().stream(chat_request()).await.expect("stream opens");

    let first = stream.next().await.expect("first chunk").expect("valid json");
    assert_eq!(delta_content(&first), Some("He"));
    let second = stream.next().await.expect("second chunk").expect("valid json");
    assert_eq!(delta_content(&second), Some("llo"));
    assert!(stream.next().await.is_none(), "[DONE] terminates the stream");
}

#[tokio::test]
async fn raw_mode_yields_payload_strings() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, CHAT_BODY).await;

    let client = client_for(&server);
    let stream = client.chat().stream(chat_request()).await.expect("stream opens");
    let payloads: Vec<String> = stream
        .into_raw()
        .map(|item| item.expect("payload"))
        .collect()
        .await;

    assert_eq!(
        payloads,
        vec![
            "{\"choices\":[{\"delta\":{\"content\":\"He\"}}]}".to_string(),
            "{\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}".to_string(),
        ]
    );
}

#[tokio::test]
async fn collect_content_concatenates_deltas() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, CHAT_BODY).await;

    let client = client_for(&server);
    let stream = client.chat().stream(chat_request()).await.expect("stream opens");
    assert_eq!(stream.collect_content().await.expect("collects"), "Hello");
}

#[tokio::test]
async fn facade_stream_primitive_decodes_events() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, CHAT_BODY).await;

    let client = client_for(&server);
    let body = json!({"model": "llama-3.3-70b", "messages": [], "stream": true});
    let mut stream = client
        .stream("chat/completions", Some(&body))
        .await
        .expect("stream opens");

    let mut count = 0;
    while let Some(chunk) = stream.next().await {
        chunk.expect("valid json");
        count += 1;
    }
    assert_eq!(count, 2);
}

#[tokio::test]
async fn malformed_payload_is_a_decode_error() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, "data: not json at all\n\ndata: [DONE]\n\n").await;

    let client = client_for(&server);
    let mut stream = client.chat().stream(chat_request()).await.expect("stream opens");
    let err = stream.next().await.expect("one item").unwrap_err();
    assert!(matches!(err, Error::Decode { .. }), "{err}");
    let ctx = err.context().expect("context");
    assert!(ctx.get("preview").expect("preview").contains("not json"));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn comments_and_event_fields_are_framed_correctly() {
    let body = ": keepalive\n\
event: completion\n\
data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n\n\
data: {\"a\":\n\
data: 1}\n\n\
data: [DONE]\n\n";
    let server = MockServer::start().await;
    mount_chat_stream(&server, body).await;

    let client = client_for(&server);
    let stream = client.chat().stream(chat_request()).await.expect("stream opens");
    let chunks: Vec<_> = stream.map(|c| c.expect("valid json")).collect().await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(delta_content(&chunks[0]), Some("one"));
    // Multi-line data joins with a newline, which is valid inside JSON.
    assert_eq!(chunks[1], json!({"a": 1}));
}

#[tokio::test]
async fn streaming_error_status_maps_before_any_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "bad key"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.chat().stream(chat_request()).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)), "{err}");
}
