//! Integration Tests: HttpTransport + provider pipelines against wiremock.
//!
//! Each test stands up a local server speaking one vendor's wire format and
//! runs the agent loop through the real reqwest transport.

use std::sync::Arc;

use futures::StreamExt;
use llm_conduit::testing::echo_tool;
use llm_conduit::*;
use secrecy::SecretString;
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(server: &MockServer, auth: AuthStyle) -> Arc<HttpTransport> {
    Arc::new(
        HttpTransport::builder()
            .base_url(server.uri())
            .api_key(SecretString::from("sk-test".to_string()))
            .auth(auth)
            .retry_policy(RetryPolicy {
                max_retries: 0,
                ..Default::default()
            })
            .build()
            .unwrap(),
    )
}

/// SSE body with an `event:` line per payload, as Anthropic and OpenAI send.
fn named_sse(events: &[Value]) -> String {
    events
        .iter()
        .map(|e| {
            let name = e["type"].as_str().unwrap_or("message");
            format!("event: {name}\ndata: {e}\n\n")
        })
        .collect()
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

async fn collect(mut result: StreamResult<'_>) -> (Vec<StreamEvent>, Result<Response, Error>) {
    let mut events = Vec::new();
    let mut failure = None;
    while let Some(item) = result.next().await {
        match item {
            Ok(event) => events.push(event),
            Err(err) => failure = Some(err),
        }
    }
    let outcome = match failure {
        Some(err) => Err(err),
        None => result
            .into_response()
            .ok_or_else(|| Error::configuration("no response")),
    };
    (events, outcome)
}

#[cfg(feature = "openai-compat")]
#[tokio::test]
async fn test_chat_completions_stream_over_http() {
    let server = MockServer::start().await;
    let body: String = [
        r#"{"id":"chatcmpl-s","model":"llama-3.1","choices":[{"index":0,"delta":{"role":"assistant","content":"Stream"},"finish_reason":null}]}"#,
        r#"{"id":"chatcmpl-s","choices":[{"index":0,"delta":{"content":"ing!"},"finish_reason":null}]}"#,
        r#"{"id":"chatcmpl-s","choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":8,"completion_tokens":3}}"#,
        "[DONE]",
    ]
    .iter()
    .map(|d| format!("data: {d}\n\n"))
    .collect();
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(sse_response(body))
        .expect(1)
        .mount(&server)
        .await;

    let agent = Agent::builder()
        .transport(ProviderKind::OpenAiCompatible, transport(&server, AuthStyle::Bearer))
        .unwrap()
        .build()
        .unwrap();
    let (events, response) = collect(agent.stream(Request::new("llama-3.1").user("hi"))).await;
    let response = response.unwrap();

    assert_eq!(response.text, "Streaming!");
    assert_eq!(response.usage.total_tokens, 11);
    assert_eq!(response.steps[0].meta.id, "chatcmpl-s");
    assert_eq!(response.steps[0].meta.model, "llama-3.1");
    match &events[0].kind {
        StreamEventKind::StreamStart { provider, .. } => assert_eq!(provider, "openai-compatible"),
        other => panic!("expected StreamStart, got {other:?}"),
    }

    let sent = &server.received_requests().await.unwrap()[0];
    let sent: Value = serde_json::from_slice(&sent.body).unwrap();
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["model"], "llama-3.1");
}

#[cfg(feature = "anthropic")]
#[tokio::test]
async fn test_anthropic_tool_loop_over_http() {
    let server = MockServer::start().await;
    let first = named_sse(&[
        json!({"type": "message_start", "message": {"id": "msg_1", "model": "claude-test",
               "usage": {"input_tokens": 12, "output_tokens": 1}}}),
        json!({"type": "content_block_start", "index": 0,
               "content_block": {"type": "tool_use", "id": "toolu_1", "name": "echo", "input": {}}}),
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "input_json_delta", "partial_json": "{\"text\":"}}),
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "input_json_delta", "partial_json": "\"hey\"}"}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 9}}),
        json!({"type": "message_stop"}),
    ]);
    let second = named_sse(&[
        json!({"type": "message_start", "message": {"id": "msg_2", "model": "claude-test",
               "usage": {"input_tokens": 30, "output_tokens": 1}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "All done"}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 3}}),
        json!({"type": "message_stop"}),
    ]);
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(sse_response(first))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(sse_response(second))
        .mount(&server)
        .await;

    let agent = Agent::builder()
        .transport(ProviderKind::Anthropic, transport(&server, AuthStyle::AnthropicKey))
        .unwrap()
        .tool(echo_tool())
        .build()
        .unwrap();
    let (events, response) = collect(agent.stream(Request::new("claude-test").user("echo hey"))).await;
    let response = response.unwrap();

    assert_eq!(response.steps.len(), 2);
    assert_eq!(response.text, "All done");
    assert_eq!(response.tool_calls[0].id, "toolu_1");
    assert_eq!(response.tool_results[0].result, "hey");
    assert_eq!(response.usage.prompt_tokens, 42);
    assert_eq!(response.usage.completion_tokens, 12);
    assert_eq!(response.finish_reason, FinishReason::Stop);

    let tool_call_events = events
        .iter()
        .filter(|e| e.kind.event_type() == StreamEventType::ToolCall)
        .count();
    assert_eq!(tool_call_events, 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let followup: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let text = followup["messages"].to_string();
    assert!(text.contains("toolu_1"));
    assert!(text.contains("tool_result"));
}

#[cfg(feature = "anthropic")]
#[tokio::test]
async fn test_anthropic_in_band_error_ends_stream() {
    let server = MockServer::start().await;
    let body = named_sse(&[
        json!({"type": "message_start", "message": {"id": "msg_1", "model": "claude-test", "usage": {}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Part"}}),
        json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
    ]);
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let agent = Agent::builder()
        .transport(ProviderKind::Anthropic, transport(&server, AuthStyle::AnthropicKey))
        .unwrap()
        .build()
        .unwrap();
    let (events, response) = collect(agent.stream(Request::new("claude-test").user("hi"))).await;
    let err = response.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Overloaded);
    assert!(err.retryable);
    assert_eq!(err.provider.as_deref(), Some("anthropic"));
    match &events.last().unwrap().kind {
        StreamEventKind::Error { error_type, .. } => assert_eq!(*error_type, ErrorKind::Overloaded),
        other => panic!("expected Error event, got {other:?}"),
    }
}

#[cfg(feature = "gemini")]
#[tokio::test]
async fn test_gemini_generate_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responseId": "r1",
            "modelVersion": "gemini-test-001",
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Bonjour"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let agent = Agent::builder()
        .transport(ProviderKind::Gemini, transport(&server, AuthStyle::GoogleKey))
        .unwrap()
        .build()
        .unwrap();
    let response = agent
        .generate(Request::new("gemini-test").system("Be French").user("Hello"))
        .await
        .unwrap();

    assert_eq!(response.text, "Bonjour");
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.usage.total_tokens, 6);
    assert_eq!(response.steps[0].meta.provider, "gemini");
    assert_eq!(response.steps[0].system_prompts, vec!["Be French".to_string()]);
}

#[cfg(feature = "openai")]
#[tokio::test]
async fn test_responses_stream_over_http() {
    let server = MockServer::start().await;
    let body = named_sse(&[
        json!({"type": "response.created", "response": {"id": "resp_1", "model": "gpt-test"}}),
        json!({"type": "response.output_text.delta", "output_index": 0, "delta": "Hi"}),
        json!({"type": "response.output_text.delta", "output_index": 0, "delta": " there"}),
        json!({"type": "response.completed", "response": {
            "id": "resp_1", "status": "completed",
            "output": [{"type": "message"}],
            "usage": {"input_tokens": 5, "output_tokens": 2}
        }}),
    ]);
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let agent = Agent::builder()
        .transport(ProviderKind::OpenAi, transport(&server, AuthStyle::Bearer))
        .unwrap()
        .build()
        .unwrap();
    let mut result = agent.stream(Request::new("gpt-test").user("hi"));
    let text: Vec<String> = result
        .text_stream()
        .filter_map(|item| async move { item.ok() })
        .collect()
        .await;

    assert_eq!(text, vec!["Hi", " there"]);
    let response = result.response().unwrap();
    assert_eq!(response.steps[0].meta.id, "resp_1");
    assert_eq!(response.usage.prompt_tokens, 5);
}

#[cfg(feature = "openai-compat")]
#[tokio::test]
async fn test_rate_limit_error_carries_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "2")
                .insert_header("x-ratelimit-remaining-requests", "0")
                .insert_header("x-ratelimit-reset-requests", "20s")
                .set_body_json(json!({
                    "error": {"message": "Rate limit reached", "code": "rate_limit_exceeded"}
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let agent = Agent::builder()
        .transport(ProviderKind::OpenAiCompatible, transport(&server, AuthStyle::Bearer))
        .unwrap()
        .build()
        .unwrap();
    let err = agent
        .generate(Request::new("gpt-test").user("hi"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::RateLimit);
    assert_eq!(err.status_code, Some(429));
    assert_eq!(err.retry_after, Some(std::time::Duration::from_secs(2)));
    assert_eq!(err.model.as_deref(), Some("gpt-test"));
    assert!(err.message.contains("Rate limit reached"));
    let limits = err.rate_limit.expect("rate limit metadata");
    assert_eq!(limits.requests_remaining, Some(0));
    assert_eq!(limits.requests_reset.as_deref(), Some("20s"));
}

#[cfg(feature = "openai-compat")]
#[tokio::test]
async fn test_malformed_sse_line_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response("data: {\"choices\": [\n\n".to_string()))
        .mount(&server)
        .await;

    let agent = Agent::builder()
        .transport(ProviderKind::OpenAiCompatible, transport(&server, AuthStyle::Bearer))
        .unwrap()
        .build()
        .unwrap();
    let (_, response) = collect(agent.stream(Request::new("gpt-test").user("hi"))).await;
    let err = response.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Decode);
    assert_eq!(err.provider.as_deref(), Some("openai-compatible"));
}
