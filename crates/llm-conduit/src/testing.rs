// MockTransport: scripted Transport for unit and integration tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use llm_conduit_types::{BoxFuture, Error, HttpResponse, Transport};
use serde_json::{Map, Value, json};

use crate::api::Tool;

/// One queued reply.
enum Scripted {
    Response {
        status: u16,
        headers: HashMap<String, String>,
        chunks: Vec<Bytes>,
    },
    Failure(Error),
}

/// A request the mock received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub body: Value,
    pub stream: bool,
}

/// A transport that replays queued replies in FIFO order and records every
/// request it sees. An exhausted queue answers with a configuration error.
#[derive(Default)]
pub struct MockTransport {
    queue: Mutex<Vec<Scripted>>,
    recorded: Mutex<Vec<RecordedRequest>>,
    call_count: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, item: Scripted) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(item);
    }

    /// Queue a 200 `text/event-stream` body delivered as one chunk.
    pub fn push_sse(&self, body: String) {
        self.push_sse_chunks(vec![body]);
    }

    /// Queue a 200 event-stream body split exactly at the given chunk
    /// boundaries.
    pub fn push_sse_chunks(&self, chunks: Vec<String>) {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/event-stream".to_string());
        self.push(Scripted::Response {
            status: 200,
            headers,
            chunks: chunks.into_iter().map(Bytes::from).collect(),
        });
    }

    /// Queue a 200 JSON body.
    pub fn push_json(&self, body: Value) {
        self.push_status(200, body);
    }

    /// Queue a JSON body with an arbitrary status.
    pub fn push_status(&self, status: u16, body: Value) {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        self.push(Scripted::Response {
            status,
            headers,
            chunks: vec![Bytes::from(body.to_string())],
        });
    }

    /// Queue a transport-level failure (no response at all).
    pub fn push_error(&self, error: Error) {
        self.push(Scripted::Failure(error));
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Transport for MockTransport {
    fn post(
        &self,
        path: &str,
        body: Value,
        stream: bool,
    ) -> BoxFuture<'_, Result<HttpResponse, Error>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                path: path.to_string(),
                body,
                stream,
            });

        let next = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        };

        Box::pin(async move {
            match next {
                Some(Scripted::Response {
                    status,
                    headers,
                    chunks,
                }) => {
                    let body = futures::stream::iter(chunks.into_iter().map(Ok::<Bytes, Error>));
                    Ok(HttpResponse::new(status, headers, Box::pin(body)))
                }
                Some(Scripted::Failure(err)) => Err(err),
                None => Err(Error::configuration("MockTransport: no queued responses")),
            }
        })
    }
}

/// Frame JSON payloads as an SSE body terminated by `[DONE]`.
pub fn build_sse_body(payloads: &[Value]) -> String {
    let mut body = String::new();
    for payload in payloads {
        body.push_str(&format!("data: {payload}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// A Chat Completions stream chunk with optional text and finish reason.
pub fn chat_chunk(content: Option<&str>, finish: Option<&str>) -> Value {
    let mut delta = Map::new();
    if let Some(content) = content {
        delta.insert("content".into(), Value::String(content.to_string()));
    }
    json!({
        "id": "chatcmpl-mock",
        "model": "gpt-test",
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
    })
}

/// A Chat Completions stream chunk carrying one tool-call fragment.
pub fn chat_tool_chunk(index: u64, id: Option<&str>, name: Option<&str>, args: &str) -> Value {
    let mut function = Map::new();
    if let Some(name) = name {
        function.insert("name".into(), Value::String(name.to_string()));
    }
    function.insert("arguments".into(), Value::String(args.to_string()));
    let mut call = Map::new();
    call.insert("index".into(), json!(index));
    if let Some(id) = id {
        call.insert("id".into(), Value::String(id.to_string()));
        call.insert("type".into(), Value::String("function".into()));
    }
    call.insert("function".into(), Value::Object(function));
    json!({
        "id": "chatcmpl-mock",
        "model": "gpt-test",
        "choices": [{"index": 0, "delta": {"tool_calls": [call]}, "finish_reason": null}]
    })
}

/// A tool named `echo` that returns its `text` argument.
pub fn echo_tool() -> Tool {
    Tool::new(
        "echo",
        "Repeat the given text",
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        }),
        |args| {
            Box::pin(async move {
                Ok(args
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string())
            })
        },
    )
}
