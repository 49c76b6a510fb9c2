// Chat Completions classifier and payload builder, for OpenAI and every
// server that speaks the same protocol (vLLM, Ollama, Groq, Together...).

use llm_conduit_types::{
    Error, FinishReason, Message, PayloadBuilder, Request, ResponseFormat, Role, ToolArguments,
    ToolCall, Usage,
};
use serde_json::{Map, Value, json};

use super::{EventClassifier, in_band_error, token_count};
use crate::util::provider_options::merge_provider_options;
use crate::util::stream_accumulator::{StreamState, TurnOutput};

/// Reads `chat.completion.chunk` events.
///
/// Tool calls stream as `choices[0].delta.tool_calls[]`, each addressed by
/// `index`; only the first delta of a call carries its `id` and name.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClassifier {
    name: String,
}

impl ChatCompletionsClassifier {
    /// Report errors and events under a specific service name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ChatCompletionsClassifier {
    fn default() -> Self {
        Self::named("openai-compatible")
    }
}

fn first_choice(event: &Value) -> Option<&Value> {
    event.get("choices")?.as_array()?.first()
}

fn delta(event: &Value) -> Option<&Value> {
    first_choice(event)?.get("delta")
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn map_finish_reason(raw: &str) -> FinishReason {
    match raw {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Unknown(other.to_string()),
    }
}

fn parse_usage(usage: &Value) -> Option<Usage> {
    if !usage.is_object() {
        return None;
    }
    let mut parsed = Usage::new(
        token_count(usage.get("prompt_tokens")).unwrap_or(0),
        token_count(usage.get("completion_tokens")).unwrap_or(0),
    );
    parsed.reasoning_tokens = token_count(
        usage
            .get("completion_tokens_details")
            .and_then(|d| d.get("reasoning_tokens")),
    );
    parsed.cache_read_tokens = token_count(
        usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens")),
    );
    Some(parsed)
}

impl EventClassifier for ChatCompletionsClassifier {
    fn provider(&self) -> &str {
        &self.name
    }

    fn observe(&self, event: &Value, state: &mut StreamState) {
        if let Some(id) = event.get("id").and_then(Value::as_str) {
            state.observe_message_id(id);
        }
        if let Some(model) = event.get("model").and_then(Value::as_str) {
            state.observe_model(model);
        }
    }

    fn has_tool_calls(&self, event: &Value) -> bool {
        delta(event)
            .and_then(|d| d.get("tool_calls"))
            .and_then(Value::as_array)
            .is_some_and(|calls| !calls.is_empty())
    }

    fn extract_tool_call_delta(&self, event: &Value, state: &mut StreamState) {
        let Some(calls) = delta(event)
            .and_then(|d| d.get("tool_calls"))
            .and_then(Value::as_array)
        else {
            return;
        };
        for (position, call) in calls.iter().enumerate() {
            let index = call
                .get("index")
                .and_then(Value::as_u64)
                .map(|i| i as usize)
                .unwrap_or(position);
            let function = call.get("function");
            state.merge_tool_call_fragment(
                index,
                call.get("id").and_then(Value::as_str),
                function.and_then(|f| f.get("name")).and_then(Value::as_str),
                function
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str),
            );
        }
    }

    fn extract_text_delta(&self, event: &Value) -> Option<String> {
        non_empty_str(delta(event)?.get("content"))
    }

    fn extract_thinking_delta(&self, event: &Value) -> Option<String> {
        let delta = delta(event)?;
        non_empty_str(delta.get("reasoning_content")).or_else(|| non_empty_str(delta.get("reasoning")))
    }

    fn map_finish_reason(&self, event: &Value) -> Option<FinishReason> {
        first_choice(event)?
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(map_finish_reason)
    }

    fn extract_usage(&self, event: &Value) -> Option<Usage> {
        parse_usage(event.get("usage")?)
    }

    fn extract_error(&self, event: &Value) -> Option<Error> {
        let error = event.get("error").filter(|e| !e.is_null())?;
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let code = error
            .get("code")
            .or_else(|| error.get("type"))
            .and_then(|c| match c {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        Some(in_band_error(&self.name, message, code, event))
    }

    fn parse_response(&self, body: &Value) -> Result<TurnOutput, Error> {
        if let Some(err) = self.extract_error(body) {
            return Err(err);
        }
        let choice = first_choice(body);
        let message = choice.and_then(|c| c.get("message"));

        let tool_calls = message
            .and_then(|m| m.get("tool_calls"))
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .map(|call| {
                        let function = call.get("function");
                        let arguments = function
                            .and_then(|f| f.get("arguments"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        ToolCall::new(
                            call.get("id").and_then(Value::as_str).unwrap_or_default(),
                            function
                                .and_then(|f| f.get("name"))
                                .and_then(Value::as_str)
                                .unwrap_or_default(),
                            ToolArguments::Raw(arguments.to_string()),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(TurnOutput {
            id: body
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            model: body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            provider: self.name.clone(),
            text: non_empty_str(message.and_then(|m| m.get("content"))).unwrap_or_default(),
            thinking: message.and_then(|m| non_empty_str(m.get("reasoning_content"))),
            tool_calls,
            usage: body.get("usage").and_then(parse_usage).unwrap_or_default(),
            finish_reason: choice
                .and_then(|c| c.get("finish_reason"))
                .and_then(Value::as_str)
                .map(map_finish_reason),
            ..Default::default()
        })
    }
}

/// Builds `POST /chat/completions` bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatCompletionsPayload;

pub(crate) fn chat_messages(request: &Request) -> Vec<Value> {
    let mut messages: Vec<Value> = request
        .system_prompts()
        .iter()
        .map(|prompt| json!({"role": "system", "content": prompt}))
        .collect();

    for message in request.messages() {
        match message.role {
            Role::System => messages.push(json!({"role": "system", "content": message.content})),
            Role::User => messages.push(json!({"role": "user", "content": message.content})),
            Role::Assistant => messages.push(assistant_message(message)),
            Role::ToolResult => {
                for result in &message.tool_results {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": result.tool_call_id,
                        "content": result.result,
                    }));
                }
            }
        }
    }
    messages
}

fn assistant_message(message: &Message) -> Value {
    let mut out = json!({"role": "assistant"});
    out["content"] = if message.content.is_empty() {
        Value::Null
    } else {
        json!(message.content)
    };
    if !message.tool_calls.is_empty() {
        out["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments_json()},
                })
            })
            .collect();
    }
    out
}

impl PayloadBuilder for ChatCompletionsPayload {
    fn path(&self, _request: &Request, _stream: bool) -> String {
        "/chat/completions".to_string()
    }

    fn build(&self, request: &Request, stream: bool) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert("messages".into(), Value::Array(chat_messages(request)));

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body.insert("tools".into(), Value::Array(tools));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(ResponseFormat::Json { schema }) = &request.response_format {
            let format = match schema {
                Some(schema) => json!({
                    "type": "json_schema",
                    "json_schema": {"name": "response", "schema": schema},
                }),
                None => json!({"type": "json_object"}),
            };
            body.insert("response_format".into(), format);
        }
        if stream {
            body.insert("stream".into(), json!(true));
            body.insert("stream_options".into(), json!({"include_usage": true}));
        }

        merge_provider_options(&mut body, request, "openai-compatible");
        Value::Object(body)
    }
}
