// Anthropic Messages API classifier and payload builder.

use llm_conduit_types::{
    Citation, Error, FinishReason, PayloadBuilder, Request, Role, ToolArguments, ToolCall, Usage,
};
use serde_json::{Map, Value, json};

use super::{EventClassifier, ProviderToolEvent, in_band_error, token_count};
use crate::util::provider_options::merge_provider_options;
use crate::util::stream_accumulator::{StreamState, TurnOutput};

const PROVIDER: &str = "anthropic";

/// Reads Messages API stream events.
///
/// Tool input streams as `input_json_delta` fragments addressed by the
/// content block `index`. Server-side tools (web search) use the same delta
/// type, so only indexes opened by a `tool_use` block are merged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicClassifier;

fn event_type(event: &Value) -> &str {
    event.get("type").and_then(Value::as_str).unwrap_or_default()
}

fn block_index(event: &Value) -> usize {
    event.get("index").and_then(Value::as_u64).unwrap_or(0) as usize
}

fn content_delta<'a>(event: &'a Value, kind: &str) -> Option<&'a Value> {
    if event_type(event) != "content_block_delta" {
        return None;
    }
    let delta = event.get("delta")?;
    (delta.get("type").and_then(Value::as_str) == Some(kind)).then_some(delta)
}

fn map_stop_reason(raw: &str) -> FinishReason {
    match raw {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        other => FinishReason::Unknown(other.to_string()),
    }
}

fn parse_usage(usage: &Value) -> Option<Usage> {
    if !usage.is_object() {
        return None;
    }
    let mut parsed = Usage::new(
        token_count(usage.get("input_tokens")).unwrap_or(0),
        token_count(usage.get("output_tokens")).unwrap_or(0),
    );
    parsed.cache_read_tokens = token_count(usage.get("cache_read_input_tokens"));
    parsed.cache_write_tokens = token_count(usage.get("cache_creation_input_tokens"));
    Some(parsed)
}

fn parse_citation(raw: &Value) -> Citation {
    let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
    Citation {
        url: text("url"),
        title: text("title").or_else(|| text("document_title")),
        cited_text: text("cited_text"),
        start_index: raw.get("start_char_index").and_then(Value::as_u64),
        end_index: raw.get("end_char_index").and_then(Value::as_u64),
        raw: Some(raw.clone()),
    }
}

impl EventClassifier for AnthropicClassifier {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn error_paths(&self) -> (&'static [&'static str], &'static [&'static str]) {
        (&["error", "message"], &["error", "type"])
    }

    fn observe(&self, event: &Value, state: &mut StreamState) {
        match event_type(event) {
            "message_start" => {
                let Some(message) = event.get("message") else {
                    return;
                };
                if let Some(id) = message.get("id").and_then(Value::as_str) {
                    state.observe_message_id(id);
                }
                if let Some(model) = message.get("model").and_then(Value::as_str) {
                    state.observe_model(model);
                }
            }
            "content_block_delta" => {
                if let Some(signature) = content_delta(event, "signature_delta")
                    .and_then(|d| d.get("signature"))
                    .and_then(Value::as_str)
                {
                    state.push_thinking_signature(signature);
                }
            }
            _ => {}
        }
    }

    fn has_tool_calls(&self, event: &Value) -> bool {
        match event_type(event) {
            "content_block_start" => event
                .get("content_block")
                .and_then(|b| b.get("type"))
                .and_then(Value::as_str)
                == Some("tool_use"),
            _ => content_delta(event, "input_json_delta").is_some(),
        }
    }

    fn extract_tool_call_delta(&self, event: &Value, state: &mut StreamState) {
        let index = block_index(event);
        if event_type(event) == "content_block_start" {
            let Some(block) = event.get("content_block") else {
                return;
            };
            if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                state.merge_tool_call_fragment(
                    index,
                    block.get("id").and_then(Value::as_str),
                    block.get("name").and_then(Value::as_str),
                    None,
                );
            }
        } else if let Some(delta) = content_delta(event, "input_json_delta") {
            if state.tool_calls.contains_key(&index) {
                state.merge_tool_call_fragment(
                    index,
                    None,
                    None,
                    delta.get("partial_json").and_then(Value::as_str),
                );
            }
        }
    }

    fn extract_text_delta(&self, event: &Value) -> Option<String> {
        content_delta(event, "text_delta")?
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn extract_thinking_delta(&self, event: &Value) -> Option<String> {
        content_delta(event, "thinking_delta")?
            .get("thinking")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn map_finish_reason(&self, event: &Value) -> Option<FinishReason> {
        if event_type(event) != "message_delta" {
            return None;
        }
        event
            .get("delta")?
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(map_stop_reason)
    }

    fn extract_usage(&self, event: &Value) -> Option<Usage> {
        match event_type(event) {
            "message_start" => parse_usage(event.get("message")?.get("usage")?),
            "message_delta" => parse_usage(event.get("usage")?),
            _ => None,
        }
    }

    fn extract_citations(&self, event: &Value) -> Vec<(Citation, Option<u64>)> {
        content_delta(event, "citations_delta")
            .and_then(|delta| delta.get("citation"))
            .map(|citation| {
                (
                    parse_citation(citation),
                    event.get("index").and_then(Value::as_u64),
                )
            })
            .into_iter()
            .collect()
    }

    fn extract_provider_tool_event(&self, event: &Value) -> Option<ProviderToolEvent> {
        if event_type(event) != "content_block_start" {
            return None;
        }
        let block = event.get("content_block")?;
        let block_type = block.get("type").and_then(Value::as_str)?;
        let (tool_type, status) = match block_type {
            "server_tool_use" => (
                block.get("name").and_then(Value::as_str).unwrap_or("server_tool"),
                "in_progress",
            ),
            kind if kind.ends_with("_tool_result") => {
                (kind.trim_end_matches("_tool_result"), "completed")
            }
            _ => return None,
        };
        Some(ProviderToolEvent {
            tool_type: tool_type.to_string(),
            status: status.to_string(),
            item_id: block
                .get("id")
                .or_else(|| block.get("tool_use_id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            data: block.clone(),
        })
    }

    fn extract_error(&self, event: &Value) -> Option<Error> {
        if event_type(event) != "error" {
            return None;
        }
        let error = event.get("error")?;
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("stream error");
        let code = error.get("type").and_then(Value::as_str).map(str::to_string);
        Some(in_band_error(PROVIDER, message, code, event))
    }

    fn parse_response(&self, body: &Value) -> Result<TurnOutput, Error> {
        if let Some(err) = self.extract_error(body) {
            return Err(err);
        }
        let mut turn = TurnOutput {
            id: body.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            model: body.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
            provider: PROVIDER.to_string(),
            usage: body.get("usage").and_then(parse_usage).unwrap_or_default(),
            finish_reason: body
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(map_stop_reason),
            ..Default::default()
        };
        let mut thinking = String::new();

        for block in body.get("content").and_then(Value::as_array).into_iter().flatten() {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        turn.text.push_str(text);
                    }
                    turn.citations.extend(
                        block
                            .get("citations")
                            .and_then(Value::as_array)
                            .into_iter()
                            .flatten()
                            .map(parse_citation),
                    );
                }
                Some("thinking") => {
                    if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                        thinking.push_str(text);
                    }
                    if let Some(signature) = block.get("signature").and_then(Value::as_str) {
                        turn.thinking_signature = Some(signature.to_string());
                    }
                }
                Some("tool_use") => {
                    let input = block
                        .get("input")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                    turn.tool_calls.push(ToolCall::new(
                        block.get("id").and_then(Value::as_str).unwrap_or_default(),
                        block.get("name").and_then(Value::as_str).unwrap_or_default(),
                        ToolArguments::Structured(input),
                    ));
                }
                _ => {}
            }
        }
        turn.thinking = (!thinking.is_empty()).then_some(thinking);
        Ok(turn)
    }
}

/// Builds `POST /messages` bodies. The API requires `max_tokens`, so a
/// default is sent when the request does not set one.
#[derive(Debug, Clone, Copy)]
pub struct AnthropicPayload {
    pub default_max_tokens: u32,
}

impl Default for AnthropicPayload {
    fn default() -> Self {
        Self {
            default_max_tokens: 4096,
        }
    }
}

fn anthropic_messages(request: &Request) -> (Vec<String>, Vec<Value>) {
    let mut system: Vec<String> = request.system_prompts().to_vec();
    let mut messages = Vec::new();

    for message in request.messages() {
        match message.role {
            Role::System => system.push(message.content.clone()),
            Role::User => messages.push(json!({"role": "user", "content": message.content})),
            Role::Assistant => {
                let mut content = Vec::new();
                // Thinking is only accepted back with its signature.
                if let (Some(thinking), Some(signature)) =
                    (&message.thinking, &message.thinking_signature)
                {
                    content.push(json!({
                        "type": "thinking",
                        "thinking": thinking,
                        "signature": signature,
                    }));
                }
                if !message.content.is_empty() {
                    content.push(json!({"type": "text", "text": message.content}));
                }
                for call in &message.tool_calls {
                    content.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": Value::Object(call.arguments()),
                    }));
                }
                messages.push(json!({"role": "assistant", "content": content}));
            }
            Role::ToolResult => {
                let content: Vec<Value> = message
                    .tool_results
                    .iter()
                    .map(|result| {
                        json!({
                            "type": "tool_result",
                            "tool_use_id": result.tool_call_id,
                            "content": result.result,
                            "is_error": result.is_error,
                        })
                    })
                    .collect();
                messages.push(json!({"role": "user", "content": content}));
            }
        }
    }
    (system, messages)
}

impl PayloadBuilder for AnthropicPayload {
    fn path(&self, _request: &Request, _stream: bool) -> String {
        "/messages".to_string()
    }

    fn build(&self, request: &Request, stream: bool) -> Value {
        let (system, messages) = anthropic_messages(request);
        let mut body = Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert(
            "max_tokens".into(),
            json!(request.max_tokens.unwrap_or(self.default_max_tokens)),
        );
        if !system.is_empty() {
            body.insert("system".into(), json!(system.join("\n\n")));
        }
        body.insert("messages".into(), Value::Array(messages));
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
            body.insert("tools".into(), Value::Array(tools));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if stream {
            body.insert("stream".into(), json!(true));
        }

        merge_provider_options(&mut body, request, PROVIDER);
        Value::Object(body)
    }
}
