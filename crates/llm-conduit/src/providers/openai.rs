// OpenAI Responses API classifier and payload builder.
//
// Every event carries a `type`; function calls are addressed by
// `output_index` and built-in tools (web/file search, code interpreter)
// report progress as their own item types.

use llm_conduit_types::{
    Citation, Error, FinishReason, PayloadBuilder, Request, ResponseFormat, Role, ToolArguments,
    ToolCall, Usage,
};
use serde_json::{Map, Value, json};

use super::{EventClassifier, ProviderToolEvent, in_band_error, token_count};
use crate::util::provider_options::merge_provider_options;
use crate::util::stream_accumulator::{ReasoningItem, StreamState, TurnOutput};

const PROVIDER: &str = "openai";

/// Item types for tools OpenAI executes on its side.
const BUILT_IN_TOOLS: &[&str] = &[
    "web_search_call",
    "file_search_call",
    "code_interpreter_call",
    "image_generation_call",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsesClassifier;

fn event_type(event: &Value) -> &str {
    event.get("type").and_then(Value::as_str).unwrap_or_default()
}

/// The `response` object of lifecycle events; some proxies send it flat.
fn response_object(event: &Value) -> &Value {
    event.get("response").unwrap_or(event)
}

fn output_index(event: &Value) -> usize {
    event
        .get("output_index")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize
}

fn item_type(item: &Value) -> &str {
    item.get("type").and_then(Value::as_str).unwrap_or_default()
}

fn parse_usage(usage: &Value) -> Option<Usage> {
    if !usage.is_object() {
        return None;
    }
    let mut parsed = Usage::new(
        token_count(usage.get("input_tokens")).unwrap_or(0),
        token_count(usage.get("output_tokens")).unwrap_or(0),
    );
    parsed.reasoning_tokens = token_count(
        usage
            .get("output_tokens_details")
            .and_then(|d| d.get("reasoning_tokens")),
    );
    parsed.cache_read_tokens = token_count(
        usage
            .get("input_tokens_details")
            .and_then(|d| d.get("cached_tokens")),
    );
    Some(parsed)
}

/// Finish reason of a finished `response` object.
fn finish_reason_of(response: &Value) -> FinishReason {
    let has_function_calls = response
        .get("output")
        .and_then(Value::as_array)
        .is_some_and(|items| items.iter().any(|i| item_type(i) == "function_call"));
    match response.get("status").and_then(Value::as_str).unwrap_or("completed") {
        "completed" if has_function_calls => FinishReason::ToolCalls,
        "completed" => FinishReason::Stop,
        "incomplete" => match response
            .get("incomplete_details")
            .and_then(|d| d.get("reason"))
            .and_then(Value::as_str)
        {
            Some("max_output_tokens") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("incomplete".to_string()),
        },
        other => FinishReason::Unknown(other.to_string()),
    }
}

fn url_citation(annotation: &Value) -> Option<Citation> {
    if annotation.get("type").and_then(Value::as_str) != Some("url_citation") {
        return None;
    }
    Some(Citation {
        url: annotation.get("url").and_then(Value::as_str).map(str::to_string),
        title: annotation.get("title").and_then(Value::as_str).map(str::to_string),
        cited_text: None,
        start_index: annotation.get("start_index").and_then(Value::as_u64),
        end_index: annotation.get("end_index").and_then(Value::as_u64),
        raw: Some(annotation.clone()),
    })
}

/// A `reasoning` output item, with its summary parts joined.
fn reasoning_item(item: &Value) -> Option<ReasoningItem> {
    if item_type(item) != "reasoning" {
        return None;
    }
    let id = item.get("id").and_then(Value::as_str)?;
    let summary: String = item
        .get("summary")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    Some(ReasoningItem {
        id: id.to_string(),
        summary: (!summary.is_empty()).then_some(summary),
    })
}

fn error_from(message: &Value, raw: &Value) -> Error {
    let text = message
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("stream error");
    let code = message
        .get("code")
        .and_then(Value::as_str)
        .map(str::to_string);
    in_band_error(PROVIDER, text, code, raw)
}

impl EventClassifier for ResponsesClassifier {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn observe(&self, event: &Value, state: &mut StreamState) {
        match event_type(event) {
            "response.created" => {
                let response = response_object(event);
                if let Some(id) = response.get("id").and_then(Value::as_str) {
                    state.observe_message_id(id);
                }
                if let Some(model) = response.get("model").and_then(Value::as_str) {
                    state.observe_model(model);
                }
            }
            "response.output_item.added" | "response.output_item.done" => {
                if let Some(item) = event.get("item").and_then(reasoning_item) {
                    state.reasoning_item = Some(item);
                }
            }
            _ => {}
        }
    }

    fn has_tool_calls(&self, event: &Value) -> bool {
        match event_type(event) {
            "response.function_call_arguments.delta" => true,
            "response.output_item.added" => event
                .get("item")
                .is_some_and(|item| item_type(item) == "function_call"),
            _ => false,
        }
    }

    fn extract_tool_call_delta(&self, event: &Value, state: &mut StreamState) {
        match event_type(event) {
            "response.output_item.added" => {
                let Some(item) = event.get("item").filter(|i| item_type(i) == "function_call")
                else {
                    return;
                };
                let index = output_index(event);
                state.merge_tool_call_fragment(
                    index,
                    item.get("call_id").and_then(Value::as_str),
                    item.get("name").and_then(Value::as_str),
                    item.get("arguments")
                        .and_then(Value::as_str)
                        .filter(|a| !a.is_empty()),
                );
                // Summaries streamed as deltas are only in the thinking text
                // until the reasoning item is done.
                let reasoning = state.reasoning_item.clone().map(|mut reasoning| {
                    if reasoning.summary.is_none() && !state.thinking.is_empty() {
                        reasoning.summary = Some(state.thinking.clone());
                    }
                    reasoning
                });
                state.annotate_tool_call(
                    index,
                    item.get("id").and_then(Value::as_str),
                    reasoning.as_ref(),
                );
            }
            "response.function_call_arguments.delta" => {
                state.merge_tool_call_fragment(
                    output_index(event),
                    None,
                    None,
                    event.get("delta").and_then(Value::as_str),
                );
            }
            _ => {}
        }
    }

    fn extract_text_delta(&self, event: &Value) -> Option<String> {
        if event_type(event) != "response.output_text.delta" {
            return None;
        }
        event
            .get("delta")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
    }

    fn extract_thinking_delta(&self, event: &Value) -> Option<String> {
        match event_type(event) {
            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => event
                .get("delta")
                .and_then(Value::as_str)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            _ => None,
        }
    }

    fn map_finish_reason(&self, event: &Value) -> Option<FinishReason> {
        match event_type(event) {
            "response.completed" | "response.incomplete" => {
                Some(finish_reason_of(response_object(event)))
            }
            _ => None,
        }
    }

    fn extract_usage(&self, event: &Value) -> Option<Usage> {
        match event_type(event) {
            "response.completed" | "response.incomplete" => {
                parse_usage(response_object(event).get("usage")?)
            }
            _ => None,
        }
    }

    fn extract_citations(&self, event: &Value) -> Vec<(Citation, Option<u64>)> {
        if event_type(event) != "response.output_text.annotation.added" {
            return Vec::new();
        }
        event
            .get("annotation")
            .and_then(url_citation)
            .map(|citation| (citation, event.get("content_index").and_then(Value::as_u64)))
            .into_iter()
            .collect()
    }

    fn extract_provider_tool_event(&self, event: &Value) -> Option<ProviderToolEvent> {
        let kind = event_type(event);
        let built_in_item = event.get("item").filter(|item| {
            matches!(kind, "response.output_item.added" | "response.output_item.done")
                && BUILT_IN_TOOLS.contains(&item_type(item))
        });
        if let Some(item) = built_in_item {
            let status = if kind.ends_with(".done") {
                "completed"
            } else {
                "in_progress"
            };
            return Some(ProviderToolEvent {
                tool_type: item_type(item).trim_end_matches("_call").to_string(),
                status: item
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or(status)
                    .to_string(),
                item_id: item.get("id").and_then(Value::as_str).map(str::to_string),
                data: item.clone(),
            });
        }

        // response.web_search_call.searching and friends
        let rest = kind.strip_prefix("response.")?;
        let (call_type, status) = rest.split_once('.')?;
        if !BUILT_IN_TOOLS.contains(&call_type) {
            return None;
        }
        Some(ProviderToolEvent {
            tool_type: call_type.trim_end_matches("_call").to_string(),
            status: status.to_string(),
            item_id: event.get("item_id").and_then(Value::as_str).map(str::to_string),
            data: event.clone(),
        })
    }

    fn extract_error(&self, event: &Value) -> Option<Error> {
        match event_type(event) {
            "error" => Some(error_from(event, event)),
            "response.failed" => {
                let response = response_object(event);
                let error = response.get("error").unwrap_or(response);
                Some(error_from(error, event))
            }
            _ => None,
        }
    }

    fn parse_response(&self, body: &Value) -> Result<TurnOutput, Error> {
        if body.get("status").and_then(Value::as_str) == Some("failed") {
            let error = body.get("error").unwrap_or(body);
            return Err(error_from(error, body));
        }

        let mut turn = TurnOutput {
            id: body.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            model: body.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
            provider: PROVIDER.to_string(),
            usage: body.get("usage").and_then(parse_usage).unwrap_or_default(),
            finish_reason: Some(finish_reason_of(body)),
            ..Default::default()
        };
        let mut thinking = String::new();
        let mut reasoning: Option<ReasoningItem> = None;

        for item in body.get("output").and_then(Value::as_array).into_iter().flatten() {
            match item_type(item) {
                "message" => {
                    for part in item.get("content").and_then(Value::as_array).into_iter().flatten() {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            turn.text.push_str(text);
                        }
                        turn.citations.extend(
                            part.get("annotations")
                                .and_then(Value::as_array)
                                .into_iter()
                                .flatten()
                                .filter_map(url_citation),
                        );
                    }
                }
                "function_call" => turn.tool_calls.push(ToolCall {
                    result_id: item.get("id").and_then(Value::as_str).map(str::to_string),
                    reasoning_id: reasoning.as_ref().map(|r| r.id.clone()),
                    reasoning_summary: reasoning.as_ref().and_then(|r| r.summary.clone()),
                    ..ToolCall::new(
                        item.get("call_id").and_then(Value::as_str).unwrap_or_default(),
                        item.get("name").and_then(Value::as_str).unwrap_or_default(),
                        ToolArguments::Raw(
                            item.get("arguments")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        ),
                    )
                }),
                "reasoning" => {
                    for summary in item.get("summary").and_then(Value::as_array).into_iter().flatten() {
                        if let Some(text) = summary.get("text").and_then(Value::as_str) {
                            thinking.push_str(text);
                        }
                    }
                    if let Some(item) = reasoning_item(item) {
                        reasoning = Some(item);
                    }
                }
                _ => {}
            }
        }
        turn.thinking = (!thinking.is_empty()).then_some(thinking);
        Ok(turn)
    }
}

/// Builds `POST /responses` bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsesPayload;

fn input_items(request: &Request) -> Vec<Value> {
    let mut items = Vec::new();
    for message in request.messages() {
        match message.role {
            Role::System => items.push(json!({"role": "system", "content": message.content})),
            Role::User => items.push(json!({"role": "user", "content": message.content})),
            Role::Assistant => {
                // Reasoning items go back ahead of the calls that cite them.
                let mut echoed: Vec<&str> = Vec::new();
                for call in &message.tool_calls {
                    let Some(reasoning_id) = call.reasoning_id.as_deref() else {
                        continue;
                    };
                    if echoed.contains(&reasoning_id) {
                        continue;
                    }
                    echoed.push(reasoning_id);
                    let summary: Vec<Value> = call
                        .reasoning_summary
                        .iter()
                        .map(|text| json!({"type": "summary_text", "text": text}))
                        .collect();
                    items.push(json!({"type": "reasoning", "id": reasoning_id, "summary": summary}));
                }
                if !message.content.is_empty() {
                    items.push(json!({"role": "assistant", "content": message.content}));
                }
                for call in &message.tool_calls {
                    let mut item = json!({
                        "type": "function_call",
                        "call_id": call.id,
                        "name": call.name,
                        "arguments": call.arguments_json(),
                    });
                    if let Some(result_id) = &call.result_id {
                        item["id"] = json!(result_id);
                    }
                    items.push(item);
                }
            }
            Role::ToolResult => {
                for result in &message.tool_results {
                    items.push(json!({
                        "type": "function_call_output",
                        "call_id": result.tool_call_id,
                        "output": result.result,
                    }));
                }
            }
        }
    }
    items
}

impl PayloadBuilder for ResponsesPayload {
    fn path(&self, _request: &Request, _stream: bool) -> String {
        "/responses".to_string()
    }

    fn build(&self, request: &Request, stream: bool) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert("input".into(), Value::Array(input_items(request)));
        if !request.system_prompts().is_empty() {
            body.insert("instructions".into(), json!(request.system_prompts().join("\n\n")));
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body.insert("tools".into(), Value::Array(tools));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_output_tokens".into(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(ResponseFormat::Json { schema }) = &request.response_format {
            let format = match schema {
                Some(schema) => json!({"type": "json_schema", "name": "response", "schema": schema}),
                None => json!({"type": "json_object"}),
            };
            body.insert("text".into(), json!({"format": format}));
        }
        if stream {
            body.insert("stream".into(), json!(true));
        }

        merge_provider_options(&mut body, request, PROVIDER);
        Value::Object(body)
    }
}
