// Gemini generateContent classifier and payload builder.
//
// Gemini streams whole function calls rather than argument fragments, and
// reports STOP even when the turn asked for tools.

use llm_conduit_types::{
    Citation, Error, FinishReason, PayloadBuilder, Request, ResponseFormat, Role, ToolArguments,
    ToolCall, Usage,
};
use serde_json::{Map, Value, json};

use super::{EventClassifier, in_band_error, token_count};
use crate::util::provider_options::merge_provider_options;
use crate::util::stream_accumulator::{StreamState, TurnOutput};

const PROVIDER: &str = "gemini";

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiClassifier;

fn candidate(event: &Value) -> Option<&Value> {
    event.get("candidates")?.as_array()?.first()
}

fn parts(event: &Value) -> impl Iterator<Item = &Value> {
    candidate(event)
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn is_thought(part: &Value) -> bool {
    part.get("thought").and_then(Value::as_bool).unwrap_or(false)
}

fn collect_text(event: &Value, thought: bool) -> Option<String> {
    let text: String = parts(event)
        .filter(|p| is_thought(p) == thought)
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

fn function_calls(event: &Value) -> impl Iterator<Item = &Value> {
    parts(event).filter_map(|p| p.get("functionCall"))
}

fn map_finish_reason(raw: &str, has_function_calls: bool) -> FinishReason {
    match raw {
        "STOP" if has_function_calls => FinishReason::ToolCalls,
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => FinishReason::ContentFilter,
        other => FinishReason::Unknown(other.to_string()),
    }
}

fn parse_usage(usage: &Value) -> Option<Usage> {
    if !usage.is_object() {
        return None;
    }
    let mut parsed = Usage::new(
        token_count(usage.get("promptTokenCount")).unwrap_or(0),
        token_count(usage.get("candidatesTokenCount")).unwrap_or(0),
    );
    parsed.reasoning_tokens = token_count(usage.get("thoughtsTokenCount"));
    parsed.cache_read_tokens = token_count(usage.get("cachedContentTokenCount"));
    Some(parsed)
}

fn grounding_citations(event: &Value) -> Vec<Citation> {
    candidate(event)
        .and_then(|c| c.get("groundingMetadata"))
        .and_then(|g| g.get("groundingChunks"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|chunk| chunk.get("web"))
        .map(|web| Citation {
            url: web.get("uri").and_then(Value::as_str).map(str::to_string),
            title: web.get("title").and_then(Value::as_str).map(str::to_string),
            raw: Some(web.clone()),
            ..Default::default()
        })
        .collect()
}

impl EventClassifier for GeminiClassifier {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn error_paths(&self) -> (&'static [&'static str], &'static [&'static str]) {
        (&["error", "message"], &["error", "status"])
    }

    fn observe(&self, event: &Value, state: &mut StreamState) {
        if let Some(id) = event.get("responseId").and_then(Value::as_str) {
            state.observe_message_id(id);
        }
        if let Some(model) = event.get("modelVersion").and_then(Value::as_str) {
            state.observe_model(model);
        }
    }

    fn has_tool_calls(&self, event: &Value) -> bool {
        function_calls(event).next().is_some()
    }

    fn extract_tool_call_delta(&self, event: &Value, state: &mut StreamState) {
        for call in function_calls(event) {
            let arguments = call
                .get("args")
                .filter(|a| a.is_object())
                .map(Value::to_string);
            state.merge_tool_call_fragment(
                state.next_tool_call_index(),
                call.get("id").and_then(Value::as_str),
                call.get("name").and_then(Value::as_str),
                arguments.as_deref(),
            );
        }
    }

    fn extract_text_delta(&self, event: &Value) -> Option<String> {
        collect_text(event, false)
    }

    fn extract_thinking_delta(&self, event: &Value) -> Option<String> {
        collect_text(event, true)
    }

    fn map_finish_reason(&self, event: &Value) -> Option<FinishReason> {
        let raw = candidate(event)?.get("finishReason")?.as_str()?;
        Some(map_finish_reason(raw, self.has_tool_calls(event)))
    }

    fn extract_usage(&self, event: &Value) -> Option<Usage> {
        parse_usage(event.get("usageMetadata")?)
    }

    fn extract_citations(&self, event: &Value) -> Vec<(Citation, Option<u64>)> {
        grounding_citations(event)
            .into_iter()
            .map(|citation| (citation, None))
            .collect()
    }

    fn extract_error(&self, event: &Value) -> Option<Error> {
        let error = event.get("error")?;
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("stream error");
        let code = error.get("status").and_then(Value::as_str).map(str::to_string);
        Some(in_band_error(PROVIDER, message, code, event))
    }

    fn parse_response(&self, body: &Value) -> Result<TurnOutput, Error> {
        if let Some(err) = self.extract_error(body) {
            return Err(err);
        }
        let tool_calls = function_calls(body)
            .enumerate()
            .map(|(i, call)| {
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{i}_{}", uuid::Uuid::new_v4().simple()));
                let args = call
                    .get("args")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                ToolCall::new(
                    id,
                    call.get("name").and_then(Value::as_str).unwrap_or_default(),
                    ToolArguments::Structured(args),
                )
            })
            .collect();

        Ok(TurnOutput {
            id: body
                .get("responseId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            model: body
                .get("modelVersion")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            provider: PROVIDER.to_string(),
            text: collect_text(body, false).unwrap_or_default(),
            thinking: collect_text(body, true),
            thinking_signature: None,
            tool_calls,
            citations: grounding_citations(body),
            usage: body
                .get("usageMetadata")
                .and_then(parse_usage)
                .unwrap_or_default(),
            finish_reason: self.map_finish_reason(body),
            rate_limit: None,
        })
    }
}

/// Builds `generateContent` / `streamGenerateContent` bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiPayload;

fn contents(request: &Request) -> (Vec<String>, Vec<Value>) {
    let mut system: Vec<String> = request.system_prompts().to_vec();
    let mut contents = Vec::new();

    for message in request.messages() {
        match message.role {
            Role::System => system.push(message.content.clone()),
            Role::User => contents.push(json!({"role": "user", "parts": [{"text": message.content}]})),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !message.content.is_empty() {
                    parts.push(json!({"text": message.content}));
                }
                for call in &message.tool_calls {
                    parts.push(json!({"functionCall": {
                        "name": call.name,
                        "args": Value::Object(call.arguments()),
                    }}));
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
            Role::ToolResult => {
                let parts: Vec<Value> = message
                    .tool_results
                    .iter()
                    .map(|result| {
                        json!({"functionResponse": {
                            "name": result.tool_name,
                            "response": {"result": result.result},
                        }})
                    })
                    .collect();
                contents.push(json!({"role": "user", "parts": parts}));
            }
        }
    }
    (system, contents)
}

impl PayloadBuilder for GeminiPayload {
    fn path(&self, request: &Request, stream: bool) -> String {
        if stream {
            format!("/models/{}:streamGenerateContent?alt=sse", request.model)
        } else {
            format!("/models/{}:generateContent", request.model)
        }
    }

    fn build(&self, request: &Request, _stream: bool) -> Value {
        let (system, contents) = contents(request);
        let mut body = Map::new();
        body.insert("contents".into(), Value::Array(contents));
        if !system.is_empty() {
            body.insert(
                "systemInstruction".into(),
                json!({"parts": [{"text": system.join("\n\n")}]}),
            );
        }
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body.insert("tools".into(), json!([{"functionDeclarations": declarations}]));
        }

        let mut config = Map::new();
        if let Some(max_tokens) = request.max_tokens {
            config.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            config.insert("temperature".into(), json!(temperature));
        }
        if let Some(ResponseFormat::Json { schema }) = &request.response_format {
            config.insert("responseMimeType".into(), json!("application/json"));
            if let Some(schema) = schema {
                config.insert("responseSchema".into(), schema.clone());
            }
        }
        if !config.is_empty() {
            body.insert("generationConfig".into(), Value::Object(config));
        }

        merge_provider_options(&mut body, request, PROVIDER);
        Value::Object(body)
    }
}
