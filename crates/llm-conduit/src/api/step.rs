// api/step.rs: Step construction and the Response aggregate.

use llm_conduit_types::{
    AdditionalContent, Error, FinishReason, Request, Response, Step, StepMeta, ToolResult, Usage,
};
use serde_json::Value;

use crate::util::stream_accumulator::TurnOutput;

/// Build the immutable record of one turn.
///
/// `messages` and `system_prompts` are the conversation as it was sent. A
/// missing finish reason is recorded as `Stop`.
pub fn build_step(
    turn: TurnOutput,
    request: &Request,
    tool_results: Vec<ToolResult>,
    structured_data: Option<Value>,
) -> Step {
    Step {
        text: turn.text,
        finish_reason: turn.finish_reason.unwrap_or(FinishReason::Stop),
        usage: turn.usage,
        meta: StepMeta {
            id: turn.id,
            model: turn.model,
            provider: turn.provider,
            rate_limit: turn.rate_limit,
        },
        tool_calls: turn.tool_calls,
        tool_results,
        messages: request.messages().to_vec(),
        system_prompts: request.system_prompts().to_vec(),
        additional_content: AdditionalContent {
            thinking: turn.thinking,
            thinking_signature: turn.thinking_signature,
            citations: turn.citations,
        },
        structured_data,
    }
}

/// Accumulates steps and folds them into a [`Response`].
#[derive(Debug, Clone, Default)]
pub struct ResponseBuilder {
    steps: Vec<Step>,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Usage summed over every step so far.
    pub fn total_usage(&self) -> Usage {
        self.steps.iter().map(|s| s.usage.clone()).sum()
    }

    /// Fold the steps into a response. With `decode_structured`, the last
    /// step yields a structured value or the call fails.
    pub fn to_response(&self, decode_structured: bool) -> Result<Response, Error> {
        let last = self
            .steps
            .last()
            .ok_or_else(|| Error::configuration("no steps recorded"))?;

        let structured = if decode_structured {
            Some(match &last.structured_data {
                Some(value) => value.clone(),
                None => decode_structured_text(&last.text, &last.meta.model, &last.finish_reason)?,
            })
        } else {
            None
        };

        Ok(Response {
            text: last.text.clone(),
            finish_reason: last.finish_reason.clone(),
            tool_calls: self.steps.iter().flat_map(|s| s.tool_calls.clone()).collect(),
            tool_results: self
                .steps
                .iter()
                .flat_map(|s| s.tool_results.clone())
                .collect(),
            usage: self.total_usage(),
            structured,
            steps: self.steps.clone(),
        })
    }
}

/// Parse `text` as JSON, retrying without one surrounding Markdown fence.
pub fn decode_structured_text(
    text: &str,
    model: &str,
    finish_reason: &FinishReason,
) -> Result<Value, Error> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Ok(value);
    }
    strip_code_fence(text)
        .and_then(|inner| serde_json::from_str(inner).ok())
        .ok_or_else(|| Error::structured_decode(model, finish_reason, text))
}

/// Inner text of a single leading/trailing fenced block (```json ... ```).
fn strip_code_fence(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let body = trimmed.strip_prefix("```")?.strip_suffix("```")?;
    // Drop the info string (e.g. "json") on the opening line.
    let body = match body.find('\n') {
        Some(newline) => &body[newline + 1..],
        None => body,
    };
    Some(body.trim())
}
