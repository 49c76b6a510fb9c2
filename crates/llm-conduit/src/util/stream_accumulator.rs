// StreamState: the per-connection accumulator for one streaming turn.

use std::collections::BTreeMap;

use llm_conduit_types::{Citation, FinishReason, RateLimitInfo, ToolArguments, ToolCall, Usage};
use serde_json::{Map, Value};

/// A tool call under construction, keyed by its position index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
    /// Provider item id, when it differs from the id results answer to.
    pub result_id: Option<String>,
    pub reasoning_id: Option<String>,
    pub reasoning_summary: Option<String>,
}

/// A provider reasoning item that later tool calls in the turn refer to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasoningItem {
    pub id: String,
    pub summary: Option<String>,
}

/// Everything one model turn produced, from a stream or a single response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutput {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub text: String,
    pub thinking: Option<String>,
    pub thinking_signature: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub citations: Vec<Citation>,
    pub usage: Usage,
    /// `None` when the provider never reported one.
    pub finish_reason: Option<FinishReason>,
    pub rate_limit: Option<RateLimitInfo>,
}

/// Mutable record owned by exactly one in-flight stream.
///
/// Text and thinking only grow within a turn. Tool-call fragments are merged
/// by index: the first sighting creates the fragment, later sightings append
/// argument text and only fill `id`/`name` if they are still unset.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    pub message_id: Option<String>,
    pub reasoning_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub metadata: Map<String, Value>,
    pub stream_started: bool,
    pub text_started: bool,
    pub thinking_started: bool,
    pub text: String,
    pub thinking: String,
    /// Signature over `thinking`, for providers that require it echoed back.
    pub thinking_signature: Option<String>,
    /// Most recent provider reasoning item of this turn.
    pub reasoning_item: Option<ReasoningItem>,
    pub tool_calls: BTreeMap<usize, ToolCallFragment>,
    /// Calls already finalized by a terminal event this turn.
    pub completed_tool_calls: Vec<ToolCall>,
    pub citations: Vec<Citation>,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

impl StreamState {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// The id text events are tagged with, minted on first use.
    pub fn message_id(&mut self) -> String {
        self.message_id
            .get_or_insert_with(|| format!("msg_{}", uuid::Uuid::new_v4().simple()))
            .clone()
    }

    /// The id thinking events are tagged with, minted on first use.
    pub fn reasoning_id(&mut self) -> String {
        self.reasoning_id
            .get_or_insert_with(|| format!("rs_{}", uuid::Uuid::new_v4().simple()))
            .clone()
    }

    /// Adopt a provider-assigned id unless one is already in use for this turn.
    pub fn observe_message_id(&mut self, id: &str) {
        if self.message_id.is_none() && !id.is_empty() {
            self.message_id = Some(id.to_string());
        }
    }

    pub fn observe_model(&mut self, model: &str) {
        if !model.is_empty() {
            self.model = model.to_string();
        }
    }

    pub fn push_text(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    pub fn push_thinking(&mut self, delta: &str) {
        self.thinking.push_str(delta);
    }

    pub fn push_thinking_signature(&mut self, delta: &str) {
        self.thinking_signature
            .get_or_insert_with(String::new)
            .push_str(delta);
    }

    /// Merge one tool-call delta at `index`.
    pub fn merge_tool_call_fragment(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let fragment = self.tool_calls.entry(index).or_default();
        if fragment.id.is_none() {
            fragment.id = id.filter(|s| !s.is_empty()).map(str::to_string);
        }
        if fragment.name.is_none() {
            fragment.name = name.filter(|s| !s.is_empty()).map(str::to_string);
        }
        if let Some(arguments) = arguments {
            fragment.arguments.push_str(arguments);
        }
    }

    /// Record provider item identity for the fragment at `index`. Like the
    /// id and name, each field is set only once.
    pub fn annotate_tool_call(
        &mut self,
        index: usize,
        result_id: Option<&str>,
        reasoning: Option<&ReasoningItem>,
    ) {
        let fragment = self.tool_calls.entry(index).or_default();
        if fragment.result_id.is_none() {
            fragment.result_id = result_id.filter(|s| !s.is_empty()).map(str::to_string);
        }
        if let Some(reasoning) = reasoning {
            if fragment.reasoning_id.is_none() {
                fragment.reasoning_id = Some(reasoning.id.clone());
                fragment.reasoning_summary = reasoning.summary.clone();
            }
        }
    }

    /// Index one past the highest fragment seen, for providers that deliver
    /// whole calls without a position.
    pub fn next_tool_call_index(&self) -> usize {
        self.tool_calls
            .last_key_value()
            .map(|(index, _)| index + 1)
            .unwrap_or(0)
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Finalize pending fragments and keep them for the turn output.
    /// Returns only the calls closed by this invocation.
    pub fn close_tool_calls(&mut self) -> Vec<ToolCall> {
        let closed = self.finalize_tool_calls();
        self.completed_tool_calls.extend(closed.iter().cloned());
        closed
    }

    /// Drain fragments into tool calls in index order.
    ///
    /// A non-empty argument buffer that parses as a JSON object becomes
    /// structured arguments; anything else is kept raw and parsed lazily,
    /// with a warning so a truncated stream is visible in the logs.
    pub fn finalize_tool_calls(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.tool_calls)
            .into_iter()
            .map(|(index, fragment)| {
                let id = fragment
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                let name = fragment.name.unwrap_or_default();
                let arguments = parse_arguments(&name, index, fragment.arguments);
                ToolCall {
                    result_id: fragment.result_id,
                    reasoning_id: fragment.reasoning_id,
                    reasoning_summary: fragment.reasoning_summary,
                    ..ToolCall::new(id, name, arguments)
                }
            })
            .collect()
    }

    pub fn set_finish_reason(&mut self, reason: FinishReason) {
        self.finish_reason = Some(reason);
    }

    /// Fold a usage report in; providers may report usage in several chunks.
    pub fn record_usage(&mut self, usage: &Usage) {
        self.usage.merge(usage);
    }

    /// Clear per-turn fields, keeping stream identity for the next step.
    pub fn reset_text_state(&mut self) {
        self.message_id = None;
        self.reasoning_id = None;
        self.text_started = false;
        self.thinking_started = false;
        self.text.clear();
        self.thinking.clear();
        self.thinking_signature = None;
        self.reasoning_item = None;
        self.tool_calls.clear();
        self.completed_tool_calls.clear();
        self.citations.clear();
        self.usage = Usage::default();
        self.finish_reason = None;
    }

    /// Clear everything, including stream identity.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Package the turn, finalizing any pending fragments, and reset the
    /// per-turn fields.
    pub fn take_turn(&mut self) -> TurnOutput {
        let mut tool_calls = std::mem::take(&mut self.completed_tool_calls);
        tool_calls.extend(self.finalize_tool_calls());
        let id = self.message_id();
        let turn = TurnOutput {
            id,
            model: self.model.clone(),
            provider: self.provider.clone(),
            text: std::mem::take(&mut self.text),
            thinking: (!self.thinking.is_empty()).then(|| std::mem::take(&mut self.thinking)),
            thinking_signature: self.thinking_signature.take(),
            tool_calls,
            citations: std::mem::take(&mut self.citations),
            usage: self.usage.clone(),
            finish_reason: self.finish_reason.take(),
            rate_limit: None,
        };
        self.reset_text_state();
        turn
    }
}

fn parse_arguments(name: &str, index: usize, buffer: String) -> ToolArguments {
    if buffer.trim().is_empty() {
        return ToolArguments::Structured(Map::new());
    }
    match serde_json::from_str::<Value>(&buffer) {
        Ok(Value::Object(map)) => ToolArguments::Structured(map),
        _ => {
            let preview: String = buffer.chars().take(200).collect();
            tracing::warn!(
                tool = name,
                index,
                arguments = %preview,
                "accumulated tool arguments are not a JSON object"
            );
            ToolArguments::Raw(buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_sighting_creates_fragment_then_appends() {
        let mut state = StreamState::new("openai", "gpt");
        state.merge_tool_call_fragment(0, Some("call_1"), Some("search"), Some("{\"q\":"));
        state.merge_tool_call_fragment(0, None, None, Some("\"rust\"}"));
        let fragment = &state.tool_calls[&0];
        assert_eq!(fragment.id.as_deref(), Some("call_1"));
        assert_eq!(fragment.name.as_deref(), Some("search"));
        assert_eq!(fragment.arguments, "{\"q\":\"rust\"}");
    }

    #[test]
    fn test_name_and_id_are_set_once() {
        let mut state = StreamState::default();
        state.merge_tool_call_fragment(0, Some("call_1"), Some("search"), None);
        state.merge_tool_call_fragment(0, Some("call_2"), Some("other"), Some("{}"));
        let fragment = &state.tool_calls[&0];
        assert_eq!(fragment.id.as_deref(), Some("call_1"));
        assert_eq!(fragment.name.as_deref(), Some("search"));
    }

    #[test]
    fn test_interleaved_indexes_finalize_in_index_order() {
        let mut state = StreamState::default();
        state.merge_tool_call_fragment(1, Some("b"), Some("second"), Some("{\"n\":"));
        state.merge_tool_call_fragment(0, Some("a"), Some("first"), Some("{\"n\":"));
        state.merge_tool_call_fragment(1, None, None, Some("2}"));
        state.merge_tool_call_fragment(0, None, None, Some("1}"));

        let calls = state.finalize_tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[0].arguments()["n"], 1);
        assert_eq!(calls[1].name, "second");
        assert_eq!(calls[1].arguments()["n"], 2);
        assert!(!state.has_pending_tool_calls());
    }

    #[test]
    fn test_reassembly_over_every_two_way_split() {
        let full = r#"{"city":"Zürich","days":[1,2,3],"units":"metric"}"#;
        let expected = serde_json::from_str::<Value>(full).unwrap();
        let boundaries: Vec<usize> = full.char_indices().map(|(i, _)| i).skip(1).collect();
        for split in boundaries {
            let mut state = StreamState::default();
            state.merge_tool_call_fragment(0, Some("c"), Some("weather"), Some(&full[..split]));
            state.merge_tool_call_fragment(0, None, None, Some(&full[split..]));
            let calls = state.finalize_tool_calls();
            assert_eq!(Value::Object(calls[0].arguments()), expected, "split at {split}");
        }
    }

    #[test]
    fn test_empty_argument_buffer_is_empty_mapping() {
        let mut state = StreamState::default();
        state.merge_tool_call_fragment(0, Some("c"), Some("now"), None);
        let calls = state.finalize_tool_calls();
        assert!(calls[0].arguments().is_empty());
    }

    #[test]
    fn test_unparseable_arguments_kept_raw() {
        let mut state = StreamState::default();
        state.merge_tool_call_fragment(0, Some("c"), Some("t"), Some("{\"a\":"));
        let calls = state.finalize_tool_calls();
        assert_eq!(calls[0].raw_arguments, ToolArguments::Raw("{\"a\":".into()));
        assert!(calls[0].try_arguments().is_err());
    }

    #[test]
    fn test_missing_id_gets_generated() {
        let mut state = StreamState::default();
        state.merge_tool_call_fragment(0, None, Some("t"), Some("{}"));
        let calls = state.finalize_tool_calls();
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_closed_calls_are_kept_for_the_turn() {
        let mut state = StreamState::default();
        state.merge_tool_call_fragment(0, Some("a"), Some("first"), Some("{}"));
        let closed = state.close_tool_calls();
        assert_eq!(closed.len(), 1);
        state.merge_tool_call_fragment(1, Some("b"), Some("late"), Some("{}"));

        let turn = state.take_turn();
        let names: Vec<&str> = turn.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["first", "late"]);
        assert!(state.completed_tool_calls.is_empty());
    }

    #[test]
    fn test_annotation_reaches_finalized_call() {
        let mut state = StreamState::default();
        let reasoning = ReasoningItem {
            id: "rs_1".into(),
            summary: Some("compare both".into()),
        };
        state.merge_tool_call_fragment(0, Some("call_1"), Some("lookup"), Some("{}"));
        state.annotate_tool_call(0, Some("fc_1"), Some(&reasoning));
        state.annotate_tool_call(0, Some("fc_2"), None);

        let calls = state.finalize_tool_calls();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].result_id.as_deref(), Some("fc_1"));
        assert_eq!(calls[0].reasoning_id.as_deref(), Some("rs_1"));
        assert_eq!(calls[0].reasoning_summary.as_deref(), Some("compare both"));
    }

    #[test]
    fn test_next_tool_call_index() {
        let mut state = StreamState::default();
        assert_eq!(state.next_tool_call_index(), 0);
        state.merge_tool_call_fragment(3, Some("c"), Some("t"), None);
        assert_eq!(state.next_tool_call_index(), 4);
    }

    #[test]
    fn test_reset_text_state_preserves_stream_identity() {
        let mut state = StreamState::new("anthropic", "claude");
        state.stream_started = true;
        state.text_started = true;
        state.push_text("hi");
        state.push_thinking("hmm");
        state.push_thinking_signature("sig");
        state.message_id();
        state.merge_tool_call_fragment(0, Some("c"), Some("t"), None);
        state.citations.push(Citation::default());
        state.set_finish_reason(FinishReason::Stop);

        state.reset_text_state();
        assert!(state.stream_started);
        assert_eq!(state.provider, "anthropic");
        assert_eq!(state.model, "claude");
        assert!(!state.text_started);
        assert!(state.text.is_empty() && state.thinking.is_empty());
        assert!(state.thinking_signature.is_none());
        assert!(state.message_id.is_none());
        assert!(state.tool_calls.is_empty() && state.citations.is_empty());
        assert!(state.finish_reason.is_none());
    }

    #[test]
    fn test_reset_clears_identity() {
        let mut state = StreamState::new("gemini", "flash");
        state.stream_started = true;
        state.metadata.insert("k".into(), json!(1));
        state.reset();
        assert!(!state.stream_started);
        assert!(state.provider.is_empty() && state.model.is_empty());
        assert!(state.metadata.is_empty());
    }

    #[test]
    fn test_message_id_is_stable_within_turn() {
        let mut state = StreamState::default();
        state.observe_message_id("chatcmpl-1");
        assert_eq!(state.message_id(), "chatcmpl-1");
        state.observe_message_id("chatcmpl-2");
        assert_eq!(state.message_id(), "chatcmpl-1");
    }

    #[test]
    fn test_take_turn_packages_and_resets() {
        let mut state = StreamState::new("openai", "gpt");
        state.stream_started = true;
        state.push_text("Hello");
        state.push_text(" world");
        state.record_usage(&Usage::new(10, 3));
        state.set_finish_reason(FinishReason::Stop);

        let turn = state.take_turn();
        assert_eq!(turn.text, "Hello world");
        assert_eq!(turn.thinking, None);
        assert_eq!(turn.usage.prompt_tokens, 10);
        assert_eq!(turn.usage.completion_tokens, 3);
        assert_eq!(turn.finish_reason, Some(FinishReason::Stop));
        assert_eq!(turn.provider, "openai");
        assert!(state.text.is_empty());
        assert!(state.stream_started);
    }
}
