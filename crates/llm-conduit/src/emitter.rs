// Canonical event emitter: turns classifier output into the
// Start/Delta/Complete lifecycle consumers see.

use llm_conduit_types::{Error, FinishReason, StreamEvent, StreamEventKind, ToolResult, Usage};
use serde_json::Value;

use crate::providers::{EventClassifier, settle_finish_reason};
use crate::util::stream_accumulator::{StreamState, TurnOutput};
use crate::util::stream_lifecycle::StreamLifecycle;

/// Produces canonical events in the order provider chunks are read.
///
/// Text and thinking blocks are opened on their first non-empty delta and
/// closed when the terminal event arrives (or the stream ends without one).
/// Every event passes through a [`StreamLifecycle`] check on its way out.
#[derive(Debug, Default)]
pub struct CanonicalEmitter {
    lifecycle: StreamLifecycle,
}

impl CanonicalEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, kind: StreamEventKind) -> StreamEvent {
        let event = StreamEvent::new(kind);
        self.lifecycle.observe(&event);
        event
    }

    /// `StreamStart`, unless this stream already announced itself.
    pub fn ensure_started(&mut self, state: &mut StreamState) -> Option<StreamEvent> {
        if state.stream_started {
            return None;
        }
        state.stream_started = true;
        Some(self.emit(StreamEventKind::StreamStart {
            model: state.model.clone(),
            provider: state.provider.clone(),
            metadata: state.metadata.clone(),
        }))
    }

    /// Classify one decoded payload and emit whatever it implies.
    ///
    /// An in-band provider error is returned as `Err` before anything else
    /// is recorded.
    pub fn process(
        &mut self,
        classifier: &dyn EventClassifier,
        payload: &Value,
        state: &mut StreamState,
    ) -> Result<Vec<StreamEvent>, Error> {
        if let Some(err) = classifier.extract_error(payload) {
            return Err(err);
        }

        classifier.observe(payload, state);
        let mut events: Vec<StreamEvent> = self.ensure_started(state).into_iter().collect();

        if let Some(tool) = classifier.extract_provider_tool_event(payload) {
            events.push(self.emit(StreamEventKind::ProviderToolEvent {
                tool_type: tool.tool_type,
                status: tool.status,
                item_id: tool.item_id,
                data: tool.data,
            }));
        }

        let thinking = classifier.extract_thinking_delta(payload);
        let text = classifier.extract_text_delta(payload);
        if state.finish_reason.is_some() && (thinking.is_some() || text.is_some()) {
            tracing::debug!(provider = %state.provider, "dropping content delta after finish");
        } else {
            if let Some(delta) = thinking {
                let reasoning_id = state.reasoning_id();
                if !state.thinking_started {
                    state.thinking_started = true;
                    events.push(self.emit(StreamEventKind::ThinkingStart {
                        reasoning_id: reasoning_id.clone(),
                    }));
                }
                state.push_thinking(&delta);
                events.push(self.emit(StreamEventKind::ThinkingDelta {
                    delta,
                    reasoning_id,
                }));
            }
            if let Some(delta) = text {
                let message_id = state.message_id();
                if !state.text_started {
                    state.text_started = true;
                    events.push(self.emit(StreamEventKind::TextStart {
                        message_id: message_id.clone(),
                    }));
                }
                state.push_text(&delta);
                events.push(self.emit(StreamEventKind::TextDelta { delta, message_id }));
            }
        }

        if classifier.has_tool_calls(payload) {
            classifier.extract_tool_call_delta(payload, state);
        }

        for (citation, block_index) in classifier.extract_citations(payload) {
            state.citations.push(citation.clone());
            let message_id = state.message_id();
            events.push(self.emit(StreamEventKind::Citation {
                citation,
                message_id,
                block_index,
            }));
        }

        if let Some(usage) = classifier.extract_usage(payload) {
            state.record_usage(&usage);
        }

        if let Some(reason) = classifier.map_finish_reason(payload) {
            let has_tool_calls =
                state.has_pending_tool_calls() || !state.completed_tool_calls.is_empty();
            state.set_finish_reason(settle_finish_reason(reason, has_tool_calls));
            events.extend(self.close_blocks(state));
        }

        Ok(events)
    }

    /// Complete open blocks and surface finalized tool calls.
    fn close_blocks(&mut self, state: &mut StreamState) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if state.thinking_started {
            state.thinking_started = false;
            let reasoning_id = state.reasoning_id();
            events.push(self.emit(StreamEventKind::ThinkingComplete { reasoning_id }));
        }
        if state.text_started {
            state.text_started = false;
            let message_id = state.message_id();
            events.push(self.emit(StreamEventKind::TextComplete { message_id }));
        }
        let calls = state.close_tool_calls();
        if !calls.is_empty() {
            let message_id = state.message_id();
            for tool_call in calls {
                events.push(self.emit(StreamEventKind::ToolCall {
                    tool_call,
                    message_id: message_id.clone(),
                }));
            }
        }
        events
    }

    /// End of the provider stream: close anything still open and hand back
    /// the turn. The state is left ready for the next step.
    pub fn finish_turn(&mut self, state: &mut StreamState) -> (Vec<StreamEvent>, TurnOutput) {
        let mut events: Vec<StreamEvent> = self.ensure_started(state).into_iter().collect();
        events.extend(self.close_blocks(state));
        (events, state.take_turn())
    }

    pub fn tool_result(&mut self, result: &ToolResult, message_id: &str) -> StreamEvent {
        self.emit(StreamEventKind::ToolResult {
            tool_result: result.clone(),
            message_id: message_id.to_string(),
            success: !result.is_error,
            error: result.is_error.then(|| result.result.clone()),
        })
    }

    pub fn step_finish(&mut self) -> StreamEvent {
        let event = self.emit(StreamEventKind::StepFinish {});
        self.lifecycle.next_step();
        event
    }

    pub fn stream_end(&mut self, finish_reason: FinishReason, usage: Usage) -> StreamEvent {
        self.emit(StreamEventKind::StreamEnd {
            finish_reason,
            usage,
        })
    }

    pub fn error(&mut self, error: &Error) -> StreamEvent {
        let event = StreamEvent::from_error(error);
        self.lifecycle.observe(&event);
        event
    }

    /// Ordering violations seen so far; zero for a healthy stream.
    pub fn violations(&self) -> usize {
        self.lifecycle.violations()
    }
}
