// api/state.rs: agent loop transitions shared by generate() and stream().

use llm_conduit_types::{Error, ErrorKind, FinishReason, ToolCall};
use serde_json::Value;

use crate::util::stream_accumulator::TurnOutput;

/// Name of the schema-extraction tool registered for `ResponseFormat::Tool`.
/// Its arguments are the structured result; it is never executed.
pub const STRUCTURED_OUTPUT_TOOL: &str = "output_structured_data";

/// Where the agent loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Requesting,
    Streaming,
    Complete,
    ToolCallsPending,
    ExecutingTools,
    Continuing,
    Done,
}

/// What a finished turn asks the loop to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Record the step and stop.
    Finish { structured: Option<Value> },
    /// Execute `calls`, append the messages, then consult [`after_tools`].
    ExecuteTools {
        calls: Vec<ToolCall>,
        structured: Option<Value>,
    },
}

impl TurnOutcome {
    pub fn state(&self) -> LoopState {
        match self {
            Self::Finish { .. } => LoopState::Done,
            Self::ExecuteTools { .. } => LoopState::ToolCallsPending,
        }
    }
}

/// Decide the transition out of a completed turn.
///
/// Custom tool calls are executed whatever the finish reason says, which
/// covers providers that end the stream on `stop` with calls pending. A
/// lone structured-output call finishes at once. Without calls, `Stop` and
/// `Length` finish; a missing finish reason is read as a clean end of
/// stream; anything else is an error.
pub fn classify_turn(turn: &TurnOutput) -> Result<TurnOutcome, Error> {
    let (structured_calls, custom): (Vec<&ToolCall>, Vec<&ToolCall>) = turn
        .tool_calls
        .iter()
        .partition(|call| call.name == STRUCTURED_OUTPUT_TOOL);
    let structured = structured_calls
        .first()
        .map(|call| Value::Object(call.arguments()));

    if !custom.is_empty() {
        return Ok(TurnOutcome::ExecuteTools {
            calls: custom.into_iter().cloned().collect(),
            structured,
        });
    }
    if structured.is_some() {
        return Ok(TurnOutcome::Finish { structured });
    }

    match &turn.finish_reason {
        None | Some(FinishReason::Stop) | Some(FinishReason::Length) => {
            Ok(TurnOutcome::Finish { structured: None })
        }
        Some(FinishReason::ToolCalls) => {
            tracing::warn!(
                provider = %turn.provider,
                model = %turn.model,
                "finish reason tool_calls without any tool call"
            );
            Ok(TurnOutcome::Finish { structured: None })
        }
        Some(FinishReason::ContentFilter) => Err(Error {
            provider: Some(turn.provider.clone()),
            model: Some(turn.model.clone()),
            raw: Some(Value::String(FinishReason::ContentFilter.as_str().to_string())),
            ..Error::new(
                ErrorKind::ContentFilter,
                format!(
                    "{} model '{}' stopped generating: content filter",
                    turn.provider, turn.model
                ),
            )
        }),
        Some(FinishReason::Unknown(raw)) => {
            Err(Error::unknown_finish_reason(&turn.provider, &turn.model, raw))
        }
    }
}

/// Transition after a turn's tools ran.
///
/// A structured result already in hand ends the loop. Otherwise the loop
/// continues while `steps_so_far < max_steps`; exhausting the budget is
/// logged and ends the loop with the tool results recorded.
pub fn after_tools(structured_present: bool, steps_so_far: u32, max_steps: u32) -> LoopState {
    if structured_present {
        LoopState::Done
    } else if steps_so_far < max_steps {
        LoopState::Continuing
    } else {
        tracing::info!(
            steps = steps_so_far,
            max_steps,
            "step budget exhausted after tool execution, stopping"
        );
        LoopState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn turn(reason: Option<FinishReason>, calls: Vec<ToolCall>) -> TurnOutput {
        TurnOutput {
            provider: "mock".into(),
            model: "m".into(),
            finish_reason: reason,
            tool_calls: calls,
            ..Default::default()
        }
    }

    fn structured_call() -> ToolCall {
        let args = json!({"answer": 42}).as_object().cloned().unwrap_or_default();
        ToolCall::new("s1", STRUCTURED_OUTPUT_TOOL, args)
    }

    fn custom_call() -> ToolCall {
        ToolCall::new("c1", "lookup", Map::new())
    }

    #[test]
    fn test_stop_and_length_finish() {
        for reason in [Some(FinishReason::Stop), Some(FinishReason::Length), None] {
            let outcome = classify_turn(&turn(reason, vec![])).unwrap();
            assert_eq!(outcome, TurnOutcome::Finish { structured: None });
            assert_eq!(outcome.state(), LoopState::Done);
        }
    }

    #[test]
    fn test_tool_calls_execute() {
        let outcome = classify_turn(&turn(Some(FinishReason::ToolCalls), vec![custom_call()])).unwrap();
        assert_eq!(outcome.state(), LoopState::ToolCallsPending);
        match outcome {
            TurnOutcome::ExecuteTools { calls, structured } => {
                assert_eq!(calls.len(), 1);
                assert!(structured.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_pending_calls_with_stop_still_execute() {
        let outcome = classify_turn(&turn(Some(FinishReason::Stop), vec![custom_call()])).unwrap();
        assert!(matches!(outcome, TurnOutcome::ExecuteTools { .. }));
    }

    #[test]
    fn test_structured_only_finishes_immediately() {
        let outcome =
            classify_turn(&turn(Some(FinishReason::ToolCalls), vec![structured_call()])).unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Finish {
                structured: Some(json!({"answer": 42}))
            }
        );
    }

    #[test]
    fn test_custom_and_structured_execute_custom_only() {
        let outcome = classify_turn(&turn(
            Some(FinishReason::ToolCalls),
            vec![structured_call(), custom_call()],
        ))
        .unwrap();
        match outcome {
            TurnOutcome::ExecuteTools { calls, structured } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "lookup");
                assert_eq!(structured, Some(json!({"answer": 42})));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_content_filter_is_error() {
        let err = classify_turn(&turn(Some(FinishReason::ContentFilter), vec![])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContentFilter);
        assert_eq!(err.provider.as_deref(), Some("mock"));
    }

    #[test]
    fn test_unknown_finish_reason_is_error() {
        let err = classify_turn(&turn(Some(FinishReason::Unknown("weird".into())), vec![]))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownFinishReason);
        assert!(err.message.contains("weird"));
        assert_eq!(err.model.as_deref(), Some("m"));
    }

    #[test]
    fn test_after_tools_budget() {
        assert_eq!(after_tools(false, 1, 3), LoopState::Continuing);
        assert_eq!(after_tools(false, 3, 3), LoopState::Done);
        assert_eq!(after_tools(true, 1, 3), LoopState::Done);
    }
}
