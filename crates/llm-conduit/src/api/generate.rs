// api/generate.rs: single-shot agent loop.
//
// One blocking provider call per depth level; tool calls are executed and
// fed back until the turn finishes or the step budget runs out.

use llm_conduit_types::{Error, Message, Request, Response};

use crate::providers::Provider;

use super::prepare_request;
use super::state::{LoopState, TurnOutcome, after_tools, classify_turn};
use super::step::{ResponseBuilder, build_step};
use super::tool_loop::ToolExecutor;
use super::types::Tool;

/// Run the agent loop without streaming and return the aggregated response.
///
/// Errors from the provider, from tool resolution or execution, and from a
/// finish reason the loop cannot act on end the call. When the request asks
/// for a response format, the final step must decode into a structured value.
pub async fn generate(
    provider: &Provider,
    tools: &[Tool],
    executor: &ToolExecutor,
    mut request: Request,
) -> Result<Response, Error> {
    prepare_request(&mut request, tools)?;

    let decode = request.response_format.is_some();
    let max_steps = request.max_steps();
    let mut builder = ResponseBuilder::new();
    let mut depth: u32 = 0;

    loop {
        depth += 1;
        tracing::debug!(
            depth,
            state = ?LoopState::Requesting,
            provider = provider.name(),
            "agent loop"
        );

        let mut turn = provider.complete(&request).await?;
        if turn.id.is_empty() {
            turn.id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        }

        match classify_turn(&turn)? {
            TurnOutcome::Finish { structured } => {
                builder.add_step(build_step(turn, &request, Vec::new(), structured));
                break;
            }
            TurnOutcome::ExecuteTools { calls, structured } => {
                tracing::debug!(
                    depth,
                    state = ?LoopState::ExecutingTools,
                    calls = calls.len(),
                    "agent loop"
                );
                let results = executor.execute_all(tools, &calls).await?;

                let assistant = Message::assistant_with_tool_calls(
                    turn.text.clone(),
                    turn.tool_calls.clone(),
                )
                .with_thinking(turn.thinking.clone(), turn.thinking_signature.clone());
                let structured_present = structured.is_some();
                builder.add_step(build_step(turn, &request, results.clone(), structured));
                request.add_message(assistant);
                request.add_message(Message::tool_results(results));

                if after_tools(structured_present, depth, max_steps) == LoopState::Done {
                    break;
                }
            }
        }
    }

    builder.to_response(decode)
}
