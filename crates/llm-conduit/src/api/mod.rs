// api/mod.rs: agent loop: tools, execution, transitions, step aggregation.

pub mod generate;
pub mod state;
pub mod step;
pub mod stream;
pub mod tool_loop;
pub mod types;

pub use generate::generate;
pub use state::{LoopState, STRUCTURED_OUTPUT_TOOL, TurnOutcome};
pub use step::ResponseBuilder;
pub use stream::{StreamResult, TextDeltaStream, stream};
pub use tool_loop::{ToolExecutor, resolve};
pub use types::*;

use llm_conduit_types::{Error, Request, ResponseFormat, ToolDefinition};

/// Validate the request and tools, then make sure every registered tool (and
/// the structured-output tool, when asked for) is declared to the provider.
pub(crate) fn prepare_request(request: &mut Request, tools: &[Tool]) -> Result<(), Error> {
    request.validate()?;
    for tool in tools {
        tool.validate()?;
        if !request.tools.iter().any(|d| d.name == tool.name()) {
            request.tools.push(tool.definition.clone());
        }
    }

    if let Some(ResponseFormat::Tool { schema }) = &request.response_format {
        if !request.tools.iter().any(|d| d.name == STRUCTURED_OUTPUT_TOOL) {
            let definition = ToolDefinition::new(
                STRUCTURED_OUTPUT_TOOL,
                "Return the final answer as structured data matching the parameters schema.",
                schema.clone(),
            );
            definition.validate()?;
            request.tools.push(definition);
        }
    }
    Ok(())
}
