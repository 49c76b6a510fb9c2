// api/types.rs: Tool (definition + handler) and the tool-execution telemetry seam.

use std::sync::Arc;

use llm_conduit_types::{BoxFuture, Error, ToolCall, ToolDefinition};
use serde_json::{Map, Value};

/// Handler invoked with the parsed, schema-checked arguments of a call.
pub type ToolHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<String, Error>> + Send + Sync>;

/// Turns a handler failure into a result string for the model.
/// Called with (tool name, error).
pub type FailureHandler = Arc<dyn Fn(&str, &Error) -> String + Send + Sync>;

/// A tool the agent loop can execute.
///
/// Tools are sequential unless marked [`concurrent`](Tool::concurrent). A
/// failing handler raises a `ToolExecution` error, unless a failure handler
/// is installed, in which case the failure becomes the call's result.
pub struct Tool {
    pub definition: ToolDefinition,
    handler: ToolHandler,
    concurrent: bool,
    failure_handler: Option<FailureHandler>,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: impl Fn(Map<String, Value>) -> BoxFuture<'static, Result<String, Error>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self::from_definition(ToolDefinition::new(name, description, parameters), handler)
    }

    pub fn from_definition(
        definition: ToolDefinition,
        handler: impl Fn(Map<String, Value>) -> BoxFuture<'static, Result<String, Error>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            definition,
            handler: Arc::new(handler),
            concurrent: false,
            failure_handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Allow this tool to run in parallel with other concurrent calls of the
    /// same turn.
    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    pub fn with_failure_handler(
        mut self,
        handler: impl Fn(&str, &Error) -> String + Send + Sync + 'static,
    ) -> Self {
        self.failure_handler = Some(Arc::new(handler));
        self
    }

    /// Report failures to the model as `Error executing tool <name>: <message>`.
    pub fn with_default_failure_handler(self) -> Self {
        self.with_failure_handler(|name, err| {
            format!("Error executing tool {name}: {}", err.message)
        })
    }

    /// Revert to raising handler failures.
    pub fn without_failure_handler(mut self) -> Self {
        self.failure_handler = None;
        self
    }

    pub fn has_failure_handler(&self) -> bool {
        self.failure_handler.is_some()
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.definition.validate()
    }

    pub(crate) fn invoke(&self, arguments: Map<String, Value>) -> BoxFuture<'static, Result<String, Error>> {
        (self.handler)(arguments)
    }

    pub(crate) fn handle_failure(&self, err: &Error) -> Option<String> {
        self.failure_handler
            .as_ref()
            .map(|handler| handler(self.name(), err))
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("definition", &self.definition)
            .field("handler", &"...")
            .field("concurrent", &self.concurrent)
            .field("failure_handler", &self.failure_handler.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Observability seam around tool execution. The executor runs each call
/// inside the span returned here.
pub trait Telemetry: Send + Sync {
    fn tool_span(&self, call: &ToolCall, argument_count: usize) -> tracing::Span;
}

/// `info_span!("tool.execute")` tagged with tool name, call id and argument count.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn tool_span(&self, call: &ToolCall, argument_count: usize) -> tracing::Span {
        tracing::info_span!(
            "tool.execute",
            tool.name = %call.name,
            tool.call_id = %call.id,
            tool.argument_count = argument_count,
        )
    }
}

/// Disabled spans; execution is otherwise identical.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn tool_span(&self, _call: &ToolCall, _argument_count: usize) -> tracing::Span {
        tracing::Span::none()
    }
}
