// api/tool_loop.rs: tool resolution and execution.
//
// Every call of a turn is resolved before anything runs. Concurrent tools run
// together via join_all while the rest run one after another; results always
// come back in call order.

use std::sync::Arc;

use futures::future::join_all;
use llm_conduit_types::{Error, ErrorKind, ToolCall, ToolResult};
use serde_json::{Map, Value};
use tracing::Instrument;

use super::types::{Telemetry, Tool, TracingTelemetry};

/// Find the single tool registered under `name`.
pub fn resolve<'a>(name: &str, tools: &'a [Tool]) -> Result<&'a Tool, Error> {
    let mut matches = tools.iter().filter(|t| t.name() == name);
    match (matches.next(), matches.count()) {
        (None, _) => Err(Error::tool_not_found(name)),
        (Some(tool), 0) => Ok(tool),
        (Some(_), rest) => Err(Error::ambiguous_tool(name, rest + 1)),
    }
}

/// Check arguments against the tool's parameter schema.
fn validate_arguments(tool: &Tool, arguments: &Map<String, Value>) -> Result<(), Error> {
    let validator = jsonschema::validator_for(&tool.definition.parameters)
        .map_err(|e| Error::invalid_tool_parameters(tool.name(), format!("invalid schema: {e}")))?;
    let instance = Value::Object(arguments.clone());
    match validator.iter_errors(&instance).next() {
        Some(violation) => Err(Error::invalid_tool_parameters(tool.name(), violation)),
        None => Ok(()),
    }
}

/// Runs resolved tool calls inside telemetry spans.
#[derive(Clone)]
pub struct ToolExecutor {
    telemetry: Arc<dyn Telemetry>,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new(Arc::new(TracingTelemetry))
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor").finish_non_exhaustive()
    }
}

impl ToolExecutor {
    pub fn new(telemetry: Arc<dyn Telemetry>) -> Self {
        Self { telemetry }
    }

    /// Execute one call against an already-resolved tool.
    ///
    /// Unparseable or schema-violating arguments are `InvalidToolParameters`.
    /// A handler failure is `ToolExecution`, or a result string with
    /// `is_error` set when the tool has a failure handler.
    pub async fn execute(&self, tool: &Tool, call: &ToolCall) -> Result<ToolResult, Error> {
        let arguments = call
            .try_arguments()
            .map_err(|e| Error::invalid_tool_parameters(tool.name(), e))?;
        validate_arguments(tool, &arguments)?;

        let span = self.telemetry.tool_span(call, arguments.len());
        let outcome = tool.invoke(arguments.clone()).instrument(span).await;

        match outcome {
            Ok(result) => Ok(ToolResult::success(call, arguments, result)),
            Err(err) if err.kind == ErrorKind::InvalidToolParameters => Err(err),
            Err(err) => match tool.handle_failure(&err) {
                Some(result) => Ok(ToolResult {
                    is_error: true,
                    ..ToolResult::success(call, arguments, result)
                }),
                None => {
                    let detail = err.message.clone();
                    Err(Error {
                        source: Some(Box::new(err)),
                        ..Error::tool_execution(tool.name(), detail)
                    })
                }
            },
        }
    }

    /// Resolve and execute every call of one turn.
    ///
    /// Resolution failures are raised before any tool runs. Otherwise all
    /// calls run to completion and the first failure in call order is
    /// returned.
    pub async fn execute_all(
        &self,
        tools: &[Tool],
        calls: &[ToolCall],
    ) -> Result<Vec<ToolResult>, Error> {
        let resolved = calls
            .iter()
            .map(|call| resolve(&call.name, tools))
            .collect::<Result<Vec<_>, _>>()?;

        let (parallel, sequential): (Vec<usize>, Vec<usize>) =
            (0..calls.len()).partition(|&i| resolved[i].is_concurrent());

        let resolved = &resolved;
        let parallel_run = join_all(
            parallel
                .iter()
                .map(|&i| async move { (i, self.execute(resolved[i], &calls[i]).await) }),
        );
        let sequential_run = async move {
            let mut out = Vec::with_capacity(sequential.len());
            for i in sequential {
                out.push((i, self.execute(resolved[i], &calls[i]).await));
            }
            out
        };
        let (parallel_results, sequential_results) =
            futures::future::join(parallel_run, sequential_run).await;

        let mut slots: Vec<Option<Result<ToolResult, Error>>> =
            std::iter::repeat_with(|| None).take(calls.len()).collect();
        for (i, result) in parallel_results.into_iter().chain(sequential_results) {
            slots[i] = Some(result);
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(Error::configuration("tool call was not executed")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::NoopTelemetry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn tool(
        name: &str,
        handler: impl Fn(Map<String, Value>) -> Result<String, Error> + Send + Sync + 'static,
    ) -> Tool {
        let handler = Arc::new(handler);
        Tool::new(
            name,
            "test tool",
            json!({"type": "object", "properties": {"n": {"type": "integer"}}}),
            move |args| {
                let handler = handler.clone();
                Box::pin(async move { handler(args) })
            },
        )
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::new(id, name, args.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_resolve_exactly_one() {
        let tools = vec![tool("a", |_| Ok("a".into())), tool("b", |_| Ok("b".into()))];
        assert_eq!(resolve("b", &tools).unwrap().name(), "b");

        let err = resolve("missing", &tools).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolNotFound);

        let dup = vec![tool("a", |_| Ok("1".into())), tool("a", |_| Ok("2".into()))];
        let err = resolve("a", &dup).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AmbiguousTool);
        assert!(err.message.contains('2'));
    }

    #[tokio::test]
    async fn test_execute_records_args_and_result() {
        let executor = ToolExecutor::new(Arc::new(NoopTelemetry));
        let t = tool("double", |args| {
            let n = args.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok((n * 2).to_string())
        });
        let result = executor.execute(&t, &call("c1", "double", json!({"n": 21}))).await.unwrap();
        assert_eq!(result.tool_call_id, "c1");
        assert_eq!(result.tool_name, "double");
        assert_eq!(result.result, "42");
        assert_eq!(result.args["n"], 21);
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_schema_violation_is_invalid_parameters() {
        let executor = ToolExecutor::default();
        let invoked = Arc::new(AtomicUsize::new(0));
        let seen = invoked.clone();
        let t = tool("double", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        });
        let err = executor
            .execute(&t, &call("c1", "double", json!({"n": "not a number"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidToolParameters);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unparseable_raw_arguments_are_invalid_parameters() {
        let executor = ToolExecutor::default();
        let t = tool("double", |_| Ok(String::new()));
        let bad = ToolCall::new("c1", "double", "{not json".to_string());
        let err = executor.execute(&t, &bad).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidToolParameters);
    }

    #[tokio::test]
    async fn test_handler_failure_raises_tool_execution() {
        let executor = ToolExecutor::default();
        let t = tool("boom", |_| Err(Error::configuration("exploded")));
        let err = executor.execute(&t, &call("c1", "boom", json!({}))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolExecution);
        assert!(err.message.contains("exploded"));
    }

    #[tokio::test]
    async fn test_failure_handler_converts_failure_to_result() {
        let executor = ToolExecutor::default();
        let t = tool("boom", |_| Err(Error::configuration("exploded")))
            .with_default_failure_handler();
        let result = executor.execute(&t, &call("c1", "boom", json!({}))).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.result, "Error executing tool boom: exploded");
    }

    #[tokio::test]
    async fn test_handler_reported_parameter_error_is_not_swallowed() {
        let executor = ToolExecutor::default();
        let t = tool("strict", |_| {
            Err(Error::invalid_tool_parameters("strict", "unknown field"))
        })
        .with_default_failure_handler();
        let err = executor.execute(&t, &call("c1", "strict", json!({}))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidToolParameters);
    }

    #[tokio::test]
    async fn test_execute_all_unknown_tool_runs_nothing() {
        let executor = ToolExecutor::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let tools = vec![tool("known", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        })];
        let calls = vec![call("c1", "known", json!({})), call("c2", "unknown", json!({}))];
        let err = executor.execute_all(&tools, &calls).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolNotFound);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    fn sleepy(name: &str, ms: u64, log: Arc<std::sync::Mutex<Vec<String>>>) -> Tool {
        let label = name.to_string();
        Tool::new(name, "sleeps", json!({"type": "object"}), move |_| {
            let log = log.clone();
            let label = label.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                if let Ok(mut log) = log.lock() {
                    log.push(label.clone());
                }
                Ok(label)
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_results_keep_call_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let tools = vec![
            sleepy("slow", 30, log.clone()).concurrent(),
            sleepy("fast", 10, log.clone()).concurrent(),
        ];
        let calls = vec![call("c1", "slow", json!({})), call("c2", "fast", json!({}))];
        let started = tokio::time::Instant::now();
        let results = ToolExecutor::default().execute_all(&tools, &calls).await.unwrap();

        assert_eq!(results[0].result, "slow");
        assert_eq!(results[1].result, "fast");
        // Completion order differs from call order.
        assert_eq!(*log.lock().unwrap(), vec!["fast".to_string(), "slow".to_string()]);
        assert!(started.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_tools_run_in_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let tools = vec![sleepy("first", 30, log.clone()), sleepy("second", 10, log.clone())];
        let calls = vec![call("c1", "first", json!({})), call("c2", "second", json!({}))];
        let started = tokio::time::Instant::now();
        ToolExecutor::default().execute_all(&tools, &calls).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_first_failure_returned_after_all_calls_finish() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let tools = vec![
            tool("bad", |_| Err(Error::configuration("nope"))).concurrent(),
            tool("good", move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok("ok".into())
            }),
        ];
        let calls = vec![call("c1", "bad", json!({})), call("c2", "good", json!({}))];
        let err = ToolExecutor::default().execute_all(&tools, &calls).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolExecution);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
