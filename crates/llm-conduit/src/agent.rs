// Agent and AgentBuilder: a provider, its tools and an executor bundled
// behind generate()/stream().

use std::sync::Arc;

use llm_conduit_types::{Error, Request, Response, Transport};

use crate::api::{self, StreamResult, Telemetry, Tool, ToolExecutor};
use crate::providers::Provider;
use crate::transport::{HttpTransport, ProviderKind};

/// Runs the agent loop against one provider with a fixed tool set.
#[derive(Debug)]
pub struct Agent {
    provider: Provider,
    tools: Vec<Tool>,
    executor: ToolExecutor,
}

/// Builder for [`Agent`].
#[derive(Default)]
pub struct AgentBuilder {
    provider: Option<Provider>,
    tools: Vec<Tool>,
    telemetry: Option<Arc<dyn Telemetry>>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use the provider for `kind` over the given transport.
    pub fn transport(mut self, kind: ProviderKind, transport: Arc<dyn Transport>) -> Result<Self, Error> {
        self.provider = Some(Provider::for_kind(kind, transport)?);
        Ok(self)
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Replace the default `tracing` spans around tool execution.
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Fails when no provider was set or a tool definition is invalid.
    pub fn build(self) -> Result<Agent, Error> {
        let provider = self
            .provider
            .ok_or_else(|| Error::configuration("no provider configured"))?;
        for tool in &self.tools {
            tool.validate()?;
        }
        let executor = match self.telemetry {
            Some(telemetry) => ToolExecutor::new(telemetry),
            None => ToolExecutor::default(),
        };
        Ok(Agent {
            provider,
            tools: self.tools,
            executor,
        })
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// An agent without tools talking to `kind` over an [`HttpTransport`]
    /// configured from the environment.
    pub fn from_env(kind: ProviderKind) -> Result<Self, Error> {
        let transport = HttpTransport::from_env(kind)?;
        Self::builder()
            .transport(kind, Arc::new(transport))?
            .build()
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub async fn generate(&self, request: Request) -> Result<Response, Error> {
        api::generate(&self.provider, &self.tools, &self.executor, request).await
    }

    pub fn stream(&self, request: Request) -> StreamResult<'_> {
        api::stream(&self.provider, &self.tools, &self.executor, request)
    }
}
