use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::message::Message;
use crate::response::ResponseFormat;
use crate::tool::ToolDefinition;

/// Step budget used when the caller does not set one.
pub const DEFAULT_MAX_STEPS: u32 = 5;

/// A conversation plus the options for sending it.
///
/// The message list is append-only: the agent loop adds the assistant turn and
/// the tool results after every tool-executing step and never removes anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub model: String,
    messages: Vec<Message>,
    #[serde(default)]
    system_prompts: Vec<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    max_steps: u32,
    /// Keyed by provider name; the active provider's entry is merged into
    /// the payload at top level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_options: Option<serde_json::Value>,
}

impl Request {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            system_prompts: Vec::new(),
            tools: Vec::new(),
            response_format: None,
            temperature: None,
            max_tokens: None,
            max_steps: DEFAULT_MAX_STEPS,
            provider_options: None,
        }
    }

    /// Model and at least one message are required.
    pub fn validate(&self) -> Result<(), Error> {
        if self.model.trim().is_empty() {
            return Err(Error::configuration("Request model must not be empty"));
        }
        if self.messages.is_empty() {
            return Err(Error::configuration("Request messages must not be empty"));
        }
        if self.max_steps == 0 {
            return Err(Error::configuration("max_steps must be at least 1"));
        }
        Ok(())
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system_prompts(&self) -> &[String] {
        &self.system_prompts
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Append a system prompt. System prompts are kept apart from the turn list.
    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompts.push(prompt.into());
        self
    }

    /// Append a user message.
    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.messages.push(Message::user(text));
        self
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn provider_options(mut self, options: serde_json::Value) -> Self {
        self.provider_options = Some(options);
        self
    }
}
