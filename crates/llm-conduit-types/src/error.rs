// Error taxonomy: one error type for decoding, transport, tools and structured output.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::response::RateLimitInfo;

/// Discriminator for every failure the engine surfaces upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Provider errors (from HTTP responses or in-stream error events)
    Authentication,
    AccessDenied,
    NotFound,
    InvalidRequest,
    RateLimit,
    Overloaded,
    RequestTooLarge,
    Server,
    ContentFilter,
    ContextLength,
    QuotaExceeded,

    // Transport and framing
    RequestTimeout,
    Network,
    Stream,
    Decode,

    // Tool calling
    ToolNotFound,
    AmbiguousTool,
    InvalidToolParameters,
    ToolExecution,

    // Turn finalization
    StructuredDecode,
    UnknownFinishReason,
    Configuration,
}

impl ErrorKind {
    /// Returns `true` for errors reported by the vendor API itself.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Self::Authentication
                | Self::AccessDenied
                | Self::NotFound
                | Self::InvalidRequest
                | Self::RateLimit
                | Self::Overloaded
                | Self::RequestTooLarge
                | Self::Server
                | Self::ContentFilter
                | Self::ContextLength
                | Self::QuotaExceeded
        )
    }

    /// Returns `true` for tool resolution and execution failures.
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound
                | Self::AmbiguousTool
                | Self::InvalidToolParameters
                | Self::ToolExecution
        )
    }

    fn default_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit
                | Self::Overloaded
                | Self::Server
                | Self::RequestTimeout
                | Self::Network
        )
    }
}

/// The single error type for the entire library.
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,

    // Diagnostic context
    pub provider: Option<String>,
    pub model: Option<String>,
    pub status_code: Option<u16>,
    pub error_code: Option<String>,
    pub retry_after: Option<Duration>,
    pub rate_limit: Option<RateLimitInfo>,
    pub raw: Option<serde_json::Value>,
}

impl Error {
    /// Bare error of the given kind; retryability follows the kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.default_retryable(),
            source: None,
            provider: None,
            model: None,
            status_code: None,
            error_code: None,
            retry_after: None,
            rate_limit: None,
            raw: None,
        }
    }

    /// Construct from an HTTP status code returned by a provider.
    pub fn from_http_status(
        status: u16,
        message: String,
        provider: &str,
        raw: Option<serde_json::Value>,
        retry_after: Option<Duration>,
    ) -> Self {
        let kind = match status {
            400 | 422 => ErrorKind::InvalidRequest,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::AccessDenied,
            404 => ErrorKind::NotFound,
            408 => ErrorKind::RequestTimeout,
            413 => ErrorKind::RequestTooLarge,
            429 => ErrorKind::RateLimit,
            503 | 529 => ErrorKind::Overloaded,
            _ => ErrorKind::Server,
        };

        // A 5xx whose body says "context length" is not worth retrying.
        let kind = Self::classify_by_message(&message, kind);

        Self {
            provider: Some(provider.to_string()),
            status_code: Some(status),
            retry_after,
            raw,
            ..Self::new(kind, message)
        }
    }

    /// Malformed JSON on an SSE data line. Fatal to the connection.
    pub fn decode(
        provider: &str,
        line: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: Some(Box::new(source)),
            provider: Some(provider.to_string()),
            raw: Some(serde_json::Value::String(excerpt(line, 500))),
            ..Self::new(
                ErrorKind::Decode,
                format!("{provider}: failed to decode stream line: {}", excerpt(line, 200)),
            )
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Network error with source.
    pub fn network(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: Some(Box::new(source)),
            ..Self::new(ErrorKind::Network, message)
        }
    }

    /// Stream read error with source.
    pub fn stream(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            retryable: true,
            source: Some(Box::new(source)),
            ..Self::new(ErrorKind::Stream, message)
        }
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::ToolNotFound,
            format!("Tool not found: '{name}'"),
        )
    }

    pub fn ambiguous_tool(name: &str, matches: usize) -> Self {
        Self::new(
            ErrorKind::AmbiguousTool,
            format!("Multiple tools found for '{name}': {matches} registrations"),
        )
    }

    pub fn invalid_tool_parameters(tool: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidToolParameters,
            format!("Invalid parameters for tool '{tool}': {detail}"),
        )
    }

    pub fn tool_execution(tool: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::ToolExecution,
            format!("Error executing tool '{tool}': {detail}"),
        )
    }

    /// Structured output could not be decoded from the final step.
    pub fn structured_decode(
        model: &str,
        finish_reason: impl std::fmt::Display,
        raw_text: &str,
    ) -> Self {
        Self {
            model: Some(model.to_string()),
            raw: Some(serde_json::Value::String(raw_text.to_string())),
            ..Self::new(
                ErrorKind::StructuredDecode,
                format!(
                    "Failed to decode structured output from model '{model}' \
                     (finish reason: {finish_reason}). Raw text: {}",
                    excerpt(raw_text, 200)
                ),
            )
        }
    }

    pub fn unknown_finish_reason(provider: &str, model: &str, raw_reason: &str) -> Self {
        Self {
            provider: Some(provider.to_string()),
            model: Some(model.to_string()),
            raw: Some(serde_json::Value::String(raw_reason.to_string())),
            ..Self::new(
                ErrorKind::UnknownFinishReason,
                format!("Unknown finish reason '{raw_reason}' from {provider} model '{model}'"),
            )
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: Option<RateLimitInfo>) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_error_code(mut self, code: Option<String>) -> Self {
        self.error_code = code;
        self
    }

    /// Reclassify an error kind from the error message body.
    pub fn classify_by_message(message: &str, default: ErrorKind) -> ErrorKind {
        let lower = message.to_lowercase();
        if lower.contains("context length")
            || lower.contains("context window")
            || lower.contains("too many tokens")
        {
            ErrorKind::ContextLength
        } else if lower.contains("content filter") || lower.contains("safety") {
            ErrorKind::ContentFilter
        } else if lower.contains("quota")
            || lower.contains("billing")
            || lower.contains("insufficient funds")
        {
            ErrorKind::QuotaExceeded
        } else if lower.contains("overloaded") && default == ErrorKind::Server {
            ErrorKind::Overloaded
        } else {
            default
        }
    }
}

/// Truncate on a char boundary for diagnostics.
fn excerpt(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
