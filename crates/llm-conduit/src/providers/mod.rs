// Provider classifiers, each behind a feature flag, plus the `Provider`
// bundle the agent loop talks to.

use std::collections::HashMap;
use std::sync::Arc;

use llm_conduit_types::{
    BoxStream, Citation, Error, ErrorKind, FinishReason, PayloadBuilder, RateLimitInfo, Request,
    Transport, Usage,
};
use serde_json::Value;

use crate::transport::ProviderKind;
use crate::util::http::{error_from_response, parse_rate_limit_headers};
use crate::util::sse::decode_stream;
use crate::util::stream_accumulator::{StreamState, TurnOutput};

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "openai-compat")]
pub mod openai_compat;

/// Progress report for a tool the provider runs itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderToolEvent {
    pub tool_type: String,
    pub status: String,
    pub item_id: Option<String>,
    pub data: Value,
}

/// Reads one vendor's decoded stream events.
///
/// Every method looks at a single event in isolation; anything that must
/// survive across events lives in the [`StreamState`] the caller owns. One
/// classifier is picked per provider and shared by both the streaming and
/// the single-shot path.
pub trait EventClassifier: Send + Sync {
    fn provider(&self) -> &str;

    /// JSON paths of the message and code in an error body.
    fn error_paths(&self) -> (&'static [&'static str], &'static [&'static str]) {
        (&["error", "message"], &["error", "code"])
    }

    /// Pick up stream identity (response id, model) from an event.
    fn observe(&self, _event: &Value, _state: &mut StreamState) {}

    fn has_tool_calls(&self, event: &Value) -> bool;

    /// Merge any tool-call fragments the event carries into `state`.
    fn extract_tool_call_delta(&self, event: &Value, state: &mut StreamState);

    fn extract_text_delta(&self, event: &Value) -> Option<String>;

    fn extract_thinking_delta(&self, event: &Value) -> Option<String>;

    /// `Some` only on the event that ends the turn.
    fn map_finish_reason(&self, event: &Value) -> Option<FinishReason>;

    fn extract_usage(&self, _event: &Value) -> Option<Usage> {
        None
    }

    /// Citations the event carries, each with the content block it belongs to.
    fn extract_citations(&self, _event: &Value) -> Vec<(Citation, Option<u64>)> {
        Vec::new()
    }

    fn extract_provider_tool_event(&self, _event: &Value) -> Option<ProviderToolEvent> {
        None
    }

    /// An in-band error the provider reported mid-stream.
    fn extract_error(&self, _event: &Value) -> Option<Error> {
        None
    }

    /// Read a complete non-streaming response body.
    fn parse_response(&self, body: &Value) -> Result<TurnOutput, Error>;
}

/// A classifier, the payload builder for the same vendor, and the transport
/// requests go out on.
pub struct Provider {
    classifier: Box<dyn EventClassifier>,
    payload: Box<dyn PayloadBuilder>,
    transport: Arc<dyn Transport>,
}

impl Provider {
    pub fn new(
        classifier: impl EventClassifier + 'static,
        payload: impl PayloadBuilder + 'static,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            classifier: Box::new(classifier),
            payload: Box::new(payload),
            transport,
        }
    }

    /// Any Chat Completions-compatible endpoint.
    #[cfg(feature = "openai-compat")]
    pub fn openai_compat(transport: Arc<dyn Transport>) -> Self {
        Self::new(
            openai_compat::ChatCompletionsClassifier::default(),
            openai_compat::ChatCompletionsPayload,
            transport,
        )
    }

    #[cfg(feature = "openai")]
    pub fn openai(transport: Arc<dyn Transport>) -> Self {
        Self::new(
            openai::ResponsesClassifier,
            openai::ResponsesPayload,
            transport,
        )
    }

    #[cfg(feature = "anthropic")]
    pub fn anthropic(transport: Arc<dyn Transport>) -> Self {
        Self::new(
            anthropic::AnthropicClassifier,
            anthropic::AnthropicPayload::default(),
            transport,
        )
    }

    #[cfg(feature = "gemini")]
    pub fn gemini(transport: Arc<dyn Transport>) -> Self {
        Self::new(gemini::GeminiClassifier, gemini::GeminiPayload, transport)
    }

    /// The provider matching `kind`, if its feature is compiled in.
    pub fn for_kind(kind: ProviderKind, transport: Arc<dyn Transport>) -> Result<Self, Error> {
        match kind {
            #[cfg(feature = "openai")]
            ProviderKind::OpenAi => Ok(Self::openai(transport)),
            #[cfg(feature = "openai-compat")]
            ProviderKind::OpenAiCompatible => Ok(Self::openai_compat(transport)),
            #[cfg(feature = "anthropic")]
            ProviderKind::Anthropic => Ok(Self::anthropic(transport)),
            #[cfg(feature = "gemini")]
            ProviderKind::Gemini => Ok(Self::gemini(transport)),
            #[allow(unreachable_patterns)]
            other => Err(Error::configuration(format!(
                "provider {other:?} is not enabled in this build"
            ))),
        }
    }

    pub fn name(&self) -> &str {
        self.classifier.provider()
    }

    pub fn classifier(&self) -> &dyn EventClassifier {
        self.classifier.as_ref()
    }

    /// One blocking round trip.
    pub async fn complete(&self, request: &Request) -> Result<TurnOutput, Error> {
        let path = self.payload.path(request, false);
        let body = self.payload.build(request, false);
        let response = self.transport.post(&path, body, false).await?;

        let success = response.is_success();
        let status = response.status;
        let headers = response.headers.clone();
        let bytes = response.bytes().await?;
        if !success {
            return Err(self.error_for(request, status, &headers, &bytes));
        }

        let json: Value = serde_json::from_slice(&bytes).map_err(|e| {
            Error::decode(self.name(), &String::from_utf8_lossy(&bytes), e)
        })?;
        let mut turn = self.classifier.parse_response(&json)?;
        let has_tool_calls = !turn.tool_calls.is_empty();
        turn.finish_reason = turn
            .finish_reason
            .map(|reason| settle_finish_reason(reason, has_tool_calls));
        if turn.model.is_empty() {
            turn.model = request.model.clone();
        }
        turn.provider = self.name().to_string();
        turn.rate_limit = parse_rate_limit_headers(&headers);
        Ok(turn)
    }

    /// Open a streaming connection and hand back its decoded SSE payloads,
    /// with any rate-limit metadata from the response headers.
    ///
    /// Dropping the returned stream drops the body and closes the connection.
    pub async fn open_stream(
        &self,
        request: &Request,
    ) -> Result<(BoxStream<'static, Result<Value, Error>>, Option<RateLimitInfo>), Error> {
        let path = self.payload.path(request, true);
        let body = self.payload.build(request, true);
        let response = self.transport.post(&path, body, true).await?;

        if !response.is_success() {
            let status = response.status;
            let headers = response.headers.clone();
            let bytes = response.bytes().await?;
            return Err(self.error_for(request, status, &headers, &bytes));
        }

        let rate_limit = parse_rate_limit_headers(&response.headers);
        Ok((
            decode_stream(self.name().to_string(), response.body),
            rate_limit,
        ))
    }

    fn error_for(
        &self,
        request: &Request,
        status: u16,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Error {
        let (message_path, code_path) = self.classifier.error_paths();
        error_from_response(
            self.name(),
            &request.model,
            status,
            headers,
            body,
            message_path,
            code_path,
        )
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// A plain stop on a turn that produced tool calls is a tool-call turn.
/// Some providers report the calls and the stop in different chunks.
pub(crate) fn settle_finish_reason(reason: FinishReason, has_tool_calls: bool) -> FinishReason {
    match reason {
        FinishReason::Stop if has_tool_calls => FinishReason::ToolCalls,
        other => other,
    }
}

/// `value` as a non-negative integer token count.
pub(crate) fn token_count(value: Option<&Value>) -> Option<u32> {
    value
        .and_then(Value::as_u64)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
}

/// Error for a failure the provider reported inside a successful stream.
pub(crate) fn in_band_error(
    provider: &str,
    message: &str,
    code: Option<String>,
    raw: &Value,
) -> Error {
    let kind = match code.as_deref() {
        Some("rate_limit_exceeded" | "rate_limit_error" | "RESOURCE_EXHAUSTED") => {
            ErrorKind::RateLimit
        }
        Some("overloaded_error" | "UNAVAILABLE") => ErrorKind::Overloaded,
        Some("invalid_request_error" | "INVALID_ARGUMENT") => ErrorKind::InvalidRequest,
        _ => Error::classify_by_message(message, ErrorKind::Server),
    };
    Error {
        raw: Some(raw.clone()),
        ..Error::new(kind, format!("{provider} stream error: {message}"))
    }
    .with_provider(provider)
    .with_error_code(code)
}
