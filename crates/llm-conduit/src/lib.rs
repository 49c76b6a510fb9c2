// llm-conduit: stream decoding, provider classifiers, canonical events and the agent loop
#![allow(clippy::result_large_err)]

pub mod agent;
pub mod api;
pub mod emitter;
pub mod providers;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod util;

// --- Curated re-exports from llm-conduit-types ---
// Listed one by one so the public surface stays deliberate.
pub use llm_conduit_types::{
    AdapterTimeout,
    AdditionalContent,
    // Type aliases
    BoxFuture,
    BoxStream,
    ByteStream,
    Citation,
    // Errors
    Error,
    ErrorKind,
    FinishReason,
    // Collaborators
    HttpResponse,
    // Messages
    Message,
    PayloadBuilder,
    RateLimitInfo,
    // Request/Response
    Request,
    Response,
    ResponseFormat,
    // Config
    RetryPolicy,
    Role,
    Step,
    StepMeta,
    // Streaming
    StreamEvent,
    StreamEventKind,
    StreamEventType,
    ToolArguments,
    ToolCall,
    // Tools
    ToolDefinition,
    ToolResult,
    Transport,
    Usage,
};

pub use agent::{Agent, AgentBuilder};

pub use api::{
    FailureHandler, LoopState, NoopTelemetry, STRUCTURED_OUTPUT_TOOL, StreamResult, Telemetry,
    TextDeltaStream, Tool, ToolExecutor, ToolHandler, TracingTelemetry, generate, stream,
};

pub use emitter::CanonicalEmitter;
pub use providers::{EventClassifier, Provider, ProviderToolEvent};
pub use transport::{AuthStyle, HttpTransport, HttpTransportBuilder, ProviderKind};

pub use util::retry::with_retry;
