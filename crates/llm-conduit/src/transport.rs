// reqwest-backed HTTP transport: auth headers, timeouts and retry.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use futures::StreamExt;
use llm_conduit_types::{
    AdapterTimeout, BoxFuture, ByteStream, Error, ErrorKind, HttpResponse, RetryPolicy, Transport,
};
use secrecy::{ExposeSecret, SecretString};

use crate::util::http::parse_retry_after;
use crate::util::normalize_base_url;
use crate::util::retry::with_retry;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Which vendor a transport is configured for; decides auth headers and
/// environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    OpenAiCompatible,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::OpenAiCompatible => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    pub fn auth_style(self) -> AuthStyle {
        match self {
            Self::OpenAi | Self::OpenAiCompatible => AuthStyle::Bearer,
            Self::Anthropic => AuthStyle::AnthropicKey,
            Self::Gemini => AuthStyle::GoogleKey,
        }
    }

    fn key_vars(self) -> &'static [&'static str] {
        match self {
            Self::OpenAi | Self::OpenAiCompatible => &["OPENAI_API_KEY"],
            Self::Anthropic => &["ANTHROPIC_API_KEY"],
            Self::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        }
    }

    fn base_url_var(self) -> &'static str {
        match self {
            Self::OpenAi | Self::OpenAiCompatible => "OPENAI_BASE_URL",
            Self::Anthropic => "ANTHROPIC_BASE_URL",
            Self::Gemini => "GEMINI_BASE_URL",
        }
    }
}

/// How the API key is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>` plus `anthropic-version`
    AnthropicKey,
    /// `x-goog-api-key: <key>`
    GoogleKey,
    None,
}

/// HTTP transport over a pooled `reqwest::Client`.
///
/// Retryable statuses (429, 408, 5xx) are retried per the [`RetryPolicy`];
/// once the budget is spent the last error response is handed back as-is so
/// the provider can parse its body. Streaming bodies are guarded by a
/// per-chunk read timeout instead of the whole-request timeout.
pub struct HttpTransport {
    base_url: String,
    api_key: Option<SecretString>,
    auth: AuthStyle,
    http_client: reqwest::Client,
    timeout: AdapterTimeout,
    retry_policy: RetryPolicy,
}

impl HttpTransport {
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    /// Configure from the vendor's environment variables.
    pub fn from_env(kind: ProviderKind) -> Result<Self, Error> {
        Self::from_lookup(kind, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        kind: ProviderKind,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Error> {
        let api_key = kind
            .key_vars()
            .iter()
            .find_map(|var| lookup(var).filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                Error::configuration(format!("{} not set", kind.key_vars().join(" or ")))
            })?;
        let base_url = lookup(kind.base_url_var())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| kind.default_base_url().to_string());

        Self::builder()
            .base_url(base_url)
            .api_key(SecretString::from(api_key))
            .auth(kind.auth_style())
            .timeout(AdapterTimeout::from_lookup(&lookup))
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_headers(&self) -> Result<reqwest::header::HeaderMap, Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        let Some(key) = self.api_key.as_ref() else {
            return Ok(headers);
        };
        let invalid =
            |_| Error::configuration("Invalid API key: contains non-ASCII or control characters");
        match self.auth {
            AuthStyle::Bearer => {
                let value = format!("Bearer {}", key.expose_secret());
                headers.insert(reqwest::header::AUTHORIZATION, value.parse().map_err(invalid)?);
            }
            AuthStyle::AnthropicKey => {
                headers.insert("x-api-key", key.expose_secret().parse().map_err(invalid)?);
                headers.insert(
                    "anthropic-version",
                    reqwest::header::HeaderValue::from_static(ANTHROPIC_VERSION),
                );
            }
            AuthStyle::GoogleKey => {
                headers.insert("x-goog-api-key", key.expose_secret().parse().map_err(invalid)?);
            }
            AuthStyle::None => {}
        }
        Ok(headers)
    }

    async fn send_once(
        &self,
        url: &str,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, Error> {
        let mut request = self
            .http_client
            .post(url)
            .headers(self.auth_headers()?)
            .json(body);
        if !stream {
            request = request.timeout(self.timeout.request_duration());
        }
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error {
                    source: Some(Box::new(e)),
                    ..Error::new(ErrorKind::RequestTimeout, format!("HTTP request to {url} timed out"))
                }
            } else {
                Error::network(format!("HTTP request failed: {e}"), e)
            }
        })
    }

    async fn do_post(
        &self,
        path: &str,
        body: serde_json::Value,
        stream: bool,
    ) -> Result<HttpResponse, Error> {
        let url = format!("{}{}", self.base_url, path);
        // Last retryable error response, returned unparsed if retries run out.
        let last_failure: Mutex<Option<(u16, HashMap<String, String>, Bytes)>> = Mutex::new(None);

        let (url, body, slot) = (&url, &body, &last_failure);

        let outcome = with_retry(&self.retry_policy, || async move {
            let response = self.send_once(url, body, stream).await?;
            let status = response.status().as_u16();
            if !is_retryable_status(status) {
                return Ok(response);
            }
            let headers = header_map(response.headers());
            let bytes = error_body(status, url, response.bytes().await);
            let err = Error::from_http_status(
                status,
                format!("HTTP {status} from {url}"),
                "http",
                None,
                parse_retry_after(&headers),
            );
            if let Ok(mut slot) = slot.lock() {
                *slot = Some((status, headers, bytes));
            }
            Err(err)
        })
        .await;

        match outcome {
            Ok(response) => Ok(self.wrap_response(response, stream)),
            Err(err) if err.status_code.is_some() => {
                let stashed = last_failure.lock().ok().and_then(|mut slot| slot.take());
                match stashed {
                    Some((status, headers, bytes)) => {
                        let body: ByteStream =
                            Box::pin(futures::stream::once(async move { Ok(bytes) }));
                        Ok(HttpResponse::new(status, headers, body))
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn wrap_response(&self, response: reqwest::Response, stream: bool) -> HttpResponse {
        let status = response.status().as_u16();
        let headers = header_map(response.headers());
        let read_timeout = self.timeout.stream_read_duration();
        let mut chunks = response.bytes_stream();

        let body: ByteStream = if stream {
            Box::pin(async_stream::stream! {
                loop {
                    match tokio::time::timeout(read_timeout, chunks.next()).await {
                        Ok(Some(Ok(bytes))) => yield Ok(bytes),
                        Ok(Some(Err(e))) => {
                            yield Err(Error::stream(format!("Stream read error: {e}"), e));
                            return;
                        }
                        Ok(None) => return,
                        Err(_elapsed) => {
                            yield Err(Error::stream(
                                format!("Stream read timed out after {read_timeout:?}"),
                                std::io::Error::new(std::io::ErrorKind::TimedOut, "stream read timeout"),
                            ));
                            return;
                        }
                    }
                }
            })
        } else {
            Box::pin(chunks.map(|chunk| {
                chunk.map_err(|e| Error::network(format!("Failed to read response body: {e}"), e))
            }))
        };

        HttpResponse::new(status, headers, body)
    }
}

impl Transport for HttpTransport {
    fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        stream: bool,
    ) -> BoxFuture<'_, Result<HttpResponse, Error>> {
        let path = path.to_string();
        Box::pin(async move { self.do_post(&path, body, stream).await })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || status >= 500
}

/// Body of a retryable error response. A failed read leaves the vendor
/// message out of the final error, so it is logged.
fn error_body<E: std::fmt::Display>(status: u16, url: &str, read: Result<Bytes, E>) -> Bytes {
    read.unwrap_or_else(|e| {
        tracing::warn!(status, url, error = %e, "failed to read error response body");
        Bytes::new()
    })
}

fn header_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Builder for [`HttpTransport`].
#[derive(Default)]
pub struct HttpTransportBuilder {
    base_url: Option<String>,
    api_key: Option<SecretString>,
    auth: Option<AuthStyle>,
    default_headers: Option<reqwest::header::HeaderMap>,
    timeout: Option<AdapterTimeout>,
    retry_policy: Option<RetryPolicy>,
}

impl HttpTransportBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Defaults to [`AuthStyle::Bearer`].
    pub fn auth(mut self, auth: AuthStyle) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Headers sent with every request.
    pub fn default_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn timeout(mut self, timeout: AdapterTimeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<HttpTransport, Error> {
        let base_url = self
            .base_url
            .map(|u| normalize_base_url(&u))
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::configuration("HttpTransport requires a base_url"))?;
        let timeout = self.timeout.unwrap_or_default();

        let mut builder = reqwest::Client::builder().connect_timeout(timeout.connect_duration());
        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }
        let http_client = builder.build().map_err(|e| Error {
            source: Some(Box::new(e)),
            ..Error::configuration("Failed to build HTTP client")
        })?;

        Ok(HttpTransport {
            base_url,
            api_key: self.api_key,
            auth: self.auth.unwrap_or(AuthStyle::Bearer),
            http_client,
            timeout,
            retry_policy: self.retry_policy.unwrap_or_default(),
        })
    }
}
