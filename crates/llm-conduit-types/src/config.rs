// Transport configuration: retry/backoff policy and adapter timeouts.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Called before each retry sleep with (error, attempt, delay).
pub type OnRetryCallback = Arc<dyn Fn(&crate::error::Error, u32, Duration) + Send + Sync>;

/// Retry policy applied by the HTTP transport to a single request.
#[derive(Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 2).
    pub max_retries: u32,
    /// Seconds before the first retry (default: 1.0).
    pub base_delay: f64,
    /// Upper bound on any single delay, in seconds (default: 60.0).
    pub max_delay: f64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    #[serde(skip)]
    pub on_retry: Option<OnRetryCallback>,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: 1.0,
            max_delay: 60.0,
            backoff_multiplier: 2.0,
            jitter: true,
            on_retry: None,
        }
    }
}

/// Timeouts for the HTTP transport, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterTimeout {
    pub connect: f64,
    /// Whole-request timeout for non-streaming calls.
    pub request: f64,
    /// Maximum gap between two body chunks of a streaming response.
    pub stream_read: f64,
}

impl AdapterTimeout {
    /// Read `LLM_CONDUIT_{CONNECT,REQUEST,STREAM_READ}_TIMEOUT`, falling back to
    /// defaults for unset or unparseable values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: f64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| *v > 0.0)
                .unwrap_or(fallback)
        };
        Self {
            connect: read("LLM_CONDUIT_CONNECT_TIMEOUT", defaults.connect),
            request: read("LLM_CONDUIT_REQUEST_TIMEOUT", defaults.request),
            stream_read: read("LLM_CONDUIT_STREAM_READ_TIMEOUT", defaults.stream_read),
        }
    }

    pub fn connect_duration(&self) -> Duration {
        Duration::from_secs_f64(self.connect)
    }

    pub fn request_duration(&self) -> Duration {
        Duration::from_secs_f64(self.request)
    }

    pub fn stream_read_duration(&self) -> Duration {
        Duration::from_secs_f64(self.stream_read)
    }
}

impl Default for AdapterTimeout {
    fn default() -> Self {
        Self {
            connect: 10.0,
            request: 120.0,
            stream_read: 30.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 2);
        assert_eq!(p.base_delay, 1.0);
        assert_eq!(p.max_delay, 60.0);
        assert_eq!(p.backoff_multiplier, 2.0);
        assert!(p.jitter);
        assert!(p.on_retry.is_none());
    }

    #[test]
    fn test_retry_policy_none() {
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }

    #[test]
    fn test_retry_policy_serde_skips_on_retry() {
        let p = RetryPolicy {
            on_retry: Some(Arc::new(|_, _, _| {})),
            ..Default::default()
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("on_retry"));
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert!(back.on_retry.is_none());
    }

    #[test]
    fn test_adapter_timeout_defaults() {
        let t = AdapterTimeout::default();
        assert_eq!(t.connect, 10.0);
        assert_eq!(t.request, 120.0);
        assert_eq!(t.stream_read, 30.0);
        assert_eq!(t.stream_read_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_adapter_timeout_from_lookup() {
        let t = AdapterTimeout::from_lookup(|key| match key {
            "LLM_CONDUIT_CONNECT_TIMEOUT" => Some("2.5".into()),
            "LLM_CONDUIT_REQUEST_TIMEOUT" => Some("not a number".into()),
            "LLM_CONDUIT_STREAM_READ_TIMEOUT" => Some("-1".into()),
            _ => None,
        });
        assert_eq!(t.connect, 2.5);
        assert_eq!(t.request, 120.0);
        assert_eq!(t.stream_read, 30.0);
    }
}
