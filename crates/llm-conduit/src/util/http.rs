// Error-response and rate-limit header parsing shared by every provider.

use std::collections::HashMap;
use std::time::Duration;

use llm_conduit_types::{Error, RateLimitInfo};
use serde_json::Value;

/// Parse `retry-after-ms`, then `retry-after` as either seconds or an HTTP date.
/// Returns `None` when missing, unparseable, negative or in the past.
pub fn parse_retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| *v >= 0.0 && v.is_finite())
    {
        return Some(Duration::from_secs_f64(ms / 1000.0));
    }

    let value = headers.get("retry-after")?.trim();

    if let Ok(secs) = value.parse::<f64>() {
        // Duration::from_secs_f64 panics on negative, NaN and infinity.
        if secs >= 0.0 && secs.is_finite() {
            return Some(Duration::from_secs_f64(secs));
        }
        return None;
    }

    let date = httpdate::parse_http_date(value).ok()?;
    date.duration_since(std::time::SystemTime::now()).ok()
}

/// Walk a nested JSON value along `path`.
pub fn extract_json_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

/// Pull `(message, code)` out of a provider error body. The message falls back
/// to the serialized body.
pub fn parse_provider_error_message(
    body: &Value,
    message_path: &[&str],
    code_path: &[&str],
) -> (String, Option<String>) {
    let message = extract_json_path(body, message_path)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| body.to_string());

    let code = extract_json_path(body, code_path).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    (message, code)
}

/// Per-limit quota metadata from `x-ratelimit-*` (OpenAI style) or
/// `anthropic-ratelimit-*` headers. `None` when no such header is present.
pub fn parse_rate_limit_headers(headers: &HashMap<String, String>) -> Option<RateLimitInfo> {
    let first = |names: &[&str]| -> Option<String> {
        names
            .iter()
            .find_map(|name| headers.get(*name))
            .map(|v| v.trim().to_string())
    };
    let first_u32 = |names: &[&str]| first(names).and_then(|v| v.parse::<u32>().ok());

    let info = RateLimitInfo {
        requests_remaining: first_u32(&[
            "x-ratelimit-remaining-requests",
            "anthropic-ratelimit-requests-remaining",
        ]),
        requests_limit: first_u32(&[
            "x-ratelimit-limit-requests",
            "anthropic-ratelimit-requests-limit",
        ]),
        requests_reset: first(&[
            "x-ratelimit-reset-requests",
            "anthropic-ratelimit-requests-reset",
            "x-ratelimit-reset",
        ]),
        tokens_remaining: first_u32(&[
            "x-ratelimit-remaining-tokens",
            "anthropic-ratelimit-tokens-remaining",
        ]),
        tokens_limit: first_u32(&[
            "x-ratelimit-limit-tokens",
            "anthropic-ratelimit-tokens-limit",
        ]),
        tokens_reset: first(&[
            "x-ratelimit-reset-tokens",
            "anthropic-ratelimit-tokens-reset",
        ]),
    };

    (!info.is_empty()).then_some(info)
}

/// Build a typed error from a non-2xx response.
///
/// The body is parsed as JSON when possible (kept as `raw`), the message and
/// code come from the given paths, and rate-limit metadata is attached.
pub fn error_from_response(
    provider: &str,
    model: &str,
    status: u16,
    headers: &HashMap<String, String>,
    body: &[u8],
    message_path: &[&str],
    code_path: &[&str],
) -> Error {
    let raw: Value = serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()));
    let (message, code) = match &raw {
        Value::String(text) if text.is_empty() => (format!("HTTP {status}"), None),
        Value::String(text) => (text.clone(), None),
        json => parse_provider_error_message(json, message_path, code_path),
    };

    Error::from_http_status(
        status,
        format!("{provider} request for model '{model}' failed: {message}"),
        provider,
        Some(raw),
        parse_retry_after(headers),
    )
    .with_model(model)
    .with_error_code(code)
    .with_rate_limit(parse_rate_limit_headers(headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_conduit_types::ErrorKind;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let h = headers(&[("retry-after", "30")]);
        assert_eq!(parse_retry_after(&h), Some(Duration::from_secs(30)));
        let h = headers(&[("retry-after", "1.5")]);
        assert_eq!(parse_retry_after(&h), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_retry_after_ms_wins() {
        let h = headers(&[("retry-after-ms", "250"), ("retry-after", "30")]);
        assert_eq!(parse_retry_after(&h), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after(&headers(&[])), None);
        assert_eq!(parse_retry_after(&headers(&[("retry-after", "-5")])), None);
        assert_eq!(parse_retry_after(&headers(&[("retry-after", "soon")])), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let future = std::time::SystemTime::now() + Duration::from_secs(120);
        let h = headers(&[("retry-after", &httpdate::fmt_http_date(future))]);
        let parsed = parse_retry_after(&h).unwrap();
        assert!(parsed > Duration::from_secs(100) && parsed <= Duration::from_secs(120));

        let past = headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")]);
        assert_eq!(parse_retry_after(&past), None);
    }

    #[test]
    fn test_extract_json_path() {
        let v = serde_json::json!({"error": {"message": "bad"}});
        assert_eq!(extract_json_path(&v, &["error", "message"]).unwrap(), "bad");
        assert!(extract_json_path(&v, &["error", "code"]).is_none());
    }

    #[test]
    fn test_parse_provider_error_message_numeric_code() {
        let v = serde_json::json!({"error": {"message": "quota", "code": 429}});
        let (msg, code) = parse_provider_error_message(&v, &["error", "message"], &["error", "code"]);
        assert_eq!(msg, "quota");
        assert_eq!(code.as_deref(), Some("429"));
    }

    #[test]
    fn test_parse_rate_limit_headers_openai_style() {
        let h = headers(&[
            ("x-ratelimit-remaining-requests", "59"),
            ("x-ratelimit-limit-requests", "60"),
            ("x-ratelimit-remaining-tokens", "1000"),
            ("x-ratelimit-reset-tokens", "6m0s"),
        ]);
        let info = parse_rate_limit_headers(&h).unwrap();
        assert_eq!(info.requests_remaining, Some(59));
        assert_eq!(info.requests_limit, Some(60));
        assert_eq!(info.tokens_remaining, Some(1000));
        assert_eq!(info.tokens_reset.as_deref(), Some("6m0s"));
        assert_eq!(info.requests_reset, None);
    }

    #[test]
    fn test_parse_rate_limit_headers_anthropic_style() {
        let h = headers(&[
            ("anthropic-ratelimit-requests-remaining", "4"),
            ("anthropic-ratelimit-requests-reset", "2025-01-01T00:00:00Z"),
        ]);
        let info = parse_rate_limit_headers(&h).unwrap();
        assert_eq!(info.requests_remaining, Some(4));
        assert_eq!(info.requests_reset.as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn test_parse_rate_limit_headers_absent() {
        assert!(parse_rate_limit_headers(&headers(&[("content-type", "json")])).is_none());
    }

    #[test]
    fn test_error_from_response_rate_limit() {
        let h = headers(&[("retry-after", "7"), ("x-ratelimit-remaining-requests", "0")]);
        let body = br#"{"error": {"message": "Rate limit reached", "code": "rate_limit_exceeded"}}"#;
        let err = error_from_response(
            "openai",
            "gpt-test",
            429,
            &h,
            body,
            &["error", "message"],
            &["error", "code"],
        );
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert!(err.retryable);
        assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(err.error_code.as_deref(), Some("rate_limit_exceeded"));
        assert_eq!(err.model.as_deref(), Some("gpt-test"));
        assert_eq!(err.rate_limit.unwrap().requests_remaining, Some(0));
        assert!(err.message.contains("Rate limit reached"));
    }

    #[test]
    fn test_error_from_response_plain_text_body() {
        let err = error_from_response(
            "anthropic",
            "claude-test",
            413,
            &headers(&[]),
            b"request entity too large",
            &["error", "message"],
            &["error", "type"],
        );
        assert_eq!(err.kind, ErrorKind::RequestTooLarge);
        assert!(err.message.contains("request entity too large"));
    }

    #[test]
    fn test_error_from_response_overloaded() {
        let body = br#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = error_from_response(
            "anthropic",
            "claude-test",
            529,
            &headers(&[]),
            body,
            &["error", "message"],
            &["error", "type"],
        );
        assert_eq!(err.kind, ErrorKind::Overloaded);
        assert_eq!(err.error_code.as_deref(), Some("overloaded_error"));
    }
}
