pub(crate) mod http;
pub(crate) mod provider_options;
pub mod retry;
pub mod sse;
pub mod stream_accumulator;
pub mod stream_lifecycle;

/// Trim whitespace and trailing slashes so paths can be appended with `/`.
pub(crate) fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
