// Collaborator contracts: the HTTP transport and per-provider payload builders.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;

use crate::error::Error;
use crate::request::Request;

/// A boxed future that is Send.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed stream that is Send.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Raw response body, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, Error>>;

/// A response with a readable body. Dropping it closes the underlying connection.
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: ByteStream,
}

impl HttpResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, body: ByteStream) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Drain the whole body.
    pub async fn bytes(mut self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        while let Some(chunk) =
            std::future::poll_fn(|cx| self.body.as_mut().poll_next(cx)).await
        {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"<stream>")
            .finish()
    }
}

/// The HTTP transport the engine posts through.
///
/// Implementations own connection pooling, authentication, retry/backoff and
/// timeouts. Non-2xx statuses are returned as responses, not errors, so the
/// engine can parse the provider's error body.
pub trait Transport: Send + Sync {
    fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        stream: bool,
    ) -> BoxFuture<'_, Result<HttpResponse, Error>>;
}

/// Pure mapping from a conversation to a vendor request.
pub trait PayloadBuilder: Send + Sync {
    /// Endpoint path relative to the transport's base URL.
    fn path(&self, request: &Request, stream: bool) -> String;

    fn build(&self, request: &Request, stream: bool) -> serde_json::Value;
}
