use std::fmt::{Display, Formatter};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

/// Default request timeout when a step does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        };
        write!(f, "{name}")
    }
}

/// One request for a [Transport] to execute.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Bytes>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: Vec::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the request body and set the JSON content type.
    pub fn with_json<T: serde::Serialize>(self, value: &T) -> anyhow::Result<Self> {
        Ok(self
            .with_header("Content-Type", "application/json")
            .with_body(serde_json::to_vec(value)?))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The outcome of a request. Transport failures such as timeouts or refused connections are
/// reported through `error` rather than as a Rust error, so that they are recorded like any other
/// failed step.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// The response status, or 0 if no response was received
    pub status: u16,
    pub body: Bytes,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl TransportResponse {
    /// A response was received and its status is not an error status.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..400).contains(&self.status)
    }

    /// Parse the body as JSON, or `None` if it is not valid JSON for `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// A request executor, usually a client for some network protocol.
///
/// Many virtual users call the same transport concurrently. From a virtual user's point of view a
/// call is synchronous, see [crate::prelude::AgentContext::execute].
pub trait Transport: Send + Sync {
    fn execute(&self, request: TransportRequest) -> BoxFuture<'static, TransportResponse>;
}
