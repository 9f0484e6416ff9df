use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use futures::future::BoxFuture;
use futures::FutureExt;
use gale_instruments::duration_ms;
use gale_instruments::prelude::{MetricHandle, MetricKind, MetricsRegistry, RecordError};
use gale_runner::prelude::{Method, Transport, TransportRequest, TransportResponse};

pub const HTTP_REQS_METRIC: &str = "http_reqs";
pub const HTTP_REQ_DURATION_METRIC: &str = "http_req_duration";
pub const HTTP_REQ_FAILED_METRIC: &str = "http_req_failed";

#[derive(Debug, Clone)]
struct HttpMetrics {
    reqs: MetricHandle,
    duration: MetricHandle,
    failed: MetricHandle,
}

impl HttpMetrics {
    fn resolve(registry: &MetricsRegistry) -> Result<Self, RecordError> {
        Ok(Self {
            reqs: registry.handle(HTTP_REQS_METRIC, MetricKind::Counter)?,
            duration: registry.handle(HTTP_REQ_DURATION_METRIC, MetricKind::Trend)?,
            failed: registry.handle(HTTP_REQ_FAILED_METRIC, MetricKind::Rate)?,
        })
    }

    fn record(&self, response: &TransportResponse) {
        let results = [
            self.reqs.add(1),
            self.duration.record(duration_ms(response.elapsed)),
            self.failed.add_bool(!response.is_success()),
        ];

        for result in results {
            if let Err(e) = result {
                log::warn!("Failed to record HTTP metric: {e}");
            }
        }
    }
}

/// An HTTP client that records every request it makes.
///
/// Each request adds to `http_reqs`, records its duration in milliseconds to
/// `http_req_duration`, and records whether it failed to `http_req_failed`. A request fails if no
/// response was received, for example because of a timeout or a refused connection, or if the
/// response has an error status.
///
/// Relative URLs are resolved against the base URL, which is usually the connection string.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: Option<String>,
    metrics: Arc<HttpMetrics>,
}

impl HttpClient {
    pub fn new(registry: &MetricsRegistry, base_url: Option<String>) -> anyhow::Result<Self> {
        let inner = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        let metrics = HttpMetrics::resolve(registry).context("Failed to register HTTP metrics")?;

        Ok(Self {
            inner,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            metrics: Arc::new(metrics),
        })
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// The absolute URL for `url`. URLs with a scheme are used as they are.
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }

        match &self.base_url {
            Some(base_url) => format!("{base_url}/{}", url.trim_start_matches('/')),
            None => url.to_string(),
        }
    }
}

impl Transport for HttpClient {
    fn execute(&self, request: TransportRequest) -> BoxFuture<'static, TransportResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
        };
        let url = self.resolve(&request.url);

        let mut builder = self
            .inner
            .request(method, &url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let metrics = self.metrics.clone();
        let request_method = request.method;
        async move {
            let started = Instant::now();
            let response = send(builder).await;
            let response = TransportResponse {
                elapsed: started.elapsed(),
                ..response
            };

            if let Some(error) = &response.error {
                log::debug!("{request_method} {url} failed: {error}");
            }
            metrics.record(&response);

            response
        }
        .boxed()
    }
}

/// Send the request and read the whole body. Failures become the response's `error`.
async fn send(builder: reqwest::RequestBuilder) -> TransportResponse {
    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            return TransportResponse {
                error: Some(describe_error(&e)),
                ..Default::default()
            }
        }
    };

    let status = response.status().as_u16();
    match response.bytes().await {
        Ok(body) => TransportResponse {
            status,
            body,
            ..Default::default()
        },
        Err(e) => TransportResponse {
            status,
            error: Some(describe_error(&e)),
            ..Default::default()
        },
    }
}

fn describe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}
