//! HTTP executor: sends built requests and feeds responses to the processor.

use crate::error::{CallError, Result, redact_url, sanitize_reqwest_error};
use crate::request::{OutboundRequest, RequestTemplate};
use crate::response::{self, HttpResponseParts, OutputContract};
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use rmcp::model::CallToolResult;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared, cheaply clonable executor for one upstream.
///
/// Invocations are independent; concurrency is bounded only by the client's connection pool.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    base_url: String,
    default_headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    max_response_bytes: Option<usize>,
}

impl HttpExecutor {
    /// # Errors
    ///
    /// Returns [`CallError::RequestBuild`] if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| CallError::RequestBuild(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            default_headers: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
            max_response_bytes: None,
        }
    }

    /// `None` disables the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_default_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.default_headers = headers;
        self
    }

    #[must_use]
    pub fn with_max_response_bytes(mut self, max: Option<usize>) -> Self {
        self.max_response_bytes = max;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build, send and process one call. Never fails; errors become `is_error` results.
    pub async fn call(
        &self,
        template: &RequestTemplate,
        args: &Map<String, Value>,
        session_headers: &[(String, String)],
        contract: &OutputContract,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let request = match self.build(template, args, session_headers) {
            Ok(r) => r,
            Err(e) => return e.into_call_result(),
        };
        match self.send(request, cancel).await {
            Ok(parts) => response::process(parts, contract),
            Err(e) => e.into_call_result(),
        }
    }

    /// Build the outbound request with static headers first, then session headers.
    ///
    /// # Errors
    ///
    /// See [`RequestTemplate::build`].
    pub fn build(
        &self,
        template: &RequestTemplate,
        args: &Map<String, Value>,
        session_headers: &[(String, String)],
    ) -> Result<OutboundRequest> {
        let mut extra = self.default_headers.clone();
        extra.extend(session_headers.iter().cloned());
        template.build(&self.base_url, args, &extra)
    }

    /// Send a request and read the whole body, racing both against `cancel`.
    ///
    /// # Errors
    ///
    /// [`CallError::Cancelled`] if the token fires first, [`CallError::Transport`] when no
    /// response arrives or the body exceeds the size limit, [`CallError::RequestBuild`] for
    /// invalid header names or values.
    pub async fn send(
        &self,
        request: OutboundRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponseParts> {
        let method = request.method.to_string();
        let url_for_meta = redact_url(&request.url);
        debug!(method = %method, url = %url_for_meta, "sending upstream request");

        let mut builder = self.client.request(request.method, request.url);
        for (k, v) in &request.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| CallError::RequestBuild(format!("invalid header name '{k}': {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| CallError::RequestBuild(format!("invalid value for header '{k}': {e}")))?;
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body.bytes);
        }
        if let Some(t) = self.timeout {
            builder = builder.timeout(t);
        }

        let max = self.max_response_bytes;
        let exchange = async move {
            let response = builder.send().await?;
            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let headers = response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();
            let body = read_body_limited(response, max).await?;
            Ok::<_, CallError>(HttpResponseParts {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
                content_type,
                headers,
                body,
                method,
                url: url_for_meta,
            })
        };

        tokio::select! {
            () = cancel.cancelled() => Err(CallError::Cancelled),
            res = exchange => res,
        }
    }
}

async fn read_body_limited(
    mut response: reqwest::Response,
    max_bytes: Option<usize>,
) -> Result<Vec<u8>> {
    let Some(max) = max_bytes else {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CallError::Transport(sanitize_reqwest_error(&e)))?;
        return Ok(bytes.to_vec());
    };

    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(CallError::Transport(format!(
            "Response too large: {len} bytes (limit {max})"
        )));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| CallError::Transport(sanitize_reqwest_error(&e)))?
    {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(CallError::Transport(format!(
                "Response too large: exceeded {max} bytes"
            )));
        }
        out.extend_from_slice(&chunk);
    }

    Ok(out)
}
