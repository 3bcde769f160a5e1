//! Call-time error taxonomy.
//!
//! Every failure that can happen while serving a call is represented here. None of them is ever
//! surfaced as a protocol fault: [`CallError::into_call_result`] turns each one into an
//! `is_error` result carrying a human-readable message plus a machine-readable payload
//! (`status`, `reason`, `retryable`, `body`) so the calling agent can decide whether to retry.

use rmcp::model::{CallToolResult, Content};
use serde_json::{Map, Value, json};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum CallError {
    /// The argument value shape is incompatible with the declared parameter style.
    #[error("Parameter encoding error: {0}")]
    ParameterEncoding(String),

    /// URL or body construction failed (missing required argument, bad base URL, ...).
    #[error("Request build error: {0}")]
    RequestBuild(String),

    /// No HTTP response at all (DNS, connect, timeout, reset).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The upstream answered with a status >= 400.
    #[error("{message}")]
    HttpStatus {
        status: u16,
        reason: String,
        message: String,
        body: Option<Value>,
    },

    /// A successful response body does not match the advertised output schema.
    #[error("Response validation failed: {0}")]
    Validation(String),

    /// The inbound call was cancelled before the upstream answered.
    #[error("Request cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CallError>;

impl From<reqwest::Error> for CallError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(sanitize_reqwest_error(&value))
    }
}

impl CallError {
    /// Build an [`CallError::HttpStatus`] from a raw error response.
    ///
    /// JSON bodies are pretty-printed into the message and kept parsed under `body`; other
    /// non-empty bodies are appended verbatim.
    #[must_use]
    pub fn http_status(status: u16, reason: &str, body: &[u8]) -> Self {
        let parsed = (!body.is_empty())
            .then(|| serde_json::from_slice::<Value>(body).ok())
            .flatten();

        let mut message = format!("HTTP error {status}: {reason}");
        let body = match parsed {
            Some(v) => {
                let pretty = serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string());
                message.push_str(" - ");
                message.push_str(&pretty);
                Some(v)
            }
            None if body.is_empty() => None,
            None => {
                let text = String::from_utf8_lossy(body).into_owned();
                message.push_str(" - ");
                message.push_str(&text);
                Some(Value::String(text))
            }
        };

        Self::HttpStatus {
            status,
            reason: reason.to_string(),
            message,
            body,
        }
    }

    /// Transient-failure hint for the caller.
    #[must_use]
    pub fn retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => is_retryable_status(*status),
            Self::Transport(msg) => is_retryable_transport_message(msg),
            Self::ParameterEncoding(_)
            | Self::RequestBuild(_)
            | Self::Validation(_)
            | Self::Cancelled => false,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParameterEncoding(_) => "parameter_encoding",
            Self::RequestBuild(_) => "request_build",
            Self::Transport(_) => "transport",
            Self::HttpStatus { .. } => "http_status",
            Self::Validation(_) => "validation",
            Self::Cancelled => "cancelled",
        }
    }

    /// Machine-readable payload exposed as `structured_content` on error results.
    #[must_use]
    pub fn to_structured(&self) -> Value {
        let mut out = Map::new();
        out.insert("error".to_string(), json!(self.kind()));
        out.insert("message".to_string(), json!(self.to_string()));
        if let Self::HttpStatus {
            status,
            reason,
            body,
            ..
        } = self
        {
            out.insert("status".to_string(), json!(status));
            out.insert("reason".to_string(), json!(reason));
            if let Some(body) = body {
                out.insert("body".to_string(), body.clone());
            }
        }
        out.insert("retryable".to_string(), json!(self.retryable()));
        Value::Object(out)
    }

    #[must_use]
    pub fn into_call_result(self) -> CallToolResult {
        let structured = self.to_structured();
        CallToolResult {
            content: vec![Content::text(self.to_string())],
            structured_content: Some(structured),
            is_error: Some(true),
            meta: None,
        }
    }
}

/// `5xx`, `408 Request Timeout` and `429 Too Many Requests` are worth retrying.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Transport failures have no status; classify them by message.
#[must_use]
pub fn is_retryable_transport_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["timeout", "connection", "network"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Drop credentials, query and fragment from a URL before it reaches logs or error messages.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    if e.is_timeout() && !msg.to_ascii_lowercase().contains("timeout") {
        msg.push_str(" (timeout)");
    } else if e.is_connect() && !msg.to_ascii_lowercase().contains("connection") {
        msg.push_str(" (connection failed)");
    }
    msg
}
