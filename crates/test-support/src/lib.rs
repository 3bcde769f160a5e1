//! In-process mock upstream for call-time tests.

use anyhow::Context as _;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Json;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One request as seen by the echo fallback.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Lowercased header names.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

type Recorder = Arc<Mutex<Vec<RecordedRequest>>>;

/// An axum server on `127.0.0.1:<ephemeral>`, aborted on drop.
///
/// Unrouted requests hit an echo handler that records them and answers with
/// `{method, path, query, headers, body}`.
pub struct MockUpstream {
    base_url: String,
    recorded: Recorder,
    handle: JoinHandle<()>,
}

impl MockUpstream {
    /// Serve only the echo handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn echo() -> anyhow::Result<Self> {
        Self::start(Router::new()).await
    }

    /// Serve `routes`, falling back to the echo handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start(routes: Router) -> anyhow::Result<Self> {
        let recorded: Recorder = Arc::new(Mutex::new(Vec::new()));
        let echo_routes = Router::new()
            .fallback(echo_handler)
            .with_state(recorded.clone());
        let app = routes.merge(echo_routes);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock upstream")?;
        let addr = listener.local_addr().context("mock upstream address")?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            recorded,
            handle,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.recorded.lock().clone()
    }

    #[must_use]
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.recorded.lock().last().cloned()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn echo_handler(
    State(recorded): State<Recorder>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    let req = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: header_pairs,
        body: body.to_vec(),
    };

    let mut header_obj = Map::new();
    for (k, v) in &req.headers {
        header_obj.insert(k.clone(), json!(v));
    }
    let body_value = if req.body.is_empty() {
        Value::Null
    } else {
        req.json_body()
            .unwrap_or_else(|| json!(String::from_utf8_lossy(&req.body)))
    };
    let out = json!({
        "method": req.method,
        "path": req.path,
        "query": req.query,
        "headers": header_obj,
        "body": body_value,
    });
    recorded.lock().push(req);
    Json(out)
}
