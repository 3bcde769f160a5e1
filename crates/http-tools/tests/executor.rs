use apibridge_http_tools::codec::{ParamLocation, ParamStyle};
use apibridge_http_tools::request::{
    BodySpec, ParamMap, ParamMapping, RequestTemplate, param_spec,
};
use apibridge_http_tools::response::OutputContract;
use apibridge_http_tools::runtime::HttpExecutor;
use apibridge_test_support::MockUpstream;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use reqwest::Method;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn args(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}

fn search_template() -> RequestTemplate {
    let mut mappings = ParamMap::new();
    for (name, loc) in [
        ("id", ParamLocation::Path),
        ("tags", ParamLocation::Query),
        ("filter", ParamLocation::Query),
        ("X-Request-Id", ParamLocation::Header),
    ] {
        mappings.insert(
            name,
            ParamMapping {
                openapi_name: name.to_string(),
                location: loc,
                is_suffixed: false,
            },
        );
    }
    RequestTemplate {
        method: Method::POST,
        path: "/items/{id}/search".to_string(),
        params: vec![
            param_spec("id", ParamLocation::Path, true, None, None),
            param_spec(
                "tags",
                ParamLocation::Query,
                false,
                Some(ParamStyle::PipeDelimited),
                None,
            ),
            param_spec(
                "filter",
                ParamLocation::Query,
                false,
                Some(ParamStyle::DeepObject),
                Some(true),
            ),
            param_spec("X-Request-Id", ParamLocation::Header, false, None, None),
        ],
        body: Some(BodySpec {
            content_types: vec!["application/json".to_string()],
            required: false,
            placeholder: None,
        }),
        response_content_types: vec!["application/json".to_string()],
        mappings,
    }
}

#[tokio::test]
async fn call_sends_path_query_headers_and_body() -> anyhow::Result<()> {
    let upstream = MockUpstream::echo().await?;
    let exec = HttpExecutor::new(upstream.base_url())?
        .with_default_headers(vec![("X-Static".to_string(), "cfg".to_string())]);

    let result = exec
        .call(
            &search_template(),
            &args(json!({
                "id": 42,
                "tags": ["a", "b"],
                "filter": {"role": "admin"},
                "X-Request-Id": "req-1",
                "limit": 5
            })),
            &[("X-Session".to_string(), "s1".to_string())],
            &OutputContract::default(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.is_error, Some(false));
    let req = upstream.last_request().expect("recorded request");
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/items/42/search");
    let query = req.query.clone().unwrap_or_default();
    assert!(query.contains("tags=a%7Cb"), "{query}");
    assert!(query.contains("filter%5Brole%5D=admin"), "{query}");
    assert_eq!(req.header("x-request-id"), Some("req-1"));
    assert_eq!(req.header("x-static"), Some("cfg"));
    assert_eq!(req.header("x-session"), Some("s1"));
    assert_eq!(req.header("accept"), Some("application/json"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.json_body(), Some(json!({"limit": 5})));

    let structured = result.structured_content.expect("structured");
    assert_eq!(structured["path"], json!("/items/42/search"));
    let meta = result.meta.expect("meta");
    assert_eq!(meta.0["status"], json!(200));
    Ok(())
}

#[tokio::test]
async fn http_errors_become_error_results() -> anyhow::Result<()> {
    let routes = Router::new()
        .route(
            "/busy",
            get(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    axum::Json(json!({"detail": "try later"})),
                )
            }),
        )
        .route("/gone", get(|| async { (StatusCode::NOT_FOUND, "no such thing") }));
    let upstream = MockUpstream::start(routes).await?;
    let exec = HttpExecutor::new(upstream.base_url())?;

    let template = |path: &str| RequestTemplate {
        method: Method::GET,
        path: path.to_string(),
        params: vec![],
        body: None,
        response_content_types: vec![],
        mappings: ParamMap::new(),
    };

    let busy = exec
        .call(
            &template("/busy"),
            &Map::new(),
            &[],
            &OutputContract::default(),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(busy.is_error, Some(true));
    let s = busy.structured_content.expect("structured");
    assert_eq!(s["status"], json!(503));
    assert_eq!(s["retryable"], json!(true));
    assert_eq!(s["body"], json!({"detail": "try later"}));

    let gone = exec
        .call(
            &template("/gone"),
            &Map::new(),
            &[],
            &OutputContract::default(),
            &CancellationToken::new(),
        )
        .await;
    let s = gone.structured_content.expect("structured");
    assert_eq!(s["status"], json!(404));
    assert_eq!(s["retryable"], json!(false));
    assert_eq!(s["body"], json!("no such thing"));
    Ok(())
}

#[tokio::test]
async fn cancellation_aborts_the_call() -> anyhow::Result<()> {
    let routes = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "late"
        }),
    );
    let upstream = MockUpstream::start(routes).await?;
    let exec = HttpExecutor::new(upstream.base_url())?;
    let template = RequestTemplate {
        method: Method::GET,
        path: "/slow".to_string(),
        params: vec![],
        body: None,
        response_content_types: vec![],
        mappings: ParamMap::new(),
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = exec
        .call(&template, &Map::new(), &[], &OutputContract::default(), &cancel)
        .await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.is_error, Some(true));
    let s = result.structured_content.expect("structured");
    assert_eq!(s["error"], json!("cancelled"));
    assert_eq!(s["retryable"], json!(false));
    Ok(())
}

#[tokio::test]
async fn transport_failure_is_retryable() -> anyhow::Result<()> {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };
    let exec = HttpExecutor::new(format!("http://{addr}"))?;
    let template = RequestTemplate {
        method: Method::GET,
        path: "/x".to_string(),
        params: vec![],
        body: None,
        response_content_types: vec![],
        mappings: ParamMap::new(),
    };
    let result = exec
        .call(&template, &Map::new(), &[], &OutputContract::default(), &CancellationToken::new())
        .await;
    let s = result.structured_content.expect("structured");
    assert_eq!(s["error"], json!("transport"));
    assert_eq!(s["retryable"], json!(true));
    Ok(())
}

#[tokio::test]
async fn oversized_responses_are_rejected() -> anyhow::Result<()> {
    let routes = Router::new().route("/big", get(|| async { "x".repeat(4096) }));
    let upstream = MockUpstream::start(routes).await?;
    let exec = HttpExecutor::new(upstream.base_url())?.with_max_response_bytes(Some(1024));
    let template = RequestTemplate {
        method: Method::GET,
        path: "/big".to_string(),
        params: vec![],
        body: None,
        response_content_types: vec![],
        mappings: ParamMap::new(),
    };
    let result = exec
        .call(&template, &Map::new(), &[], &OutputContract::default(), &CancellationToken::new())
        .await;
    assert_eq!(result.is_error, Some(true));
    let s = result.structured_content.expect("structured");
    assert!(s["message"].as_str().unwrap_or_default().contains("Response too large"));
    Ok(())
}
