//! Response processor: HTTP response to MCP call result.

use crate::content;
use crate::error::CallError;
use base64::Engine as _;
use rmcp::model::{CallToolResult, Content, JsonObject, Meta};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::warn;

/// What a call promises to return, compiled once per component.
#[derive(Clone, Default)]
pub struct OutputContract {
    pub schema: Option<Arc<JsonObject>>,
    /// The body is not an object; it is returned as `{"result": <body>}`.
    pub wrap_result: bool,
    validator: Option<Arc<jsonschema::Validator>>,
}

impl std::fmt::Debug for OutputContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputContract")
            .field("schema", &self.schema)
            .field("wrap_result", &self.wrap_result)
            .field("validates", &self.validator.is_some())
            .finish()
    }
}

impl OutputContract {
    /// Compile the output schema validator when `validate` is set.
    ///
    /// A schema the engine rejects only disables validation; the component stays usable.
    #[must_use]
    pub fn new(schema: Option<Arc<JsonObject>>, wrap_result: bool, validate: bool) -> Self {
        let validator = match (&schema, validate) {
            (Some(s), true) => match jsonschema::validator_for(&Value::Object((**s).clone())) {
                Ok(v) => Some(Arc::new(v)),
                Err(e) => {
                    warn!(error = %e, "output schema does not compile; response validation disabled");
                    None
                }
            },
            _ => None,
        };
        Self {
            schema,
            wrap_result,
            validator,
        }
    }

    /// Validate a (wrapped) structured value.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Validation`] with the joined engine messages.
    pub fn validate(&self, value: &Value) -> Result<(), CallError> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| {
                let path = e.instance_path().to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{e} at {path}")
                }
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CallError::Validation(errors.join("; ")))
        }
    }
}

/// A fully read HTTP response plus the request it answers.
#[derive(Debug, Clone, Default)]
pub struct HttpResponseParts {
    pub status: u16,
    pub status_text: String,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub method: String,
    pub url: String,
}

impl HttpResponseParts {
    fn metadata(&self) -> Meta {
        let mut headers = Map::new();
        for (k, v) in &self.headers {
            headers.insert(k.clone(), json!(v));
        }
        let mut obj = JsonObject::new();
        obj.insert("status".to_string(), json!(self.status));
        obj.insert("statusText".to_string(), json!(self.status_text));
        obj.insert("contentType".to_string(), json!(self.content_type));
        obj.insert("headers".to_string(), Value::Object(headers));
        obj.insert(
            "request".to_string(),
            json!({ "method": self.method, "url": self.url }),
        );
        Meta(obj)
    }
}

/// Turn a response into a call result. Never fails: errors become `is_error` results.
#[must_use]
pub fn process(parts: HttpResponseParts, contract: &OutputContract) -> CallToolResult {
    if parts.status >= 400 {
        return CallError::http_status(parts.status, &parts.status_text, &parts.body)
            .into_call_result();
    }

    let meta = Some(parts.metadata());
    let ct = parts.content_type.as_deref();

    if parts.body.is_empty() {
        return CallToolResult {
            content: vec![Content::text("{}")],
            structured_content: Some(json!({})),
            is_error: Some(false),
            meta,
        };
    }

    if content::is_image_content_type(ct) {
        let b64 = base64::engine::general_purpose::STANDARD.encode(&parts.body);
        let mime_type = ct.unwrap_or("image/*").to_string();
        return CallToolResult {
            content: vec![Content::image(b64, mime_type)],
            structured_content: None,
            is_error: Some(false),
            meta,
        };
    }

    let json_expected = ct.is_none_or(content::is_json_content_type);
    if let Some(value) = parse_json_body(&parts.body, json_expected, contract) {
        let structured = if contract.wrap_result || !value.is_object() {
            json!({ "result": value })
        } else {
            value
        };
        if let Err(e) = contract.validate(&structured) {
            return e.into_call_result();
        }
        let text = serde_json::to_string(&structured).unwrap_or_else(|_| structured.to_string());
        return CallToolResult {
            content: vec![Content::text(text)],
            structured_content: Some(structured),
            is_error: Some(false),
            meta,
        };
    }

    CallToolResult {
        content: vec![Content::text(bytes_to_text(&parts.body, ct))],
        structured_content: None,
        is_error: Some(false),
        meta,
    }
}

/// The JSON value of a body, if it should be structured.
///
/// Bodies under a non-JSON content type (servers often send JSON as `text/plain`) are only
/// structured when they parse to an object and the contract declares an object schema.
fn parse_json_body(body: &[u8], json_expected: bool, contract: &OutputContract) -> Option<Value> {
    let value = serde_json::from_slice::<Value>(body).ok()?;
    if json_expected || (contract.schema.is_some() && !contract.wrap_result && value.is_object()) {
        Some(value)
    } else {
        None
    }
}

/// UTF-8 text as is; anything else as a base64 JSON envelope.
#[must_use]
pub fn bytes_to_text(bytes: &[u8], content_type: Option<&str>) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        s.to_string()
    } else {
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        json!({
            "encoding": "base64",
            "mimeType": content_type,
            "data": b64
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(status: u16, ct: Option<&str>, body: &[u8]) -> HttpResponseParts {
        HttpResponseParts {
            status,
            status_text: "OK".to_string(),
            content_type: ct.map(str::to_string),
            headers: vec![("x-request-id".into(), "r1".into())],
            body: body.to_vec(),
            method: "GET".into(),
            url: "http://api.test/users/1".into(),
        }
    }

    fn schema(v: Value) -> Option<Arc<JsonObject>> {
        match v {
            Value::Object(m) => Some(Arc::new(m)),
            _ => None,
        }
    }

    #[test]
    fn empty_body_yields_empty_structured_result() {
        let r = process(parts(204, None, b""), &OutputContract::default());
        assert_eq!(r.is_error, Some(false));
        assert_eq!(r.structured_content, Some(json!({})));
    }

    #[test]
    fn json_object_passes_through_with_metadata() {
        let r = process(
            parts(200, Some("application/json"), br#"{"id":1}"#),
            &OutputContract::default(),
        );
        assert_eq!(r.structured_content, Some(json!({"id": 1})));
        let meta = r.meta.expect("meta");
        assert_eq!(meta.0["status"], json!(200));
        assert_eq!(meta.0["headers"]["x-request-id"], json!("r1"));
        assert_eq!(meta.0["request"]["method"], json!("GET"));
    }

    #[test]
    fn non_object_json_is_wrapped() {
        let r = process(
            parts(200, Some("application/json"), b"[1,2]"),
            &OutputContract::default(),
        );
        assert_eq!(r.structured_content, Some(json!({"result": [1, 2]})));

        let contract = OutputContract::new(None, true, true);
        let r = process(parts(200, Some("application/json"), br#"{"a":1}"#), &contract);
        assert_eq!(r.structured_content, Some(json!({"result": {"a": 1}})));
    }

    #[test]
    fn validation_failure_is_an_error_result() {
        let contract = OutputContract::new(
            schema(json!({
                "type": "object",
                "properties": {"id": {"type": "integer"}},
                "required": ["id"]
            })),
            false,
            true,
        );
        let r = process(parts(200, Some("application/json"), br#"{"id":"x"}"#), &contract);
        assert_eq!(r.is_error, Some(true));
        let structured = r.structured_content.expect("structured");
        assert_eq!(structured["error"], json!("validation"));
        assert!(
            structured["message"]
                .as_str()
                .unwrap()
                .starts_with("Response validation failed: ")
        );

        let ok = process(parts(200, Some("application/json"), br#"{"id":3}"#), &contract);
        assert_eq!(ok.is_error, Some(false));
    }

    #[test]
    fn validation_can_be_disabled() {
        let contract = OutputContract::new(
            schema(json!({"type": "object", "required": ["id"]})),
            false,
            false,
        );
        let r = process(parts(200, Some("application/json"), b"{}"), &contract);
        assert_eq!(r.is_error, Some(false));
    }

    #[test]
    fn text_body_is_plain_text() {
        let r = process(
            parts(200, Some("text/plain"), b"{\"looks\":\"json\"}"),
            &OutputContract::default(),
        );
        assert!(r.structured_content.is_none());
        assert_eq!(
            r.content[0].as_text().map(|t| t.text.as_str()),
            Some("{\"looks\":\"json\"}")
        );
    }

    #[test]
    fn mislabeled_json_is_structured_when_an_object_is_declared() {
        let contract = OutputContract::new(
            schema(json!({"type": "object", "properties": {"id": {"type": "integer"}}})),
            false,
            true,
        );
        let r = process(parts(200, Some("text/plain"), br#"{"id":7}"#), &contract);
        assert_eq!(r.is_error, Some(false));
        assert_eq!(r.structured_content, Some(json!({"id": 7})));

        let r = process(parts(200, Some("text/plain"), b"42"), &contract);
        assert!(r.structured_content.is_none());

        let wrapped = OutputContract::new(schema(json!({"type": "object"})), true, true);
        let r = process(parts(200, Some("text/csv"), br#"{"a":1}"#), &wrapped);
        assert!(r.structured_content.is_none());
    }

    #[test]
    fn image_body_is_image_content() {
        let r = process(
            parts(200, Some("image/png"), &[0x89, b'P', b'N', b'G']),
            &OutputContract::default(),
        );
        assert!(r.content[0].as_image().is_some());
    }

    #[test]
    fn binary_body_is_base64_envelope() {
        let text = bytes_to_text(&[0xff, 0xfe], Some("application/octet-stream"));
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["encoding"], json!("base64"));
        assert_eq!(v["data"], json!("//4="));
    }

    #[test]
    fn http_error_is_classified() {
        let mut p = parts(503, Some("application/json"), br#"{"detail":"down"}"#);
        p.status_text = "Service Unavailable".into();
        let r = process(p, &OutputContract::default());
        assert_eq!(r.is_error, Some(true));
        let structured = r.structured_content.expect("structured");
        assert_eq!(structured["retryable"], json!(true));
        assert_eq!(structured["body"], json!({"detail": "down"}));
    }
}
