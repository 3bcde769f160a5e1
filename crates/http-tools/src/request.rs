//! Request builder: flat call arguments to an outbound HTTP request.

use crate::codec::{self, ParamLocation, ParamStyle, QueryPair, Serialization};
use crate::content;
use crate::error::{CallError, Result};
use indexmap::IndexMap;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Link between an exposed input property and the `OpenAPI` parameter behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamMapping {
    pub openapi_name: String,
    pub location: ParamLocation,
    pub is_suffixed: bool,
}

/// Exposed property name -> [`ParamMapping`], in input-schema order.
///
/// Properties without an entry are body properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamMap {
    entries: IndexMap<String, ParamMapping>,
}

impl ParamMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, exposed: impl Into<String>, mapping: ParamMapping) {
        self.entries.insert(exposed.into(), mapping);
    }

    #[must_use]
    pub fn get(&self, exposed: &str) -> Option<&ParamMapping> {
        self.entries.get(exposed)
    }

    /// Reverse lookup: the exposed name of an `OpenAPI` parameter.
    #[must_use]
    pub fn exposed_name(&self, openapi_name: &str, location: ParamLocation) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, m)| m.openapi_name == openapi_name && m.location == location)
            .map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamMapping)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub serialization: Serialization,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodySpec {
    /// Declared media types, in document order.
    pub content_types: Vec<String>,
    pub required: bool,
    /// Set when the body is exposed as one property (non-object body schema).
    pub placeholder: Option<String>,
}

/// Everything the builder needs from a route, captured at registration time.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: Method,
    pub path: String,
    pub params: Vec<ParamSpec>,
    pub body: Option<BodySpec>,
    pub response_content_types: Vec<String>,
    pub mappings: ParamMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl OutboundRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct Buckets<'a> {
    path: Vec<(&'a ParamSpec, &'a Value)>,
    query: Vec<(&'a ParamSpec, &'a Value)>,
    header: Vec<(&'a ParamSpec, &'a Value)>,
    cookie: Vec<(&'a ParamSpec, &'a Value)>,
    body: Map<String, Value>,
}

impl RequestTemplate {
    fn spec_for(&self, mapping: &ParamMapping) -> Option<&ParamSpec> {
        self.params
            .iter()
            .find(|p| p.name == mapping.openapi_name && p.location == mapping.location)
    }

    fn partition<'a>(&'a self, args: &'a Map<String, Value>) -> Result<Buckets<'a>> {
        let mut buckets = Buckets::default();
        for (exposed, value) in args {
            if value.is_null() {
                continue;
            }
            let spec = self.mappings.get(exposed).and_then(|m| self.spec_for(m));
            match spec {
                Some(p) => match p.location {
                    ParamLocation::Path => buckets.path.push((p, value)),
                    ParamLocation::Query => buckets.query.push((p, value)),
                    ParamLocation::Header => buckets.header.push((p, value)),
                    ParamLocation::Cookie => buckets.cookie.push((p, value)),
                    ParamLocation::Body => {
                        buckets.body.insert(p.name.clone(), value.clone());
                    }
                },
                None if self.body.is_some() => {
                    buckets.body.insert(exposed.clone(), value.clone());
                }
                None => {
                    debug!(argument = %exposed, "ignoring argument with no parameter or body to map to");
                }
            }
        }

        for p in self.params.iter().filter(|p| p.required) {
            let exposed = self
                .mappings
                .exposed_name(&p.name, p.location)
                .unwrap_or(&p.name);
            if args.get(exposed).is_none_or(Value::is_null) {
                return Err(CallError::RequestBuild(format!(
                    "missing required {} parameter '{exposed}'",
                    p.location
                )));
            }
        }

        Ok(buckets)
    }

    /// Build the outbound request.
    ///
    /// `extra_headers` (static config headers, then session headers) are only added when the
    /// request does not already carry a header of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::ParameterEncoding`] when a value does not fit its style and
    /// [`CallError::RequestBuild`] for missing required arguments or an invalid URL.
    pub fn build(
        &self,
        base_url: &str,
        args: &Map<String, Value>,
        extra_headers: &[(String, String)],
    ) -> Result<OutboundRequest> {
        let buckets = self.partition(args)?;

        let path = self.render_path(&buckets.path)?;

        let mut query = Vec::new();
        for (p, value) in &buckets.query {
            if value.as_str() == Some("") && !p.serialization.allow_empty_value {
                continue;
            }
            for (key, value) in codec::encode(&p.name, value, &p.serialization)? {
                query.push(QueryPair {
                    key,
                    value,
                    allow_reserved: p.serialization.allow_reserved,
                });
            }
        }

        let mut headers: Vec<(String, String)> = Vec::new();
        for (p, value) in &buckets.header {
            let v = codec::encode_single(&p.name, value, &p.serialization)?;
            headers.push((p.name.clone(), v));
        }

        if !buckets.cookie.is_empty() {
            let mut parts = Vec::new();
            for (p, value) in &buckets.cookie {
                for (k, v) in codec::encode(&p.name, value, &p.serialization)? {
                    parts.push(format!("{k}={v}"));
                }
            }
            headers.push(("Cookie".to_string(), parts.join("; ")));
        }

        let explicit_accept = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("accept"));
        if !explicit_accept
            && let Some(accept) =
                content::accept_header(self.response_content_types.iter().map(String::as_str))
        {
            headers.push(("Accept".to_string(), accept));
        }

        let body = self.render_body(args, buckets.body)?;
        if let Some(b) = &body {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case("content-type"));
            headers.push(("Content-Type".to_string(), b.content_type.clone()));
        }

        for (k, v) in extra_headers {
            if !headers.iter().any(|(h, _)| h.eq_ignore_ascii_case(k)) {
                headers.push((k.clone(), v.clone()));
            }
        }

        let url = join_url(base_url, &path, &query)?;
        Ok(OutboundRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
        })
    }

    fn render_path(&self, values: &[(&ParamSpec, &Value)]) -> Result<String> {
        let mut path = self.path.clone();
        for (p, value) in values {
            let raw = codec::encode_single(&p.name, value, &p.serialization)?;
            let encoded = utf8_percent_encode(&raw, PATH_SEGMENT).to_string();
            path = path.replace(&format!("{{{}}}", p.name), &encoded);
        }
        if let Some(start) = path.find('{')
            && let Some(len) = path[start..].find('}')
        {
            return Err(CallError::RequestBuild(format!(
                "missing path parameter '{}'",
                &path[start + 1..start + len]
            )));
        }
        Ok(path)
    }

    fn render_body(
        &self,
        args: &Map<String, Value>,
        fields: Map<String, Value>,
    ) -> Result<Option<RequestBody>> {
        let Some(spec) = &self.body else {
            return Ok(None);
        };
        let declared = || spec.content_types.iter().map(String::as_str);
        let preferred = content::preferred_content_type(declared())
            .unwrap_or("application/json")
            .to_string();

        if let Some(placeholder) = &spec.placeholder {
            return match args.get(placeholder) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(raw)) => Ok(Some(RequestBody {
                    content_type: raw_payload_content_type(raw, &spec.content_types),
                    bytes: raw.clone().into_bytes(),
                })),
                Some(value) => Ok(Some(encode_body(&preferred, value)?)),
            };
        }

        if fields.is_empty() && !spec.required {
            return Ok(None);
        }
        Ok(Some(encode_body(&preferred, &Value::Object(fields))?))
    }
}

fn encode_body(content_type: &str, value: &Value) -> Result<RequestBody> {
    if content::is_form_urlencoded(content_type) {
        let Value::Object(map) = value else {
            return Err(CallError::RequestBuild(
                "form-encoded body requires an object value".to_string(),
            ));
        };
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in map {
            if !v.is_null() {
                ser.append_pair(k, &codec::format_scalar(v));
            }
        }
        return Ok(RequestBody {
            content_type: content_type.to_string(),
            bytes: ser.finish().into_bytes(),
        });
    }

    let bytes = serde_json::to_vec(value)
        .map_err(|e| CallError::RequestBuild(format!("failed to encode body: {e}")))?;
    Ok(RequestBody {
        content_type: content_type.to_string(),
        bytes,
    })
}

/// Content type for a pre-serialized payload.
///
/// JSON-parsable payloads use a declared JSON type when there is one; otherwise the first
/// declared text type, else the first declared type.
fn raw_payload_content_type(raw: &str, declared: &[String]) -> String {
    let looks_json = serde_json::from_str::<Value>(raw).is_ok();
    if looks_json
        && let Some(ct) = declared.iter().find(|ct| content::is_json_content_type(ct))
    {
        return ct.clone();
    }
    if let Some(ct) = declared
        .iter()
        .find(|ct| ct.to_ascii_lowercase().starts_with("text/"))
    {
        return ct.clone();
    }
    declared.first().cloned().unwrap_or_else(|| {
        if looks_json {
            "application/json".to_string()
        } else {
            "text/plain".to_string()
        }
    })
}

/// Join base URL and path with exactly one `/`, then attach the query string.
///
/// # Errors
///
/// Returns [`CallError::RequestBuild`] when the result is not a valid URL.
pub fn join_url(base_url: &str, path: &str, query: &[QueryPair]) -> Result<Url> {
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let mut url = Url::parse(&joined)
        .map_err(|e| CallError::RequestBuild(format!("invalid URL '{joined}': {e}")))?;
    if !query.is_empty() {
        url.set_query(Some(&codec::build_query_string(query)));
    }
    Ok(url)
}

/// Shorthand used by registration code and tests.
#[must_use]
pub fn param_spec(
    name: &str,
    location: ParamLocation,
    required: bool,
    style: Option<ParamStyle>,
    explode: Option<bool>,
) -> ParamSpec {
    ParamSpec {
        name: name.to_string(),
        location,
        required,
        serialization: Serialization::resolve(location, style, explode),
    }
}
