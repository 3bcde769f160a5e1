//! Parameter codec: `OpenAPI` `style`/`explode` serialization of argument values.
//!
//! The codec turns one argument value into zero or more `name=value` pairs. Locations decide how
//! the pairs are used afterwards (query string, header value, path segment, cookie).

use crate::error::{CallError, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Where an argument ends up in the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl ParamLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
            Self::Body => "body",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            "cookie" => Some(Self::Cookie),
            "body" => Some(Self::Body),
            _ => None,
        }
    }
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamStyle {
    Matrix,
    Label,
    Form,
    Simple,
    SpaceDelimited,
    PipeDelimited,
    DeepObject,
}

impl ParamStyle {
    /// `simple` for path/header, `form` for query/cookie (and form-encoded bodies).
    #[must_use]
    pub fn default_for(location: ParamLocation) -> Self {
        match location {
            ParamLocation::Path | ParamLocation::Header => Self::Simple,
            ParamLocation::Query | ParamLocation::Cookie | ParamLocation::Body => Self::Form,
        }
    }

    #[must_use]
    pub fn default_explode(self) -> bool {
        matches!(self, Self::Form)
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "matrix" => Some(Self::Matrix),
            "label" => Some(Self::Label),
            "form" => Some(Self::Form),
            "simple" => Some(Self::Simple),
            "spaceDelimited" => Some(Self::SpaceDelimited),
            "pipeDelimited" => Some(Self::PipeDelimited),
            "deepObject" => Some(Self::DeepObject),
            _ => None,
        }
    }
}

/// Effective serialization settings of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Serialization {
    pub style: ParamStyle,
    pub explode: bool,
    pub allow_reserved: bool,
    pub allow_empty_value: bool,
}

impl Serialization {
    /// Resolve the effective style and explode flag from the declared (possibly unset) values.
    #[must_use]
    pub fn resolve(
        location: ParamLocation,
        style: Option<ParamStyle>,
        explode: Option<bool>,
    ) -> Self {
        let style = style.unwrap_or_else(|| ParamStyle::default_for(location));
        Self {
            style,
            explode: explode.unwrap_or_else(|| style.default_explode()),
            allow_reserved: false,
            allow_empty_value: false,
        }
    }

    #[must_use]
    pub fn with_allow_reserved(mut self, allow_reserved: bool) -> Self {
        self.allow_reserved = allow_reserved;
        self
    }

    #[must_use]
    pub fn with_allow_empty_value(mut self, allow_empty_value: bool) -> Self {
        self.allow_empty_value = allow_empty_value;
        self
    }
}

/// Locale-independent scalar formatting.
///
/// Integers have no grouping, floats use the shortest round-trip representation, booleans are
/// `true`/`false`, `null` is empty. Composite values fall back to compact JSON.
#[must_use]
pub fn format_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else if let Some(f) = n.as_f64() {
                format!("{f}")
            } else {
                n.to_string()
            }
        }
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Encode one argument into `(name, value)` pairs.
///
/// # Errors
///
/// Returns [`CallError::ParameterEncoding`] when the value shape cannot be expressed with the
/// declared style (non-array for `spaceDelimited`/`pipeDelimited`, non-object for `deepObject`).
pub fn encode(name: &str, value: &Value, ser: &Serialization) -> Result<Vec<(String, String)>> {
    match value {
        Value::Array(items) => encode_array(name, items, ser),
        Value::Object(map) => encode_object(name, map, ser),
        scalar => encode_scalar(name, scalar, ser),
    }
}

/// Encode and collapse into a single string (path segments, header values).
///
/// # Errors
///
/// Same as [`encode`].
pub fn encode_single(name: &str, value: &Value, ser: &Serialization) -> Result<String> {
    let pairs = encode(name, value, ser)?;
    match ser.style {
        ParamStyle::Matrix | ParamStyle::Label => {
            Ok(pairs.into_iter().map(|(_, v)| v).collect::<String>())
        }
        _ => Ok(pairs
            .into_iter()
            .map(|(_, v)| v)
            .collect::<Vec<_>>()
            .join(",")),
    }
}

fn encode_array(name: &str, items: &[Value], ser: &Serialization) -> Result<Vec<(String, String)>> {
    let values: Vec<String> = items.iter().map(format_scalar).collect();
    let pair = |v: String| vec![(name.to_string(), v)];

    match ser.style {
        ParamStyle::Form if ser.explode => Ok(values
            .into_iter()
            .map(|v| (name.to_string(), v))
            .collect()),
        ParamStyle::Form | ParamStyle::Simple => Ok(pair(values.join(","))),
        ParamStyle::SpaceDelimited => Ok(pair(values.join(" "))),
        ParamStyle::PipeDelimited => Ok(pair(values.join("|"))),
        ParamStyle::Label => {
            let sep = if ser.explode { "." } else { "," };
            Ok(pair(format!(".{}", values.join(sep))))
        }
        ParamStyle::Matrix => {
            if ser.explode {
                Ok(pair(
                    values
                        .iter()
                        .map(|v| format!(";{name}={v}"))
                        .collect::<String>(),
                ))
            } else {
                Ok(pair(format!(";{name}={}", values.join(","))))
            }
        }
        ParamStyle::DeepObject => Err(CallError::ParameterEncoding(format!(
            "parameter '{name}' uses style deepObject, which requires an object value (got an array)"
        ))),
    }
}

fn encode_object(
    name: &str,
    map: &Map<String, Value>,
    ser: &Serialization,
) -> Result<Vec<(String, String)>> {
    let flat = || {
        map.iter()
            .flat_map(|(k, v)| [k.clone(), format_scalar(v)])
            .collect::<Vec<_>>()
            .join(",")
    };

    match ser.style {
        ParamStyle::DeepObject => Ok(map
            .iter()
            .map(|(k, v)| (format!("{name}[{k}]"), format_scalar(v)))
            .collect()),
        ParamStyle::Form if ser.explode => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), format_scalar(v)))
            .collect()),
        ParamStyle::Form | ParamStyle::Simple => Ok(vec![(name.to_string(), flat())]),
        ParamStyle::Label => Ok(vec![(name.to_string(), format!(".{}", flat()))]),
        ParamStyle::Matrix => Ok(vec![(name.to_string(), format!(";{name}={}", flat()))]),
        ParamStyle::SpaceDelimited | ParamStyle::PipeDelimited => {
            Err(CallError::ParameterEncoding(format!(
                "parameter '{name}' uses a delimited style, which requires an array value (got an object)"
            )))
        }
    }
}

fn encode_scalar(name: &str, value: &Value, ser: &Serialization) -> Result<Vec<(String, String)>> {
    let v = format_scalar(value);
    match ser.style {
        ParamStyle::Form | ParamStyle::Simple => Ok(vec![(name.to_string(), v)]),
        ParamStyle::Label => Ok(vec![(name.to_string(), format!(".{v}"))]),
        ParamStyle::Matrix => Ok(vec![(name.to_string(), format!(";{name}={v}"))]),
        ParamStyle::SpaceDelimited | ParamStyle::PipeDelimited => {
            Err(CallError::ParameterEncoding(format!(
                "parameter '{name}' uses a delimited style, which requires an array value"
            )))
        }
        ParamStyle::DeepObject => Err(CallError::ParameterEncoding(format!(
            "parameter '{name}' uses style deepObject, which requires an object value"
        ))),
    }
}

/// One query pair ready for percent-encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPair {
    pub key: String,
    pub value: String,
    pub allow_reserved: bool,
}

/// Join query pairs into a percent-encoded query string.
#[must_use]
pub fn build_query_string(pairs: &[QueryPair]) -> String {
    pairs
        .iter()
        .map(|p| {
            format!(
                "{}={}",
                encode_query_component(&p.key, false),
                encode_query_component(&p.value, p.allow_reserved)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 unreserved characters stay literal.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// `allowReserved` values keep reserved characters, except `&`, `=` and `#` which would corrupt
/// the pair list.
const QUERY_COMPONENT_RESERVED: &AsciiSet = &QUERY_COMPONENT
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';');

fn encode_query_component(s: &str, allow_reserved: bool) -> String {
    let set = if allow_reserved {
        QUERY_COMPONENT_RESERVED
    } else {
        QUERY_COMPONENT
    };
    utf8_percent_encode(s, set).to_string()
}
