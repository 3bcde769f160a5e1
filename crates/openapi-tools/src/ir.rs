//! Version-independent representation of one `OpenAPI` operation.

use crate::schema::{Definitions, Schema};
use apibridge_http_tools::codec::{ParamLocation, ParamStyle};
use indexmap::IndexMap;
use reqwest::Method;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecVersion {
    V30,
    V31,
}

/// `x-*` keys, in document order.
pub type Extensions = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub schema: Schema,
    pub description: Option<String>,
    /// Unset when the document does not say.
    pub style: Option<ParamStyle>,
    pub explode: Option<bool>,
    pub allow_reserved: bool,
    pub allow_empty_value: bool,
    pub deprecated: bool,
    pub example: Option<Value>,
    pub examples: IndexMap<String, Value>,
    pub extensions: Extensions,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingInfo {
    pub content_type: Option<String>,
    pub style: Option<ParamStyle>,
    pub explode: Option<bool>,
    pub allow_reserved: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaTypeInfo {
    pub schema: Option<Schema>,
    pub example: Option<Value>,
    pub examples: IndexMap<String, Value>,
    /// Per body property; only meaningful for multipart and form bodies.
    pub encoding: IndexMap<String, EncodingInfo>,
    pub extensions: Extensions,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestBodyInfo {
    pub required: bool,
    pub description: Option<String>,
    /// Media type -> content, in declaration order.
    pub content: IndexMap<String, MediaTypeInfo>,
    pub extensions: Extensions,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseInfo {
    pub description: Option<String>,
    pub content: IndexMap<String, MediaTypeInfo>,
    pub extensions: Extensions,
}

/// A declared callback: name, runtime expression, and the methods it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackInfo {
    pub name: String,
    pub expression: String,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub method: Method,
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub parameters: Vec<ParameterInfo>,
    pub request_body: Option<RequestBodyInfo>,
    /// Status code (`"200"`, `"2XX"`) or `"default"` -> response.
    pub responses: IndexMap<String, ResponseInfo>,
    /// Definitions reachable from this route's schemas.
    pub definitions: Definitions,
    pub extensions: Extensions,
    pub callbacks: Vec<CallbackInfo>,
    pub deprecated: bool,
}

impl Route {
    /// `"GET /users/{id}"`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{} {}", self.method.as_str(), self.path)
    }

    /// Every schema node of the route, for definition closure computation.
    #[must_use]
    pub fn schema_roots(&self) -> Vec<&Schema> {
        let mut roots: Vec<&Schema> = self.parameters.iter().map(|p| &p.schema).collect();
        if let Some(body) = &self.request_body {
            roots.extend(body.content.values().filter_map(|m| m.schema.as_ref()));
        }
        for resp in self.responses.values() {
            roots.extend(resp.content.values().filter_map(|m| m.schema.as_ref()));
        }
        roots
    }

    /// The success response used for the output schema.
    ///
    /// Precedence: `200`, `201`, `202`, `204`, any other `2xx` ascending, `2XX`, `default`.
    #[must_use]
    pub fn success_response(&self) -> Option<(&str, &ResponseInfo)> {
        for code in ["200", "201", "202", "204"] {
            if let Some((k, v)) = self.responses.get_key_value(code) {
                return Some((k.as_str(), v));
            }
        }
        let mut other: Vec<(u16, &String, &ResponseInfo)> = self
            .responses
            .iter()
            .filter_map(|(k, v)| {
                k.parse::<u16>()
                    .ok()
                    .filter(|n| (200..300).contains(n))
                    .map(|n| (n, k, v))
            })
            .collect();
        other.sort_by_key(|(n, _, _)| *n);
        if let Some((_, k, v)) = other.first() {
            return Some((k.as_str(), *v));
        }
        for code in ["2XX", "2xx", "default"] {
            if let Some((k, v)) = self.responses.get_key_value(code) {
                return Some((k.as_str(), v));
            }
        }
        None
    }

    /// Media types of all `2xx`/`2XX` responses, in declaration order (duplicates kept).
    #[must_use]
    pub fn success_content_types(&self) -> Vec<String> {
        self.responses
            .iter()
            .filter(|(k, _)| k.starts_with('2'))
            .flat_map(|(_, r)| r.content.keys().cloned())
            .collect()
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_with(codes: &[&str]) -> Route {
        let mut responses = IndexMap::new();
        for c in codes {
            let mut content = IndexMap::new();
            content.insert(format!("application/{c}+json"), MediaTypeInfo::default());
            responses.insert((*c).to_string(), ResponseInfo {
                description: None,
                content,
                extensions: Extensions::new(),
            });
        }
        Route {
            path: "/x".into(),
            method: Method::GET,
            operation_id: None,
            summary: None,
            description: None,
            tags: vec![],
            parameters: vec![],
            request_body: None,
            responses,
            definitions: Definitions::new(),
            extensions: Extensions::new(),
            callbacks: vec![],
            deprecated: false,
        }
    }

    #[test]
    fn success_response_precedence() {
        assert_eq!(route_with(&["default", "201", "200"]).success_response().unwrap().0, "200");
        assert_eq!(route_with(&["default", "204", "201"]).success_response().unwrap().0, "201");
        assert_eq!(route_with(&["299", "206", "default"]).success_response().unwrap().0, "206");
        assert_eq!(route_with(&["default", "2XX"]).success_response().unwrap().0, "2XX");
        assert_eq!(route_with(&["404", "default"]).success_response().unwrap().0, "default");
        assert!(route_with(&["404"]).success_response().is_none());
    }

    #[test]
    fn success_content_types_skip_errors() {
        let r = route_with(&["200", "404", "2XX"]);
        assert_eq!(
            r.success_content_types(),
            vec!["application/200+json".to_string(), "application/2XX+json".to_string()]
        );
        assert_eq!(r.key(), "GET /x");
    }
}
