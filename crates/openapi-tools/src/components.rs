//! MCP components built from routes, and the URI templates resources are read through.

use crate::error::{OpenApiToolsError, Result};
use crate::ir::Route;
use apibridge_http_tools::codec::{ParamLocation, format_scalar};
use apibridge_http_tools::request::{ParamMap, RequestTemplate};
use apibridge_http_tools::response::OutputContract;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use rmcp::model::{
    Annotated, JsonObject, RawResource, Resource, ResourceTemplate, Tool, ToolAnnotations,
};
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Arc;

pub const RESOURCE_SCHEME: &str = "resource://";

/// Header parameters appear in URI templates as `__header__<Name>` (hyphens become `_`).
pub const HEADER_VAR_PREFIX: &str = "__header__";

/// RFC 3986 unreserved characters stay as they are.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone)]
pub struct ToolComponent {
    pub name: String,
    pub description: String,
    pub input_schema: Arc<JsonObject>,
    pub output_schema: Option<Arc<JsonObject>>,
    pub tags: Vec<String>,
    pub annotations: ToolAnnotations,
    pub route: Arc<Route>,
    pub template: Arc<RequestTemplate>,
    pub contract: Arc<OutputContract>,
}

impl ToolComponent {
    #[must_use]
    pub fn to_tool(&self) -> Tool {
        let mut tool = Tool::new(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        );
        tool.output_schema.clone_from(&self.output_schema);
        tool.annotations = Some(self.annotations.clone());
        tool
    }
}

/// A parameterless GET exposed at `resource://<name>`.
#[derive(Debug, Clone)]
pub struct ResourceComponent {
    pub name: String,
    pub description: String,
    pub uri: String,
    pub mime_type: Option<String>,
    pub tags: Vec<String>,
    pub route: Arc<Route>,
    pub template: Arc<RequestTemplate>,
}

impl ResourceComponent {
    #[must_use]
    pub fn to_resource(&self) -> Resource {
        let mut raw = RawResource::new(self.uri.clone(), self.name.clone());
        raw.description = Some(self.description.clone());
        raw.mime_type.clone_from(&self.mime_type);
        Annotated::new(raw, None)
    }
}

#[derive(Debug, Clone)]
pub struct ResourceTemplateComponent {
    pub name: String,
    pub description: String,
    pub uri_template: UriTemplate,
    pub mime_type: Option<String>,
    pub tags: Vec<String>,
    pub route: Arc<Route>,
    pub template: Arc<RequestTemplate>,
}

impl ResourceTemplateComponent {
    /// # Errors
    ///
    /// Returns an error if the MCP model rejects the template.
    pub fn to_resource_template(&self) -> Result<ResourceTemplate> {
        let mut raw = json!({
            "uriTemplate": self.uri_template.to_string(),
            "name": self.name,
            "description": self.description,
        });
        if let Some(mime) = &self.mime_type {
            raw["mimeType"] = Value::String(mime.clone());
        }
        serde_json::from_value(raw).map_err(|e| {
            OpenApiToolsError::Runtime(format!(
                "invalid resource template '{}': {e}",
                self.name
            ))
        })
    }
}

/// Receiver of registered components (typically an MCP server's registry).
pub trait ComponentSink {
    fn register_tool(&mut self, tool: &ToolComponent);
    fn register_resource(&mut self, resource: &ResourceComponent);
    fn register_resource_template(&mut self, template: &ResourceTemplateComponent);
}

/// One template variable and the call argument it fills.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TemplateVar {
    var: String,
    argument: String,
}

/// `resource://<name>/{p1}/{p2}{?q1,q2,__header__X_Id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    base: String,
    path_vars: Vec<TemplateVar>,
    query_vars: Vec<TemplateVar>,
}

impl UriTemplate {
    /// Template for `route`; variables are named after the exposed input properties.
    #[must_use]
    pub fn for_route(name: &str, route: &Route, mappings: &ParamMap) -> Self {
        let exposed = |openapi_name: &str, location: ParamLocation| {
            mappings
                .exposed_name(openapi_name, location)
                .unwrap_or(openapi_name)
                .to_string()
        };

        let path_vars = path_placeholders(&route.path)
            .into_iter()
            .map(|p| {
                let argument = exposed(p, ParamLocation::Path);
                TemplateVar {
                    var: template_var_name(&argument),
                    argument,
                }
            })
            .collect();

        let query_vars = route
            .parameters
            .iter()
            .filter_map(|p| {
                let argument = exposed(&p.name, p.location);
                let var = match p.location {
                    ParamLocation::Query => template_var_name(&argument),
                    ParamLocation::Header => {
                        format!("{HEADER_VAR_PREFIX}{}", template_var_name(&p.name))
                    }
                    _ => return None,
                };
                Some(TemplateVar { var, argument })
            })
            .collect();

        Self {
            base: format!("{RESOURCE_SCHEME}{name}"),
            path_vars,
            query_vars,
        }
    }

    /// Substitute `args`; unset query variables are left out.
    #[must_use]
    pub fn expand(&self, args: &Map<String, Value>) -> String {
        let mut out = self.base.clone();
        for v in &self.path_vars {
            let value = args.get(&v.argument).map(format_scalar).unwrap_or_default();
            out.push('/');
            out.push_str(&utf8_percent_encode(&value, UNRESERVED).to_string());
        }
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        let mut any = false;
        for v in &self.query_vars {
            if let Some(value) = args.get(&v.argument).filter(|v| !v.is_null()) {
                query.append_pair(&v.var, &format_scalar(value));
                any = true;
            }
        }
        if any {
            out.push('?');
            out.push_str(&query.finish());
        }
        out
    }

    /// Call arguments encoded in a concrete `uri`, or `None` when it does not fit the template.
    ///
    /// Path segments are taken positionally; query and header variables by name. Values are
    /// URL-decoded strings.
    #[must_use]
    pub fn decode(&self, uri: &str) -> Option<Map<String, Value>> {
        let rest = uri.strip_prefix(&self.base)?;
        let (path_part, query) = match rest.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (rest, None),
        };

        let mut args = Map::new();
        if self.path_vars.is_empty() {
            if !path_part.is_empty() {
                return None;
            }
        } else {
            let segments: Vec<&str> = path_part.strip_prefix('/')?.split('/').collect();
            if segments.len() != self.path_vars.len() {
                return None;
            }
            for (v, seg) in self.path_vars.iter().zip(segments) {
                let decoded = percent_decode_str(seg).decode_utf8().ok()?;
                args.insert(v.argument.clone(), Value::String(decoded.into_owned()));
            }
        }

        if let Some(query) = query {
            for (k, value) in url::form_urlencoded::parse(query.as_bytes()) {
                if let Some(v) = self.query_vars.iter().find(|v| v.var == k) {
                    args.insert(v.argument.clone(), Value::String(value.into_owned()));
                }
            }
        }
        Some(args)
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        for v in &self.path_vars {
            write!(f, "/{{{}}}", v.var)?;
        }
        if !self.query_vars.is_empty() {
            let names: Vec<&str> = self.query_vars.iter().map(|v| v.var.as_str()).collect();
            write!(f, "{{?{}}}", names.join(","))?;
        }
        Ok(())
    }
}

/// `{name}` placeholders of a path template, in order.
fn path_placeholders(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push(&rest[start + 1..start + len]);
        rest = &rest[start + len + 1..];
    }
    out
}

/// RFC 6570 variable names allow `[A-Za-z0-9_.]` (plus pct-encoding, which we avoid).
fn template_var_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Description text of a component.
#[must_use]
pub fn describe(route: &Route) -> String {
    let mut text = match (&route.summary, &route.description) {
        (Some(s), Some(d)) if d.starts_with(s.as_str()) => d.clone(),
        (Some(s), Some(d)) => format!("{s}\n\n{d}"),
        (Some(s), None) => s.clone(),
        (None, Some(d)) => d.clone(),
        (None, None) => format!("Calls {} {}", route.method, route.path),
    };
    if route.deprecated {
        text.push_str("\n\n(deprecated)");
    }
    text
}
