//! Route mapping: which MCP components a route becomes.
//!
//! Rules are tried in order and the first match decides. Routes that match nothing become
//! tools. A mapper can carry an override function that sees every tentative decision and returns
//! the final list, which may be empty (exclusion) or longer (one route, several components).

use crate::config::{ApiServerConfig, RouteMapConfig};
use crate::error::{OpenApiToolsError, Result};
use crate::ir::Route;
use apibridge_http_tools::codec::ParamLocation;
use apibridge_http_tools::semantics::ToolHints;
use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentKind {
    Tool,
    Resource,
    ResourceTemplate,
    /// Drops the route.
    Exclude,
}

impl ComponentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::ResourceTemplate => "resourceTemplate",
            Self::Exclude => "exclude",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDecision {
    pub kind: ComponentKind,
    pub tags: Vec<String>,
    pub annotations: ToolHints,
}

/// Receives the route and its tentative decision; returns the decisions to keep.
pub type MappingOverride = Arc<dyn Fn(&Route, MappingDecision) -> Vec<MappingDecision> + Send + Sync>;

/// A compiled [`RouteMapConfig`].
#[derive(Debug, Clone)]
pub struct RouteMap {
    methods: Vec<String>,
    pattern: Regex,
    tags: Vec<String>,
    kind: ComponentKind,
    mcp_tags: Vec<String>,
    annotations: ToolHints,
}

impl RouteMap {
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Config`] when `pattern` is not a valid regex.
    pub fn compile(config: &RouteMapConfig) -> Result<Self> {
        let pattern = Regex::new(&config.pattern).map_err(|e| {
            OpenApiToolsError::Config(format!(
                "invalid routeMaps pattern '{}': {e}",
                config.pattern
            ))
        })?;
        Ok(Self {
            methods: config.methods.clone(),
            pattern,
            tags: config.tags.clone(),
            kind: config.mcp_type,
            mcp_tags: config.mcp_tags.clone(),
            annotations: config.annotations.clone(),
        })
    }

    #[must_use]
    pub fn matches(&self, route: &Route) -> bool {
        let method_ok = self
            .methods
            .iter()
            .any(|m| m == "*" || m.eq_ignore_ascii_case(route.method.as_str()));
        method_ok && self.pattern.is_match(&route.path) && self.tags.iter().all(|t| route.has_tag(t))
    }
}

#[derive(Clone, Default)]
pub struct RouteMapper {
    rules: Vec<RouteMap>,
    global_tags: Vec<String>,
    resource_templates_for_get: bool,
    override_fn: Option<MappingOverride>,
}

impl fmt::Debug for RouteMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMapper")
            .field("rules", &self.rules)
            .field("global_tags", &self.global_tags)
            .field("resource_templates_for_get", &self.resource_templates_for_get)
            .field("override_fn", &self.override_fn.is_some())
            .finish()
    }
}

impl RouteMapper {
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Config`] for invalid rule patterns.
    pub fn from_config(config: &ApiServerConfig) -> Result<Self> {
        Ok(Self {
            rules: config
                .route_maps
                .iter()
                .map(RouteMap::compile)
                .collect::<Result<_>>()?,
            global_tags: config.tags.clone(),
            resource_templates_for_get: config.resource_templates_for_get,
            override_fn: None,
        })
    }

    #[must_use]
    pub fn with_override(mut self, f: MappingOverride) -> Self {
        self.override_fn = Some(f);
        self
    }

    /// Every component `route` should become, `Exclude` already filtered out.
    #[must_use]
    pub fn map(&self, route: &Route) -> Vec<MappingDecision> {
        let primary = self.decide(route);

        let mut decisions = vec![primary.clone()];
        if self.resource_templates_for_get
            && primary.kind == ComponentKind::Tool
            && route.method == Method::GET
            && has_path_params(route)
        {
            decisions.push(MappingDecision {
                kind: ComponentKind::ResourceTemplate,
                tags: primary.tags.clone(),
                annotations: ToolHints::default(),
            });
        }

        if let Some(f) = &self.override_fn {
            decisions = decisions.into_iter().flat_map(|d| f(route, d)).collect();
        }

        decisions
            .into_iter()
            .filter(|d| d.kind != ComponentKind::Exclude)
            .map(|mut d| {
                // A fixed URI cannot carry arguments.
                if d.kind == ComponentKind::Resource && takes_arguments(route) {
                    d.kind = ComponentKind::ResourceTemplate;
                }
                d
            })
            .collect()
    }

    fn decide(&self, route: &Route) -> MappingDecision {
        match self.rules.iter().find(|r| r.matches(route)) {
            Some(rule) => MappingDecision {
                kind: rule.kind,
                tags: merge_tags([&route.tags, &rule.mcp_tags, &self.global_tags]),
                annotations: rule.annotations.clone(),
            },
            None => MappingDecision {
                kind: ComponentKind::Tool,
                tags: merge_tags([&route.tags, &self.global_tags]),
                annotations: ToolHints::default(),
            },
        }
    }
}

fn has_path_params(route: &Route) -> bool {
    route
        .parameters
        .iter()
        .any(|p| p.location == ParamLocation::Path)
}

/// Path parameters, or required query/header parameters. Cookies never reach a resource URI.
fn takes_arguments(route: &Route) -> bool {
    has_path_params(route)
        || route
            .parameters
            .iter()
            .any(|p| p.required && matches!(p.location, ParamLocation::Query | ParamLocation::Header))
}

/// Trimmed, non-empty, first occurrence wins; case is kept.
#[must_use]
pub fn merge_tags<'a, I>(sources: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Vec<String>>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in sources.into_iter().flatten() {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}
