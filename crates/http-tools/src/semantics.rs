//! Method semantics and tool annotations.
//!
//! Annotations start from RFC 9110 method properties and can be overlaid with explicit hints from
//! a mapping rule.

use reqwest::Method;
use rmcp::model::ToolAnnotations;
use serde::{Deserialize, Serialize};

/// `(read_only, destructive, idempotent)` per method; `None` means "do not guess".
fn method_traits(method: &Method) -> (Option<bool>, Option<bool>, Option<bool>) {
    match *method {
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE => {
            (Some(true), Some(false), Some(true))
        }
        Method::PUT | Method::DELETE => (Some(false), Some(true), Some(true)),
        Method::PATCH => (Some(false), Some(true), None),
        Method::POST => (Some(false), Some(false), Some(false)),
        _ => (None, None, None),
    }
}

/// Annotations for a tool backed by `method`. `openWorldHint` is always set.
#[must_use]
pub fn annotations_for_method(method: &Method) -> ToolAnnotations {
    let (read_only_hint, destructive_hint, idempotent_hint) = method_traits(method);
    ToolAnnotations {
        title: None,
        read_only_hint,
        destructive_hint,
        idempotent_hint,
        open_world_hint: Some(true),
    }
}

/// Explicit annotation overrides, as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
}

impl ToolHints {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Later hints win field by field.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            title: other.title.clone().or_else(|| self.title.clone()),
            read_only_hint: other.read_only_hint.or(self.read_only_hint),
            destructive_hint: other.destructive_hint.or(self.destructive_hint),
            idempotent_hint: other.idempotent_hint.or(self.idempotent_hint),
            open_world_hint: other.open_world_hint.or(self.open_world_hint),
        }
    }

    pub fn apply_to(&self, annotations: &mut ToolAnnotations) {
        if let Some(t) = &self.title {
            annotations.title = Some(t.clone());
        }
        if self.read_only_hint.is_some() {
            annotations.read_only_hint = self.read_only_hint;
        }
        if self.destructive_hint.is_some() {
            annotations.destructive_hint = self.destructive_hint;
        }
        if self.idempotent_hint.is_some() {
            annotations.idempotent_hint = self.idempotent_hint;
        }
        if self.open_world_hint.is_some() {
            annotations.open_world_hint = self.open_world_hint;
        }
    }
}
