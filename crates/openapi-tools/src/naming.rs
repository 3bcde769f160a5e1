//! Component naming.
//!
//! Base names come from (in order) a configured custom name, the operation id, the summary, or
//! `<method>_<path>`. Collisions within one component kind get `_2`, `_3`, ... in the order
//! routes are registered, so a fixed document always yields the same names.

use crate::ir::Route;
use crate::mapper::ComponentKind;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

pub const MAX_NAME_LEN: usize = 56;

/// Collapse a free-form string into `[A-Za-z0-9_]`.
///
/// Whitespace, `.` and `-` runs become `_`; other characters are dropped; repeated `_` collapse;
/// leading and trailing `_` are trimmed.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let c = if c.is_whitespace() || c == '.' || c == '-' {
            '_'
        } else if c.is_ascii_alphanumeric() || c == '_' {
            c
        } else {
            continue;
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('_').to_string()
}

fn truncate(name: &str) -> String {
    // Slugs are ASCII, so byte and char boundaries agree.
    let cut: String = name.chars().take(MAX_NAME_LEN).collect();
    cut.trim_matches('_').to_string()
}

/// Base name of `route`, before collision handling.
#[must_use]
pub fn base_name(route: &Route, custom_names: &IndexMap<String, String>) -> String {
    if let Some(name) = custom_name(route, custom_names) {
        return truncate(name);
    }

    let from_id = route
        .operation_id
        .as_deref()
        .map(|id| id.split("__").next().unwrap_or(id))
        .map(slugify)
        .filter(|s| !s.is_empty());
    let from_summary = || {
        route
            .summary
            .as_deref()
            .map(slugify)
            .filter(|s| !s.is_empty())
    };
    let name = from_id.or_else(from_summary).unwrap_or_else(|| {
        let method = route.method.as_str().to_ascii_lowercase();
        let path = slugify(&route.path.replace(['/', '{', '}'], " "));
        if path.is_empty() {
            method
        } else {
            format!("{method}_{path}")
        }
    });
    truncate(&name)
}

/// `customNames` lookup: operation id first, then `"METHOD /path"` (method case-insensitive).
fn custom_name<'a>(route: &Route, custom_names: &'a IndexMap<String, String>) -> Option<&'a str> {
    if let Some(id) = &route.operation_id
        && let Some(name) = custom_names.get(id)
    {
        return Some(name.as_str());
    }
    custom_names.iter().find_map(|(key, name)| {
        let (method, path) = key.split_once(' ')?;
        (method.eq_ignore_ascii_case(route.method.as_str()) && path.trim() == route.path)
            .then_some(name.as_str())
    })
}

/// Result of one naming decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAssignment {
    pub kind: ComponentKind,
    pub base: String,
    pub name: String,
}

/// Per-kind collision counters for one registration pass.
#[derive(Debug, Default)]
pub struct ComponentNamer {
    counters: HashMap<(ComponentKind, String), usize>,
    taken: HashSet<(ComponentKind, String)>,
}

impl ComponentNamer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bare `base` on first use, then `<base>_2`, `<base>_3`, ...
    pub fn assign(&mut self, kind: ComponentKind, base: &str) -> NameAssignment {
        let count = self.counters.entry((kind, base.to_string())).or_insert(0);
        loop {
            *count += 1;
            let candidate = if *count == 1 {
                base.to_string()
            } else {
                format!("{base}_{count}")
            };
            if self.taken.insert((kind, candidate.clone())) {
                return NameAssignment {
                    kind,
                    base: base.to_string(),
                    name: candidate,
                };
            }
        }
    }
}
