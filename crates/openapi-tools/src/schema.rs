//! Internal schema representation.
//!
//! A converted schema is a JSON-shaped tree whose only special node is [`Schema::Ref`], always
//! pointing into the flat definitions map (`#/$defs/<Name>`). Raw `OpenAPI` refs never reach this
//! type; the converter rewrites them first.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::{HashSet, VecDeque};

pub const DEFS_PREFIX: &str = "#/$defs/";

pub type SchemaMap = IndexMap<String, Schema>;

/// Definition name -> schema.
pub type Definitions = IndexMap<String, Schema>;

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Schema>),
    Object(SchemaMap),
    Ref(RefNode),
}

/// `{"$ref": "#/$defs/<target>", ...siblings}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RefNode {
    pub target: String,
    pub siblings: SchemaMap,
}

impl RefNode {
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            siblings: SchemaMap::new(),
        }
    }
}

impl Schema {
    /// `{}`
    #[must_use]
    pub fn empty_object() -> Self {
        Self::Object(SchemaMap::new())
    }

    /// `{"type": <ty>}`
    #[must_use]
    pub fn typed(ty: &str) -> Self {
        let mut m = SchemaMap::new();
        m.insert("type".to_string(), Self::String(ty.to_string()));
        Self::Object(m)
    }

    #[must_use]
    pub fn reference(target: impl Into<String>) -> Self {
        Self::Ref(RefNode::new(target))
    }

    /// Literal conversion: no `$ref` interpretation (enum values, examples, defaults).
    #[must_use]
    pub fn literal(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::Array(items.iter().map(Self::literal).collect()),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::literal(v)))
                    .collect(),
            ),
        }
    }

    /// Parse an already-converted schema (as produced by [`Schema::to_json`]).
    ///
    /// Only local `#/$defs/` refs become [`Schema::Ref`]; any other `$ref` string is kept as a
    /// plain value.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(r)) = map.get("$ref")
                    && let Some(target) = r.strip_prefix(DEFS_PREFIX)
                {
                    let siblings = map
                        .iter()
                        .filter(|(k, _)| k.as_str() != "$ref")
                        .map(|(k, v)| (k.clone(), Self::from_json(v)))
                        .collect();
                    return Self::Ref(RefNode {
                        target: target.to_string(),
                        siblings,
                    });
                }
                Self::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Self::from_json(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Self::Array(items.iter().map(Self::from_json).collect()),
            other => Self::literal(other),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => Value::Object(object_to_json(map)),
            Self::Ref(r) => {
                let mut out = Map::new();
                out.insert(
                    "$ref".to_string(),
                    Value::String(format!("{DEFS_PREFIX}{}", r.target)),
                );
                out.extend(object_to_json(&r.siblings));
                Value::Object(out)
            }
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&SchemaMap> {
        match self {
            Self::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut SchemaMap> {
        match self {
            Self::Object(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Schema]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Schema> {
        match self {
            Self::Object(m) => m.get(key),
            Self::Ref(r) => r.siblings.get(key),
            _ => None,
        }
    }

    /// Whether `type` is, or includes, `ty`.
    #[must_use]
    pub fn has_type(&self, ty: &str) -> bool {
        match self.get("type") {
            Some(Self::String(s)) => s == ty,
            Some(Self::Array(items)) => items.iter().any(|t| t.as_str() == Some(ty)),
            _ => false,
        }
    }

    /// Object type, or untyped with `properties`.
    #[must_use]
    pub fn is_object_schema(&self) -> bool {
        self.has_type("object") || (self.get("type").is_none() && self.get("properties").is_some())
    }

    #[must_use]
    pub fn properties(&self) -> Option<&SchemaMap> {
        self.get("properties").and_then(Schema::as_object)
    }

    /// `required` entries as strings.
    #[must_use]
    pub fn required(&self) -> Vec<String> {
        self.get("required")
            .and_then(Schema::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every ref target in this tree, in traversal order (duplicates kept).
    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Ref(r) => {
                out.push(&r.target);
                for v in r.siblings.values() {
                    v.collect_refs(out);
                }
            }
            Self::Object(m) => {
                for v in m.values() {
                    v.collect_refs(out);
                }
            }
            Self::Array(items) => {
                for v in items {
                    v.collect_refs(out);
                }
            }
            _ => {}
        }
    }
}

fn object_to_json(map: &SchemaMap) -> Map<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => items.serialize(serializer),
            Self::Object(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Ref(r) => {
                let mut map = serializer.serialize_map(Some(r.siblings.len() + 1))?;
                map.serialize_entry("$ref", &format!("{DEFS_PREFIX}{}", r.target))?;
                for (k, v) in &r.siblings {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// Definitions transitively reachable from `roots`, breadth-first, in `defs` order.
#[must_use]
pub fn reachable_definitions(roots: &[&Schema], defs: &Definitions) -> Definitions {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    let mut refs = Vec::new();
    for root in roots {
        root.collect_refs(&mut refs);
    }
    for r in refs {
        if seen.insert(r) {
            queue.push_back(r);
        }
    }

    while let Some(name) = queue.pop_front() {
        let Some(def) = defs.get(name) else {
            continue;
        };
        let mut inner = Vec::new();
        def.collect_refs(&mut inner);
        for r in inner {
            if seen.insert(r) {
                queue.push_back(r);
            }
        }
    }

    defs.iter()
        .filter(|(k, _)| seen.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
