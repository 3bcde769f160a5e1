//! Schema converter: raw `OpenAPI` / JSON Schema nodes to [`Schema`].
//!
//! One [`ConversionRun`] is scoped to one spec. It owns the definition set and the
//! ref -> definition-name table, so two specs converted concurrently never share naming state.

use crate::error::{OpenApiToolsError, Result};
use crate::resolver::{DocId, OpenApiResolver, ref_base_name, sanitize_identifier};
use crate::schema::{Definitions, RefNode, Schema, SchemaMap, reachable_definitions};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Source dialect of the schemas being converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `OpenAPI` 3.0 Schema Object: `nullable` is translated.
    OpenApi30,
    /// JSON Schema 2020-12 (`OpenAPI` 3.1): passed through.
    JsonSchema,
}

/// Keys holding one subschema.
const SCHEMA_KEYS: &[&str] = &[
    "items",
    "additionalProperties",
    "not",
    "if",
    "then",
    "else",
    "contains",
    "propertyNames",
    "unevaluatedItems",
    "unevaluatedProperties",
    "additionalItems",
];

/// Keys holding a name -> subschema map.
const SCHEMA_MAP_KEYS: &[&str] = &["properties", "patternProperties", "dependentSchemas"];

/// Keys holding a list of subschemas.
const SCHEMA_LIST_KEYS: &[&str] = &["allOf", "anyOf", "oneOf", "prefixItems"];

/// `OpenAPI` vocabulary with no JSON Schema meaning.
const DROPPED_KEYS: &[&str] = &["discriminator", "xml", "externalDocs"];

pub struct ConversionRun<'r> {
    resolver: &'r OpenApiResolver,
    dialect: Dialect,
    defs: Definitions,
    names: HashMap<String, String>,
    /// Keys of `names` in registration order, for rollback.
    registered: Vec<String>,
    taken: HashSet<String>,
    in_progress: HashSet<String>,
}

impl<'r> ConversionRun<'r> {
    #[must_use]
    pub fn new(resolver: &'r OpenApiResolver, dialect: Dialect) -> Self {
        Self {
            resolver,
            dialect,
            defs: Definitions::new(),
            names: HashMap::new(),
            registered: Vec::new(),
            taken: HashSet::new(),
            in_progress: HashSet::new(),
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[must_use]
    pub fn resolver(&self) -> &'r OpenApiResolver {
        self.resolver
    }

    /// Every definition registered so far.
    #[must_use]
    pub fn definitions(&self) -> &Definitions {
        &self.defs
    }

    /// Definitions reachable from `roots`.
    #[must_use]
    pub fn closure(&self, roots: &[&Schema]) -> Definitions {
        reachable_definitions(roots, &self.defs)
    }

    /// Convert one schema node found in `doc`.
    ///
    /// # Errors
    ///
    /// [`OpenApiToolsError::Resolution`] for refs that cannot be followed,
    /// [`OpenApiToolsError::Conversion`] for nodes that are not schemas.
    pub fn convert(&mut self, doc: &DocId, node: &Value) -> Result<Schema> {
        match node {
            Value::Bool(b) => Ok(Schema::Bool(*b)),
            Value::Object(map) => self.convert_object(doc, map),
            other => Err(OpenApiToolsError::Conversion(format!(
                "expected a schema object or boolean, found {}",
                json_kind(other)
            ))),
        }
    }

    fn convert_object(&mut self, doc: &DocId, map: &Map<String, Value>) -> Result<Schema> {
        if let Some(Value::String(reference)) = map.get("$ref") {
            let target = self.convert_ref(doc, reference)?;
            let mut siblings = SchemaMap::new();
            let mut nullable = false;
            for (k, v) in map {
                if k == "$ref" || DROPPED_KEYS.contains(&k.as_str()) {
                    continue;
                }
                if self.dialect == Dialect::OpenApi30 && k == "nullable" {
                    nullable = v.as_bool().unwrap_or(false);
                    continue;
                }
                siblings.insert(k.clone(), self.convert_entry(doc, k, v)?);
            }
            let node = Schema::Ref(RefNode { target, siblings });
            return Ok(if nullable { or_null(node) } else { node });
        }

        let mut out = SchemaMap::new();
        let mut nullable = false;
        for (k, v) in map {
            let key = k.as_str();
            if DROPPED_KEYS.contains(&key) {
                continue;
            }
            if self.dialect == Dialect::OpenApi30 && key == "nullable" {
                nullable = v.as_bool().unwrap_or(false);
                continue;
            }
            if key == "$defs" || key == "definitions" {
                self.register_embedded(doc, v)?;
                continue;
            }
            out.insert(k.clone(), self.convert_entry(doc, key, v)?);
        }

        Ok(if nullable {
            apply_nullable(out)
        } else {
            Schema::Object(out)
        })
    }

    fn convert_entry(&mut self, doc: &DocId, key: &str, v: &Value) -> Result<Schema> {
        if SCHEMA_KEYS.contains(&key) {
            // Draft-4 style tuple `items` arrays are still lists of schemas.
            if let Value::Array(items) = v {
                return self.convert_list(doc, items);
            }
            return self.convert(doc, v);
        }
        if SCHEMA_MAP_KEYS.contains(&key) {
            let Value::Object(entries) = v else {
                return Err(OpenApiToolsError::Conversion(format!(
                    "'{key}' must be an object, found {}",
                    json_kind(v)
                )));
            };
            let mut out = SchemaMap::new();
            for (name, sub) in entries {
                out.insert(name.clone(), self.convert(doc, sub)?);
            }
            return Ok(Schema::Object(out));
        }
        if SCHEMA_LIST_KEYS.contains(&key) {
            let Value::Array(items) = v else {
                return Err(OpenApiToolsError::Conversion(format!(
                    "'{key}' must be an array, found {}",
                    json_kind(v)
                )));
            };
            return self.convert_list(doc, items);
        }
        Ok(Schema::literal(v))
    }

    fn convert_list(&mut self, doc: &DocId, items: &[Value]) -> Result<Schema> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.convert(doc, item)?);
        }
        Ok(Schema::Array(out))
    }

    /// Register the target of `reference` (once) and return its definition name.
    ///
    /// A ref that is already registered, or currently being converted higher up the stack, is
    /// not expanded again.
    ///
    /// # Errors
    ///
    /// See [`ConversionRun::convert`].
    pub fn convert_ref(&mut self, doc: &DocId, reference: &str) -> Result<String> {
        let key = OpenApiResolver::canonical_ref_key(doc, reference)?;
        if let Some(name) = self.names.get(&key) {
            return Ok(name.clone());
        }

        let name = self.reserve_name(&ref_base_name(reference));
        let checkpoint = (self.registered.len(), self.defs.len());
        self.register(key.clone(), name.clone());
        self.in_progress.insert(key.clone());

        let converted = self
            .resolver
            .resolve_ref_value(doc, reference)
            .and_then(|(target_doc, value)| {
                if !(value.is_object() || value.is_boolean()) {
                    return Err(OpenApiToolsError::Resolution(format!(
                        "$ref '{reference}' points to a {}, not a schema",
                        json_kind(&value)
                    )));
                }
                self.convert(&target_doc, &value)
            });

        self.in_progress.remove(&key);
        match converted {
            Ok(schema) => {
                self.defs.insert(name.clone(), schema);
                Ok(name)
            }
            Err(e) => {
                self.rollback(checkpoint);
                Err(e)
            }
        }
    }

    fn register(&mut self, key: String, name: String) {
        self.registered.push(key.clone());
        self.names.insert(key, name);
    }

    /// Forget every ref and definition registered since `checkpoint`.
    ///
    /// Definitions converted while a failing ref was in progress may point at it, so none of them
    /// survive; a later conversion registers them again.
    fn rollback(&mut self, (registered, defs): (usize, usize)) {
        for key in self.registered.drain(registered..) {
            if let Some(name) = self.names.remove(&key) {
                self.taken.remove(&name);
            }
        }
        self.defs.truncate(defs);
    }

    fn register_embedded(&mut self, doc: &DocId, defs: &Value) -> Result<()> {
        let Value::Object(entries) = defs else {
            return Err(OpenApiToolsError::Conversion(
                "'$defs' must be an object".to_string(),
            ));
        };
        for (k, v) in entries {
            let key = format!("embedded:{}#{k}", doc.display());
            if self.names.contains_key(&key) {
                continue;
            }
            let name = self.reserve_name(&sanitize_identifier(k));
            self.register(key, name.clone());
            let schema = self.convert(doc, v)?;
            self.defs.insert(name, schema);
        }
        Ok(())
    }

    /// `Base`, then `Base2`, `Base3`, ... for distinct refs sharing a base name.
    fn reserve_name(&mut self, base: &str) -> String {
        let mut n = 1usize;
        loop {
            let candidate = if n == 1 {
                base.to_string()
            } else {
                format!("{base}{n}")
            };
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// 3.0 `nullable: true` to JSON Schema.
///
/// Existing `anyOf`/`oneOf` unions gain a null variant, a bare `type` moves into
/// `anyOf: [{type}, null]`, and anything else (`allOf`, `enum` without `type`, ...) is wrapped
/// whole.
fn apply_nullable(mut out: SchemaMap) -> Schema {
    if out.is_empty() {
        return Schema::Object(out);
    }
    for key in ["anyOf", "oneOf"] {
        if let Some(Schema::Array(variants)) = out.get_mut(key) {
            if !variants.iter().any(|v| v.has_type("null")) {
                variants.push(Schema::typed("null"));
            }
            return Schema::Object(out);
        }
    }

    if let Some(ty) = out.shift_remove("type") {
        let mut original = SchemaMap::new();
        original.insert("type".to_string(), ty);
        let variants = vec![Schema::Object(original), Schema::typed("null")];
        out.insert("anyOf".to_string(), Schema::Array(variants));
        if let Some(Schema::Array(values)) = out.get_mut("enum")
            && !values.contains(&Schema::Null)
        {
            values.push(Schema::Null);
        }
        return Schema::Object(out);
    }

    or_null(Schema::Object(out))
}

fn or_null(schema: Schema) -> Schema {
    let mut wrapper = SchemaMap::new();
    wrapper.insert(
        "anyOf".to_string(),
        Schema::Array(vec![schema, Schema::typed("null")]),
    );
    Schema::Object(wrapper)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use serde_json::json;
    use std::path::PathBuf;

    fn resolver(root: Value) -> (DocId, OpenApiResolver) {
        let doc = DocId::File(PathBuf::from("/nonexistent/openapi.yaml"));
        (doc.clone(), OpenApiResolver::new(doc, root, Client::new()))
    }

    #[test]
    fn nullable_moves_type_into_any_of() {
        let (doc, r) = resolver(json!({}));
        let mut run = ConversionRun::new(&r, Dialect::OpenApi30);
        let s = run
            .convert(&doc, &json!({"type": "string", "nullable": true, "format": "date"}))
            .unwrap();
        assert_eq!(
            s.to_json(),
            json!({"format": "date", "anyOf": [{"type": "string"}, {"type": "null"}]})
        );
    }

    #[test]
    fn nullable_appends_to_existing_union() {
        let (doc, r) = resolver(json!({}));
        let mut run = ConversionRun::new(&r, Dialect::OpenApi30);
        let s = run
            .convert(
                &doc,
                &json!({"oneOf": [{"type": "string"}, {"type": "integer"}], "nullable": true}),
            )
            .unwrap();
        assert_eq!(
            s.to_json(),
            json!({"oneOf": [{"type": "string"}, {"type": "integer"}, {"type": "null"}]})
        );
    }

    #[test]
    fn nullable_enum_admits_null() {
        let (doc, r) = resolver(json!({}));
        let mut run = ConversionRun::new(&r, Dialect::OpenApi30);
        let s = run
            .convert(&doc, &json!({"type": "string", "enum": ["a"], "nullable": true}))
            .unwrap();
        assert_eq!(s.get("enum").unwrap().to_json(), json!(["a", null]));
    }

    #[test]
    fn nullable_compositions_and_refs_are_wrapped() {
        let (doc, r) = resolver(json!({
            "components": {"schemas": {"Pet": {"type": "object"}}}
        }));
        let mut run = ConversionRun::new(&r, Dialect::OpenApi30);

        let all_of = run
            .convert(
                &doc,
                &json!({"allOf": [{"$ref": "#/components/schemas/Pet"}], "nullable": true}),
            )
            .unwrap();
        assert_eq!(
            all_of.to_json(),
            json!({"anyOf": [{"allOf": [{"$ref": "#/$defs/Pet"}]}, {"type": "null"}]})
        );

        let with_ref = run
            .convert(
                &doc,
                &json!({"$ref": "#/components/schemas/Pet", "nullable": true, "description": "d"}),
            )
            .unwrap();
        assert_eq!(
            with_ref.to_json(),
            json!({"anyOf": [{"$ref": "#/$defs/Pet", "description": "d"}, {"type": "null"}]})
        );

        let one_of = run
            .convert(
                &doc,
                &json!({"oneOf": [{"$ref": "#/components/schemas/Pet"}], "nullable": true}),
            )
            .unwrap();
        assert_eq!(
            one_of.to_json(),
            json!({"oneOf": [{"$ref": "#/$defs/Pet"}, {"type": "null"}]})
        );

        let plain_ref = run
            .convert(&doc, &json!({"$ref": "#/components/schemas/Pet", "nullable": false}))
            .unwrap();
        assert_eq!(plain_ref.to_json(), json!({"$ref": "#/$defs/Pet"}));
    }

    #[test]
    fn json_schema_dialect_keeps_nullable_verbatim() {
        let (doc, r) = resolver(json!({}));
        let mut run = ConversionRun::new(&r, Dialect::JsonSchema);
        let s = run
            .convert(&doc, &json!({"type": ["string", "null"], "nullable": true}))
            .unwrap();
        assert_eq!(s.to_json(), json!({"type": ["string", "null"], "nullable": true}));
    }

    #[test]
    fn refs_become_flat_definitions() {
        let (doc, r) = resolver(json!({
            "components": {"schemas": {
                "Pet": {
                    "type": "object",
                    "discriminator": {"propertyName": "kind"},
                    "properties": {"owner": {"$ref": "#/components/schemas/Owner"}}
                },
                "Owner": {"type": "string", "xml": {"name": "o"}}
            }}
        }));
        let mut run = ConversionRun::new(&r, Dialect::OpenApi30);
        let s = run
            .convert(&doc, &json!({"type": "array", "items": {"$ref": "#/components/schemas/Pet"}}))
            .unwrap();

        assert_eq!(
            s.to_json(),
            json!({"type": "array", "items": {"$ref": "#/$defs/Pet"}})
        );
        let defs = run.definitions();
        assert_eq!(
            defs.get("Pet").unwrap().to_json(),
            json!({"type": "object", "properties": {"owner": {"$ref": "#/$defs/Owner"}}})
        );
        assert_eq!(defs.get("Owner").unwrap().to_json(), json!({"type": "string"}));
    }

    #[test]
    fn cyclic_refs_are_registered_once() {
        let (doc, r) = resolver(json!({
            "components": {"schemas": {
                "Node": {
                    "type": "object",
                    "properties": {"children": {"type": "array", "items": {"$ref": "#/components/schemas/Node"}}}
                }
            }}
        }));
        let mut run = ConversionRun::new(&r, Dialect::JsonSchema);
        let s = run
            .convert(&doc, &json!({"$ref": "#/components/schemas/Node"}))
            .unwrap();
        assert_eq!(s.to_json(), json!({"$ref": "#/$defs/Node"}));
        assert_eq!(run.definitions().len(), 1);
        assert_eq!(
            run.definitions()["Node"].to_json()["properties"]["children"]["items"],
            json!({"$ref": "#/$defs/Node"})
        );
    }

    #[test]
    fn distinct_refs_with_the_same_base_name_are_numbered() {
        let (doc, r) = resolver(json!({
            "components": {"schemas": {"Item": {"type": "string"}}},
            "x-other": {"Item": {"type": "integer"}}
        }));
        let mut run = ConversionRun::new(&r, Dialect::JsonSchema);
        let a = run.convert_ref(&doc, "#/components/schemas/Item").unwrap();
        let b = run.convert_ref(&doc, "#/x-other/Item").unwrap();
        let again = run.convert_ref(&doc, "#/components/schemas/Item").unwrap();
        assert_eq!(a, "Item");
        assert_eq!(b, "Item2");
        assert_eq!(again, "Item");
    }

    #[test]
    fn unresolvable_and_non_object_refs_fail() {
        let (doc, r) = resolver(json!({"components": {"schemas": {"Weird": 42}}}));
        let mut run = ConversionRun::new(&r, Dialect::OpenApi30);

        let err = run
            .convert(&doc, &json!({"$ref": "#/components/schemas/Missing"}))
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::Resolution(_)));

        let err = run
            .convert(&doc, &json!({"$ref": "#/components/schemas/Weird"}))
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::Resolution(_)));
        assert!(run.definitions().is_empty());
    }

    #[test]
    fn failed_refs_leave_no_dangling_definitions() {
        let (doc, r) = resolver(json!({
            "components": {"schemas": {
                "Parent": {
                    "type": "object",
                    "properties": {
                        "child": {"$ref": "#/components/schemas/Child"},
                        "broken": {"$ref": "#/components/schemas/Missing"}
                    }
                },
                "Child": {
                    "type": "object",
                    "properties": {"parent": {"$ref": "#/components/schemas/Parent"}}
                }
            }},
            "x-fixed": {"Child": {"type": "integer"}}
        }));
        let mut run = ConversionRun::new(&r, Dialect::OpenApi30);
        let err = run
            .convert(&doc, &json!({"$ref": "#/components/schemas/Parent"}))
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::Resolution(_)));
        assert!(run.definitions().is_empty());

        // Released names are handed out again without a numeric suffix.
        let name = run.convert_ref(&doc, "#/x-fixed/Child").unwrap();
        assert_eq!(name, "Child");
        let keys: Vec<&String> = run.definitions().keys().collect();
        assert_eq!(keys, vec!["Child"]);
    }

    #[test]
    fn non_schema_nodes_are_conversion_errors() {
        let (doc, r) = resolver(json!({}));
        let mut run = ConversionRun::new(&r, Dialect::OpenApi30);
        let err = run
            .convert(&doc, &json!({"properties": {"a": "string"}}))
            .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::Conversion(_)));
    }

    #[test]
    fn embedded_defs_are_merged() {
        let (doc, r) = resolver(json!({}));
        let mut run = ConversionRun::new(&r, Dialect::JsonSchema);
        let s = run
            .convert(
                &doc,
                &json!({"type": "object", "$defs": {"Tag": {"type": "string"}}}),
            )
            .unwrap();
        assert_eq!(s.to_json(), json!({"type": "object"}));
        assert!(run.definitions().contains_key("Tag"));
    }
}
