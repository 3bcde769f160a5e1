//! Component schema synthesis: one flat input schema and one output schema per route.
//!
//! Parameters and body properties share a single `properties` map. When a parameter and a body
//! property have the same name, the parameter is exposed as `<name>__<location>` and the
//! [`ParamMap`] records the way back.

use crate::ir::{ParameterInfo, RequestBodyInfo, Route};
use crate::naming::slugify;
use crate::schema::{Definitions, Schema, SchemaMap, reachable_definitions};
use apibridge_http_tools::codec::Serialization;
use apibridge_http_tools::content;
use apibridge_http_tools::request::{BodySpec, ParamMapping, ParamMap, ParamSpec, RequestTemplate};
use indexmap::IndexSet;
use serde_json::{Map, Value};

/// Keys that describe a parameter rather than its type; hoisted out of the nullable union.
const HOISTED_KEYS: &[&str] = &["default", "description", "title", "example"];

/// How deep `$ref`/`allOf` chains are followed when looking for body properties.
const MAX_SHAPE_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub struct SynthesizedInput {
    /// `{"type": "object", "properties": ..., "required"?: ..., "$defs"?: ...}`
    pub schema: Schema,
    pub mappings: ParamMap,
    pub body: Option<BodySpec>,
}

#[derive(Debug, Clone)]
pub struct SynthesizedOutput {
    pub schema: Schema,
    /// The response value is exposed as `{"result": value}`.
    pub wrap_result: bool,
}

/// Build the input schema of `route`.
#[must_use]
pub fn input_schema(route: &Route) -> SynthesizedInput {
    let body = route
        .request_body
        .as_ref()
        .filter(|b| !b.content.is_empty())
        .map(|b| body_shape(b, &route.definitions));

    let body_names: IndexSet<&str> = match &body {
        Some(BodyShape::Properties { properties, .. }) => {
            properties.keys().map(String::as_str).collect()
        }
        Some(BodyShape::Placeholder { name, .. }) => std::iter::once(name.as_str()).collect(),
        None => IndexSet::new(),
    };

    let mut properties = SchemaMap::new();
    let mut required: IndexSet<String> = IndexSet::new();
    let mut mappings = ParamMap::new();

    for param in &route.parameters {
        let collides = body_names.contains(param.name.as_str())
            || properties.contains_key(&param.name);
        let exposed = if collides {
            format!("{}__{}", param.name, param.location)
        } else {
            param.name.clone()
        };
        properties.insert(exposed.clone(), parameter_property(param));
        if param.required {
            required.insert(exposed.clone());
        }
        mappings.insert(exposed, ParamMapping {
            openapi_name: param.name.clone(),
            location: param.location,
            is_suffixed: collides,
        });
    }

    let mut body_spec = None;
    if let (Some(shape), Some(info)) = (body, &route.request_body) {
        let content_types: Vec<String> = info.content.keys().cloned().collect();
        match shape {
            BodyShape::Properties {
                properties: body_props,
                required: body_required,
            } => {
                properties.extend(body_props);
                if info.required {
                    required.extend(body_required);
                }
                body_spec = Some(BodySpec {
                    content_types,
                    required: info.required,
                    placeholder: None,
                });
            }
            BodyShape::Placeholder { name, schema } => {
                if info.required {
                    required.insert(name.clone());
                }
                properties.insert(name.clone(), schema);
                body_spec = Some(BodySpec {
                    content_types,
                    required: info.required,
                    placeholder: Some(name),
                });
            }
        }
    }

    let mut root = SchemaMap::new();
    root.insert("type".to_string(), Schema::String("object".to_string()));
    root.insert("properties".to_string(), Schema::Object(properties));
    if !required.is_empty() {
        root.insert(
            "required".to_string(),
            Schema::Array(required.into_iter().map(Schema::String).collect()),
        );
    }
    attach_defs(&mut root, &route.definitions);

    SynthesizedInput {
        schema: Schema::Object(root),
        mappings,
        body: body_spec,
    }
}

/// Build the output schema of `route`, if its success response declares one.
#[must_use]
pub fn output_schema(route: &Route) -> Option<SynthesizedOutput> {
    let (_, response) = route.success_response()?;
    let media_type = content::preferred_content_type(response.content.keys().map(String::as_str))?;
    let schema = response.content.get(media_type)?.schema.clone()?;

    let (mut root, wrap_result) = match inline_object_root(&schema, &route.definitions) {
        Some(object) => (object, false),
        None => {
            let mut properties = SchemaMap::new();
            properties.insert("result".to_string(), schema);
            let mut root = SchemaMap::new();
            root.insert("type".to_string(), Schema::String("object".to_string()));
            root.insert("properties".to_string(), Schema::Object(properties));
            root.insert(
                "required".to_string(),
                Schema::Array(vec![Schema::String("result".to_string())]),
            );
            (root, true)
        }
    };
    attach_defs(&mut root, &route.definitions);

    Some(SynthesizedOutput {
        schema: Schema::Object(root),
        wrap_result,
    })
}

/// The call-time view of `route`.
#[must_use]
pub fn request_template(route: &Route, input: &SynthesizedInput) -> RequestTemplate {
    let params = route
        .parameters
        .iter()
        .map(|p| ParamSpec {
            name: p.name.clone(),
            location: p.location,
            required: p.required,
            serialization: Serialization::resolve(p.location, p.style, p.explode)
                .with_allow_reserved(p.allow_reserved)
                .with_allow_empty_value(p.allow_empty_value),
        })
        .collect();
    RequestTemplate {
        method: route.method.clone(),
        path: route.path.clone(),
        params,
        body: input.body.clone(),
        response_content_types: route.success_content_types(),
        mappings: input.mappings.clone(),
    }
}

/// Make a non-required parameter schema admit `null`.
///
/// Metadata keys move to the wrapper; schemas that already compose (`anyOf`, `oneOf`, `allOf`)
/// or already allow `null` are returned unchanged.
#[must_use]
pub fn wrap_nullable(schema: Schema) -> Schema {
    let already_open = match &schema {
        Schema::Bool(_) => true,
        Schema::Object(_) | Schema::Ref(_) => {
            ["anyOf", "oneOf", "allOf"]
                .iter()
                .any(|k| schema.get(k).is_some())
                || schema.has_type("null")
        }
        _ => true,
    };
    if already_open {
        return schema;
    }

    let mut hoisted = SchemaMap::new();
    let inner = match schema {
        Schema::Object(mut map) => {
            for key in HOISTED_KEYS {
                if let Some(v) = map.shift_remove(*key) {
                    hoisted.insert((*key).to_string(), v);
                }
            }
            Schema::Object(map)
        }
        Schema::Ref(mut r) => {
            for key in HOISTED_KEYS {
                if let Some(v) = r.siblings.shift_remove(*key) {
                    hoisted.insert((*key).to_string(), v);
                }
            }
            Schema::Ref(r)
        }
        other => other,
    };
    hoisted.insert(
        "anyOf".to_string(),
        Schema::Array(vec![inner, Schema::typed("null")]),
    );
    Schema::Object(hoisted)
}

/// Definitions reachable from `root`, or nothing when none are.
fn attach_defs(root: &mut SchemaMap, defs: &Definitions) {
    let pruned = {
        let tree = Schema::Object(root.clone());
        reachable_definitions(&[&tree], defs)
    };
    if !pruned.is_empty() {
        root.insert("$defs".to_string(), Schema::Object(pruned));
    }
}

fn parameter_property(param: &ParameterInfo) -> Schema {
    let mut schema = param.schema.clone();
    if let Some(desc) = &param.description {
        let target = match &mut schema {
            Schema::Object(map) => Some(map),
            Schema::Ref(r) => Some(&mut r.siblings),
            _ => None,
        };
        if let Some(map) = target
            && !map.contains_key("description")
        {
            map.insert("description".to_string(), Schema::String(desc.clone()));
        }
    }
    if param.required {
        schema
    } else {
        wrap_nullable(schema)
    }
}

enum BodyShape {
    /// Object body: each property becomes a top-level input property.
    Properties {
        properties: SchemaMap,
        required: Vec<String>,
    },
    /// Anything else: the whole body is one input property.
    Placeholder { name: String, schema: Schema },
}

fn body_shape(info: &RequestBodyInfo, defs: &Definitions) -> BodyShape {
    let preferred = content::preferred_content_type(info.content.keys().map(String::as_str));
    let schema = preferred
        .and_then(|ct| info.content.get(ct))
        .and_then(|mt| mt.schema.clone());

    if let Some(schema) = &schema {
        let mut properties = SchemaMap::new();
        let mut required = Vec::new();
        if collect_object_shape(schema, defs, &mut properties, &mut required, 0)
            && !properties.is_empty()
        {
            return BodyShape::Properties {
                properties,
                required,
            };
        }
    }

    let name = schema
        .as_ref()
        .and_then(|s| resolve_local(s, defs))
        .and_then(|s| s.get("title"))
        .and_then(Schema::as_str)
        .map(slugify)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "body".to_string());
    let mut schema = schema.unwrap_or_else(Schema::empty_object);
    if let Some(desc) = &info.description {
        let target = match &mut schema {
            Schema::Object(map) => Some(map),
            Schema::Ref(r) => Some(&mut r.siblings),
            _ => None,
        };
        if let Some(map) = target
            && !map.contains_key("description")
        {
            map.insert("description".to_string(), Schema::String(desc.clone()));
        }
    }
    BodyShape::Placeholder { name, schema }
}

/// Gather `properties`/`required` of an object schema, following refs and flattening `allOf`.
///
/// Returns `false` when the schema is not object-shaped.
fn collect_object_shape(
    schema: &Schema,
    defs: &Definitions,
    properties: &mut SchemaMap,
    required: &mut Vec<String>,
    depth: usize,
) -> bool {
    if depth > MAX_SHAPE_DEPTH {
        return false;
    }
    let Some(schema) = resolve_local(schema, defs) else {
        return false;
    };

    let mut found = false;
    if let Some(props) = schema.properties() {
        for (k, v) in props {
            properties.insert(k.clone(), v.clone());
        }
        found = true;
    }
    if let Some(members) = schema.get("allOf").and_then(Schema::as_array) {
        for member in members {
            found |= collect_object_shape(member, defs, properties, required, depth + 1);
        }
    }
    if !found {
        return false;
    }
    for r in schema.required() {
        if !required.contains(&r) {
            required.push(r);
        }
    }
    true
}

/// Follow `Ref` nodes through `defs`.
fn resolve_local<'a>(schema: &'a Schema, defs: &'a Definitions) -> Option<&'a Schema> {
    let mut cur = schema;
    for _ in 0..MAX_SHAPE_DEPTH {
        match cur {
            Schema::Ref(r) => cur = defs.get(&r.target)?,
            other => return Some(other),
        }
    }
    None
}

/// An object-typed output root, with a top-level ref inlined.
fn inline_object_root(schema: &Schema, defs: &Definitions) -> Option<SchemaMap> {
    let resolved = resolve_local(schema, defs)?;
    if !resolved.is_object_schema() {
        return None;
    }
    let mut root = resolved.as_object()?.clone();
    if let Schema::Ref(r) = schema {
        for (k, v) in &r.siblings {
            root.insert(k.clone(), v.clone());
        }
    }
    Some(root)
}

/// JSON form of a synthesized schema, as MCP wants it.
#[must_use]
pub fn to_json_object(schema: &Schema) -> Map<String, Value> {
    match schema.to_json() {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
