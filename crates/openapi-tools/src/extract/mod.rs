//! Spec extractors: parsed `OpenAPI` documents to [`Route`]s.
//!
//! 3.0 documents go through the `openapiv3` typed tree, 3.1 documents through a small serde
//! model over raw JSON Schema. Both end up in the same IR.

mod v30;
mod v31;

use crate::config::AutoDiscoverConfig;
use crate::converter::{ConversionRun, Dialect};
use crate::error::{OpenApiToolsError, Result};
use crate::ir::{CallbackInfo, EncodingInfo, Extensions, ParameterInfo, Route, SpecVersion};
use crate::resolver::{DocId, OpenApiResolver};
use apibridge_http_tools::codec::{ParamLocation, ParamStyle};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Route iteration order within one path item.
pub(crate) const METHOD_ORDER: [&str; 8] =
    ["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// An operation that could not be converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOperation {
    /// Upper-case method, or `*` when the whole path item failed.
    pub method: String,
    pub path: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub routes: Vec<Route>,
    pub skipped: Vec<SkippedOperation>,
    /// First `servers[].url`, if any.
    pub server_url: Option<String>,
    pub title: Option<String>,
}

impl Extraction {
    pub(crate) fn skip(&mut self, method: &str, path: &str, error: &OpenApiToolsError) {
        warn!(method = %method, path = %path, error = %error, "skipping operation");
        self.skipped.push(SkippedOperation {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            error: error.to_string(),
        });
    }
}

/// Read the `openapi` field.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::Config`] for missing or unsupported versions (including
/// Swagger 2.0).
pub fn detect_version(doc: &Value) -> Result<SpecVersion> {
    let version = doc.get("openapi").and_then(Value::as_str).ok_or_else(|| {
        if doc.get("swagger").is_some() {
            OpenApiToolsError::Config("Swagger 2.0 documents are not supported".to_string())
        } else {
            OpenApiToolsError::Config("missing 'openapi' version field".to_string())
        }
    })?;
    if version.starts_with("3.0") {
        Ok(SpecVersion::V30)
    } else if version.starts_with("3.1") {
        Ok(SpecVersion::V31)
    } else {
        Err(OpenApiToolsError::Config(format!(
            "unsupported OpenAPI version '{version}'"
        )))
    }
}

/// Extract every discoverable route of the resolver's root document.
///
/// Operations that fail to convert are reported in [`Extraction::skipped`]; they never abort
/// the others.
///
/// # Errors
///
/// Returns an error only when the document as a whole cannot be read.
pub fn extract(resolver: &OpenApiResolver, discover: &AutoDiscoverConfig) -> Result<Extraction> {
    let root = resolver.root();
    let version = detect_version(&root)?;
    let (mut extraction, run) = match version {
        SpecVersion::V30 => {
            let mut run = ConversionRun::new(resolver, Dialect::OpenApi30);
            (v30::extract(&mut run, &root, discover)?, run)
        }
        SpecVersion::V31 => {
            let mut run = ConversionRun::new(resolver, Dialect::JsonSchema);
            (v31::extract(&mut run, &root, discover)?, run)
        }
    };

    for route in &mut extraction.routes {
        route.definitions = run.closure(&route.schema_roots());
    }
    Ok(extraction)
}

/// Path-item parameters first; an operation parameter with the same `(location, name)` replaces
/// the path-item one in place.
pub(crate) fn merge_parameters(
    path_level: Vec<ParameterInfo>,
    operation_level: Vec<ParameterInfo>,
) -> Vec<ParameterInfo> {
    let mut merged: Vec<ParameterInfo> = Vec::new();
    let mut index: HashMap<(ParamLocation, String), usize> = HashMap::new();
    for p in path_level.into_iter().chain(operation_level) {
        let key = (p.location, p.name.clone());
        if let Some(i) = index.get(&key).copied() {
            merged[i] = p;
        } else {
            index.insert(key, merged.len());
            merged.push(p);
        }
    }
    merged
}

/// `x-*` entries of a flattened key map.
pub(crate) fn extensions_of<'a, I>(entries: I) -> Extensions
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    entries
        .into_iter()
        .filter(|(k, _)| k.starts_with("x-"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Example objects (possibly `$ref`s) to their `value`s.
pub(crate) fn example_values(
    run: &ConversionRun<'_>,
    doc: &DocId,
    examples: &IndexMap<String, Value>,
) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    for (name, ex) in examples {
        match run.resolver().follow(doc, ex) {
            Ok((_, resolved)) => {
                if let Some(v) = resolved.get("value") {
                    out.insert(name.clone(), v.clone());
                }
            }
            Err(e) => warn!(example = %name, error = %e, "ignoring unresolvable example"),
        }
    }
    out
}

pub(crate) fn encoding_from_value(v: &Value) -> EncodingInfo {
    EncodingInfo {
        content_type: v
            .get("contentType")
            .and_then(Value::as_str)
            .map(str::to_string),
        style: v
            .get("style")
            .and_then(Value::as_str)
            .and_then(ParamStyle::parse),
        explode: v.get("explode").and_then(Value::as_bool),
        allow_reserved: v
            .get("allowReserved")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

/// `{name: {expression: pathItem}}` to [`CallbackInfo`]s.
pub(crate) fn callbacks_from_value(
    run: &ConversionRun<'_>,
    doc: &DocId,
    callbacks: &IndexMap<String, Value>,
) -> Result<Vec<CallbackInfo>> {
    let mut out = Vec::new();
    for (name, cb) in callbacks {
        let (cb_doc, cb) = run.resolver().follow(doc, cb)?;
        let Some(expressions) = cb.as_object() else {
            continue;
        };
        for (expression, item) in expressions {
            if expression.starts_with("x-") {
                continue;
            }
            let (_, item) = run.resolver().follow(&cb_doc, item)?;
            let methods = METHOD_ORDER
                .iter()
                .filter(|m| item.get(**m).is_some())
                .map(|m| m.to_ascii_uppercase())
                .collect();
            out.push(CallbackInfo {
                name: name.clone(),
                expression: expression.clone(),
                methods,
            });
        }
    }
    Ok(out)
}

/// `{}` stands in for a parameter or media type without a schema.
pub(crate) fn convert_optional(
    run: &mut ConversionRun<'_>,
    doc: &DocId,
    schema: Option<&Value>,
) -> Result<Option<crate::schema::Schema>> {
    schema.map(|s| run.convert(doc, s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::parse_document;
    use reqwest::{Client, Method};
    use serde_json::json;
    use std::path::PathBuf;

    fn extract_yaml(yaml: &str, discover: &AutoDiscoverConfig) -> Extraction {
        let root = parse_document(yaml, "inline").unwrap();
        let resolver = OpenApiResolver::new(
            DocId::File(PathBuf::from("/nonexistent/openapi.yaml")),
            root,
            Client::new(),
        );
        extract(&resolver, discover).unwrap()
    }

    const USERS_30: &str = r##"
openapi: 3.0.3
info: {title: Users, version: "1"}
servers: [{url: "https://api.example.com/v1"}]
paths:
  /users/{id}:
    parameters:
      - {name: id, in: path, required: true, schema: {type: integer}}
      - {name: verbose, in: query, schema: {type: boolean}}
    get:
      operationId: getUser
      tags: [users]
      parameters:
        - {name: verbose, in: query, description: more output, schema: {type: boolean}}
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema: {$ref: "#/components/schemas/User"}
        "404": {$ref: "#/components/responses/NotFound"}
    put:
      operationId: updateUser
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [id]
              properties:
                id: {type: string}
                name: {type: string, nullable: true}
      responses:
        "204": {description: updated}
      x-internal: true
components:
  schemas:
    User:
      type: object
      properties:
        id: {type: integer}
        manager: {$ref: "#/components/schemas/User"}
    Unused: {type: string}
  responses:
    NotFound:
      description: not found
      content:
        application/problem+json:
          schema: {type: object}
"##;

    #[test]
    fn openapi30_routes_in_document_and_method_order() {
        let ex = extract_yaml(USERS_30, &AutoDiscoverConfig::default());
        assert!(ex.skipped.is_empty(), "{:?}", ex.skipped);
        assert_eq!(ex.server_url.as_deref(), Some("https://api.example.com/v1"));
        assert_eq!(ex.title.as_deref(), Some("Users"));

        let keys: Vec<String> = ex.routes.iter().map(Route::key).collect();
        assert_eq!(keys, vec!["GET /users/{id}", "PUT /users/{id}"]);

        let get = &ex.routes[0];
        assert_eq!(get.method, Method::GET);
        assert_eq!(get.operation_id.as_deref(), Some("getUser"));
        assert!(get.has_tag("users"));
        // Path-level `verbose` is replaced in place by the operation-level one.
        let names: Vec<&str> = get.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["id", "verbose"]);
        assert_eq!(get.parameters[1].description.as_deref(), Some("more output"));
        assert!(get.parameters[0].required);
        assert_eq!(get.parameters[0].location, ParamLocation::Path);
        assert_eq!(get.parameters[0].style, Some(ParamStyle::Simple));

        let (code, ok) = get.success_response().unwrap();
        assert_eq!(code, "200");
        assert_eq!(
            ok.content["application/json"].schema.as_ref().unwrap().to_json(),
            json!({"$ref": "#/$defs/User"})
        );
        assert!(get.responses["404"].content.contains_key("application/problem+json"));
        assert_eq!(get.definitions.keys().collect::<Vec<_>>(), vec!["User"]);

        let put = &ex.routes[1];
        let body = put.request_body.as_ref().unwrap();
        assert!(body.required);
        let schema = body.content["application/json"].schema.as_ref().unwrap();
        assert_eq!(
            schema.properties().unwrap()["name"].to_json(),
            json!({"anyOf": [{"type": "string"}, {"type": "null"}]})
        );
        assert_eq!(put.extensions.get("x-internal"), Some(&json!(true)));
        assert!(put.definitions.is_empty());
    }

    #[test]
    fn openapi31_schemas_pass_through() {
        let yaml = r##"
openapi: 3.1.0
info: {title: Pets, version: "1"}
paths:
  /pets:
    post:
      summary: Create pet
      requestBody:
        $ref: "#/components/requestBodies/PetBody"
      responses:
        "201":
          description: created
          content:
            application/json:
              schema: {$ref: "#/components/schemas/Pet"}
      callbacks:
        onCreated:
          "{$request.body#/callbackUrl}":
            post:
              responses: {"200": {description: ok}}
  /pets/{petId}:
    get:
      parameters:
        - $ref: "#/components/parameters/PetId"
        - name: fields
          in: query
          style: pipeDelimited
          explode: false
          schema: {type: array, items: {type: string}}
      responses:
        default: {description: anything}
components:
  parameters:
    PetId: {name: petId, in: path, required: true, schema: {type: [string, "null"]}}
  requestBodies:
    PetBody:
      content:
        application/json:
          schema: {$ref: "#/components/schemas/Pet"}
  schemas:
    Pet:
      type: object
      properties:
        name: {type: [string, "null"]}
        tag: {$ref: "#/components/schemas/Tag"}
    Tag: {type: string}
"##;
        let ex = extract_yaml(yaml, &AutoDiscoverConfig::default());
        assert!(ex.skipped.is_empty(), "{:?}", ex.skipped);
        assert_eq!(ex.routes.len(), 2);

        let post = &ex.routes[0];
        assert_eq!(post.summary.as_deref(), Some("Create pet"));
        assert!(!post.request_body.as_ref().unwrap().required);
        let mut defs: Vec<&String> = post.definitions.keys().collect();
        defs.sort();
        assert_eq!(defs, vec!["Pet", "Tag"]);
        assert_eq!(
            post.definitions["Pet"].properties().unwrap()["name"].to_json(),
            json!({"type": ["string", "null"]})
        );
        assert_eq!(post.callbacks.len(), 1);
        assert_eq!(post.callbacks[0].name, "onCreated");
        assert_eq!(post.callbacks[0].methods, vec!["POST".to_string()]);

        let get = &ex.routes[1];
        assert_eq!(get.parameters[0].name, "petId");
        assert_eq!(get.parameters[1].style, Some(ParamStyle::PipeDelimited));
        assert_eq!(get.parameters[1].explode, Some(false));
        assert_eq!(get.success_response().unwrap().0, "default");
    }

    #[test]
    fn broken_operations_are_reported_not_fatal() {
        let yaml = r##"
openapi: 3.0.0
info: {title: T, version: "1"}
paths:
  /ok:
    get:
      responses: {"200": {description: ok}}
  /broken:
    get:
      parameters:
        - $ref: "#/components/parameters/Missing"
      responses: {"200": {description: ok}}
    post:
      requestBody:
        content:
          application/json:
            schema: {$ref: "#/components/schemas/Nope"}
      responses: {"200": {description: ok}}
"##;
        let ex = extract_yaml(yaml, &AutoDiscoverConfig::default());
        assert_eq!(ex.routes.len(), 1);
        assert_eq!(ex.routes[0].key(), "GET /ok");
        let skipped: Vec<(&str, &str)> = ex
            .skipped
            .iter()
            .map(|s| (s.method.as_str(), s.path.as_str()))
            .collect();
        assert_eq!(skipped, vec![("GET", "/broken"), ("POST", "/broken")]);
    }

    #[test]
    fn discovery_filters_apply_before_conversion() {
        let discover = AutoDiscoverConfig::Detailed {
            include: vec!["GET *".to_string()],
            exclude: vec![],
        };
        let ex = extract_yaml(USERS_30, &discover);
        assert_eq!(ex.routes.len(), 1);
        assert_eq!(ex.routes[0].method, Method::GET);

        let none = extract_yaml(USERS_30, &AutoDiscoverConfig::Enabled(false));
        assert!(none.routes.is_empty());
    }

    fn out_of_order_doc(version: &str) -> String {
        format!(
            r##"
openapi: {version}
info: {{title: Order, version: "1"}}
paths:
  /zeta:
    post:
      summary: Same
      requestBody:
        content:
          text/plain:
            schema: {{type: string}}
          text/csv:
            schema: {{type: string}}
      responses:
        "200":
          description: ok
          content:
            text/plain: {{schema: {{type: string}}}}
            text/csv: {{schema: {{type: string}}}}
  /alpha:
    get:
      summary: Same
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: object
                properties:
                  zed: {{type: string}}
                  abc: {{type: string}}
  /mid:
    delete:
      responses:
        "204": {{description: gone}}
"##
        )
    }

    #[test]
    fn declaration_order_survives_parsing() {
        for version in ["3.0.3", "3.1.0"] {
            let ex = extract_yaml(&out_of_order_doc(version), &AutoDiscoverConfig::default());
            let keys: Vec<String> = ex.routes.iter().map(Route::key).collect();
            assert_eq!(keys, vec!["POST /zeta", "GET /alpha", "DELETE /mid"], "{version}");

            let zeta = &ex.routes[0];
            let body_types: Vec<&str> = zeta
                .request_body
                .as_ref()
                .unwrap()
                .content
                .keys()
                .map(String::as_str)
                .collect();
            assert_eq!(body_types, vec!["text/plain", "text/csv"], "{version}");
            assert_eq!(
                zeta.success_content_types(),
                vec!["text/plain".to_string(), "text/csv".to_string()]
            );

            let (_, ok) = ex.routes[1].success_response().unwrap();
            let schema = ok.content["application/json"].schema.as_ref().unwrap();
            let props: Vec<&String> = schema.properties().unwrap().keys().collect();
            assert_eq!(props, vec!["zed", "abc"], "{version}");
        }
    }

    #[test]
    fn version_detection() {
        assert_eq!(detect_version(&json!({"openapi": "3.0.1"})).unwrap(), SpecVersion::V30);
        assert_eq!(detect_version(&json!({"openapi": "3.1.0"})).unwrap(), SpecVersion::V31);
        assert!(detect_version(&json!({"swagger": "2.0"})).is_err());
        assert!(detect_version(&json!({"openapi": "4.0.0"})).is_err());
        assert!(detect_version(&json!({})).is_err());
    }
}
