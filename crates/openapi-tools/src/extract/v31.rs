//! `OpenAPI` 3.1 extraction.
//!
//! `openapiv3` only models 3.0, so 3.1 documents are read through a thin serde model. Schemas
//! stay raw JSON (3.1 schemas already are JSON Schema); everything else that may be a `$ref`
//! is kept as a [`Value`] and followed through the resolver.

use super::{
    Extraction, METHOD_ORDER, callbacks_from_value, convert_optional, encoding_from_value,
    example_values, extensions_of, merge_parameters,
};
use crate::config::AutoDiscoverConfig;
use crate::converter::ConversionRun;
use crate::error::{OpenApiToolsError, Result};
use crate::ir::{MediaTypeInfo, ParameterInfo, RequestBodyInfo, ResponseInfo, Route};
use crate::resolver::DocId;
use crate::schema::Schema;
use apibridge_http_tools::codec::{ParamLocation, ParamStyle};
use indexmap::IndexMap;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    info: Info,
    #[serde(default)]
    servers: Vec<Server>,
    #[serde(default)]
    paths: IndexMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Info {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct Server {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PathItem {
    summary: Option<String>,
    description: Option<String>,
    #[serde(default)]
    parameters: Vec<Value>,
    #[serde(flatten)]
    rest: IndexMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    operation_id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    parameters: Vec<Value>,
    request_body: Option<Value>,
    #[serde(default)]
    responses: IndexMap<String, Value>,
    #[serde(default)]
    callbacks: IndexMap<String, Value>,
    #[serde(default)]
    deprecated: bool,
    #[serde(flatten)]
    extra: IndexMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Parameter {
    name: String,
    #[serde(rename = "in")]
    location: String,
    #[serde(default)]
    required: bool,
    description: Option<String>,
    #[serde(default)]
    deprecated: bool,
    style: Option<String>,
    explode: Option<bool>,
    #[serde(default)]
    allow_reserved: bool,
    #[serde(default)]
    allow_empty_value: bool,
    schema: Option<Value>,
    content: Option<IndexMap<String, Value>>,
    example: Option<Value>,
    #[serde(default)]
    examples: IndexMap<String, Value>,
    #[serde(flatten)]
    extra: IndexMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RequestBody {
    description: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    content: IndexMap<String, MediaType>,
    #[serde(flatten)]
    extra: IndexMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct MediaType {
    schema: Option<Value>,
    example: Option<Value>,
    #[serde(default)]
    examples: IndexMap<String, Value>,
    #[serde(default)]
    encoding: IndexMap<String, Value>,
    #[serde(flatten)]
    extra: IndexMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Response {
    description: Option<String>,
    #[serde(default)]
    content: IndexMap<String, MediaType>,
    #[serde(flatten)]
    extra: IndexMap<String, Value>,
}

pub(super) fn extract(
    run: &mut ConversionRun<'_>,
    root: &Value,
    discover: &AutoDiscoverConfig,
) -> Result<Extraction> {
    let spec: Document = serde_json::from_value(root.clone())
        .map_err(|e| OpenApiToolsError::OpenApi(format!("Invalid OpenAPI 3.1 document: {e}")))?;

    let mut extraction = Extraction {
        server_url: spec.servers.first().map(|s| s.url.clone()),
        title: Some(spec.info.title.clone()).filter(|t| !t.is_empty()),
        ..Extraction::default()
    };
    let root_doc = run.resolver().root_doc().clone();

    for (path, item) in &spec.paths {
        let (item_doc, item) = match follow_as::<PathItem>(run, &root_doc, item) {
            Ok(v) => v,
            Err(e) => {
                extraction.skip("*", path, &e);
                continue;
            }
        };

        for method in METHOD_ORDER {
            let Some(op) = item.rest.get(method) else {
                continue;
            };
            if !discover.allows(method, path) {
                continue;
            }
            let route = Operation::deserialize(op)
                .map_err(|e| {
                    OpenApiToolsError::OpenApi(format!("Invalid operation object: {e}"))
                })
                .and_then(|op| route_for(run, &item_doc, path, method, &item, &op));
            match route {
                Ok(route) => extraction.routes.push(route),
                Err(e) => extraction.skip(method, path, &e),
            }
        }
    }
    Ok(extraction)
}

/// Follow `$ref`s, then deserialize the target.
fn follow_as<T: DeserializeOwned>(
    run: &ConversionRun<'_>,
    doc: &DocId,
    value: &Value,
) -> Result<(DocId, T)> {
    let (target_doc, resolved) = run.resolver().follow(doc, value)?;
    let typed = serde_json::from_value(resolved).map_err(|e| {
        OpenApiToolsError::OpenApi(format!(
            "Invalid object in {}: {e}",
            target_doc.display()
        ))
    })?;
    Ok((target_doc, typed))
}

fn route_for(
    run: &mut ConversionRun<'_>,
    doc: &DocId,
    path: &str,
    method: &str,
    item: &PathItem,
    op: &Operation,
) -> Result<Route> {
    let path_level = parameters(run, doc, &item.parameters)?;
    let op_level = parameters(run, doc, &op.parameters)?;

    let request_body = match &op.request_body {
        Some(body) => {
            let (body_doc, body) = follow_as::<RequestBody>(run, doc, body)?;
            Some(RequestBodyInfo {
                required: body.required,
                description: body.description,
                content: content(run, &body_doc, &body.content)?,
                extensions: extensions_of(&body.extra),
            })
        }
        None => None,
    };

    let mut responses = IndexMap::new();
    for (code, resp) in &op.responses {
        if code.starts_with("x-") {
            continue;
        }
        let (resp_doc, resp) = follow_as::<Response>(run, doc, resp)?;
        responses.insert(code.clone(), ResponseInfo {
            description: resp.description.filter(|d| !d.is_empty()),
            content: content(run, &resp_doc, &resp.content)?,
            extensions: extensions_of(&resp.extra),
        });
    }

    Ok(Route {
        path: path.to_string(),
        method: Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| OpenApiToolsError::Conversion(format!("bad method '{method}': {e}")))?,
        operation_id: op.operation_id.clone(),
        summary: op.summary.clone().or_else(|| item.summary.clone()),
        description: op.description.clone().or_else(|| item.description.clone()),
        tags: op.tags.clone(),
        parameters: merge_parameters(path_level, op_level),
        request_body,
        responses,
        definitions: IndexMap::new(),
        extensions: extensions_of(&op.extra),
        callbacks: callbacks_from_value(run, doc, &op.callbacks)?,
        deprecated: op.deprecated,
    })
}

fn parameters(
    run: &mut ConversionRun<'_>,
    doc: &DocId,
    params: &[Value],
) -> Result<Vec<ParameterInfo>> {
    let mut out = Vec::with_capacity(params.len());
    for p in params {
        let (p_doc, p) = follow_as::<Parameter>(run, doc, p)?;
        out.push(parameter(run, &p_doc, p)?);
    }
    Ok(out)
}

fn parameter(run: &mut ConversionRun<'_>, doc: &DocId, p: Parameter) -> Result<ParameterInfo> {
    let location = ParamLocation::parse(&p.location)
        .filter(|l| *l != ParamLocation::Body)
        .ok_or_else(|| {
            OpenApiToolsError::Conversion(format!(
                "parameter '{}' has unsupported location '{}'",
                p.name, p.location
            ))
        })?;
    let style = match p.style.as_deref() {
        Some(s) => Some(ParamStyle::parse(s).ok_or_else(|| {
            OpenApiToolsError::Conversion(format!(
                "parameter '{}' has unknown style '{s}'",
                p.name
            ))
        })?),
        None => None,
    };

    let raw_schema = p.schema.as_ref().or_else(|| {
        p.content
            .as_ref()
            .and_then(|c| c.values().next())
            .and_then(|mt| mt.get("schema"))
    });
    let schema = convert_optional(run, doc, raw_schema)?.unwrap_or_else(Schema::empty_object);

    Ok(ParameterInfo {
        required: p.required || location == ParamLocation::Path,
        location,
        schema,
        description: p.description,
        style,
        explode: p.explode,
        allow_reserved: p.allow_reserved,
        allow_empty_value: p.allow_empty_value,
        deprecated: p.deprecated,
        example: p.example,
        examples: example_values(run, doc, &p.examples),
        extensions: extensions_of(&p.extra),
        name: p.name,
    })
}

fn content(
    run: &mut ConversionRun<'_>,
    doc: &DocId,
    content: &IndexMap<String, MediaType>,
) -> Result<IndexMap<String, MediaTypeInfo>> {
    let mut out = IndexMap::with_capacity(content.len());
    for (media_type, mt) in content {
        out.insert(media_type.clone(), MediaTypeInfo {
            schema: convert_optional(run, doc, mt.schema.as_ref())?,
            example: mt.example.clone(),
            examples: example_values(run, doc, &mt.examples),
            encoding: mt
                .encoding
                .iter()
                .map(|(prop, enc)| (prop.clone(), encoding_from_value(enc)))
                .collect(),
            extensions: extensions_of(&mt.extra),
        });
    }
    Ok(out)
}
