//! `OpenAPI` 3.0 extraction over the `openapiv3` typed tree.

use super::{
    Extraction, METHOD_ORDER, callbacks_from_value, encoding_from_value, example_values,
    extensions_of, merge_parameters,
};
use crate::config::AutoDiscoverConfig;
use crate::converter::ConversionRun;
use crate::error::{OpenApiToolsError, Result};
use crate::ir::{MediaTypeInfo, ParameterInfo, RequestBodyInfo, ResponseInfo, Route};
use crate::resolver::DocId;
use crate::schema::Schema;
use apibridge_http_tools::codec::{ParamLocation, ParamStyle};
use indexmap::IndexMap;
use openapiv3::{
    MediaType, OpenAPI, Operation, Parameter, ParameterData, ParameterSchemaOrContent, PathItem,
    PathStyle, QueryStyle, ReferenceOr, StatusCode,
};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

pub(super) fn extract(
    run: &mut ConversionRun<'_>,
    root: &Value,
    discover: &AutoDiscoverConfig,
) -> Result<Extraction> {
    let spec: OpenAPI = serde_json::from_value(root.clone())
        .map_err(|e| OpenApiToolsError::OpenApi(format!("Invalid OpenAPI 3.0 document: {e}")))?;

    let mut extraction = Extraction {
        server_url: spec.servers.first().map(|s| s.url.clone()),
        title: Some(spec.info.title.clone()).filter(|t| !t.is_empty()),
        ..Extraction::default()
    };
    let root_doc = run.resolver().root_doc().clone();

    for (path, item) in &spec.paths.paths {
        let (item_doc, item) = match run.resolver().resolve_reference_or(&root_doc, item) {
            Ok(v) => v,
            Err(e) => {
                extraction.skip("*", path, &e);
                continue;
            }
        };

        for method in METHOD_ORDER {
            let Some(op) = operation(&item, method) else {
                continue;
            };
            if !discover.allows(method, path) {
                continue;
            }
            match route_for(run, &item_doc, path, method, &item, op) {
                Ok(route) => extraction.routes.push(route),
                Err(e) => extraction.skip(method, path, &e),
            }
        }
    }
    Ok(extraction)
}

fn operation<'a>(item: &'a PathItem, method: &str) -> Option<&'a Operation> {
    match method {
        "get" => item.get.as_ref(),
        "put" => item.put.as_ref(),
        "post" => item.post.as_ref(),
        "delete" => item.delete.as_ref(),
        "options" => item.options.as_ref(),
        "head" => item.head.as_ref(),
        "patch" => item.patch.as_ref(),
        "trace" => item.trace.as_ref(),
        _ => None,
    }
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
            let (body_doc, body) = run.resolver().resolve_reference_or(doc, body)?;
            Some(RequestBodyInfo {
                required: body.required,
                description: body.description.clone(),
                content: content(run, &body_doc, &body.content)?,
                extensions: extensions_of(&body.extensions),
            })
        }
        None => None,
    };

    let mut responses = IndexMap::new();
    for (code, resp) in &op.responses.responses {
        let key = match code {
            StatusCode::Code(n) => n.to_string(),
            StatusCode::Range(n) => format!("{n}XX"),
        };
        responses.insert(key, response(run, doc, resp)?);
    }
    if let Some(default) = &op.responses.default {
        responses.insert("default".to_string(), response(run, doc, default)?);
    }

    let callbacks: IndexMap<String, Value> = to_value_map(&op.callbacks)?;

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
        extensions: extensions_of(&op.extensions),
        callbacks: callbacks_from_value(run, doc, &callbacks)?,
        deprecated: op.deprecated,
    })
}

fn parameters(
    run: &mut ConversionRun<'_>,
    doc: &DocId,
    params: &[ReferenceOr<Parameter>],
) -> Result<Vec<ParameterInfo>> {
    let mut out = Vec::with_capacity(params.len());
    for p in params {
        let (p_doc, p) = run.resolver().resolve_reference_or(doc, p)?;
        out.push(parameter(run, &p_doc, &p)?);
    }
    Ok(out)
}

fn parameter(run: &mut ConversionRun<'_>, doc: &DocId, param: &Parameter) -> Result<ParameterInfo> {
    let (data, location, style, allow_reserved, allow_empty_value) = match param {
        Parameter::Query {
            parameter_data,
            allow_reserved,
            style,
            allow_empty_value,
        } => {
            let style = match style {
                QueryStyle::Form => ParamStyle::Form,
                QueryStyle::SpaceDelimited => ParamStyle::SpaceDelimited,
                QueryStyle::PipeDelimited => ParamStyle::PipeDelimited,
                QueryStyle::DeepObject => ParamStyle::DeepObject,
            };
            (
                parameter_data,
                ParamLocation::Query,
                style,
                *allow_reserved,
                allow_empty_value.unwrap_or(false),
            )
        }
        Parameter::Path {
            parameter_data,
            style,
        } => {
            let style = match style {
                PathStyle::Simple => ParamStyle::Simple,
                PathStyle::Label => ParamStyle::Label,
                PathStyle::Matrix => ParamStyle::Matrix,
            };
            (parameter_data, ParamLocation::Path, style, false, false)
        }
        Parameter::Header { parameter_data, .. } => (
            parameter_data,
            ParamLocation::Header,
            ParamStyle::Simple,
            false,
            false,
        ),
        Parameter::Cookie { parameter_data, .. } => (
            parameter_data,
            ParamLocation::Cookie,
            ParamStyle::Form,
            false,
            false,
        ),
    };

    let examples: IndexMap<String, Value> = to_value_map(&data.examples)?;

    Ok(ParameterInfo {
        name: data.name.clone(),
        location,
        // Path parameters are always required, whatever the document says.
        required: data.required || location == ParamLocation::Path,
        schema: parameter_schema(run, doc, data)?,
        description: data.description.clone(),
        style: Some(style),
        explode: data.explode,
        allow_reserved,
        allow_empty_value,
        deprecated: data.deprecated.unwrap_or(false),
        example: data.example.clone(),
        examples: example_values(run, doc, &examples),
        extensions: extensions_of(&data.extensions),
    })
}

/// `schema`, or the schema of the first `content` entry; `{}` when neither is present.
fn parameter_schema(
    run: &mut ConversionRun<'_>,
    doc: &DocId,
    data: &ParameterData,
) -> Result<Schema> {
    let raw = match &data.format {
        ParameterSchemaOrContent::Schema(s) => Some(serde_json::to_value(s)?),
        ParameterSchemaOrContent::Content(content) => content
            .values()
            .next()
            .and_then(|mt| mt.schema.as_ref())
            .map(serde_json::to_value)
            .transpose()?,
    };
    match raw {
        Some(raw) => run.convert(doc, &raw),
        None => Ok(Schema::empty_object()),
    }
}

fn content(
    run: &mut ConversionRun<'_>,
    doc: &DocId,
    content: &IndexMap<String, MediaType>,
) -> Result<IndexMap<String, MediaTypeInfo>> {
    let mut out = IndexMap::with_capacity(content.len());
    for (media_type, mt) in content {
        let schema = match &mt.schema {
            Some(s) => Some(run.convert(doc, &serde_json::to_value(s)?)?),
            None => None,
        };
        let examples: IndexMap<String, Value> = to_value_map(&mt.examples)?;
        let encoding = mt
            .encoding
            .iter()
            .map(|(prop, enc)| Ok((prop.clone(), encoding_from_value(&serde_json::to_value(enc)?))))
            .collect::<Result<IndexMap<_, _>>>()?;
        out.insert(media_type.clone(), MediaTypeInfo {
            schema,
            example: mt.example.clone(),
            examples: example_values(run, doc, &examples),
            encoding,
            extensions: extensions_of(&mt.extensions),
        });
    }
    Ok(out)
}

fn response(
    run: &mut ConversionRun<'_>,
    doc: &DocId,
    resp: &ReferenceOr<openapiv3::Response>,
) -> Result<ResponseInfo> {
    let (resp_doc, resp) = run.resolver().resolve_reference_or(doc, resp)?;
    Ok(ResponseInfo {
        description: Some(resp.description.clone()).filter(|d| !d.is_empty()),
        content: content(run, &resp_doc, &resp.content)?,
        extensions: extensions_of(&resp.extensions),
    })
}

/// Typed sub-maps (examples, callbacks) back to raw values for the shared helpers.
fn to_value_map<T: Serialize>(map: &IndexMap<String, T>) -> Result<IndexMap<String, Value>> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), serde_json::to_value(v)?)))
        .collect()
}
