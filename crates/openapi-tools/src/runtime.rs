//! `OpenAPI` component source runtime.
//!
//! [`OpenApiSource`] loads a spec, turns its operations into MCP tools, resources and resource
//! templates, and executes outbound HTTP requests for `tools/call` and `resources/read`.

use crate::components::{
    ComponentSink, RESOURCE_SCHEME, ResourceComponent, ResourceTemplateComponent, ToolComponent,
    UriTemplate, describe,
};
use crate::config::{ApiServerConfig, HashPolicy};
use crate::error::{OpenApiToolsError, Result};
use crate::extract::{self, Extraction, SkippedOperation};
use crate::mapper::{ComponentKind, MappingOverride, RouteMapper};
use crate::naming::{self, ComponentNamer};
use crate::resolver::{DocId, OpenApiResolver};
use crate::synth::{self, to_json_object};
use apibridge_http_tools::content;
use apibridge_http_tools::error::sanitize_reqwest_error;
use apibridge_http_tools::request::RequestTemplate;
use apibridge_http_tools::response::{OutputContract, bytes_to_text};
use apibridge_http_tools::runtime::HttpExecutor;
use apibridge_http_tools::semantics::annotations_for_method;
use apibridge_http_tools::CallError;
use indexmap::IndexMap;
use parking_lot::RwLock;
use reqwest::Client;
use rmcp::model::{CallToolResult, Resource, ResourceTemplate, Tool};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Remote `$ref` documents are fetched with this timeout unless configured otherwise.
pub const DEFAULT_REF_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-invocation inputs coming from the protocol session.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Fires when the caller gives up; the outbound request is aborted.
    pub cancel: CancellationToken,
    /// Session-scoped headers, merged after static headers and never over explicit ones.
    pub session_headers: Vec<(String, String)>,
}

/// Text of a read resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRead {
    pub uri: String,
    pub mime_type: Option<String>,
    pub text: String,
}

/// Everything produced by one successful `start`.
#[derive(Debug)]
struct Registry {
    executor: HttpExecutor,
    tools: IndexMap<String, ToolComponent>,
    /// Keyed by URI.
    resources: IndexMap<String, ResourceComponent>,
    templates: Vec<ResourceTemplateComponent>,
    skipped: Vec<SkippedOperation>,
    title: Option<String>,
}

/// `OpenAPI` source that exposes HTTP API endpoints as MCP components.
#[derive(Clone)]
pub struct OpenApiSource {
    /// Source name / id (used for logs and error context).
    name: String,
    config: ApiServerConfig,
    /// Client for spec loading and outbound calls.
    client: Client,
    /// Call timeout when the config does not set one.
    default_timeout: Duration,
    /// Spec loading and discovery deadline.
    startup_timeout: Duration,
    mapping_override: Option<MappingOverride>,
    registry: Arc<RwLock<Option<Arc<Registry>>>>,
}

impl std::fmt::Debug for OpenApiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenApiSource")
            .field("name", &self.name)
            .field("spec", &self.config.spec)
            .field("started", &self.registry.read().is_some())
            .finish_non_exhaustive()
    }
}

impl OpenApiSource {
    /// Create a new source.
    ///
    /// This constructor does not fetch/parse the spec; call [`Self::start`] (or
    /// [`Self::build`]) before listing or calling components.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: ApiServerConfig,
        default_timeout: Duration,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            client: Client::new(),
            default_timeout,
            startup_timeout,
            mapping_override: None,
            registry: Arc::new(RwLock::new(None)),
        }
    }

    /// Create and start a source in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if spec loading, parsing or discovery fails.
    pub async fn build(
        name: impl Into<String>,
        config: ApiServerConfig,
        default_timeout: Duration,
        startup_timeout: Duration,
    ) -> Result<Self> {
        let src = Self::new(name, config, default_timeout, startup_timeout);
        src.start().await?;
        Ok(src)
    }

    /// Replace or extend mapping decisions with custom logic (see [`RouteMapper::with_override`]).
    #[must_use]
    pub fn with_mapping_override(mut self, f: MappingOverride) -> Self {
        self.mapping_override = Some(f);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load the spec, discover components, and make the source ready for use.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, parsing or discovery fails, or takes longer than the startup
    /// timeout.
    pub async fn start(&self) -> Result<()> {
        let startup = async {
            let content = self.load_spec().await?;
            let root: Value = serde_json::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .map_err(|e| OpenApiToolsError::OpenApiSpecParse {
                    location: self.config.spec.clone(),
                    source: e,
                })?;
            let doc = DocId::parse(&self.config.spec)?;
            self.load_document(doc, root).await
        };

        match tokio::time::timeout(self.startup_timeout, startup).await {
            Ok(res) => res,
            Err(_) => Err(OpenApiToolsError::Startup(format!(
                "Startup timeout after {}s for OpenAPI source '{}'",
                self.startup_timeout.as_secs(),
                self.name
            ))),
        }
    }

    /// Discover components from an already parsed document.
    ///
    /// `doc` identifies the document for relative `$ref`s.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported documents, invalid configuration, or a missing base URL.
    pub async fn load_document(&self, doc: DocId, root: Value) -> Result<()> {
        let ref_timeout = self
            .config
            .ref_timeout_secs
            .map_or(DEFAULT_REF_TIMEOUT, Duration::from_secs);
        let ref_client = Client::builder()
            .timeout(ref_timeout)
            .build()
            .map_err(|e| OpenApiToolsError::Startup(format!("failed to build HTTP client: {e}")))?;

        let resolver = OpenApiResolver::new(doc, root, ref_client);
        resolver.prefetch().await;
        let extraction = extract::extract(&resolver, &self.config.auto_discover)?;

        let base_url = self
            .config
            .base_url
            .clone()
            .or_else(|| extraction.server_url.clone())
            .ok_or_else(|| {
                OpenApiToolsError::Startup(
                    "No base URL configured and none found in spec".to_string(),
                )
            })?;
        let base_url = self.resolve_base_url(&base_url)?;

        let registry = self.build_registry(extraction, base_url)?;
        info!(
            source = %self.name,
            tools = registry.tools.len(),
            resources = registry.resources.len(),
            resource_templates = registry.templates.len(),
            skipped = registry.skipped.len(),
            "discovered components from OpenAPI spec"
        );
        *self.registry.write() = Some(Arc::new(registry));
        Ok(())
    }

    /// Load the spec text from a URL or file, verifying its hash when configured.
    async fn load_spec(&self) -> Result<String> {
        let spec = &self.config.spec;
        let content = if spec.starts_with("http://") || spec.starts_with("https://") {
            info!(source = %self.name, url = %spec, "fetching OpenAPI spec");
            let url = Url::parse(spec).map_err(|e| {
                OpenApiToolsError::OpenApi(format!("Invalid OpenAPI spec URL '{spec}': {e}"))
            })?;
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| OpenApiToolsError::OpenApiSpecFetch {
                    url: spec.clone(),
                    message: sanitize_reqwest_error(&e),
                })?;
            resp.text()
                .await
                .map_err(|e| OpenApiToolsError::OpenApiSpecReadBody {
                    url: spec.clone(),
                    message: sanitize_reqwest_error(&e),
                })?
        } else {
            info!(source = %self.name, path = %spec, "loading OpenAPI spec");
            tokio::fs::read_to_string(spec)
                .await
                .map_err(|e| OpenApiToolsError::OpenApiSpecReadFile {
                    path: spec.clone(),
                    source: e,
                })?
        };

        if let Some(expected) = &self.config.spec_hash {
            let actual = format!("sha256:{}", hex::encode(Sha256::digest(content.as_bytes())));
            if actual != *expected {
                match self.config.spec_hash_policy {
                    HashPolicy::Fail => {
                        return Err(OpenApiToolsError::OpenApi(format!(
                            "Spec hash mismatch. Expected: {expected}, Got: {actual}",
                        )));
                    }
                    HashPolicy::Warn => {
                        warn!(source = %self.name, expected = %expected, actual = %actual, "spec hash mismatch");
                    }
                    HashPolicy::Ignore => {}
                }
            }
        }
        Ok(content)
    }

    fn resolve_base_url(&self, base_url: &str) -> Result<String> {
        if base_url.starts_with("http://") || base_url.starts_with("https://") {
            return Ok(base_url.to_string());
        }

        // Relative server URLs ("/api/v3") resolve against the spec URL.
        let spec = &self.config.spec;
        if spec.starts_with("http://") || spec.starts_with("https://") {
            let mut spec_url = Url::parse(spec).map_err(|e| {
                OpenApiToolsError::OpenApi(format!("Invalid OpenAPI spec URL '{spec}': {e}"))
            })?;
            spec_url.set_fragment(None);
            let resolved = spec_url.join(base_url).map_err(|e| {
                OpenApiToolsError::OpenApi(format!(
                    "Invalid baseUrl '{base_url}': {e} (set baseUrl explicitly)",
                ))
            })?;
            return Ok(resolved.to_string());
        }

        Err(OpenApiToolsError::OpenApi(format!(
            "Invalid baseUrl '{base_url}': must be an absolute http(s) URL (set baseUrl explicitly)",
        )))
    }

    fn call_timeout(&self) -> Option<Duration> {
        match self.config.timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(self.default_timeout),
        }
    }

    fn build_registry(&self, extraction: Extraction, base_url: String) -> Result<Registry> {
        let mut mapper = RouteMapper::from_config(&self.config)?;
        if let Some(f) = &self.mapping_override {
            mapper = mapper.with_override(f.clone());
        }

        for key in self.config.custom_names.keys() {
            let used = extraction.routes.iter().any(|r| {
                r.operation_id.as_deref() == Some(key.as_str())
                    || key.split_once(' ').is_some_and(|(m, p)| {
                        m.eq_ignore_ascii_case(r.method.as_str()) && p.trim() == r.path
                    })
            });
            if !used {
                warn!(source = %self.name, key = %key, "customNames entry matches no operation");
            }
        }

        let executor = HttpExecutor::with_client(self.client.clone(), base_url)
            .with_timeout(self.call_timeout())
            .with_default_headers(
                self.config
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
            .with_max_response_bytes(self.config.max_response_bytes);

        let mut namer = ComponentNamer::new();
        let mut tools = IndexMap::new();
        let mut resources = IndexMap::new();
        let mut templates = Vec::new();

        for route in extraction.routes {
            let decisions = mapper.map(&route);
            if decisions.is_empty() {
                debug!(source = %self.name, route = %route.key(), "route excluded by mapping");
                continue;
            }

            let input = synth::input_schema(&route);
            let template = Arc::new(synth::request_template(&route, &input));
            let base = naming::base_name(&route, &self.config.custom_names);
            let description = describe(&route);
            let mime_type = content::preferred_content_type(
                route
                    .success_response()
                    .into_iter()
                    .flat_map(|(_, r)| r.content.keys().map(String::as_str)),
            )
            .map(str::to_string);
            let route = Arc::new(route);

            for decision in decisions {
                let name = namer.assign(decision.kind, &base).name;
                match decision.kind {
                    ComponentKind::Tool => {
                        let output = synth::output_schema(&route);
                        let output_schema = output
                            .as_ref()
                            .map(|o| Arc::new(to_json_object(&o.schema)));
                        let contract = OutputContract::new(
                            output_schema.clone(),
                            output.as_ref().is_some_and(|o| o.wrap_result),
                            self.config.validate_output,
                        );
                        let mut annotations = annotations_for_method(&route.method);
                        decision.annotations.apply_to(&mut annotations);
                        tools.insert(name.clone(), ToolComponent {
                            name,
                            description: description.clone(),
                            input_schema: Arc::new(to_json_object(&input.schema)),
                            output_schema,
                            tags: decision.tags,
                            annotations,
                            route: route.clone(),
                            template: template.clone(),
                            contract: Arc::new(contract),
                        });
                    }
                    ComponentKind::Resource => {
                        let uri = format!("{RESOURCE_SCHEME}{name}");
                        resources.insert(uri.clone(), ResourceComponent {
                            name,
                            description: description.clone(),
                            uri,
                            mime_type: mime_type.clone(),
                            tags: decision.tags,
                            route: route.clone(),
                            template: template.clone(),
                        });
                    }
                    ComponentKind::ResourceTemplate => {
                        templates.push(ResourceTemplateComponent {
                            uri_template: UriTemplate::for_route(&name, &route, &input.mappings),
                            name,
                            description: description.clone(),
                            mime_type: mime_type.clone(),
                            tags: decision.tags,
                            route: route.clone(),
                            template: template.clone(),
                        });
                    }
                    ComponentKind::Exclude => {}
                }
            }
        }

        Ok(Registry {
            executor,
            tools,
            resources,
            templates,
            skipped: extraction.skipped,
            title: extraction.title,
        })
    }

    fn registry(&self) -> Result<Arc<Registry>> {
        self.registry.read().clone().ok_or_else(|| {
            OpenApiToolsError::Runtime(format!("OpenAPI source '{}' is not started", self.name))
        })
    }

    /// List the MCP `Tool`s exposed by this source (empty before `start`).
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.registry
            .read()
            .as_ref()
            .map(|r| r.tools.values().map(ToolComponent::to_tool).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn list_resources(&self) -> Vec<Resource> {
        self.registry
            .read()
            .as_ref()
            .map(|r| r.resources.values().map(ResourceComponent::to_resource).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        let Some(registry) = self.registry.read().clone() else {
            return Vec::new();
        };
        registry
            .templates
            .iter()
            .filter_map(|t| match t.to_resource_template() {
                Ok(rt) => Some(rt),
                Err(e) => {
                    warn!(source = %self.name, template = %t.name, error = %e, "dropping resource template");
                    None
                }
            })
            .collect()
    }

    /// Hand every component to `sink`, tools first.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is not started.
    pub fn register_into(&self, sink: &mut dyn ComponentSink) -> Result<()> {
        let registry = self.registry()?;
        for tool in registry.tools.values() {
            sink.register_tool(tool);
        }
        for resource in registry.resources.values() {
            sink.register_resource(resource);
        }
        for template in &registry.templates {
            sink.register_resource_template(template);
        }
        Ok(())
    }

    /// Operations that could not be converted, with the reason.
    #[must_use]
    pub fn skipped(&self) -> Vec<SkippedOperation> {
        self.registry
            .read()
            .as_ref()
            .map(|r| r.skipped.clone())
            .unwrap_or_default()
    }

    /// The base URL calls go to (`None` before `start`).
    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.registry
            .read()
            .as_ref()
            .map(|r| r.executor.base_url().to_string())
    }

    /// The `info.title` of the spec (`None` before `start` or when empty).
    #[must_use]
    pub fn spec_title(&self) -> Option<String> {
        self.registry.read().as_ref().and_then(|r| r.title.clone())
    }

    /// Execute a tool call.
    ///
    /// Upstream and argument failures come back as `is_error` results.
    ///
    /// # Errors
    ///
    /// Returns an error only if the source is not started or the tool name is unknown.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        ctx: &CallContext,
    ) -> Result<CallToolResult> {
        let registry = self.registry()?;
        let tool = registry
            .tools
            .get(name)
            .ok_or_else(|| OpenApiToolsError::Runtime(format!("Tool not found: {name}")))?;

        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Ok(CallError::RequestBuild(format!(
                    "tool arguments must be an object, got {other}"
                ))
                .into_call_result());
            }
        };

        debug!(source = %self.name, tool = %name, "calling tool");
        Ok(registry
            .executor
            .call(
                &tool.template,
                &args,
                &ctx.session_headers,
                &tool.contract,
                &ctx.cancel,
            )
            .await)
    }

    /// Read a resource or a concrete resource-template URI.
    ///
    /// JSON bodies are pretty-printed.
    ///
    /// # Errors
    ///
    /// [`OpenApiToolsError::Runtime`] for unknown URIs, [`OpenApiToolsError::Call`] for request
    /// and upstream failures.
    pub async fn read_resource(&self, uri: &str, ctx: &CallContext) -> Result<ResourceRead> {
        let registry = self.registry()?;
        let (template, args, declared_mime): (&RequestTemplate, Map<String, Value>, Option<&str>) =
            if let Some(r) = registry.resources.get(uri) {
                (&*r.template, Map::new(), r.mime_type.as_deref())
            } else {
                registry
                    .templates
                    .iter()
                    .find_map(|t| {
                        t.uri_template
                            .decode(uri)
                            .map(|args| (&*t.template, args, t.mime_type.as_deref()))
                    })
                    .ok_or_else(|| OpenApiToolsError::Runtime(format!("Resource not found: {uri}")))?
            };

        debug!(source = %self.name, uri = %uri, "reading resource");
        let request = registry
            .executor
            .build(template, &args, &ctx.session_headers)?;
        let parts = registry.executor.send(request, &ctx.cancel).await?;
        if parts.status >= 400 {
            return Err(CallError::http_status(parts.status, &parts.status_text, &parts.body).into());
        }

        let ct = parts.content_type.as_deref();
        let pretty = ct
            .is_none_or(content::is_json_content_type)
            .then(|| serde_json::from_slice::<Value>(&parts.body).ok())
            .flatten()
            .and_then(|v| serde_json::to_string_pretty(&v).ok());
        let text = pretty.unwrap_or_else(|| bytes_to_text(&parts.body, ct));

        Ok(ResourceRead {
            uri: uri.to_string(),
            mime_type: parts
                .content_type
                .clone()
                .or_else(|| declared_mime.map(str::to_string)),
            text,
        })
    }
}
