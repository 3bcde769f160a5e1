use crate::error::{OpenApiToolsError, Result};
use crate::mapper::ComponentKind;
use apibridge_http_tools::semantics::ToolHints;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for one `OpenAPI`-backed component source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerConfig {
    /// `OpenAPI` spec location (URL or file path).
    pub spec: String,

    /// Optional spec hash (`sha256:<hex>`) for version detection.
    #[serde(default)]
    pub spec_hash: Option<String>,

    /// Hash policy: warn, fail, or ignore.
    #[serde(default)]
    pub spec_hash_policy: HashPolicy,

    /// Override base URL from spec.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Auto-discovery configuration.
    #[serde(default)]
    pub auto_discover: AutoDiscoverConfig,

    /// Operation id or `"METHOD /path"` -> component name.
    #[serde(default)]
    pub custom_names: IndexMap<String, String>,

    /// Ordered mapping rules; the first match wins.
    #[serde(default)]
    pub route_maps: Vec<RouteMapConfig>,

    /// Tags added to every component.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Also expose GET routes with path parameters as resource templates.
    #[serde(default)]
    pub resource_templates_for_get: bool,

    /// Static headers for every outbound request.
    #[serde(default)]
    pub headers: IndexMap<String, String>,

    /// Per-call timeout; `0` disables it.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Timeout for fetching remote `$ref` documents.
    #[serde(default)]
    pub ref_timeout_secs: Option<u64>,

    #[serde(default)]
    pub max_response_bytes: Option<usize>,

    /// Validate successful JSON bodies against the output schema.
    #[serde(default = "default_true")]
    pub validate_output: bool,
}

fn default_true() -> bool {
    true
}

impl ApiServerConfig {
    /// Minimal config for a spec location; everything else defaulted.
    #[must_use]
    pub fn for_spec(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            spec_hash: None,
            spec_hash_policy: HashPolicy::default(),
            base_url: None,
            auto_discover: AutoDiscoverConfig::default(),
            custom_names: IndexMap::new(),
            route_maps: Vec::new(),
            tags: Vec::new(),
            resource_templates_for_get: false,
            headers: IndexMap::new(),
            timeout_secs: None,
            ref_timeout_secs: None,
            max_response_bytes: None,
            validate_output: true,
        }
    }

    /// Parse a YAML (or JSON) config document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid config.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).map_err(|e| OpenApiToolsError::Config(e.to_string()))
    }

    /// Load a config file. Relative spec paths are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut cfg = Self::from_yaml_str(&content)?;
        let is_url = cfg.spec.contains("://");
        if !is_url
            && Path::new(&cfg.spec).is_relative()
            && let Some(dir) = path.parent()
        {
            cfg.spec = dir.join(&cfg.spec).display().to_string();
        }
        Ok(cfg)
    }
}

/// Hash verification policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log warning if hash doesn't match.
    #[default]
    Warn,
    /// Fail startup if hash doesn't match.
    Fail,
    /// Ignore hash verification.
    Ignore,
}

/// Auto-discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AutoDiscoverConfig {
    /// Simple boolean: true = discover all, false = nothing.
    Enabled(bool),
    /// Glob filters over `"METHOD /path"`; exclude wins.
    Detailed {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

impl Default for AutoDiscoverConfig {
    fn default() -> Self {
        AutoDiscoverConfig::Enabled(true)
    }
}

impl AutoDiscoverConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            AutoDiscoverConfig::Enabled(b) => *b,
            AutoDiscoverConfig::Detailed { .. } => true,
        }
    }

    /// Whether `"METHOD /path"` passes the filters.
    #[must_use]
    pub fn allows(&self, method: &str, path: &str) -> bool {
        let key = format!("{} {path}", method.to_ascii_uppercase());
        match self {
            AutoDiscoverConfig::Enabled(b) => *b,
            AutoDiscoverConfig::Detailed { include, exclude } => {
                if exclude.iter().any(|p| glob_match(p, &key)) {
                    return false;
                }
                include.is_empty() || include.iter().any(|p| glob_match(p, &key))
            }
        }
    }
}

/// One mapping rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMapConfig {
    /// Upper-case method names or `"*"`.
    #[serde(default = "any_method")]
    pub methods: Vec<String>,

    /// Regex matched against the path template.
    #[serde(default = "any_path")]
    pub pattern: String,

    /// Tags the route must all carry.
    #[serde(default)]
    pub tags: Vec<String>,

    pub mcp_type: ComponentKind,

    /// Tags added to the resulting component.
    #[serde(default)]
    pub mcp_tags: Vec<String>,

    #[serde(default)]
    pub annotations: ToolHints,
}

fn any_method() -> Vec<String> {
    vec!["*".to_string()]
}

fn any_path() -> String {
    ".*".to_string()
}

/// `*` matches any sequence, `?` one byte; everything else is literal.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_bytes = pattern.as_bytes();
    let text_bytes = text.as_bytes();

    let mut pattern_index = 0usize;
    let mut text_index = 0usize;

    let mut star_index: Option<usize> = None;
    let mut star_text_index: usize = 0;

    while text_index < text_bytes.len() {
        match pattern_bytes.get(pattern_index) {
            Some(b'*') => {
                star_index = Some(pattern_index);
                pattern_index += 1;
                star_text_index = text_index;
            }
            Some(b'?') => {
                pattern_index += 1;
                text_index += 1;
            }
            Some(&b) if b == text_bytes[text_index] => {
                pattern_index += 1;
                text_index += 1;
            }
            _ => {
                let Some(si) = star_index else {
                    return false;
                };

                pattern_index = si + 1;
                star_text_index += 1;
                text_index = star_text_index;
            }
        }
    }

    while matches!(pattern_bytes.get(pattern_index), Some(b'*')) {
        pattern_index += 1;
    }

    pattern_index == pattern_bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg = ApiServerConfig::from_yaml_str(
            r#"
spec: ./petstore.yaml
specHash: "sha256:00"
specHashPolicy: fail
baseUrl: https://api.example.com
autoDiscover:
  include: ["GET *"]
  exclude: ["GET /internal/*"]
customNames:
  listPets: pets
  "GET /health": health_check
routeMaps:
  - methods: ["GET"]
    pattern: "^/reports/"
    mcpType: resource
    mcpTags: [reports]
  - pattern: "^/admin"
    mcpType: exclude
  - methods: ["POST"]
    mcpType: tool
    annotations:
      title: Create
      idempotentHint: true
tags: [petstore]
resourceTemplatesForGet: true
headers:
  X-Api-Version: "2"
timeoutSecs: 0
maxResponseBytes: 1048576
validateOutput: false
"#,
        )
        .unwrap();

        assert_eq!(cfg.spec_hash_policy, HashPolicy::Fail);
        assert_eq!(cfg.custom_names.get("listPets").map(String::as_str), Some("pets"));
        assert_eq!(cfg.route_maps.len(), 3);
        assert_eq!(cfg.route_maps[1].methods, vec!["*".to_string()]);
        assert_eq!(cfg.route_maps[1].mcp_type, ComponentKind::Exclude);
        assert_eq!(cfg.route_maps[2].pattern, ".*");
        assert_eq!(cfg.route_maps[2].annotations.idempotent_hint, Some(true));
        assert!(cfg.resource_templates_for_get);
        assert_eq!(cfg.timeout_secs, Some(0));
        assert!(!cfg.validate_output);
    }

    #[test]
    fn defaults_are_permissive() {
        let cfg = ApiServerConfig::from_yaml_str("spec: https://x.test/openapi.json").unwrap();
        assert!(cfg.auto_discover.is_enabled());
        assert!(cfg.auto_discover.allows("get", "/anything"));
        assert!(cfg.validate_output);
        assert_eq!(cfg.spec_hash_policy, HashPolicy::Warn);
    }

    #[test]
    fn auto_discover_exclude_wins() {
        let ad = AutoDiscoverConfig::Detailed {
            include: vec!["GET *".into()],
            exclude: vec!["GET /internal/*".into()],
        };
        assert!(ad.allows("get", "/users"));
        assert!(!ad.allows("GET", "/internal/metrics"));
        assert!(!ad.allows("POST", "/users"));
        assert!(!AutoDiscoverConfig::Enabled(false).allows("GET", "/users"));
    }

    #[test]
    fn glob_treats_braces_literally() {
        assert!(glob_match("GET /users/{id}", "GET /users/{id}"));
        assert!(glob_match("GET /users/?", "GET /users/1"));
        assert!(!glob_match("DELETE *", "GET /users"));
    }

    #[test]
    fn relative_spec_path_is_resolved_against_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("api.yaml");
        std::fs::write(&cfg_path, "spec: specs/openapi.yaml\n").unwrap();
        let cfg = ApiServerConfig::from_path(&cfg_path).unwrap();
        assert!(cfg.spec.ends_with("specs/openapi.yaml"));
        assert!(Path::new(&cfg.spec).is_absolute());
    }
}
