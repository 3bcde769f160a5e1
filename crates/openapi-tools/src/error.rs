//! Error types for `apibridge-openapi-tools`.

use apibridge_http_tools::CallError;
use thiserror::Error;

/// Registration-time and startup errors.
///
/// Call-time failures are [`CallError`]s and normally end up inside an `is_error` result; they
/// only show up here for resource reads, which have no error result shape.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Configuration errors (invalid config, bad route map pattern, unsupported spec version).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup errors (spec failed to load in time, no base URL).
    #[error("Startup error: {0}")]
    Startup(String),

    /// Unknown component names and URIs.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// `OpenAPI` document structure errors.
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    /// A `$ref` could not be followed (bad pointer, non-object target, fetch failure).
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// A schema node cannot be normalized.
    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("OpenAPI error: failed to fetch spec from '{url}': {message}")]
    OpenApiSpecFetch { url: String, message: String },

    #[error("OpenAPI error: failed to read spec body from '{url}': {message}")]
    OpenApiSpecReadBody { url: String, message: String },

    #[error("OpenAPI error: failed to read spec file '{path}': {source}")]
    OpenApiSpecReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OpenAPI error: failed to parse OpenAPI spec from '{location}': {source}")]
    OpenApiSpecParse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A resource read failed at call time.
    #[error(transparent)]
    Call(#[from] CallError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML errors.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
