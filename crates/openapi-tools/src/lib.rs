//! OpenAPI->MCP conversion.
//!
//! Loads an `OpenAPI` 3.0/3.1 document, resolves its references, normalizes every operation into
//! a [`ir::Route`], and exposes the routes as MCP tools, resources and resource templates backed
//! by [`apibridge_http_tools`] for the outbound calls.
//!
//! The usual entry point is [`OpenApiSource`].

pub mod components;
pub mod config;
pub mod converter;
pub mod error;
pub mod extract;
pub mod ir;
pub mod mapper;
pub mod naming;
pub mod resolver;
pub mod runtime;
pub mod schema;
pub mod synth;

pub use config::ApiServerConfig;
pub use error::{OpenApiToolsError, Result};
pub use runtime::{CallContext, OpenApiSource, ResourceRead};
