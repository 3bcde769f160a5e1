//! Call-time HTTP pipeline for OpenAPI-derived MCP components.
//!
//! Arguments of a tool call are split by [`request::ParamMapping`], serialized with the
//! [`codec`], sent by the [`runtime::HttpExecutor`] and turned back into a `CallToolResult` by
//! [`response::process`]. Nothing here knows about `OpenAPI` documents; registration code hands
//! over a [`request::RequestTemplate`] and a [`response::OutputContract`] per component.

pub mod codec;
pub mod content;
pub mod error;
pub mod request;
pub mod response;
pub mod runtime;
pub mod semantics;

pub use error::{CallError, Result};
