//! Ephemeral MCP sandbox provisioning and tool routing.
//!
//! ## Modules
//!
//! - [`aliases`]: Ground-truth <-> provider server name mapping
//! - [`core`]: Sandbox manager, routing client, connections and config
//!
//! A [`SandboxManager`] is built once at startup and shared (behind an `Arc`)
//! with the [`SandboxToolClient`]; `acquire_all` and `release_all` bracket
//! its lifetime.

pub mod aliases;
pub mod core;
pub mod error;

pub use aliases::{AliasTable, DEFAULT_SERVER_ALIASES};
pub use crate::core::{
    namespaced_tool_name, split_tool_name, AcquisitionReport, CallToolResult, LocalSandboxInfo,
    MetricsSnapshot, ProviderConfig, ProxyConfig, Sandbox, SandboxConfig, SandboxManager,
    SandboxMetrics, SandboxToolClient, StreamableHttpTransport, Tool, ToolSession, ToolTransport,
    LOCAL_SANDBOX_TARGET,
};
pub use error::{SandboxError, SandboxResult};
