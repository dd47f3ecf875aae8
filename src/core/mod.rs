//! Sandbox lifecycle and tool routing infrastructure.

pub mod client;
pub mod config;
pub mod connection;
mod http_client;
pub mod manager;
pub mod metrics;

pub use client::{namespaced_tool_name, split_tool_name, SandboxToolClient, TOOL_NAME_SEPARATOR};
pub use config::{CallToolResult, ProviderConfig, ProxyConfig, SandboxConfig, Tool};
pub use connection::{StreamableHttpTransport, ToolSession, ToolTransport};
pub use manager::{
    AcquisitionReport, LocalSandboxInfo, LocalServerEntry, Sandbox, SandboxManager,
    LOCAL_SANDBOX_TARGET,
};
pub use metrics::{LatencySnapshot, MetricsSnapshot, SandboxMetrics};
