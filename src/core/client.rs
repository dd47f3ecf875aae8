//! Tool routing across acquired sandboxes.
//!
//! Tools are exposed under `{server}_{tool}`, where `server` is the
//! ground-truth server name. The prefix keeps identically named tools on
//! different servers apart and is all that is needed to route a call back.

use std::{borrow::Cow, collections::BTreeMap, sync::Arc, time::Instant};

use futures::{future::join_all, FutureExt};
use rmcp::model::{CallToolRequestParam, CallToolResult, JsonObject, Tool};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use super::{
    connection::{with_session, StreamableHttpTransport, ToolTransport},
    manager::SandboxManager,
};
use crate::error::{SandboxError, SandboxResult};

pub const TOOL_NAME_SEPARATOR: char = '_';

/// `{server}_{tool}`
pub fn namespaced_tool_name(server_name: &str, tool_name: &str) -> String {
    format!("{}{}{}", server_name, TOOL_NAME_SEPARATOR, tool_name)
}

/// Split a namespaced name on the first separator into `(server, tool)`.
pub fn split_tool_name(name: &str) -> SandboxResult<(&str, &str)> {
    match name.split_once(TOOL_NAME_SEPARATOR) {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Ok((server, tool)),
        _ => Err(SandboxError::InvalidToolName(name.to_string())),
    }
}

/// Single logical MCP client over every acquired sandbox server.
///
/// Each operation opens its own connection. The merged tool catalog is
/// fetched once and kept for the lifetime of the client.
pub struct SandboxToolClient {
    manager: Arc<SandboxManager>,
    transport: Arc<dyn ToolTransport>,
    cached_tools: OnceCell<Arc<Vec<Tool>>>,
}

impl SandboxToolClient {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self::with_transport(manager, Arc::new(StreamableHttpTransport))
    }

    pub fn with_transport(manager: Arc<SandboxManager>, transport: Arc<dyn ToolTransport>) -> Self {
        Self {
            manager,
            transport,
            cached_tools: OnceCell::new(),
        }
    }

    pub fn manager(&self) -> &Arc<SandboxManager> {
        &self.manager
    }

    pub fn is_catalog_cached(&self) -> bool {
        self.cached_tools.initialized()
    }

    /// List tools from every server, namespaced and ordered by server name.
    pub async fn list_tools(&self) -> Arc<Vec<Tool>> {
        if let Some(tools) = self.cached_tools.get() {
            debug!("Returning cached tools list");
            return Arc::clone(tools);
        }
        Arc::clone(
            self.cached_tools
                .get_or_init(|| self.fetch_all_tools())
                .await,
        )
    }

    async fn fetch_all_tools(&self) -> Arc<Vec<Tool>> {
        let aliases = self.manager.aliases();
        let servers: BTreeMap<String, String> = self
            .manager
            .get_all_server_urls()
            .into_iter()
            .map(|(name, url)| (aliases.to_ground_truth(&name).to_string(), url))
            .collect();
        info!("Sorted server names: {:?}", servers.keys().collect::<Vec<_>>());

        let results = join_all(
            servers
                .iter()
                .map(|(name, url)| self.list_server_tools(name, url)),
        )
        .await;

        let mut all_tools = Vec::new();
        for (server_name, result) in servers.keys().zip(results) {
            match result {
                Ok(tools) => all_tools.extend(tools),
                Err(e) => error!("Failed to list tools from {}: {}", server_name, e),
            }
        }

        info!(
            "Cached {} tools from {} servers",
            all_tools.len(),
            servers.len()
        );
        Arc::new(all_tools)
    }

    async fn list_server_tools(&self, server_name: &str, url: &str) -> SandboxResult<Vec<Tool>> {
        let tools = with_session(
            self.transport.as_ref(),
            server_name,
            url,
            self.manager.metrics(),
            |session| async move { session.list_tools().await }.boxed(),
        )
        .await?;

        Ok(tools
            .into_iter()
            .map(|mut tool| {
                tool.name = Cow::Owned(namespaced_tool_name(server_name, &tool.name));
                tool
            })
            .collect())
    }

    /// Call a namespaced tool on the server it belongs to.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Option<JsonObject>,
    ) -> SandboxResult<CallToolResult> {
        let (server_name, actual_tool) = split_tool_name(tool_name)?;
        let server_name = self.manager.aliases().to_provider(server_name);

        let Some(url) = self.manager.get_server_url(server_name) else {
            let mut available: Vec<String> =
                self.manager.get_all_server_urls().into_keys().collect();
            available.sort();
            error!(
                "No server URL for '{}'. Available: {:?}",
                server_name, available
            );
            return Err(SandboxError::Routing {
                server: server_name.to_string(),
                available,
            });
        };

        let metrics = self.manager.metrics();
        metrics.record_call_start();
        let start = Instant::now();

        let request = CallToolRequestParam {
            name: Cow::Owned(actual_tool.to_string()),
            arguments,
        };
        let result = with_session(
            self.transport.as_ref(),
            server_name,
            &url,
            metrics,
            move |session| async move { session.call_tool(request).await }.boxed(),
        )
        .await;

        if let Err(e) = &result {
            error!(
                "Tool execution failed - server: '{}', tool: '{}', error: {}",
                server_name, actual_tool, e
            );
        }
        metrics.record_call_end(
            tool_name,
            result.is_ok(),
            start.elapsed().as_millis() as u64,
        );
        result
    }
}
