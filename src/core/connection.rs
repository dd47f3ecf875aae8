//! Tool server connections.
//!
//! Every operation against a tool server runs on its own connection:
//! connect, initialize, one request, disconnect. Nothing is pooled, so a
//! wedged server can only ever stall the call that is talking to it.
//!
//! [`ScopedSession`] owns an open connection and guarantees teardown: the
//! normal path closes it explicitly, and a guard dropped mid-request (the
//! caller's future was cancelled) schedules the close on the runtime.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, Tool},
    service::RunningService,
    transport::StreamableHttpClientTransport,
    RoleClient, ServiceExt,
};
use tracing::{debug, error, info, warn};

use super::metrics::SandboxMetrics;
use crate::error::{SandboxError, SandboxResult};

type McpClient = RunningService<RoleClient, ()>;

/// An initialized connection to one tool server.
#[async_trait]
pub trait ToolSession: Send + Sync {
    async fn list_tools(&self) -> SandboxResult<Vec<Tool>>;

    async fn call_tool(&self, request: CallToolRequestParam) -> SandboxResult<CallToolResult>;

    /// Tear the connection down.
    async fn close(self: Box<Self>) -> SandboxResult<()>;
}

/// Opens connections to tool servers.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Connect to `url` and complete the protocol handshake.
    async fn connect(&self, server_name: &str, url: &str) -> SandboxResult<Box<dyn ToolSession>>;
}

/// MCP over streamable HTTP, as served by sandbox tool servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamableHttpTransport;

#[async_trait]
impl ToolTransport for StreamableHttpTransport {
    async fn connect(&self, server_name: &str, url: &str) -> SandboxResult<Box<dyn ToolSession>> {
        info!("Connecting to {} at {}", server_name, url);

        let transport = StreamableHttpClientTransport::from_uri(url);
        let client = ().serve(transport).await.map_err(|e| SandboxError::ConnectionFailed {
            server: server_name.to_string(),
            message: format!("initialize streamable client: {}", e),
        })?;

        Ok(Box::new(McpSession {
            server_name: server_name.to_string(),
            client,
        }))
    }
}

struct McpSession {
    server_name: String,
    client: McpClient,
}

#[async_trait]
impl ToolSession for McpSession {
    async fn list_tools(&self) -> SandboxResult<Vec<Tool>> {
        self.client
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| SandboxError::Transport {
                server: self.server_name.clone(),
                message: format!("list tools: {}", e),
            })
    }

    async fn call_tool(&self, request: CallToolRequestParam) -> SandboxResult<CallToolResult> {
        let tool = request.name.to_string();
        self.client
            .call_tool(request)
            .await
            .map_err(|e| SandboxError::ToolExecution {
                server: self.server_name.clone(),
                tool,
                message: e.to_string(),
            })
    }

    async fn close(self: Box<Self>) -> SandboxResult<()> {
        let server = self.server_name;
        self.client
            .cancel()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::Transport {
                server,
                message: format!("disconnect: {}", e),
            })
    }
}

/// An open session that is always torn down.
pub(crate) struct ScopedSession {
    server_name: String,
    session: Option<Box<dyn ToolSession>>,
    metrics: Arc<SandboxMetrics>,
}

impl ScopedSession {
    pub(crate) async fn open(
        transport: &dyn ToolTransport,
        server_name: &str,
        url: &str,
        metrics: &Arc<SandboxMetrics>,
    ) -> SandboxResult<Self> {
        match transport.connect(server_name, url).await {
            Ok(session) => {
                metrics.record_connection_opened();
                Ok(Self {
                    server_name: server_name.to_string(),
                    session: Some(session),
                    metrics: Arc::clone(metrics),
                })
            }
            Err(e) => {
                metrics.record_connection_error();
                Err(e)
            }
        }
    }

    pub(crate) fn session(&self) -> SandboxResult<&dyn ToolSession> {
        self.session
            .as_deref()
            .ok_or_else(|| SandboxError::Transport {
                server: self.server_name.clone(),
                message: "connection already closed".to_string(),
            })
    }

    /// Close now. Teardown errors are logged, never returned.
    pub(crate) async fn close(mut self) {
        if let Some(session) = self.session.take() {
            close_session(session, &self.server_name, &self.metrics).await;
        }
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let server_name = std::mem::take(&mut self.server_name);
        let metrics = Arc::clone(&self.metrics);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Connection to {} dropped mid-request, closing", server_name);
                handle.spawn(async move {
                    close_session(session, &server_name, &metrics).await;
                });
            }
            Err(_) => {
                warn!(
                    "No tokio runtime available to close connection to {}",
                    server_name
                );
                metrics.record_connection_closed();
            }
        }
    }
}

async fn close_session(session: Box<dyn ToolSession>, server_name: &str, metrics: &SandboxMetrics) {
    if let Err(e) = session.close().await {
        error!("Error disconnecting from {}: {}", server_name, e);
    }
    metrics.record_connection_closed();
}

/// Run one operation on a fresh connection, then close it.
pub(crate) async fn with_session<T, F>(
    transport: &dyn ToolTransport,
    server_name: &str,
    url: &str,
    metrics: &Arc<SandboxMetrics>,
    op: F,
) -> SandboxResult<T>
where
    F: for<'s> FnOnce(&'s dyn ToolSession) -> BoxFuture<'s, SandboxResult<T>>,
{
    let scoped = ScopedSession::open(transport, server_name, url, metrics).await?;
    let result = match scoped.session() {
        Ok(session) => op(session).await,
        Err(e) => Err(e),
    };
    scoped.close().await;
    result
}
