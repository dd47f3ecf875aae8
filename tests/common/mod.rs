//! Shared fixtures: a wiremock provisioning API and an in-memory tool transport.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rmcp::model::{CallToolRequestParam, CallToolResult, Content, JsonObject, Tool};
use sandbox_router::{
    SandboxConfig, SandboxError, SandboxManager, SandboxResult, ToolSession, ToolTransport,
};
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const TOOLS_HOST: &str = "http://tools.test";

pub fn tool_url(server: &str) -> String {
    format!("{}/{}/mcp", TOOLS_HOST, server)
}

pub fn tool(name: &str) -> Tool {
    Tool::new(
        name.to_string(),
        format!("{} tool", name),
        Arc::new(JsonObject::new()),
    )
}

pub fn test_config(api_url: &str, local: &[&str], servers: &[&str]) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    config.provider.api_url = api_url.to_string();
    config.provider.api_key = Some("test-key".to_string());
    config.local_servers = local.iter().map(|s| s.to_string()).collect();
    config.servers = servers.iter().map(|s| s.to_string()).collect();
    config
}

/// Mount a successful local sandbox hosting `servers`.
pub async fn mount_local_sandbox(server: &MockServer, id: &str, servers: &[&str]) {
    let entries: Vec<_> = servers
        .iter()
        .map(|name| json!({ "server_name": name, "mcp_server_url": tool_url(name) }))
        .collect();
    Mock::given(method("POST"))
        .and(path("/local-sandbox"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "local_sandbox_id": id, "servers": entries })),
        )
        .mount(server)
        .await;
}

/// Mount a successful regular sandbox for `name` exposing one server of the same name.
pub async fn mount_sandbox(server: &MockServer, name: &str, sandbox_id: &str) {
    let mut server_urls = serde_json::Map::new();
    server_urls.insert(name.to_string(), json!(tool_url(name)));
    Mock::given(method("POST"))
        .and(path(format!("/sandbox/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sandbox_id": sandbox_id,
            "server_urls": server_urls
        })))
        .mount(server)
        .await;
}

pub async fn mount_failure(server: &MockServer, http_method: &str, route: &str, status: u16) {
    Mock::given(method(http_method))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string("provider unavailable"))
        .mount(server)
        .await;
}

pub async fn acquired_manager(
    server: &MockServer,
    local: &[&str],
    servers: &[&str],
) -> Arc<SandboxManager> {
    let manager =
        SandboxManager::new(test_config(&server.uri(), local, servers)).expect("valid config");
    manager.acquire_all().await;
    Arc::new(manager)
}

/// Recorded tool invocation: (url, tool, arguments)
pub type RecordedCall = (String, String, Option<JsonObject>);

#[derive(Default)]
pub struct MockState {
    pub tools: HashMap<String, Vec<Tool>>,
    pub unreachable: HashSet<String>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub calls: Mutex<Vec<RecordedCall>>,
}

/// In-memory transport keyed by server URL.
///
/// Tools named `fail` report a protocol-level error; tools named `hang`
/// never answer.
#[derive(Clone, Default)]
pub struct MockTransport {
    pub state: Arc<MockState>,
}

impl MockTransport {
    pub fn new(tools: &[(&str, &[&str])], unreachable: &[&str]) -> Self {
        let state = MockState {
            tools: tools
                .iter()
                .map(|(server, names)| {
                    (tool_url(server), names.iter().map(|name| tool(name)).collect())
                })
                .collect(),
            unreachable: unreachable.iter().map(|server| tool_url(server)).collect(),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().clone()
    }
}

struct MockSession {
    url: String,
    state: Arc<MockState>,
}

#[async_trait]
impl ToolTransport for MockTransport {
    async fn connect(&self, server_name: &str, url: &str) -> SandboxResult<Box<dyn ToolSession>> {
        if self.state.unreachable.contains(url) {
            return Err(SandboxError::ConnectionFailed {
                server: server_name.to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            url: url.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

#[async_trait]
impl ToolSession for MockSession {
    async fn list_tools(&self) -> SandboxResult<Vec<Tool>> {
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.tools.get(&self.url).cloned().unwrap_or_default())
    }

    async fn call_tool(&self, request: CallToolRequestParam) -> SandboxResult<CallToolResult> {
        self.state.calls.lock().push((
            self.url.clone(),
            request.name.to_string(),
            request.arguments.clone(),
        ));
        if request.name == "hang" {
            futures::future::pending::<()>().await;
        }
        if request.name == "fail" {
            return Err(SandboxError::ToolExecution {
                server: self.url.clone(),
                tool: request.name.to_string(),
                message: "tool crashed".to_string(),
            });
        }
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{} ran {}",
            self.url, request.name
        ))]))
    }

    async fn close(self: Box<Self>) -> SandboxResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
