//! Sandbox lifecycle management.
//!
//! Owns every sandbox acquired from the provider: one shared "local" sandbox
//! hosting several servers, plus one regular sandbox per roster entry.
//! Acquisition and release fan out concurrently and isolate each branch's
//! failure, so one unavailable server never blocks the rest.
//!
//! Address resolution follows a fixed precedence: a server hosted in the local
//! sandbox always wins over the same identifier in a regular sandbox.

use std::{
    collections::{BTreeSet, HashMap},
    future::Future,
    sync::Arc,
};

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use super::{config::SandboxConfig, http_client::build_provider_client, metrics::SandboxMetrics};
use crate::{
    aliases::AliasTable,
    error::{SandboxError, SandboxResult},
};

/// Target name used in errors and logs for the shared local sandbox.
pub const LOCAL_SANDBOX_TARGET: &str = "local-sandbox";

/// Sandbox descriptor returned by `POST /sandbox/{server_name}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sandbox {
    pub sandbox_id: String,
    #[serde(default)]
    pub server_urls: HashMap<String, String>,
    /// Any other fields the provider reports
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of `POST /local-sandbox`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalSandboxInfo {
    pub local_sandbox_id: String,
    #[serde(default)]
    pub servers: Vec<LocalServerEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalServerEntry {
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub mcp_server_url: Option<String>,
}

#[derive(Debug)]
struct LocalSandbox {
    id: String,
    server_urls: HashMap<String, String>,
}

/// Outcome of [`SandboxManager::acquire_all`].
#[derive(Debug, Clone, Default)]
pub struct AcquisitionReport {
    pub local_acquired: bool,
    pub acquired: Vec<String>,
    /// (target, reason) for every branch that failed
    pub failed: Vec<(String, String)>,
}

impl AcquisitionReport {
    pub fn is_complete(&self) -> bool {
        self.local_acquired && self.failed.is_empty()
    }
}

pub struct SandboxManager {
    config: SandboxConfig,
    aliases: Arc<AliasTable>,
    sandboxes: DashMap<String, Sandbox>,
    local: RwLock<Option<LocalSandbox>>,
    http_client: Mutex<Option<reqwest::Client>>,
    metrics: Arc<SandboxMetrics>,
}

impl SandboxManager {
    pub fn new(config: SandboxConfig) -> SandboxResult<Self> {
        config.validate()?;
        let aliases = Arc::new(config.alias_table()?);
        if aliases.is_empty() {
            debug!("No server aliases configured");
        } else {
            debug!("Loaded {} server aliases", aliases.len());
        }
        Ok(Self {
            config,
            aliases,
            sandboxes: DashMap::new(),
            local: RwLock::new(None),
            http_client: Mutex::new(None),
            metrics: Arc::new(SandboxMetrics::new()),
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn aliases(&self) -> &Arc<AliasTable> {
        &self.aliases
    }

    pub fn metrics(&self) -> &Arc<SandboxMetrics> {
        &self.metrics
    }

    /// Shared provisioning client, created on first use.
    fn http_client(&self) -> SandboxResult<reqwest::Client> {
        let mut slot = self.http_client.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = build_provider_client(&self.config.provider, self.config.proxy.as_ref())?;
        *slot = Some(client.clone());
        Ok(client)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.provider.base_url(), path)
    }

    // ========================================================================
    // Regular sandboxes
    // ========================================================================

    /// Acquire a sandbox for a single server and track it under `server_name`.
    pub async fn acquire_sandbox(&self, server_name: &str) -> SandboxResult<Sandbox> {
        let result = self.request_sandbox(server_name).await;
        self.metrics.record_acquisition(result.is_ok());
        let sandbox = result?;

        if let Some(previous) = self
            .sandboxes
            .insert(server_name.to_string(), sandbox.clone())
        {
            warn!(
                "Sandbox {} for {} replaced without release",
                previous.sandbox_id, server_name
            );
        }
        info!(
            "Acquired sandbox {} for {} ({} servers)",
            sandbox.sandbox_id,
            server_name,
            sandbox.server_urls.len()
        );
        Ok(sandbox)
    }

    async fn request_sandbox(&self, server_name: &str) -> SandboxResult<Sandbox> {
        let url = self.endpoint(&format!("sandbox/{}", server_name));
        info!("Acquiring sandbox for {}...", server_name);

        let mut request = self.http_client()?.post(&url);
        if let Some(benchmark) = &self.config.provider.benchmark {
            request = request.json(&json!({ "benchmark": benchmark }));
        }
        let response = ensure_success(request.send().await?, server_name).await?;
        Ok(response.json::<Sandbox>().await?)
    }

    /// Release the sandbox tracked for `server_name`, if any.
    ///
    /// Never fails: provider errors are logged and the tracking entry is
    /// removed regardless of the outcome.
    pub async fn release_sandbox(&self, server_name: &str) {
        let Some(sandbox_id) = self
            .sandboxes
            .get(server_name)
            .map(|entry| entry.sandbox_id.clone())
        else {
            return;
        };
        scopeguard::defer! {
            self.sandboxes.remove(server_name);
        }

        let url = self.endpoint(&format!("sandbox/{}/{}", server_name, sandbox_id));
        info!("Releasing sandbox {} for {}...", sandbox_id, server_name);
        match self.request_release(&url, server_name).await {
            Ok(()) => {
                self.metrics.record_release(true);
                info!("Released sandbox {} for {}", sandbox_id, server_name);
            }
            Err(e) => {
                self.metrics.record_release(false);
                error!("Failed to release sandbox {}: {}", sandbox_id, e);
            }
        }
    }

    async fn request_release(&self, url: &str, target: &str) -> SandboxResult<()> {
        let response = self.http_client()?.delete(url).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SandboxError::Release {
            target: target.to_string(),
            reason: format!("HTTP {}: {}", status.as_u16(), body),
        })
    }

    // ========================================================================
    // Local sandbox
    // ========================================================================

    /// Acquire the shared local sandbox hosting `local_servers`.
    pub async fn acquire_local_sandbox(&self) -> SandboxResult<LocalSandboxInfo> {
        let result = self.request_local_sandbox().await;
        self.metrics.record_acquisition(result.is_ok());
        let info = result?;

        let server_urls: HashMap<String, String> = info
            .servers
            .iter()
            .filter_map(|server| match (&server.server_name, &server.mcp_server_url) {
                (Some(name), Some(url)) if !name.is_empty() && !url.is_empty() => {
                    Some((name.clone(), url.clone()))
                }
                _ => None,
            })
            .collect();

        let mut names: Vec<&String> = server_urls.keys().collect();
        names.sort();
        info!(
            "Acquired local sandbox {} with {} servers: {:?}",
            info.local_sandbox_id,
            server_urls.len(),
            names
        );

        if let Some(previous) = self.track_local(LocalSandbox {
            id: info.local_sandbox_id.clone(),
            server_urls,
        }) {
            warn!(
                "Local sandbox {} replaced by {} without release",
                previous, info.local_sandbox_id
            );
        }
        Ok(info)
    }

    /// Track `local` as the held local sandbox, returning the ID it replaced.
    fn track_local(&self, local: LocalSandbox) -> Option<String> {
        self.local
            .write()
            .replace(local)
            .map(|previous| previous.id)
    }

    async fn request_local_sandbox(&self) -> SandboxResult<LocalSandboxInfo> {
        let url = self.endpoint("local-sandbox");
        let server_names = &self.config.local_servers;
        info!("Acquiring local sandbox with servers: {:?}...", server_names);

        let mut body = json!({ "server_names": server_names });
        if let Some(benchmark) = &self.config.provider.benchmark {
            body["benchmark"] = json!(benchmark);
        }

        let response = self.http_client()?.post(&url).json(&body).send().await?;
        let response = ensure_success(response, LOCAL_SANDBOX_TARGET).await?;
        Ok(response.json::<LocalSandboxInfo>().await?)
    }

    /// Release the local sandbox, if one is held. Never fails.
    pub async fn release_local_sandbox(&self) {
        let Some(local_id) = self.local_sandbox_id() else {
            return;
        };
        scopeguard::defer! {
            *self.local.write() = None;
        }

        let url = self.endpoint(&format!("local-sandbox/{}", local_id));
        info!("Releasing local sandbox {}...", local_id);
        match self.request_release(&url, LOCAL_SANDBOX_TARGET).await {
            Ok(()) => {
                self.metrics.record_release(true);
                info!("Released local sandbox {}", local_id);
            }
            Err(e) => {
                self.metrics.record_release(false);
                error!("Failed to release local sandbox {}: {}", local_id, e);
            }
        }
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    /// Acquire the local sandbox and every roster server concurrently.
    ///
    /// Failures are logged per branch and reported; they never abort the
    /// other acquisitions.
    pub async fn acquire_all(&self) -> AcquisitionReport {
        let servers = &self.config.servers;
        info!(
            "Acquiring local sandbox + {} regular sandbox servers in parallel",
            servers.len()
        );

        let (local_result, results) = futures::join!(
            self.acquire_local_sandbox(),
            join_all(servers.iter().map(|server| self.acquire_sandbox(server)))
        );

        let mut report = AcquisitionReport::default();
        match local_result {
            Ok(_) => report.local_acquired = true,
            Err(e) => {
                error!("Failed to acquire local sandbox: {}", e);
                report
                    .failed
                    .push((LOCAL_SANDBOX_TARGET.to_string(), e.to_string()));
            }
        }

        for (server, result) in servers.iter().zip(results) {
            match result {
                Ok(_) => report.acquired.push(server.clone()),
                Err(e) => {
                    error!("Failed to acquire sandbox for {}: {}", server, e);
                    report.failed.push((server.clone(), e.to_string()));
                }
            }
        }

        info!(
            "Acquired {}/{} regular sandboxes (local sandbox: {})",
            report.acquired.len(),
            servers.len(),
            if report.local_acquired { "ok" } else { "failed" }
        );
        report
    }

    /// Release everything and close the provisioning client.
    pub async fn release_all(&self) {
        self.release_local_sandbox().await;

        let servers = self.acquired_servers();
        if !servers.is_empty() {
            info!(
                "Releasing {} sandbox servers in parallel: {:?}",
                servers.len(),
                servers
            );
            join_all(servers.iter().map(|server| self.release_sandbox(server))).await;
        }

        if self.http_client.lock().take().is_some() {
            debug!("Closed provisioning HTTP client");
        }
    }

    /// Acquire everything, run `work`, then release everything.
    ///
    /// If `interrupt` completes first, `work` (or the acquisition still in
    /// flight) is dropped and `None` is returned. Release runs either way.
    pub async fn run_scoped<T, W, I>(&self, work: W, interrupt: I) -> Option<T>
    where
        W: Future<Output = T>,
        I: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            outcome = async {
                self.acquire_all().await;
                work.await
            } => Some(outcome),
            () = interrupt => {
                info!("Interrupted, releasing sandboxes...");
                None
            }
        };
        self.release_all().await;
        outcome
    }

    // ========================================================================
    // Address resolution
    // ========================================================================

    /// Address of a provider-facing server identifier.
    ///
    /// The local sandbox takes precedence over regular sandboxes. A miss is an
    /// expected outcome and only logged.
    pub fn get_server_url(&self, server_name: &str) -> Option<String> {
        if let Some(url) = self
            .local
            .read()
            .as_ref()
            .and_then(|local| local.server_urls.get(server_name).cloned())
        {
            return Some(url);
        }

        let found = self
            .sandboxes
            .iter()
            .find_map(|entry| entry.value().server_urls.get(server_name).cloned());
        if found.is_none() {
            warn!("Server {} not found in any acquired sandbox", server_name);
        }
        found
    }

    /// All known server addresses, local sandbox first.
    pub fn get_all_server_urls(&self) -> HashMap<String, String> {
        let mut urls = self
            .local
            .read()
            .as_ref()
            .map(|local| local.server_urls.clone())
            .unwrap_or_default();
        for entry in self.sandboxes.iter() {
            urls.extend(
                entry
                    .value()
                    .server_urls
                    .iter()
                    .map(|(name, url)| (name.clone(), url.clone())),
            );
        }
        urls
    }

    /// Every known server, normalized to ground-truth names and sorted.
    pub fn get_all_server_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        if let Some(local) = self.local.read().as_ref() {
            names.extend(
                local
                    .server_urls
                    .keys()
                    .map(|name| self.aliases.to_ground_truth(name).to_string()),
            );
        }
        for entry in self.sandboxes.iter() {
            names.extend(
                entry
                    .value()
                    .server_urls
                    .keys()
                    .map(|name| self.aliases.to_ground_truth(name).to_string()),
            );
        }
        names.into_iter().collect()
    }

    pub fn local_sandbox_id(&self) -> Option<String> {
        self.local.read().as_ref().map(|local| local.id.clone())
    }

    /// Roster slots currently holding a regular sandbox, sorted.
    pub fn acquired_servers(&self) -> Vec<String> {
        let mut servers: Vec<String> = self
            .sandboxes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        servers.sort();
        servers
    }

    pub fn sandbox(&self, server_name: &str) -> Option<Sandbox> {
        self.sandboxes
            .get(server_name)
            .map(|entry| entry.value().clone())
    }
}

async fn ensure_success(
    response: reqwest::Response,
    target: &str,
) -> SandboxResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SandboxError::Provisioning {
        server: target.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> SandboxManager {
        SandboxManager::new(SandboxConfig::default()).unwrap()
    }

    fn sandbox(id: &str, urls: &[(&str, &str)]) -> Sandbox {
        Sandbox {
            sandbox_id: id.to_string(),
            server_urls: urls
                .iter()
                .map(|(name, url)| (name.to_string(), url.to_string()))
                .collect(),
            extra: Map::new(),
        }
    }

    fn set_local(manager: &SandboxManager, id: &str, urls: &[(&str, &str)]) {
        *manager.local.write() = Some(LocalSandbox {
            id: id.to_string(),
            server_urls: urls
                .iter()
                .map(|(name, url)| (name.to_string(), url.to_string()))
                .collect(),
        });
    }

    #[test]
    fn test_local_sandbox_takes_precedence() {
        let manager = test_manager();
        set_local(&manager, "local-1", &[("git", "http://local/git")]);
        manager.sandboxes.insert(
            "git".to_string(),
            sandbox("sb-1", &[("git", "http://regular/git")]),
        );

        assert_eq!(
            manager.get_server_url("git").as_deref(),
            Some("http://local/git")
        );
    }

    #[test]
    fn test_regular_sandbox_lookup_and_miss() {
        let manager = test_manager();
        manager.sandboxes.insert(
            "wikipedia".to_string(),
            sandbox("sb-1", &[("wikipedia", "http://regular/wiki")]),
        );

        assert_eq!(
            manager.get_server_url("wikipedia").as_deref(),
            Some("http://regular/wiki")
        );
        assert!(manager.get_server_url("notion").is_none());
    }

    #[test]
    fn test_all_server_urls_union() {
        let manager = test_manager();
        set_local(
            &manager,
            "local-1",
            &[("git", "http://local/git"), ("terminal", "http://local/term")],
        );
        manager.sandboxes.insert(
            "googleworkspaceatlas".to_string(),
            sandbox(
                "sb-2",
                &[
                    ("gmail", "http://regular/gmail"),
                    ("google_calendar", "http://regular/cal"),
                ],
            ),
        );

        let urls = manager.get_all_server_urls();
        assert_eq!(urls.len(), 4);
        assert_eq!(urls["terminal"], "http://local/term");
        assert_eq!(urls["gmail"], "http://regular/gmail");
    }

    #[test]
    fn test_all_server_names_normalized_and_sorted() {
        let manager = test_manager();
        set_local(
            &manager,
            "local-1",
            &[("terminal", "http://local/term"), ("git", "http://local/git")],
        );
        manager.sandboxes.insert(
            "weather".to_string(),
            sandbox("sb-1", &[("weather", "http://regular/weather")]),
        );
        manager.sandboxes.insert(
            "us_weather".to_string(),
            sandbox("sb-2", &[("us_weather", "http://regular/us")]),
        );

        assert_eq!(
            manager.get_all_server_names(),
            vec!["cli-mcp-server", "git", "weather", "weather-data"]
        );
    }

    #[test]
    fn test_track_local_reports_replaced_sandbox() {
        let manager = test_manager();
        let local = |id: &str| LocalSandbox {
            id: id.to_string(),
            server_urls: HashMap::new(),
        };

        assert_eq!(manager.track_local(local("local-1")), None);
        assert_eq!(
            manager.track_local(local("local-2")).as_deref(),
            Some("local-1")
        );
        assert_eq!(manager.local_sandbox_id().as_deref(), Some("local-2"));
    }

    #[tokio::test]
    async fn test_release_without_sandbox_is_noop() {
        let manager = test_manager();
        manager.release_sandbox("wikipedia").await;
        manager.release_local_sandbox().await;

        // Nothing was sent, so the lazy client was never built
        assert!(manager.http_client.lock().is_none());
        assert_eq!(manager.metrics.snapshot().releases_failed, 0);
    }

    #[test]
    fn test_http_client_is_reused() {
        let manager = test_manager();
        manager.http_client().unwrap();
        assert!(manager.http_client.lock().is_some());
        manager.http_client().unwrap();
        assert!(manager.http_client.lock().is_some());
    }

    #[test]
    fn test_sandbox_descriptor_keeps_extra_fields() {
        let sandbox: Sandbox = serde_json::from_value(json!({
            "sandbox_id": "sb-9",
            "server_urls": {"github": "http://x/github"},
            "status": "ready"
        }))
        .unwrap();
        assert_eq!(sandbox.sandbox_id, "sb-9");
        assert_eq!(sandbox.server_urls["github"], "http://x/github");
        assert_eq!(sandbox.extra["status"], "ready");
    }

    #[test]
    fn test_acquisition_report_completeness() {
        let mut report = AcquisitionReport {
            local_acquired: true,
            ..Default::default()
        };
        assert!(report.is_complete());
        report
            .failed
            .push(("github".to_string(), "HTTP 500".to_string()));
        assert!(!report.is_complete());
    }
}
