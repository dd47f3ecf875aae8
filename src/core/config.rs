//! Sandbox router configuration types and utilities.
//!
//! Defines configuration structures for the provisioning provider, server
//! rosters, aliases and the outbound proxy.

use std::{collections::BTreeMap, fmt, time::Duration};

pub use rmcp::model::{CallToolResult, Tool};
use serde::{Deserialize, Serialize};

use crate::{
    aliases::{AliasTable, DEFAULT_SERVER_ALIASES},
    error::{SandboxError, SandboxResult},
};

/// Environment variable holding the provider bearer credential.
pub const API_KEY_ENV: &str = "KLAVIS_API_KEY";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxConfig {
    /// Provisioning API settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Servers hosted together in the shared local sandbox
    #[serde(default = "default_local_servers")]
    pub local_servers: Vec<String>,

    /// Servers acquired as one independent sandbox each
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// Ground-truth name -> provider name
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,

    /// Proxy for provisioning calls (falls back to environment)
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Base URL of the provisioning API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Bearer credential; read from `KLAVIS_API_KEY` when absent
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Benchmark tag sent with every acquisition
    #[serde(default = "default_benchmark")]
    pub benchmark: Option<String>,

    /// Upper bound for each provisioning request (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("benchmark", &self.benchmark)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Proxy configuration for provisioning traffic (does NOT affect tool servers)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// HTTP proxy URL (e.g., "http://proxy.internal:8080")
    pub http: Option<String>,

    /// HTTPS proxy URL
    pub https: Option<String>,

    /// Comma-separated hosts to exclude from proxying
    pub no_proxy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_api_url() -> String {
    "https://api.klavis.ai".to_string()
}

fn default_benchmark() -> Option<String> {
    Some("MCP_Atlas".to_string())
}

fn default_request_timeout() -> u64 {
    30
}

fn default_local_servers() -> Vec<String> {
    [
        "filesystem",
        "git",
        "terminal",
        "desktop-commander",
        "arxiv",
        "code-executor",
        "code-runner",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_servers() -> Vec<String> {
    [
        // No credentials required
        "calculator",
        "clinicaltrialsgov",
        "us_weather",
        "context7",
        "met_museum",
        "localmemory",
        "open_library",
        "pubmed",
        "wikipedia",
        // Need provider-side API keys
        "weather",
        "twelvedata",
        "national_parks",
        "lara_translate",
        "e2b",
        "alchemy",
        "github",
        "mongodb",
        // gmail and google calendar live in this one
        "googleworkspaceatlas",
        "airtable",
        "notion",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_aliases() -> BTreeMap<String, String> {
    DEFAULT_SERVER_ALIASES
        .iter()
        .map(|(g, p)| (g.to_string(), p.to_string()))
        .collect()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            benchmark: default_benchmark(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            local_servers: default_local_servers(),
            servers: default_servers(),
            aliases: default_aliases(),
            proxy: None,
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Configured credential, or the one from the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.is_empty())
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }
}

impl ProxyConfig {
    /// Load proxy config from standard environment variables
    pub fn from_env() -> Option<Self> {
        let http = std::env::var("SANDBOX_HTTP_PROXY")
            .ok()
            .or_else(|| std::env::var("HTTP_PROXY").ok());

        let https = std::env::var("SANDBOX_HTTPS_PROXY")
            .ok()
            .or_else(|| std::env::var("HTTPS_PROXY").ok());

        let no_proxy = std::env::var("SANDBOX_NO_PROXY")
            .ok()
            .or_else(|| std::env::var("NO_PROXY").ok());

        if http.is_some() || https.is_some() {
            Some(Self {
                http,
                https,
                no_proxy,
                username: None,
                password: None,
            })
        } else {
            None
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a YAML file
    pub async fn from_file(path: &str) -> SandboxResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> SandboxResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| SandboxError::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment-based proxy config
    pub fn with_env_proxy(mut self) -> Self {
        if self.proxy.is_none() {
            self.proxy = ProxyConfig::from_env();
        }
        self
    }

    pub fn validate(&self) -> SandboxResult<()> {
        let url = url::Url::parse(&self.provider.api_url)
            .map_err(|e| SandboxError::Config(format!("invalid api_url: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SandboxError::Config(format!(
                "api_url must be http(s), got '{}'",
                url.scheme()
            )));
        }
        if self.provider.request_timeout_secs == 0 {
            return Err(SandboxError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        self.alias_table().map(|_| ())
    }

    /// Build the alias table, rejecting non-injective mappings.
    pub fn alias_table(&self) -> SandboxResult<AliasTable> {
        AliasTable::new(
            self.aliases
                .iter()
                .map(|(g, p)| (g.as_str(), p.as_str())),
        )
    }
}
