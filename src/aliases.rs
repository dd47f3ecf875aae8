//! Server name aliases between caller-facing and provider-facing identifiers.
//!
//! Callers address servers by their ground-truth name (e.g. `weather-data`),
//! while the sandbox provider knows the same server under its own identifier
//! (e.g. `weather`). The reverse direction is derived from the forward table
//! at construction, so the two can never disagree.
//!
//! Lookups are single-step: the default table maps `weather-data -> weather`
//! and `weather -> us_weather`, and `to_provider("weather-data")` is `weather`,
//! not `us_weather`.

use std::collections::HashMap;

use crate::error::{SandboxError, SandboxResult};

/// Ground-truth name -> provider name pairs of the default deployment.
pub const DEFAULT_SERVER_ALIASES: &[(&str, &str)] = &[
    ("osm-mcp-server", "osm"),
    ("met-museum", "met_museum"),
    ("clinicaltrialsgov-mcp-server", "clinicaltrialsgov"),
    ("national-parks", "national_parks"),
    ("open-library", "open_library"),
    ("lara-translate", "lara_translate"),
    ("e2b-server", "e2b"),
    ("cli-mcp-server", "terminal"),
    ("memory", "localmemory"),
    ("weather-data", "weather"),
    ("weather", "us_weather"),
    ("google-workspace", "googleworkspaceatlas"),
    ("mcp-server-code-runner", "code-runner"),
    ("mcp-code-executor", "code-executor"),
];

/// Bidirectional alias table.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    to_provider: HashMap<String, String>,
    to_ground_truth: HashMap<String, String>,
}

impl AliasTable {
    /// Build a table from `(ground_truth, provider)` pairs.
    ///
    /// Fails if a ground-truth name or a provider name appears twice.
    pub fn new<I, G, P>(pairs: I) -> SandboxResult<Self>
    where
        I: IntoIterator<Item = (G, P)>,
        G: Into<String>,
        P: Into<String>,
    {
        let mut to_provider = HashMap::new();
        for (ground_truth, provider) in pairs {
            let ground_truth = ground_truth.into();
            let provider = provider.into();
            if to_provider.contains_key(&ground_truth) {
                return Err(SandboxError::Config(format!(
                    "duplicate alias for ground-truth server '{}'",
                    ground_truth
                )));
            }
            to_provider.insert(ground_truth, provider);
        }

        let mut to_ground_truth = HashMap::with_capacity(to_provider.len());
        for (ground_truth, provider) in &to_provider {
            if let Some(existing) = to_ground_truth.insert(provider.clone(), ground_truth.clone())
            {
                return Err(SandboxError::Config(format!(
                    "provider server '{}' is aliased by both '{}' and '{}'",
                    provider, existing, ground_truth
                )));
            }
        }

        Ok(Self {
            to_provider,
            to_ground_truth,
        })
    }

    /// Provider identifier for a caller-facing name (identity when unmapped).
    pub fn to_provider<'a>(&'a self, name: &'a str) -> &'a str {
        self.to_provider.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Caller-facing name for a provider identifier (identity when unmapped).
    pub fn to_ground_truth<'a>(&'a self, name: &'a str) -> &'a str {
        self.to_ground_truth
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.to_provider.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_provider.is_empty()
    }
}
