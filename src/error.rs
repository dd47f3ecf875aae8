//! Sandbox router error types.
//!
//! Defines error variants for sandbox provisioning, tool routing, connection
//! handling and configuration.

use thiserror::Error;

pub type SandboxResult<T> = Result<T, SandboxError>;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The provider answered an acquisition request with a non-success status.
    #[error("Provisioning failed for '{server}': HTTP {status}: {body}")]
    Provisioning {
        server: String,
        status: u16,
        body: String,
    },

    /// Releasing a sandbox failed. Only ever logged by the manager.
    #[error("Release failed for '{target}': {reason}")]
    Release { target: String, reason: String },

    #[error("No server URL for '{server}'. Available: {available:?}")]
    Routing {
        server: String,
        available: Vec<String>,
    },

    #[error("Invalid tool name format: {0}")]
    InvalidToolName(String),

    #[error("Tool execution failed on '{server}' ({tool}): {message}")]
    ToolExecution {
        server: String,
        tool: String,
        message: String,
    },

    #[error("Transport error on '{server}': {message}")]
    Transport { server: String, message: String },

    #[error("Connection to '{server}' failed: {message}")]
    ConnectionFailed { server: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Whether this failure came from talking to the provisioning API.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            SandboxError::Provisioning { .. } | SandboxError::Release { .. } | SandboxError::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_error_lists_available_servers() {
        let err = SandboxError::Routing {
            server: "weather".to_string(),
            available: vec!["git".to_string(), "wikipedia".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'weather'"));
        assert!(msg.contains("wikipedia"));
    }

    #[test]
    fn test_provider_error_classification() {
        let provisioning = SandboxError::Provisioning {
            server: "github".to_string(),
            status: 503,
            body: "unavailable".to_string(),
        };
        assert!(provisioning.is_provider_error());
        assert!(provisioning.to_string().contains("HTTP 503"));

        let invalid = SandboxError::InvalidToolName("search".to_string());
        assert!(!invalid.is_provider_error());
    }
}
