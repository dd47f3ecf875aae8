//! Outbound HTTP client for the provisioning API.
//!
//! Applies the bearer credential, the request timeout and any proxy settings
//! to a single `reqwest::Client` that the manager reuses for every call.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tracing::warn;

use super::config::{ProviderConfig, ProxyConfig};
use crate::error::{SandboxError, SandboxResult};

/// Build the provisioning client.
pub(crate) fn build_provider_client(
    provider: &ProviderConfig,
    proxy: Option<&ProxyConfig>,
) -> SandboxResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(provider.request_timeout());

    if let Some(proxy_cfg) = proxy {
        builder = apply_proxy_to_builder(builder, proxy_cfg)?;
    }

    match provider.resolve_api_key() {
        Some(key) => {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| SandboxError::Config(format!("auth token: {}", e)))?;
            value.set_sensitive(true);
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        None => warn!("No provider API key configured; provisioning calls are unauthenticated"),
    }

    builder
        .build()
        .map_err(|e| SandboxError::Config(format!("build HTTP client: {}", e)))
}

/// Apply proxy configuration to a ClientBuilder
pub(crate) fn apply_proxy_to_builder(
    mut builder: reqwest::ClientBuilder,
    proxy_cfg: &ProxyConfig,
) -> SandboxResult<reqwest::ClientBuilder> {
    if let Some(ref http_proxy) = proxy_cfg.http {
        let proxy = reqwest::Proxy::http(http_proxy)
            .map_err(|e| SandboxError::Config(format!("Invalid HTTP proxy: {}", e)))?;
        builder = builder.proxy(finish_proxy(proxy, proxy_cfg));
    }

    if let Some(ref https_proxy) = proxy_cfg.https {
        let proxy = reqwest::Proxy::https(https_proxy)
            .map_err(|e| SandboxError::Config(format!("Invalid HTTPS proxy: {}", e)))?;
        builder = builder.proxy(finish_proxy(proxy, proxy_cfg));
    }

    Ok(builder)
}

fn finish_proxy(mut proxy: reqwest::Proxy, proxy_cfg: &ProxyConfig) -> reqwest::Proxy {
    if let Some(ref no_proxy) = proxy_cfg.no_proxy {
        proxy = proxy.no_proxy(reqwest::NoProxy::from_string(no_proxy));
    }
    if let (Some(username), Some(password)) = (&proxy_cfg.username, &proxy_cfg.password) {
        proxy = proxy.basic_auth(username, password);
    }
    proxy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(http: &str) -> ProxyConfig {
        ProxyConfig {
            http: Some(http.to_string()),
            https: None,
            no_proxy: None,
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_build_client_with_key() {
        let provider = ProviderConfig {
            api_key: Some("test-key".to_string()),
            ..ProviderConfig::default()
        };
        assert!(build_provider_client(&provider, None).is_ok());
    }

    #[test]
    fn test_build_client_rejects_bad_key() {
        let provider = ProviderConfig {
            api_key: Some("bad\nkey".to_string()),
            ..ProviderConfig::default()
        };
        let err = build_provider_client(&provider, None).unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn test_apply_proxy_with_auth_and_no_proxy() {
        let mut cfg = proxy("http://proxy.example.com:8080");
        cfg.no_proxy = Some("localhost,127.0.0.1".to_string());
        cfg.username = Some("user".to_string());
        cfg.password = Some("pass".to_string());

        let builder = apply_proxy_to_builder(reqwest::Client::builder(), &cfg).unwrap();
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_apply_proxy_invalid_url() {
        let cfg = proxy("://invalid");
        assert!(apply_proxy_to_builder(reqwest::Client::builder(), &cfg).is_err());
    }
}
