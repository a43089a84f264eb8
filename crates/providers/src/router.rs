//! Provider router - turns a catalog key plus configuration into a live
//! [`Provider`].

use std::sync::Arc;

use infrapilot_config::AppConfig;
use infrapilot_core::error::ProviderError;
use infrapilot_core::provider::Provider;
use tracing::debug;

use crate::anthropic::AnthropicProvider;
use crate::catalog::{self, OLLAMA_BASE_URL_ENV, ProviderKind, ProviderSpec};
use crate::credentials::{CredentialSource, resolve_api_key};
use crate::openai_compat::OpenAiCompatProvider;

/// Build the provider for `key`, reading env vars from the process environment.
pub fn build_provider(
    config: &AppConfig,
    key: &str,
    source: CredentialSource,
) -> Result<Arc<dyn Provider>, ProviderError> {
    build_provider_with(config, key, source, |var| std::env::var(var).ok())
}

/// Build the provider for `key`, reading env vars through `lookup`.
pub fn build_provider_with(
    config: &AppConfig,
    key: &str,
    source: CredentialSource,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let spec = catalog::lookup(key)
        .ok_or_else(|| ProviderError::NotConfigured(format!("Unsupported provider: {key}")))?;

    let api_key = resolve_api_key(config, spec, source, &lookup);
    let api_key = match (api_key, spec.requires_api_key) {
        (Some(k), _) => k,
        (None, false) => String::new(),
        (None, true) => {
            let hint = spec
                .env_var
                .map(|v| format!(" (set {v} or providers.{key}.api_key)"))
                .unwrap_or_default();
            return Err(ProviderError::NotConfigured(format!(
                "No API key found for {} using credential source '{source}'{hint}",
                spec.name
            )));
        }
    };

    let base_url = base_url(config, spec, &lookup);
    debug!(provider = key, %base_url, %source, "Building provider");

    let provider: Arc<dyn Provider> = match spec.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(api_key).with_base_url(base_url)),
        ProviderKind::OpenAiCompatible => {
            Arc::new(OpenAiCompatProvider::new(spec.key, base_url, api_key))
        }
    };
    Ok(provider)
}

/// Pick the model for a run: explicit request, then config, then catalog default.
pub fn resolve_model(config: &AppConfig, spec: &ProviderSpec, requested: Option<&str>) -> String {
    if let Some(model) = requested.map(str::trim).filter(|m| !m.is_empty()) {
        return model.to_string();
    }
    if let Some(model) = config.provider(spec.key).and_then(|p| p.default_model.clone()) {
        return model;
    }
    if config.default_provider == spec.key {
        if let Some(model) = &config.default_model {
            return model.clone();
        }
    }
    spec.default_model.to_string()
}

/// Endpoint for a backend: config override, then (for Ollama) the env var,
/// then the catalog default.
fn base_url(config: &AppConfig, spec: &ProviderSpec, lookup: impl Fn(&str) -> Option<String>) -> String {
    if let Some(url) = config.provider(spec.key).and_then(|p| p.api_url.clone()) {
        return url;
    }
    if spec.key == "ollama" {
        let root = lookup(OLLAMA_BASE_URL_ENV).unwrap_or_else(|| spec.base_url.to_string());
        return format!("{}/v1", root.trim_end_matches('/'));
    }
    spec.base_url.to_string()
}
