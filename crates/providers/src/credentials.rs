//! API key resolution for catalog backends.
//!
//! Keys come from the config file or the environment; nothing else.

use std::str::FromStr;

use infrapilot_config::AppConfig;
use serde::{Deserialize, Serialize};

use crate::catalog::ProviderSpec;

/// Where a run is allowed to look for its API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// Config file, then the provider's env var, then the global key
    #[default]
    Auto,
    /// `[providers.<key>].api_key`, then the top-level `api_key`
    Config,
    /// Only the provider's env var
    Env,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Config => "config",
            Self::Env => "env",
        }
    }
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "config" => Ok(Self::Config),
            "env" | "environment" => Ok(Self::Env),
            other => Err(format!("Unsupported credential source: {other}")),
        }
    }
}

/// Resolve the API key for `spec` from `source`, reading env vars through `lookup`.
pub fn resolve_api_key(
    config: &AppConfig,
    spec: &ProviderSpec,
    source: CredentialSource,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let from_config = || {
        config
            .provider(spec.key)
            .and_then(|p| p.api_key.clone())
            .filter(|k| !k.is_empty())
    };
    let from_env = || {
        spec.env_var
            .and_then(|var| lookup(var))
            .filter(|k| !k.is_empty())
    };
    let global = || config.api_key.clone().filter(|k| !k.is_empty());

    match source {
        CredentialSource::Auto => from_config().or_else(from_env).or_else(global),
        CredentialSource::Config => from_config().or_else(global),
        CredentialSource::Env => from_env(),
    }
}
