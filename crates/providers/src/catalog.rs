//! The fixed set of model backends a client may pick from.

use serde::Serialize;

/// Wire protocol spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `/chat/completions` with function tools
    OpenAiCompatible,
    /// Anthropic Messages API
    Anthropic,
}

/// Static description of one supported backend.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSpec {
    /// Key clients send in requests (e.g. "openai")
    pub key: &'static str,
    /// Display name
    pub name: &'static str,
    pub default_model: &'static str,
    /// Other models worth offering in pickers
    pub models: &'static [&'static str],
    pub requires_api_key: bool,
    /// Environment variable holding the key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_var: Option<&'static str>,
    #[serde(skip)]
    pub base_url: &'static str,
    #[serde(skip)]
    pub kind: ProviderKind,
}

pub const CATALOG: &[ProviderSpec] = &[
    ProviderSpec {
        key: "perplexity",
        name: "Perplexity (Sonar)",
        default_model: "sonar",
        models: &["sonar", "sonar-pro"],
        requires_api_key: true,
        env_var: Some("PERPLEXITY_API_KEY"),
        base_url: "https://api.perplexity.ai",
        kind: ProviderKind::OpenAiCompatible,
    },
    ProviderSpec {
        key: "openai",
        name: "OpenAI (GPT-4)",
        default_model: "gpt-4o-mini",
        models: &["gpt-4o-mini", "gpt-4o"],
        requires_api_key: true,
        env_var: Some("OPENAI_API_KEY"),
        base_url: "https://api.openai.com/v1",
        kind: ProviderKind::OpenAiCompatible,
    },
    ProviderSpec {
        key: "gemini",
        name: "Google Gemini",
        default_model: "gemini-pro",
        models: &["gemini-pro", "gemini-1.5-flash"],
        requires_api_key: true,
        env_var: Some("GOOGLE_API_KEY"),
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        kind: ProviderKind::OpenAiCompatible,
    },
    ProviderSpec {
        key: "claude",
        name: "Anthropic Claude",
        default_model: "claude-3-5-sonnet-20241022",
        models: &["claude-3-5-sonnet-20241022", "claude-3-5-haiku-20241022"],
        requires_api_key: true,
        env_var: Some("ANTHROPIC_API_KEY"),
        base_url: "https://api.anthropic.com",
        kind: ProviderKind::Anthropic,
    },
    ProviderSpec {
        key: "ollama",
        name: "Ollama (Local)",
        default_model: "llama2",
        models: &["llama2", "llama3"],
        requires_api_key: false,
        env_var: None,
        base_url: "http://localhost:11434",
        kind: ProviderKind::OpenAiCompatible,
    },
];

/// Environment variable that relocates the local Ollama server.
pub const OLLAMA_BASE_URL_ENV: &str = "OLLAMA_BASE_URL";

/// Look up a backend by key.
pub fn lookup(key: &str) -> Option<&'static ProviderSpec> {
    CATALOG.iter().find(|spec| spec.key == key)
}

/// Every supported key, in catalog order.
pub fn keys() -> Vec<&'static str> {
    CATALOG.iter().map(|spec| spec.key).collect()
}
