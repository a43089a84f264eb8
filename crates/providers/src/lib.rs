//! LLM Provider implementations for InfraPilot.
//!
//! All providers implement the `infrapilot_core::Provider` trait.
//! The router builds the right one for a catalog key and credential source.

pub mod anthropic;
pub mod catalog;
pub mod credentials;
pub mod openai_compat;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use catalog::{CATALOG, ProviderKind, ProviderSpec};
pub use credentials::CredentialSource;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_provider, build_provider_with, resolve_model};
