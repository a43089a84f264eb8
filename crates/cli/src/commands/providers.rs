//! `infrapilot providers` - List supported model backends.

use std::path::Path;

use infrapilot_config::AppConfig;
use infrapilot_providers::{CATALOG, CredentialSource, build_provider, resolve_model};

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;

    println!("Supported model backends");
    println!("========================");
    println!();
    for line in provider_rows(&config) {
        println!("  {line}");
    }
    println!();
    println!("  Default: {}", config.default_provider);

    Ok(())
}

/// One formatted row per catalog entry.
fn provider_rows(config: &AppConfig) -> Vec<String> {
    let mut rows = vec![format!(
        "{:<12} {:<22} {:<28} {:<20} {}",
        "KEY", "NAME", "MODEL", "ENV", "CREDENTIALS"
    )];
    for spec in CATALOG {
        let credentials = if !spec.requires_api_key {
            "not needed"
        } else if build_provider(config, spec.key, CredentialSource::Auto).is_ok() {
            "found"
        } else {
            "missing"
        };
        rows.push(format!(
            "{:<12} {:<22} {:<28} {:<20} {}",
            spec.key,
            spec.name,
            resolve_model(config, spec, None),
            spec.env_var.unwrap_or("-"),
            credentials
        ));
    }
    rows
}
