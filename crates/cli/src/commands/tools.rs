//! `infrapilot tools` - List the tools each profile offers.

use std::path::Path;
use std::sync::Arc;

use infrapilot_tools::{ToolContext, ToolProfile, ToolProfiles};

pub async fn run(config_path: Option<&Path>, profile: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let only: Option<ToolProfile> = profile.as_deref().map(str::parse).transpose()?;

    let profiles = ToolProfiles::new(Arc::new(ToolContext::from_config(&config.terraform)));
    for (profile, registry) in profiles.iter() {
        if only.is_some_and(|p| p != profile) {
            continue;
        }
        println!("Profile: {profile} ({} tools)", registry.len());
        for descriptor in registry.describe() {
            let required = if descriptor.required.is_empty() {
                String::new()
            } else {
                format!(" [requires: {}]", descriptor.required.join(", "))
            };
            println!("  {:<26} {}{required}", descriptor.name, descriptor.description);
        }
        println!();
    }

    Ok(())
}
