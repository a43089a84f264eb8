//! `infrapilot init` - Write a default config file.

use std::path::Path;

use infrapilot_config::AppConfig;

pub async fn run(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let default_path = super::default_config_path();
    let path = config_path.unwrap_or(&default_path);

    println!("InfraPilot Setup");
    println!("================\n");

    if write_default_config(path, force)? {
        println!("Created config at: {}", path.display());
    } else {
        println!("Config already exists at: {}", path.display());
        println!("   Re-run with --force to overwrite it.\n");
        return Ok(());
    }

    let config = AppConfig::load_from(path)?;
    let workspace = &config.terraform.workspace_dir;
    if !workspace.exists() {
        std::fs::create_dir_all(workspace)?;
        println!("Created Terraform workspace: {}", workspace.display());
    }

    println!("\nNext steps:");
    println!("   1. Set an API key, e.g. OPENAI_API_KEY, or add it under [providers.<key>]");
    println!("   2. Run: infrapilot chat");
    println!("   3. Or serve the API: infrapilot serve\n");

    Ok(())
}

/// Write the default TOML to `path`. Returns `false` when a file exists
/// and `force` is not set.
fn write_default_config(path: &Path, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
