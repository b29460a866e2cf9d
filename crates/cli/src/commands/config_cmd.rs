//! `cerebro config` — Configuration management commands.

use cerebro_config::{AppConfig, ConfigOverrides};

const REDACTED: &str = "***";

pub async fn show(overrides: &ConfigOverrides) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(overrides).map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render_redacted(&config)?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let path = AppConfig::config_path();
    if path.exists() {
        println!("  Config already exists at {}", path.display());
        return Ok(());
    }
    write_default(&path)?;
    println!("  Wrote default config to {}", path.display());
    Ok(())
}

fn write_default(path: &std::path::Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())
}

/// Serialize `config` with every secret replaced.
fn render_redacted(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut shown = config.clone();
    if shown.provider.api_key.is_some() {
        shown.provider.api_key = Some(REDACTED.into());
    }
    if shown.search.api_key.is_some() {
        shown.search.api_key = Some(REDACTED.into());
    }
    toml::to_string_pretty(&shown)
}
