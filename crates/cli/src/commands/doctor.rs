//! `cerebro doctor` — Diagnose configuration and tool availability.

use cerebro_config::{AppConfig, CheckpointBackend, ConfigOverrides};

#[derive(Debug, PartialEq, Eq)]
enum Check {
    Pass(String),
    Warn(String),
    Fail(String),
}

impl Check {
    fn print(&self) {
        match self {
            Check::Pass(msg) => println!("  ✅ {msg}"),
            Check::Warn(msg) => println!("  ⚠️  {msg}"),
            Check::Fail(msg) => println!("  ❌ {msg}"),
        }
    }

    fn is_issue(&self) -> bool {
        !matches!(self, Check::Pass(_))
    }
}

pub async fn run(overrides: &ConfigOverrides) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Cerebro Doctor — System Diagnostics");
    println!("=====================================\n");

    let config_path = AppConfig::config_path();
    let mut checks = Vec::new();
    if config_path.exists() {
        checks.push(Check::Pass(format!("Config file found at {}", config_path.display())));
    } else {
        checks.push(Check::Warn(
            "No config file, using defaults (run `cerebro config init` to create one)".into(),
        ));
    }

    match AppConfig::load(overrides) {
        Ok(config) => checks.extend(inspect(&config, |cmd| which::which(cmd).is_ok())),
        Err(e) => checks.push(Check::Fail(format!("Config invalid: {e}"))),
    }

    let mut issues = 0;
    for check in &checks {
        check.print();
        if check.is_issue() {
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}

/// Checks that need a resolved config. `on_path` reports whether an
/// executable can be found.
fn inspect(config: &AppConfig, on_path: impl Fn(&str) -> bool) -> Vec<Check> {
    let mut checks = vec![Check::Pass(format!("Model: {}", config.model))];

    if config.provider.api_key.is_some() {
        checks.push(Check::Pass("API key configured".into()));
    } else {
        checks.push(Check::Fail(
            "No API key (set CEREBRO_API_KEY or OPENROUTER_API_KEY)".into(),
        ));
    }

    if config.search.api_key.is_some() {
        checks.push(Check::Pass("Web search key configured".into()));
    } else {
        checks.push(Check::Warn(
            "No TAVILY_API_KEY, web_search will report itself unconfigured".into(),
        ));
    }

    let remote = &config.remote_tools;
    if !remote.enabled {
        checks.push(Check::Warn("Remote tools disabled in config".into()));
    } else if on_path(&remote.command) {
        checks.push(Check::Pass(format!("{} found in PATH", remote.command)));
    } else {
        checks.push(Check::Warn(format!(
            "{} not found in PATH, running with web_search only",
            remote.command
        )));
    }

    let data_dir = config.data_dir();
    match config.checkpoint.backend {
        CheckpointBackend::Memory => {
            checks.push(Check::Warn("In-memory checkpoints, history is lost on exit".into()));
        }
        _ if data_dir.exists() => {
            checks.push(Check::Pass(format!("Data directory {}", data_dir.display())));
        }
        _ => checks.push(Check::Pass(format!(
            "Data directory {} will be created on first run",
            data_dir.display()
        ))),
    }

    checks
}
