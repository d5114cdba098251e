//! Configuration view and validation commands (`pitch-panel config`).

use anyhow::{Context, Result};
use pitch_panel::config::{PanelConfig, PanelToml};
use std::path::Path;

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => show(cli, project_dir),
        Some(ConfigCommands::Validate) => validate(cli, project_dir),
        Some(ConfigCommands::Init) => init(cli, project_dir),
    }
}

fn show(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = super::load_config(cli, project_dir)?;

    println!();
    println!("Pitch Panel Configuration");
    println!("=========================");
    println!();

    if config.config_path.exists() {
        println!("Config file: {}", config.config_path.display());
    } else {
        println!("No panel.toml found at {}", config.config_path.display());
        println!("Using default configuration.");
    }
    println!();

    let rendered = toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
    println!("{}", rendered);

    println!("Effective values (with env overrides):");
    println!("  model = \"{}\"", config.toml.llm.model);
    println!("  base_url = \"{}\"", config.toml.llm.base_url);
    println!(
        "  api key ({}) = {}",
        config.toml.llm.api_key_env,
        if config.api_key.is_some() { "set" } else { "not set" }
    );
    println!();
    Ok(())
}

fn validate(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = super::load_config(cli, project_dir)?;

    println!();
    println!("Validating configuration...");
    println!();

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("Configuration is valid.");
    } else {
        println!("Configuration warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!();
    Ok(())
}

fn init(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PanelConfig::default_path(project_dir));

    if config_path.exists() {
        println!("panel.toml already exists at {}", config_path.display());
        println!("Delete it first if you want to recreate it.");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
    }

    PanelToml::default().save(&config_path)?;

    println!("Created panel.toml at {}", config_path.display());
    println!();
    println!("You can now customize:");
    println!("  - [upstream] transcriber and tone commands (required)");
    println!("  - [panel] personas, schedule, spacing_ms");
    println!("  - [llm] base_url, model, api_key_env");
    println!("  - [retry] max_attempts, initial_delay_ms, deadline_secs");
    println!();
    Ok(())
}
