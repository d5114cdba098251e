//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `run`      | `Run`            |
//! | `personas` | `Personas`       |
//! | `config`   | `Config`         |

pub mod config;
pub mod personas;
pub mod run;

pub use config::cmd_config;
pub use personas::cmd_personas;
pub use run::{RunOptions, cmd_run};

use anyhow::{Context, Result};
use pitch_panel::config::PanelConfig;
use std::path::Path;

use super::Cli;

/// Load configuration with environment and CLI overrides applied.
pub fn load_config(cli: &Cli, project_dir: &Path) -> Result<PanelConfig> {
    let config = PanelConfig::load(project_dir, cli.config.as_deref())
        .context("Failed to load configuration")?;
    Ok(config.with_env().with_verbose(cli.verbose))
}
