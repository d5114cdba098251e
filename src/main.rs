use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "pitch-panel")]
#[command(version, about = "Evaluate a recorded pitch with a panel of investor personas")]
pub struct Cli {
    /// Show debug output on the console
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Config file (default: .pitch-panel/panel.toml in the project directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate a recorded pitch
    Run {
        /// Video or audio file of the pitch
        source: PathBuf,

        /// Print the final result as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Comma-separated persona list, e.g. "skeptic,finance_shark"
        #[arg(long)]
        personas: Option<String>,

        /// Persona scheduling: sequential or parallel
        #[arg(long)]
        schedule: Option<String>,
    },
    /// List the personas on the configured panel
    Personas,
    /// View, create or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            source,
            json,
            personas,
            schedule,
        } => {
            let opts = cmd::RunOptions {
                source: source.clone(),
                json: *json,
                personas: personas.clone(),
                schedule: schedule.clone(),
            };
            cmd::cmd_run(&cli, &project_dir, opts).await?;
        }
        Commands::Personas => cmd::cmd_personas(&cli, &project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
    }

    Ok(())
}
