//! Pitch evaluation (`pitch-panel run <SOURCE>`).

use anyhow::{Context, Result};
use pitch_panel::config::{PanelConfig, ScheduleMode};
use pitch_panel::llm::{ChatClient, LlmContentAnalyst, LlmPanelAggregator, LlmPersonaScorer};
use pitch_panel::logging::init_logging;
use pitch_panel::progress::{ProgressSink, TracingSink};
use pitch_panel::ui::{PanelUI, render_result};
use pitch_panel::upstream::{CommandToneAnalyzer, CommandTranscriber, FfmpegExtractor};
use pitch_panel::{Collaborators, Orchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::super::Cli;

/// Arguments of the `run` command.
pub struct RunOptions {
    pub source: PathBuf,
    pub json: bool,
    pub personas: Option<String>,
    pub schedule: Option<String>,
}

/// Apply `--personas` and `--schedule` on top of the file and environment.
fn apply_overrides(config: &mut PanelConfig, opts: &RunOptions) -> Result<()> {
    if let Some(list) = &opts.personas {
        config.toml.panel.personas = list
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(schedule) = &opts.schedule {
        config.toml.panel.schedule = schedule.parse::<ScheduleMode>()?;
    }
    Ok(())
}

fn collaborators(config: &PanelConfig) -> Result<Collaborators> {
    let llm = &config.toml.llm;
    let upstream = &config.toml.upstream;

    let client = Arc::new(
        ChatClient::new(
            &llm.base_url,
            &llm.model,
            config.api_key.clone(),
            config.llm_timeout(),
        )
        .context("Failed to create chat client")?,
    );

    let mut extractor = FfmpegExtractor::new(&upstream.ffmpeg).with_sample_rate(upstream.sample_rate);
    if let Some(secs) = upstream.max_duration_secs {
        extractor = extractor.with_max_duration(Duration::from_secs(secs));
    }

    Ok(Collaborators {
        extractor: Arc::new(extractor),
        transcriber: Arc::new(CommandTranscriber::new(upstream.transcriber_command()?)),
        tone: Arc::new(CommandToneAnalyzer::new(upstream.tone_command()?)),
        analyst: Arc::new(
            LlmContentAnalyst::new(Arc::clone(&client)).with_temperature(llm.scoring_temperature),
        ),
        scorer: Arc::new(
            LlmPersonaScorer::new(Arc::clone(&client)).with_temperature(llm.panel_temperature),
        ),
        aggregator: Arc::new(
            LlmPanelAggregator::new(client).with_temperature(llm.panel_temperature),
        ),
    })
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, opts: RunOptions) -> Result<()> {
    if !opts.source.is_file() {
        anyhow::bail!("Source file not found: {}", opts.source.display());
    }

    let mut config = super::load_config(cli, project_dir)?;
    apply_overrides(&mut config, &opts)?;

    let _log_guards = init_logging(
        &config.toml.logging,
        config.log_dir().as_deref(),
        config.verbose,
    )?;

    let settings = config.run_settings()?;
    let collaborators = collaborators(&config)?;
    let ui = (!opts.json).then(|| Arc::new(PanelUI::new(config.verbose)));
    let sink: Arc<dyn ProgressSink> = match &ui {
        Some(ui) => ui.clone() as Arc<dyn ProgressSink>,
        None => Arc::new(TracingSink),
    };

    let orchestrator = Orchestrator::new(collaborators, settings).with_sink(sink);

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = orchestrator.run_pipeline(&opts.source).await;
    if let Some(ui) = &ui {
        ui.finish();
    }
    let result = outcome
        .with_context(|| format!("Evaluation of {} failed", opts.source.display()))?;

    if opts.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize result")?
        );
    } else {
        print!("{}", render_result(&result));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(personas: Option<&str>, schedule: Option<&str>) -> RunOptions {
        RunOptions {
            source: PathBuf::from("pitch.mp4"),
            json: false,
            personas: personas.map(str::to_string),
            schedule: schedule.map(str::to_string),
        }
    }

    #[test]
    fn test_apply_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PanelConfig::load(dir.path(), None).unwrap();
        apply_overrides(&mut config, &opts(Some("skeptic, finance"), Some("parallel"))).unwrap();

        assert_eq!(config.toml.panel.personas, vec!["skeptic", "finance"]);
        assert_eq!(config.toml.panel.schedule, ScheduleMode::Parallel);
        let settings = config.run_settings().unwrap();
        assert_eq!(settings.personas[1].id(), "finance_shark");
    }

    #[test]
    fn test_bad_schedule_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PanelConfig::load(dir.path(), None).unwrap();
        assert!(apply_overrides(&mut config, &opts(None, Some("whenever"))).is_err());
    }
}
