//! Configuration for pitch-panel.
//!
//! Settings are read from `.pitch-panel/panel.toml` and layered:
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [retry]
//! max_attempts = 3
//! initial_delay_ms = 1000
//! multiplier = 2
//! max_delay_ms = 30000
//! deadline_secs = 120
//!
//! [panel]
//! schedule = "sequential"
//! spacing_ms = 1000
//! personas = ["visionary", "finance_shark", "customer_advocate", "skeptic", "Legal Eagle"]
//!
//! [panel.focus]
//! legal_eagle = ["regulatory exposure", "IP ownership"]
//!
//! [content]
//! max_concurrency = 4
//! dimensions = ["problem_clarity", "revenue_logic"]
//!
//! [llm]
//! base_url = "https://api.groq.com/openai/v1"
//! model = "llama-3.3-70b-versatile"
//! api_key_env = "PITCH_PANEL_API_KEY"
//!
//! [upstream]
//! ffmpeg = "ffmpeg"
//! transcriber = "whisper-json --model small {audio}"
//! tone = "tone-metrics --json {audio}"
//!
//! [logging]
//! level = "info"
//! json = false
//! dir = ".pitch-panel/logs"
//! ```

use crate::errors::ConfigError;
use crate::orchestrator::RunSettings;
use crate::panel::{Persona, PersonaKind, PersonaSchedule};
use crate::retry::{Backoff, RetryPolicy};
use crate::scoring::Dimension;
use crate::upstream::CommandSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding project-local configuration and logs.
pub const CONFIG_DIR: &str = ".pitch-panel";

/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "panel.toml";

pub const ENV_API_KEY: &str = "PITCH_PANEL_API_KEY";
pub const ENV_MODEL: &str = "PITCH_PANEL_MODEL";
pub const ENV_BASE_URL: &str = "PITCH_PANEL_BASE_URL";

/// How persona stages are scheduled, as written in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// One persona at a time (default)
    #[default]
    Sequential,
    /// All personas at once, bounded by `max_concurrency`
    Parallel,
}

impl std::fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleMode::Sequential => write!(f, "sequential"),
            ScheduleMode::Parallel => write!(f, "parallel"),
        }
    }
}

impl std::str::FromStr for ScheduleMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(ScheduleMode::Sequential),
            "parallel" => Ok(ScheduleMode::Parallel),
            _ => anyhow::bail!(
                "Invalid schedule '{}'. Valid values: sequential, parallel",
                s
            ),
        }
    }
}

/// Retry settings applied to every external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Hard deadline per call, covering all attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            deadline_secs: None,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_backoff(Backoff::Exponential {
                initial: Duration::from_millis(self.initial_delay_ms),
                multiplier: self.multiplier,
                max: Duration::from_millis(self.max_delay_ms),
            });
        match self.deadline_secs {
            Some(secs) => policy.with_deadline(Duration::from_secs(secs)),
            None => policy,
        }
    }
}

/// Persona panel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelSection {
    #[serde(default)]
    pub schedule: ScheduleMode,
    /// Pause between sequential persona calls
    #[serde(default)]
    pub spacing_ms: u64,
    /// Bound for the parallel schedule
    #[serde(default = "default_panel_concurrency")]
    pub max_concurrency: usize,
    /// Persona names in panel order; unknown names become custom personas
    #[serde(default = "default_personas")]
    pub personas: Vec<String>,
    /// Focus areas keyed by persona id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub focus: BTreeMap<String, Vec<String>>,
}

fn default_panel_concurrency() -> usize {
    4
}

fn default_personas() -> Vec<String> {
    PersonaKind::all_builtins().iter().map(|k| k.id()).collect()
}

impl Default for PanelSection {
    fn default() -> Self {
        Self {
            schedule: ScheduleMode::default(),
            spacing_ms: 0,
            max_concurrency: default_panel_concurrency(),
            personas: default_personas(),
            focus: BTreeMap::new(),
        }
    }
}

impl PanelSection {
    pub fn persona_schedule(&self) -> PersonaSchedule {
        match self.schedule {
            ScheduleMode::Sequential => PersonaSchedule::Sequential {
                spacing: Duration::from_millis(self.spacing_ms),
            },
            ScheduleMode::Parallel => PersonaSchedule::Parallel {
                max_concurrency: self.max_concurrency.max(1),
            },
        }
    }

    /// Resolve the persona list, applying configured focus areas.
    pub fn resolve_personas(&self) -> Result<Vec<Persona>, ConfigError> {
        let personas = Persona::parse_list(&self.personas.join(",")).map_err(ConfigError::Invalid)?;
        Ok(personas
            .into_iter()
            .map(|p| match self.focus.get(&p.id()) {
                Some(areas) => p.with_focus_areas(areas.clone()),
                None => p,
            })
            .collect())
    }
}

/// Content analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSection {
    /// Bound on concurrent dimension scorers; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<String>,
    /// Extra dimensions referenced by id from `dimensions`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom: Vec<Dimension>,
}

fn default_dimensions() -> Vec<String> {
    Dimension::builtins().into_iter().map(|d| d.id).collect()
}

impl Default for ContentSection {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            dimensions: default_dimensions(),
            custom: Vec::new(),
        }
    }
}

impl ContentSection {
    pub fn resolve_dimensions(&self) -> Result<Vec<Dimension>, ConfigError> {
        if self.dimensions.is_empty() {
            return Err(ConfigError::Invalid(
                "content.dimensions must name at least one dimension".to_string(),
            ));
        }
        let mut resolved: Vec<Dimension> = Vec::new();
        for id in &self.dimensions {
            if resolved.iter().any(|d| &d.id == id) {
                return Err(ConfigError::Invalid(format!(
                    "Dimension '{}' listed more than once",
                    id
                )));
            }
            let dimension = self
                .custom
                .iter()
                .find(|d| &d.id == id)
                .cloned()
                .or_else(|| Dimension::builtin(id))
                .ok_or_else(|| ConfigError::Invalid(format!("Unknown dimension '{}'", id)))?;
            resolved.push(dimension);
        }
        Ok(resolved)
    }
}

/// Chat model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_scoring_temperature")]
    pub scoring_temperature: f32,
    #[serde(default = "default_panel_temperature")]
    pub panel_temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_scoring_temperature() -> f32 {
    crate::llm::DEFAULT_SCORING_TEMPERATURE
}

fn default_panel_temperature() -> f32 {
    crate::llm::DEFAULT_PANEL_TEMPERATURE
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_api_key_env() -> String {
    ENV_API_KEY.to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            scoring_temperature: default_scoring_temperature(),
            panel_temperature: default_panel_temperature(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// External producer commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Only the first N seconds of the recording are analyzed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<u64>,
    /// Command printing `{"text": ..., "segments": [...]}`; `{audio}` is substituted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcriber: Option<String>,
    /// Command printing a flat JSON object of metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_sample_rate() -> u32 {
    16_000
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            sample_rate: default_sample_rate(),
            max_duration_secs: None,
            transcriber: None,
            tone: None,
        }
    }
}

impl UpstreamSection {
    pub fn transcriber_command(&self) -> Result<CommandSpec, ConfigError> {
        Self::command("transcriber", self.transcriber.as_deref())
    }

    pub fn tone_command(&self) -> Result<CommandSpec, ConfigError> {
        Self::command("tone", self.tone.as_deref())
    }

    fn command(key: &str, line: Option<&str>) -> Result<CommandSpec, ConfigError> {
        line.and_then(CommandSpec::parse).ok_or_else(|| {
            ConfigError::Invalid(format!("upstream.{} command is not configured", key))
        })
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Filter for the log file (and console with `--verbose`)
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Directory for daily log files; no file logging when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

/// The complete panel.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanelToml {
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub panel: PanelSection,
    #[serde(default)]
    pub content: ContentSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl PanelToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `path`, or defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        let content = toml::to_string_pretty(self).context("Failed to serialize panel.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; it will be treated as 1".to_string());
        }
        if self.retry.multiplier == 0 {
            warnings.push("retry.multiplier is 0; retries will not wait".to_string());
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            warnings.push(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            ));
        }
        if self.panel.schedule == ScheduleMode::Parallel && self.panel.max_concurrency == 0 {
            warnings.push("panel.max_concurrency is 0; it will be treated as 1".to_string());
        }
        match self.panel.resolve_personas() {
            Ok(personas) => {
                for persona in personas.iter().filter(|p| p.focus_areas().is_empty()) {
                    warnings.push(format!(
                        "Custom persona '{}' has no focus areas; add them under [panel.focus]",
                        persona.id()
                    ));
                }
                for id in self.panel.focus.keys() {
                    if !personas.iter().any(|p| &p.id() == id) {
                        warnings.push(format!(
                            "panel.focus.{} does not match any configured persona",
                            id
                        ));
                    }
                }
            }
            Err(e) => warnings.push(e.to_string()),
        }
        if let Err(e) = self.content.resolve_dimensions() {
            warnings.push(e.to_string());
        }
        if self.content.max_concurrency == Some(0) {
            warnings.push("content.max_concurrency is 0; it will be treated as 1".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm.scoring_temperature)
            || !(0.0..=2.0).contains(&self.llm.panel_temperature)
        {
            warnings.push("llm temperatures should be between 0.0 and 2.0".to_string());
        }
        if self.upstream.transcriber_command().is_err() {
            warnings.push("upstream.transcriber is not set; runs will fail".to_string());
        }
        if self.upstream.tone_command().is_err() {
            warnings.push("upstream.tone is not set; runs will fail".to_string());
        }

        warnings
    }
}

/// Resolved configuration: panel.toml plus environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub project_dir: PathBuf,
    pub config_path: PathBuf,
    pub toml: PanelToml,
    /// API key from the environment (never read from the file)
    pub api_key: Option<String>,
    pub verbose: bool,
}

impl PanelConfig {
    /// Default config file location for `project_dir`.
    pub fn default_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load config for `project_dir`, from `explicit` when given.
    ///
    /// An explicit path must exist; the default location may be absent.
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (config_path, toml) = match explicit {
            Some(path) => (path.to_path_buf(), PanelToml::load(path)?),
            None => {
                let path = Self::default_path(project_dir);
                let toml = PanelToml::load_or_default(&path)?;
                (path, toml)
            }
        };

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            config_path,
            toml,
            api_key: None,
            verbose: false,
        })
    }

    /// Apply environment overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides through `lookup`.
    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty(ENV_MODEL) {
            self.toml.llm.model = model;
        }
        if let Some(url) = non_empty(ENV_BASE_URL) {
            self.toml.llm.base_url = url;
        }
        self.api_key = non_empty(&self.toml.llm.api_key_env);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Where log files go, resolved against the project directory.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml
            .logging
            .dir
            .as_ref()
            .map(|dir| self.project_dir.join(dir))
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.llm.timeout_secs)
    }

    /// Settings for one orchestrator run.
    pub fn run_settings(&self) -> Result<RunSettings, ConfigError> {
        Ok(RunSettings {
            policy: self.toml.retry.policy(),
            personas: self.toml.panel.resolve_personas()?,
            schedule: self.toml.panel.persona_schedule(),
            dimensions: self.toml.content.resolve_dimensions()?,
            content_concurrency: self
                .toml
                .content
                .max_concurrency
                .unwrap_or(usize::MAX)
                .max(1),
            work_root: None,
        })
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if self.api_key.is_none() {
            warnings.push(format!(
                "{} is not set; requests will be sent without an API key",
                self.toml.llm.api_key_env
            ));
        }
        warnings
    }
}
