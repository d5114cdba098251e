//! Upstream producers backed by external commands.
//!
//! Transcription and tone analysis run a configured command that prints one
//! JSON document on stdout. Exit status 75 (`EX_TEMPFAIL`) is treated as a
//! transient failure; any other non-zero status is permanent.

use super::{AudioExtractor, ToneAnalyzer, Transcriber};
use crate::errors::ScorerError;
use crate::scoring::{ToneMetrics, Transcript};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Exit status signalling "try again later".
pub const EXIT_TEMPFAIL: i32 = 75;

/// Placeholder replaced by the audio path in command arguments.
pub const AUDIO_PLACEHOLDER: &str = "{audio}";

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Split a whitespace-separated command line. Returns `None` when empty.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Arguments with `{audio}` substituted, or the path appended when no
    /// argument mentions it.
    pub fn args_for(&self, audio: &Path) -> Vec<String> {
        let path = audio.display().to_string();
        if self.args.iter().any(|a| a.contains(AUDIO_PLACEHOLDER)) {
            self.args
                .iter()
                .map(|a| a.replace(AUDIO_PLACEHOLDER, &path))
                .collect()
        } else {
            let mut args = self.args.clone();
            args.push(path);
            args
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Classify a failure to start `program`.
///
/// Only resource exhaustion is worth retrying; a missing or non-executable
/// program stays broken until the configuration changes.
fn spawn_error(program: &str, e: &io::Error) -> ScorerError {
    match e.kind() {
        io::ErrorKind::NotFound => {
            ScorerError::permanent(format!("command '{}' not found", program))
        }
        io::ErrorKind::WouldBlock
        | io::ErrorKind::Interrupted
        | io::ErrorKind::OutOfMemory
        | io::ErrorKind::TimedOut => {
            ScorerError::transient(format!("failed to start '{}': {}", program, e))
        }
        _ => ScorerError::permanent(format!("failed to start '{}': {}", program, e)),
    }
}

/// Run `program` and return its stdout, classifying failures.
async fn run(program: &str, args: &[String]) -> Result<Vec<u8>, ScorerError> {
    debug!(program, ?args, "running upstream command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| spawn_error(program, &e))?;

    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = format!(
        "'{}' exited with {}: {}",
        program,
        output.status,
        stderr.trim()
    );
    match output.status.code() {
        Some(EXIT_TEMPFAIL) => Err(ScorerError::Transient(message)),
        _ => Err(ScorerError::Permanent(message)),
    }
}

fn parse_json<T: DeserializeOwned>(program: &str, stdout: &[u8]) -> Result<T, ScorerError> {
    serde_json::from_slice(stdout).map_err(|e| {
        ScorerError::permanent(format!("'{}' printed malformed JSON: {}", program, e))
    })
}

/// Extracts 16 kHz mono PCM audio with ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    program: String,
    sample_rate: u32,
    max_duration: Option<Duration>,
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            sample_rate: 16_000,
            max_duration: None,
        }
    }
}

impl FfmpegExtractor {
    pub const OUTPUT_FILE: &'static str = "audio.wav";

    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Self::default()
        }
    }

    pub fn with_sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate = hz;
        self
    }

    /// Keep only the first `limit` of the recording.
    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    fn args(&self, source: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error", "-i"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(source.display().to_string());
        if let Some(limit) = self.max_duration {
            args.push("-t".to_string());
            args.push(format!("{:.3}", limit.as_secs_f64()));
        }
        args.extend(
            [
                "-vn".to_string(),
                "-ac".to_string(),
                "1".to_string(),
                "-ar".to_string(),
                self.sample_rate.to_string(),
                "-acodec".to_string(),
                "pcm_s16le".to_string(),
            ]
            .into_iter(),
        );
        args.push(output.display().to_string());
        args
    }
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    async fn extract(&self, source: &Path, workdir: &Path) -> Result<PathBuf, ScorerError> {
        if !source.is_file() {
            return Err(ScorerError::NotFound(source.display().to_string()));
        }

        let output = workdir.join(Self::OUTPUT_FILE);
        run(&self.program, &self.args(source, &output))
            .await
            .map_err(|e| match e {
                ScorerError::Permanent(msg) => ScorerError::DecodeFailure(msg),
                other => other,
            })?;
        Ok(output)
    }
}

/// Transcriber that runs a command printing `{"text": ..., "segments": [...]}`.
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    spec: CommandSpec,
}

impl CommandTranscriber {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript, ScorerError> {
        let stdout = run(&self.spec.program, &self.spec.args_for(audio)).await?;
        parse_json(&self.spec.program, &stdout)
    }
}

/// Tone analyzer that runs a command printing a flat JSON object of metrics.
#[derive(Debug, Clone)]
pub struct CommandToneAnalyzer {
    spec: CommandSpec,
}

impl CommandToneAnalyzer {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl ToneAnalyzer for CommandToneAnalyzer {
    async fn analyze(&self, audio: &Path) -> Result<ToneMetrics, ScorerError> {
        let stdout = run(&self.spec.program, &self.spec.args_for(audio)).await?;
        parse_json(&self.spec.program, &stdout)
    }
}
