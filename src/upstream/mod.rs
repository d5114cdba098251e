//! Upstream producers: audio extraction, transcription, and tone analysis.
//!
//! The producers themselves are external collaborators behind traits; this
//! module wraps each one in a stage with a fixed field contract. Command-line
//! backed implementations live in [`command`].

pub mod command;

pub use command::{CommandSpec, CommandToneAnalyzer, CommandTranscriber, FfmpegExtractor};

use crate::errors::{PipelineError, ScorerError};
use crate::pipeline::state::fields;
use crate::pipeline::{PartialUpdate, Stage, StageContext, StageOutcome, StateSnapshot};
use crate::scoring::{ToneMetrics, Transcript};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Pulls the audio track out of a source recording.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Write the audio into `workdir` and return its path.
    async fn extract(&self, source: &Path, workdir: &Path) -> Result<PathBuf, ScorerError>;
}

/// Speech to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript, ScorerError>;
}

/// Vocal delivery metrics.
#[async_trait]
pub trait ToneAnalyzer: Send + Sync {
    async fn analyze(&self, audio: &Path) -> Result<ToneMetrics, ScorerError>;
}

/// `source` → `audio`
pub struct ExtractStage {
    extractor: Arc<dyn AudioExtractor>,
}

impl ExtractStage {
    pub const NAME: &'static str = "extract_audio";

    pub fn new(extractor: Arc<dyn AudioExtractor>) -> Self {
        Self { extractor }
    }

    async fn extract(&self, ctx: &StageContext, input: StateSnapshot) -> Result<PartialUpdate, PipelineError> {
        let source: PathBuf = input.get(fields::SOURCE)?;
        let audio = ctx
            .invoker
            .invoke(Self::NAME, &ctx.policy, |_| {
                self.extractor.extract(&source, ctx.workdir())
            })
            .await?;

        info!(source = %source.display(), audio = %audio.display(), "audio extracted");
        PartialUpdate::new().with(fields::AUDIO, &audio)
    }
}

#[async_trait]
impl Stage for ExtractStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<String> {
        vec![fields::SOURCE.to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::AUDIO.to_string()]
    }

    async fn run(&self, ctx: &StageContext, input: StateSnapshot) -> StageOutcome {
        self.extract(ctx, input).await.into()
    }
}

/// `audio` → `transcript`, `segments`
pub struct TranscribeStage {
    transcriber: Arc<dyn Transcriber>,
}

impl TranscribeStage {
    pub const NAME: &'static str = "transcribe";

    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }

    async fn transcribe(&self, ctx: &StageContext, input: StateSnapshot) -> Result<PartialUpdate, PipelineError> {
        let audio: PathBuf = input.get(fields::AUDIO)?;
        let transcript = ctx
            .invoker
            .invoke(Self::NAME, &ctx.policy, |_| {
                self.transcriber.transcribe(&audio)
            })
            .await?;

        info!(
            chars = transcript.text.len(),
            segments = transcript.segments.len(),
            "transcription complete"
        );
        PartialUpdate::new()
            .with(fields::TRANSCRIPT, &transcript.text.trim())?
            .with(fields::SEGMENTS, &transcript.segments)
    }
}

#[async_trait]
impl Stage for TranscribeStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<String> {
        vec![fields::AUDIO.to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::TRANSCRIPT.to_string(), fields::SEGMENTS.to_string()]
    }

    async fn run(&self, ctx: &StageContext, input: StateSnapshot) -> StageOutcome {
        self.transcribe(ctx, input).await.into()
    }
}

/// `audio` → `tone_metrics`
pub struct ToneStage {
    analyzer: Arc<dyn ToneAnalyzer>,
}

impl ToneStage {
    pub const NAME: &'static str = "tone";

    pub fn new(analyzer: Arc<dyn ToneAnalyzer>) -> Self {
        Self { analyzer }
    }

    async fn analyze(&self, ctx: &StageContext, input: StateSnapshot) -> Result<PartialUpdate, PipelineError> {
        let audio: PathBuf = input.get(fields::AUDIO)?;
        let metrics = ctx
            .invoker
            .invoke(Self::NAME, &ctx.policy, |_| self.analyzer.analyze(&audio))
            .await?;

        info!(metrics = metrics.len(), "tone analysis complete");
        PartialUpdate::new().with(fields::TONE_METRICS, &metrics)
    }
}

#[async_trait]
impl Stage for ToneStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<String> {
        vec![fields::AUDIO.to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::TONE_METRICS.to_string()]
    }

    async fn run(&self, ctx: &StageContext, input: StateSnapshot) -> StageOutcome {
        self.analyze(ctx, input).await.into()
    }
}
