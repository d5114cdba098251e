//! Top-level run driver.
//!
//! One call to [`Orchestrator::run_pipeline`] is one run:
//!
//! ```text
//! extract_audio -> parallel{transcribe, tone} -> content{dimensions.., pitch_structure} -> viability -> sharks{personas.., aggregate}
//! ```
//!
//! Each run owns a fresh [`SharedState`] and a temporary work directory that
//! is removed on every exit path. Progress events go to the configured sink;
//! a sink that fails never affects the run.

pub mod result;

pub use result::FinalResult;

use crate::content::content_step;
use crate::errors::{ErrorKind, PipelineError};
use crate::panel::{Persona, PersonaGraph, PersonaSchedule};
use crate::pipeline::state::fields;
use crate::pipeline::{Driver, ParallelGroup, PartialUpdate, SharedState, StageContext, Step};
use crate::progress::{Notifier, ProgressSink};
use crate::retry::{RetryPolicy, RetryingInvoker};
use crate::scoring::{ContentAnalyst, Dimension, PanelAggregator, Scorer};
use crate::upstream::{
    AudioExtractor, ExtractStage, ToneAnalyzer, ToneStage, TranscribeStage, Transcriber,
};
use chrono::Utc;
use result::RunStamp;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Name of the transcribe/tone parallel step.
pub const UPSTREAM_STEP: &str = "parallel";

/// The external collaborators a run calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn AudioExtractor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub tone: Arc<dyn ToneAnalyzer>,
    pub analyst: Arc<dyn ContentAnalyst>,
    pub scorer: Arc<dyn Scorer>,
    pub aggregator: Arc<dyn PanelAggregator>,
}

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub policy: RetryPolicy,
    pub personas: Vec<Persona>,
    pub schedule: PersonaSchedule,
    pub dimensions: Vec<Dimension>,
    pub content_concurrency: usize,
    /// Where run directories are created; the system temp dir when unset.
    pub work_root: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            personas: Persona::builtin_panel(),
            schedule: PersonaSchedule::default(),
            dimensions: Dimension::builtins(),
            content_concurrency: usize::MAX,
            work_root: None,
        }
    }
}

/// Runs the full evaluation chain.
pub struct Orchestrator {
    collaborators: Collaborators,
    settings: RunSettings,
    invoker: RetryingInvoker,
    sink: Option<Arc<dyn ProgressSink>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, settings: RunSettings) -> Self {
        Self {
            collaborators,
            settings,
            invoker: RetryingInvoker::default(),
            sink: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `invoker` for every external call (e.g. to inject a sleeper).
    pub fn with_invoker(mut self, invoker: RetryingInvoker) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels runs started by this orchestrator.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    fn persona_graph(&self) -> PersonaGraph {
        PersonaGraph::new(
            self.settings.personas.clone(),
            Arc::clone(&self.collaborators.scorer),
            Arc::clone(&self.collaborators.aggregator),
        )
        .with_schedule(self.settings.schedule)
    }

    fn plan(&self, graph: Arc<PersonaGraph>) -> Result<Vec<Step>, PipelineError> {
        let c = &self.collaborators;
        let upstream = ParallelGroup::new(UPSTREAM_STEP)
            .with_member(Arc::new(TranscribeStage::new(Arc::clone(&c.transcriber))))
            .with_member(Arc::new(ToneStage::new(Arc::clone(&c.tone))));

        Ok(vec![
            Step::Single(Arc::new(ExtractStage::new(Arc::clone(&c.extractor)))),
            Step::Parallel(upstream),
            content_step(
                self.settings.dimensions.clone(),
                Arc::clone(&c.analyst),
                self.settings.content_concurrency,
            )?,
            Step::Graph(graph),
        ])
    }

    fn workdir(&self) -> Result<TempDir, PipelineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pitch-panel-");
        let dir = match &self.settings.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|e| PipelineError::Workspace(e.to_string()))
    }

    /// Evaluate the recording at `source`.
    pub async fn run_pipeline(&self, source: &Path) -> Result<FinalResult, PipelineError> {
        let stamp = RunStamp {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        let notifier = Notifier::new(stamp.run_id, self.sink.clone());
        notifier.emit_with("start", json!({ "source": source.display().to_string() }));
        info!(run_id = %stamp.run_id, source = %source.display(), "run started");

        let outcome = self.execute(stamp, source, &notifier).await;
        match &outcome {
            Ok(result) => {
                info!(
                    run_id = %stamp.run_id,
                    final_label = %result.aggregate.final_label,
                    duration_ms = result.duration_ms,
                    "run complete"
                );
                notifier.emit_with(
                    "complete",
                    json!({
                        "final_label": result.aggregate.final_label,
                        "duration_ms": result.duration_ms,
                    }),
                );
            }
            Err(e) if e.kind() == ErrorKind::Cancelled => {
                warn!(run_id = %stamp.run_id, error = %e, "run cancelled");
                notifier.emit_with("cancelled", json!({ "error": e.to_string() }));
            }
            Err(e) => {
                error!(run_id = %stamp.run_id, kind = %e.kind(), error = %e, "run failed");
                notifier.emit_with(
                    "failed",
                    json!({ "kind": e.kind().to_string(), "error": e.to_string() }),
                );
            }
        }
        outcome
    }

    async fn execute(
        &self,
        stamp: RunStamp,
        source: &Path,
        notifier: &Notifier,
    ) -> Result<FinalResult, PipelineError> {
        let workdir = self.workdir()?;
        let ctx = StageContext::new(
            self.invoker.clone(),
            self.settings.policy.clone(),
            workdir.path(),
            self.cancel.clone(),
        );
        let driver = Driver::new(ctx, notifier.clone());

        let graph = Arc::new(self.persona_graph());
        let plan = self.plan(Arc::clone(&graph))?;

        let mut state = SharedState::new();
        state.merge(
            "init",
            PartialUpdate::new().with(fields::SOURCE, &source.to_path_buf())?,
        )?;

        driver.run_plan(&plan, &mut state).await?;

        let persona_results = graph.results(&state)?;
        let result = FinalResult::project(stamp, &state, persona_results)?;

        if let Err(e) = workdir.close() {
            warn!(error = %e, "failed to remove run directory");
        }
        Ok(result)
    }
}
