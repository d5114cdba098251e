//! The projection of a finished run handed back to callers.

use crate::errors::PipelineError;
use crate::pipeline::SharedState;
use crate::pipeline::state::fields;
use crate::scoring::{AggregateResult, ContentAnalysis, PersonaResult, Segment, ToneMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything a successful run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub transcript: String,
    pub segments: Vec<Segment>,
    pub tone_metrics: ToneMetrics,
    pub content: ContentAnalysis,
    /// In declared persona order.
    pub persona_results: Vec<PersonaResult>,
    pub aggregate: AggregateResult,
}

/// Run bookkeeping that is not stored in the shared state.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunStamp {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl FinalResult {
    /// Project a completed run's state.
    pub(crate) fn project(
        stamp: RunStamp,
        state: &SharedState,
        persona_results: Vec<PersonaResult>,
    ) -> Result<Self, PipelineError> {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - stamp.started_at)
            .num_milliseconds()
            .max(0) as u64;

        Ok(Self {
            run_id: stamp.run_id,
            started_at: stamp.started_at,
            finished_at,
            duration_ms,
            transcript: state.read(fields::TRANSCRIPT)?,
            segments: state.read(fields::SEGMENTS)?,
            tone_metrics: state.read(fields::TONE_METRICS)?,
            content: state.read(fields::CONTENT_ANALYSIS)?,
            persona_results,
            aggregate: state.read(fields::AGGREGATE)?,
        })
    }

    /// Persona ids in the order they were reported.
    pub fn persona_ids(&self) -> Vec<&str> {
        self.persona_results
            .iter()
            .map(|r| r.persona_id.as_str())
            .collect()
    }
}
