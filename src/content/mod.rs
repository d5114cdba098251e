//! Content analysis: per-dimension scoring fanned out in parallel, then a
//! viability assessment over every dimension score and the pitch structure.

use crate::errors::PipelineError;
use crate::pipeline::state::fields;
use crate::pipeline::{
    ParallelGroup, PartialUpdate, Stage, StageContext, StageOutcome, StateSnapshot, Step,
};
use crate::scoring::{ContentAnalysis, ContentAnalyst, Dimension, DimensionScore, PitchStructure};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Name of the content plan step.
pub const STEP_NAME: &str = "content";

/// Scores one dimension of the transcript.
pub struct DimensionStage {
    name: String,
    field: String,
    dimension: Dimension,
    analyst: Arc<dyn ContentAnalyst>,
}

impl DimensionStage {
    pub fn new(dimension: Dimension, analyst: Arc<dyn ContentAnalyst>) -> Self {
        Self {
            name: format!("{}.{}", STEP_NAME, dimension.id),
            field: fields::dimension(&dimension.id),
            dimension,
            analyst,
        }
    }

    async fn score(&self, ctx: &StageContext, input: StateSnapshot) -> Result<PartialUpdate, PipelineError> {
        let transcript: String = input.get(fields::TRANSCRIPT)?;
        let score = ctx
            .invoker
            .invoke(&self.name, &ctx.policy, |_| {
                self.analyst.score_dimension(&self.dimension, &transcript)
            })
            .await?;
        PartialUpdate::new().with(&self.field, &score.clamped())
    }
}

#[async_trait]
impl Stage for DimensionStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<String> {
        vec![fields::TRANSCRIPT.to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    async fn run(&self, ctx: &StageContext, input: StateSnapshot) -> StageOutcome {
        self.score(ctx, input).await.into()
    }
}

/// Detects hook, problem, solution and ask in the transcript.
pub struct StructureStage {
    analyst: Arc<dyn ContentAnalyst>,
}

impl StructureStage {
    pub const NAME: &'static str = "content.pitch_structure";

    pub fn new(analyst: Arc<dyn ContentAnalyst>) -> Self {
        Self { analyst }
    }

    async fn assess(&self, ctx: &StageContext, input: StateSnapshot) -> Result<PartialUpdate, PipelineError> {
        let transcript: String = input.get(fields::TRANSCRIPT)?;
        let structure = ctx
            .invoker
            .invoke(Self::NAME, &ctx.policy, |_| {
                self.analyst.assess_structure(&transcript)
            })
            .await?;
        PartialUpdate::new().with(fields::PITCH_STRUCTURE, &structure)
    }
}

#[async_trait]
impl Stage for StructureStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<String> {
        vec![fields::TRANSCRIPT.to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::PITCH_STRUCTURE.to_string()]
    }

    async fn run(&self, ctx: &StageContext, input: StateSnapshot) -> StageOutcome {
        self.assess(ctx, input).await.into()
    }
}

/// Fan-in: judges business viability from every dimension score plus the
/// structure, and writes the combined [`ContentAnalysis`].
pub struct ViabilityStage {
    dimension_ids: Vec<String>,
    analyst: Arc<dyn ContentAnalyst>,
}

impl ViabilityStage {
    pub const NAME: &'static str = "viability";

    pub fn new(dimension_ids: Vec<String>, analyst: Arc<dyn ContentAnalyst>) -> Self {
        Self {
            dimension_ids,
            analyst,
        }
    }

    async fn assess(&self, ctx: &StageContext, input: StateSnapshot) -> Result<PartialUpdate, PipelineError> {
        let transcript: String = input.get(fields::TRANSCRIPT)?;
        let structure: PitchStructure = input.get(fields::PITCH_STRUCTURE)?;

        let mut dimensions = BTreeMap::new();
        for id in &self.dimension_ids {
            let score: DimensionScore = input.get(&fields::dimension(id))?;
            dimensions.insert(id.clone(), score);
        }

        let viability = ctx
            .invoker
            .invoke(Self::NAME, &ctx.policy, |_| {
                self.analyst
                    .assess_viability(&transcript, &dimensions, &structure)
            })
            .await?;

        info!(
            score = viability.score,
            risk_level = %viability.risk_level,
            "business viability assessed"
        );

        let analysis = ContentAnalysis {
            dimensions,
            pitch_structure: structure,
            viability,
        };
        PartialUpdate::new().with(fields::CONTENT_ANALYSIS, &analysis)
    }
}

#[async_trait]
impl Stage for ViabilityStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<String> {
        let mut inputs = vec![fields::TRANSCRIPT.to_string()];
        inputs.extend(self.dimension_ids.iter().map(|id| fields::dimension(id)));
        inputs.push(fields::PITCH_STRUCTURE.to_string());
        inputs
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::CONTENT_ANALYSIS.to_string()]
    }

    async fn run(&self, ctx: &StageContext, input: StateSnapshot) -> StageOutcome {
        self.assess(ctx, input).await.into()
    }
}

/// Build the content fan-out/fan-in step over `dimensions`.
pub fn content_step(
    dimensions: Vec<Dimension>,
    analyst: Arc<dyn ContentAnalyst>,
    max_concurrency: usize,
) -> Result<Step, PipelineError> {
    let ids: Vec<String> = dimensions.iter().map(|d| d.id.clone()).collect();

    let group = ParallelGroup::new(STEP_NAME)
        .with_members(dimensions.into_iter().map(|d| {
            Arc::new(DimensionStage::new(d, Arc::clone(&analyst))) as Arc<dyn Stage>
        }))
        .with_member(Arc::new(StructureStage::new(Arc::clone(&analyst))))
        .with_max_concurrency(max_concurrency);

    Step::fan_in(
        STEP_NAME,
        group,
        Arc::new(ViabilityStage::new(ids, analyst)),
    )
}


#[cfg(test)]
mod tests {
    use super::testing::FakeAnalyst;
    use super::*;
    use crate::errors::{ErrorKind, ScorerError};
    use crate::pipeline::{Driver, SharedState};
    use crate::progress::Notifier;
    use crate::progress::testing::CollectingSink;
    use crate::retry::testing::RecordingSleeper;
    use crate::retry::{RetryPolicy, RetryingInvoker};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn driver() -> (Driver, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let ctx = StageContext::new(
            RetryingInvoker::new(Arc::new(RecordingSleeper::default())),
            RetryPolicy::default(),
            std::env::temp_dir(),
            CancellationToken::new(),
        );
        (
            Driver::new(ctx, Notifier::new(Uuid::new_v4(), Some(sink.clone()))),
            sink,
        )
    }

    fn transcript_state() -> SharedState {
        let mut state = SharedState::new();
        state
            .merge(
                "transcribe",
                PartialUpdate::new().with_value(fields::TRANSCRIPT, json!("We sell to clinics.")),
            )
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_content_step_fans_out_and_in() {
        let (driver, sink) = driver();
        let analyst = Arc::new(FakeAnalyst::new());
        let step = content_step(Dimension::builtins(), analyst.clone(), 3).unwrap();
        let mut state = transcript_state();

        driver.execute_step(&step, &mut state).await.unwrap();

        let analysis: ContentAnalysis = state.read(fields::CONTENT_ANALYSIS).unwrap();
        assert_eq!(analysis.dimensions.len(), 6);
        assert!(analysis.dimensions.contains_key("revenue_logic"));
        assert!(analysis.pitch_structure.ask_present);
        assert_eq!(analyst.viability_inputs(), vec![6]);

        let stages = sink.stages();
        assert_eq!(stages.first().map(String::as_str), Some("content.start"));
        assert!(stages.contains(&"content.problem_clarity.done".to_string()));
        assert!(stages.contains(&"content.pitch_structure.done".to_string()));
        assert_eq!(&stages[stages.len() - 2..], ["viability.done", "content.done"]);
    }

    #[tokio::test]
    async fn test_dimension_failure_blocks_viability() {
        let (driver, _) = driver();
        let analyst = Arc::new(
            FakeAnalyst::new().failing("market_opportunity", vec![ScorerError::permanent("bad json")]),
        );
        let step = content_step(Dimension::builtins(), analyst.clone(), 6).unwrap();
        let mut state = transcript_state();

        let err = driver.execute_step(&step, &mut state).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(matches!(err, PipelineError::Stage { ref stage, .. } if stage == "content.market_opportunity"));
        assert!(analyst.viability_inputs().is_empty());
        assert!(!state.contains(fields::CONTENT_ANALYSIS));
        // Siblings were still merged for diagnostics
        assert!(state.contains(&fields::dimension("problem_clarity")));
    }

    #[tokio::test]
    async fn test_viability_declares_every_fan_out_field() {
        let analyst: Arc<dyn ContentAnalyst> = Arc::new(FakeAnalyst::new());
        let stage = ViabilityStage::new(vec!["problem_clarity".into()], analyst);
        assert_eq!(
            stage.inputs(),
            vec![
                "transcript".to_string(),
                "content.dimension.problem_clarity".to_string(),
                "content.pitch_structure".to_string(),
            ]
        );
    }
}
