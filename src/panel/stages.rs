//! Stages that call the persona scorer and the panel aggregator.

use super::personas::Persona;
use crate::errors::PipelineError;
use crate::pipeline::state::fields;
use crate::pipeline::{PartialUpdate, Stage, StageContext, StageOutcome, StateSnapshot};
use crate::scoring::{PanelAggregator, PersonaResult, Scorer, ScoringContext};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Fields every persona reads.
pub fn context_fields() -> Vec<String> {
    vec![
        fields::TRANSCRIPT.to_string(),
        fields::TONE_METRICS.to_string(),
        fields::CONTENT_ANALYSIS.to_string(),
    ]
}

/// Assemble the shared upstream context from a snapshot.
pub fn read_context(snapshot: &StateSnapshot) -> Result<ScoringContext, PipelineError> {
    Ok(ScoringContext {
        transcript: snapshot.get(fields::TRANSCRIPT)?,
        tone_metrics: snapshot.get(fields::TONE_METRICS)?,
        content: snapshot.get(fields::CONTENT_ANALYSIS)?,
    })
}

/// Scores the upstream context as one persona.
///
/// Reads only the shared context, never another persona's result.
pub struct PersonaStage {
    name: String,
    persona: Persona,
    scorer: Arc<dyn Scorer>,
}

impl PersonaStage {
    pub fn new(persona: Persona, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            name: fields::persona(&persona.id()),
            persona,
            scorer,
        }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    async fn score(&self, ctx: &StageContext, input: StateSnapshot) -> Result<PartialUpdate, PipelineError> {
        let context = read_context(&input)?;
        let verdict = ctx
            .invoker
            .invoke(&self.name, &ctx.policy, |_| {
                self.scorer.score(&self.persona, &context)
            })
            .await?;

        info!(persona = %self.persona.id(), label = %verdict.label, "persona verdict");

        let result = PersonaResult {
            persona_id: self.persona.id(),
            verdict,
        };
        PartialUpdate::new().with(&self.name, &result)
    }
}

#[async_trait]
impl Stage for PersonaStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<String> {
        context_fields()
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    async fn run(&self, ctx: &StageContext, input: StateSnapshot) -> StageOutcome {
        self.score(ctx, input).await.into()
    }
}

/// Combines every persona result into the panel outcome.
pub struct AggregatorStage {
    persona_fields: Vec<String>,
    aggregator: Arc<dyn PanelAggregator>,
}

impl AggregatorStage {
    pub const NAME: &'static str = "aggregate";

    /// `persona_ids` fixes the order results are handed to the aggregator.
    pub fn new(persona_ids: &[String], aggregator: Arc<dyn PanelAggregator>) -> Self {
        Self {
            persona_fields: persona_ids.iter().map(|id| fields::persona(id)).collect(),
            aggregator,
        }
    }

    async fn combine(
        &self,
        ctx: &StageContext,
        input: StateSnapshot,
    ) -> Result<PartialUpdate, PipelineError> {
        let context = read_context(&input)?;
        let results = self
            .persona_fields
            .iter()
            .map(|field| input.get::<PersonaResult>(field))
            .collect::<Result<Vec<_>, _>>()?;

        let aggregate = ctx
            .invoker
            .invoke(Self::NAME, &ctx.policy, |_| {
                self.aggregator.aggregate(&context, &results)
            })
            .await?;

        info!(label = %aggregate.final_label, personas = results.len(), "panel aggregate");
        PartialUpdate::new().with(fields::AGGREGATE, &aggregate)
    }
}

#[async_trait]
impl Stage for AggregatorStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inputs(&self) -> Vec<String> {
        let mut inputs = context_fields();
        inputs.extend(self.persona_fields.iter().cloned());
        inputs
    }

    fn outputs(&self) -> Vec<String> {
        vec![fields::AGGREGATE.to_string()]
    }

    async fn run(&self, ctx: &StageContext, input: StateSnapshot) -> StageOutcome {
        self.combine(ctx, input).await.into()
    }
}
