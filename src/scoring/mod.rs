//! Scorer contracts and the values they produce.
//!
//! Scorers are external collaborators: the orchestrator never inspects how a
//! verdict was reached, only whether the call succeeded, failed transiently,
//! or failed permanently (see [`ScorerError`]).

pub mod types;

pub use types::{
    AggregateResult, ContentAnalysis, DimensionScore, Label, PersonaResult, PitchStructure,
    ScoringContext, Segment, ToneMetrics, Transcript, Verdict, ViabilityAssessment,
};

use crate::errors::ScorerError;
use crate::panel::Persona;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scores the shared upstream context from one persona's point of view.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, persona: &Persona, context: &ScoringContext)
    -> Result<Verdict, ScorerError>;
}

/// Combines all persona results into the panel's outcome.
///
/// How disagreeing labels are reconciled is entirely up to the implementation.
#[async_trait]
pub trait PanelAggregator: Send + Sync {
    async fn aggregate(
        &self,
        context: &ScoringContext,
        results: &[PersonaResult],
    ) -> Result<AggregateResult, ScorerError>;
}

/// Scores pitch content: per-dimension fan-out plus the viability fan-in.
#[async_trait]
pub trait ContentAnalyst: Send + Sync {
    async fn score_dimension(
        &self,
        dimension: &Dimension,
        transcript: &str,
    ) -> Result<DimensionScore, ScorerError>;

    async fn assess_structure(&self, transcript: &str) -> Result<PitchStructure, ScorerError>;

    async fn assess_viability(
        &self,
        transcript: &str,
        dimensions: &BTreeMap<String, DimensionScore>,
        structure: &PitchStructure,
    ) -> Result<ViabilityAssessment, ScorerError>;
}

/// One content dimension a pitch is scored on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// Stable identifier, also the state key suffix.
    pub id: String,
    /// Human-readable name used in prompts.
    pub title: String,
    /// What the scorer should look for.
    pub focus: String,
}

impl Dimension {
    pub fn new(id: &str, title: &str, focus: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            focus: focus.to_string(),
        }
    }

    /// The six dimensions every pitch is scored on by default.
    pub fn builtins() -> Vec<Dimension> {
        vec![
            Dimension::new(
                "problem_clarity",
                "problem clarity",
                "who is affected, what concretely goes wrong, and what it costs them",
            ),
            Dimension::new(
                "product_differentiation",
                "product differentiation",
                "how concretely the founder explains what makes the product different from existing solutions or the status quo",
            ),
            Dimension::new(
                "business_model_strength",
                "business model strength",
                "who pays, what they pay for, and how often",
            ),
            Dimension::new(
                "market_opportunity",
                "market opportunity articulation",
                "target customer, market size, and why now",
            ),
            Dimension::new(
                "revenue_logic",
                "revenue logic",
                "pricing, revenue streams, and whether the numbers add up",
            ),
            Dimension::new(
                "competition_awareness",
                "competition awareness",
                "named competitors or alternatives and a credible edge over them",
            ),
        ]
    }

    /// Look up a built-in dimension by id.
    pub fn builtin(id: &str) -> Option<Dimension> {
        Self::builtins().into_iter().find(|d| d.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_dimensions() {
        let dims = Dimension::builtins();
        assert_eq!(dims.len(), 6);
        assert_eq!(dims[0].id, "problem_clarity");
        assert!(Dimension::builtin("revenue_logic").is_some());
        assert!(Dimension::builtin("vibes").is_none());
    }
}
