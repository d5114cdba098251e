//! The persona panel: personas, their stages, and the graph that runs them.

pub mod graph;
pub mod personas;
pub mod stages;

pub use graph::{PanelState, PersonaGraph, PersonaSchedule};
pub use personas::{Persona, PersonaKind};
pub use stages::{AggregatorStage, PersonaStage, context_fields, read_context};

#[cfg(test)]
pub(crate) mod testing {
    use super::Persona;
    use crate::errors::ScorerError;
    use crate::pipeline::state::fields;
    use crate::pipeline::{PartialUpdate, SharedState};
    use crate::scoring::{
        AggregateResult, ContentAnalysis, DimensionScore, Label, PanelAggregator, PersonaResult,
        PitchStructure, Scorer, ScoringContext, Verdict, ViabilityAssessment,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    /// Scorer that records calls and replays scripted failures per persona.
    ///
    /// The skeptic votes Unfavorable and everyone else Favorable, unless a
    /// unanimous label is set.
    #[derive(Default)]
    pub struct FakeScorer {
        failures: Mutex<HashMap<String, VecDeque<ScorerError>>>,
        calls: Mutex<Vec<String>>,
        unanimous: Option<Label>,
    }

    impl FakeScorer {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `errors.len()` calls for `persona_id`, in order.
        pub fn failing(self, persona_id: &str, errors: Vec<ScorerError>) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert(persona_id.to_string(), errors.into());
            self
        }

        /// Every persona votes `label`.
        pub fn unanimous(mut self, label: Label) -> Self {
            self.unanimous = Some(label);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Scorer for FakeScorer {
        async fn score(
            &self,
            persona: &Persona,
            _context: &ScoringContext,
        ) -> Result<Verdict, ScorerError> {
            let id = persona.id();
            self.calls.lock().unwrap().push(id.clone());

            if let Some(err) = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&id)
                .and_then(|q| q.pop_front())
            {
                return Err(err);
            }

            let label = match self.unanimous {
                Some(label) => label,
                None if id == "skeptic" => Label::Unfavorable,
                None => Label::Favorable,
            };
            Ok(Verdict::new(label, format!("{} has thoughts", persona.display_name())))
        }
    }

    /// Aggregator taking the majority label; ties go to NeedsMoreInfo.
    #[derive(Default)]
    pub struct FakeAggregator {
        calls: AtomicUsize,
        received: Mutex<Vec<PersonaResult>>,
        cancel: Option<CancellationToken>,
    }

    impl FakeAggregator {
        pub fn new() -> Self {
            Self::default()
        }

        /// Cancel `token` while aggregating, then answer normally.
        pub fn cancelling(mut self, token: CancellationToken) -> Self {
            self.cancel = Some(token);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Persona results handed to the last call.
        pub fn received(&self) -> Vec<PersonaResult> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PanelAggregator for FakeAggregator {
        async fn aggregate(
            &self,
            _context: &ScoringContext,
            results: &[PersonaResult],
        ) -> Result<AggregateResult, ScorerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.received.lock().unwrap() = results.to_vec();
            if let Some(token) = &self.cancel {
                token.cancel();
            }

            let favorable = results
                .iter()
                .filter(|r| r.verdict.label == Label::Favorable)
                .count();
            let against = results.len() - favorable;
            let final_label = match favorable.cmp(&against) {
                std::cmp::Ordering::Greater => Label::Favorable,
                std::cmp::Ordering::Less => Label::Unfavorable,
                std::cmp::Ordering::Equal => Label::NeedsMoreInfo,
            };

            Ok(AggregateResult {
                merged_rationale: results
                    .iter()
                    .map(|r| r.verdict.rationale.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
                final_label,
            })
        }
    }

    pub fn sample_content() -> ContentAnalysis {
        let mut dimensions = BTreeMap::new();
        dimensions.insert(
            "problem_clarity".to_string(),
            DimensionScore {
                score: 80,
                reason: "Clear who is affected".to_string(),
            },
        );
        ContentAnalysis {
            dimensions,
            pitch_structure: PitchStructure {
                hook_present: true,
                problem_present: true,
                solution_present: true,
                ask_present: false,
                detected_order: vec!["hook".into(), "problem".into(), "solution".into()],
                structure_quality_score: 70,
                structure_comment: "No explicit ask".to_string(),
            },
            viability: ViabilityAssessment {
                score: 65,
                risk_level: "medium".to_string(),
                summary_comment: "Promising but thin on numbers".to_string(),
                key_strengths: vec!["Clear problem".to_string()],
                key_risks: vec!["Unclear pricing".to_string()],
            },
        }
    }

    /// State holding everything the panel reads.
    pub fn context_state() -> SharedState {
        let mut state = SharedState::new();
        state
            .merge(
                "upstream",
                PartialUpdate::new()
                    .with_value(fields::TRANSCRIPT, json!("We help clinics bill faster."))
                    .with_value(fields::TONE_METRICS, json!({"confidence_score": 72.0}))
                    .with(fields::CONTENT_ANALYSIS, &sample_content())
                    .unwrap(),
            )
            .unwrap();
        state
    }
}
