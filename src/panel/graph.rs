//! The persona panel: a fixed chain of persona stages feeding the aggregator.
//!
//! Personas never read each other's results, so the order they run in is a
//! scheduling choice rather than a data dependency. The default
//! [`PersonaSchedule::Sequential`] calls one scorer at a time (optionally
//! spaced out to stay under a provider's rate limit); `Parallel` runs them as
//! a bounded parallel group. Either way results merge in declared order and
//! the aggregator runs only after every persona has succeeded.

use super::personas::Persona;
use super::stages::{AggregatorStage, PersonaStage};
use crate::errors::PipelineError;
use crate::pipeline::{Driver, ParallelGroup, SharedState, Stage, SubGraph};
use crate::scoring::{PanelAggregator, PersonaResult, Scorer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How persona stages are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaSchedule {
    /// One persona at a time, waiting `spacing` between calls.
    Sequential { spacing: Duration },
    /// All personas at once, at most `max_concurrency` in flight.
    Parallel { max_concurrency: usize },
}

impl Default for PersonaSchedule {
    fn default() -> Self {
        Self::Sequential {
            spacing: Duration::ZERO,
        }
    }
}

/// Panel execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "index", rename_all = "snake_case")]
pub enum PanelState {
    NotStarted,
    /// Scoring (sequential) or merging (parallel) the persona at this index.
    Persona(usize),
    Aggregating,
    Done,
    Failed,
}

impl PanelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PanelState::Done | PanelState::Failed)
    }
}

/// Persona chain plus aggregator, run as one plan step.
pub struct PersonaGraph {
    name: String,
    stages: Vec<Arc<PersonaStage>>,
    aggregator: Arc<AggregatorStage>,
    schedule: PersonaSchedule,
    trace: Mutex<Vec<PanelState>>,
}

impl PersonaGraph {
    pub const DEFAULT_NAME: &'static str = "sharks";

    pub fn new(
        personas: Vec<Persona>,
        scorer: Arc<dyn Scorer>,
        aggregator: Arc<dyn PanelAggregator>,
    ) -> Self {
        let ids: Vec<String> = personas.iter().map(|p| p.id()).collect();
        let stages = personas
            .into_iter()
            .map(|p| Arc::new(PersonaStage::new(p, Arc::clone(&scorer))))
            .collect();

        Self {
            name: Self::DEFAULT_NAME.to_string(),
            stages,
            aggregator: Arc::new(AggregatorStage::new(&ids, aggregator)),
            schedule: PersonaSchedule::default(),
            trace: Mutex::new(vec![PanelState::NotStarted]),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_schedule(mut self, schedule: PersonaSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn schedule(&self) -> PersonaSchedule {
        self.schedule
    }

    /// Persona ids in declared order.
    pub fn persona_ids(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.persona().id()).collect()
    }

    /// State transitions of the most recent execution.
    pub fn trace(&self) -> Vec<PanelState> {
        self.trace
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Persona results from `state`, in declared order.
    pub fn results(&self, state: &SharedState) -> Result<Vec<PersonaResult>, PipelineError> {
        self.stages
            .iter()
            .map(|s| state.read::<PersonaResult>(s.name()))
            .collect()
    }

    fn transition(&self, next: PanelState) {
        debug!(graph = %self.name, state = ?next, "panel transition");
        self.trace
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(next);
    }

    fn reset(&self) {
        let mut trace = self
            .trace
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        trace.clear();
        trace.push(PanelState::NotStarted);
    }

    fn emit_done(&self, driver: &Driver, stage: &PersonaStage, state: &SharedState) {
        let payload = match state.read::<PersonaResult>(stage.name()) {
            Ok(result) => json!({ "label": result.verdict.label }),
            Err(_) => json!(null),
        };
        driver
            .notifier()
            .emit_with(&format!("{}.done", stage.name()), payload);
    }

    async fn run_sequential(
        &self,
        driver: &Driver,
        state: &mut SharedState,
        spacing: Duration,
    ) -> Result<(), PipelineError> {
        for (index, stage) in self.stages.iter().enumerate() {
            if index > 0 && !spacing.is_zero() {
                driver.context().invoker.wait(stage.name(), spacing).await?;
            }

            self.transition(PanelState::Persona(index));
            driver.notifier().emit(&format!("{}.start", stage.name()));
            driver.run_stage(stage.as_ref(), state).await?;
            self.emit_done(driver, stage, state);
        }
        Ok(())
    }

    async fn run_parallel(
        &self,
        driver: &Driver,
        state: &mut SharedState,
        max_concurrency: usize,
    ) -> Result<(), PipelineError> {
        let group = ParallelGroup::new(&self.name)
            .with_members(self.stages.iter().map(|s| Arc::clone(s) as Arc<dyn Stage>))
            .with_max_concurrency(max_concurrency)
            .with_start_events();

        driver.run_parallel(&group, state).await?;

        // Merges were applied in declared order
        for index in 0..self.stages.len() {
            self.transition(PanelState::Persona(index));
        }
        Ok(())
    }

    async fn run_panel(&self, driver: &Driver, state: &mut SharedState) -> Result<(), PipelineError> {
        match self.schedule {
            PersonaSchedule::Sequential { spacing } => {
                self.run_sequential(driver, state, spacing).await?
            }
            PersonaSchedule::Parallel { max_concurrency } => {
                self.run_parallel(driver, state, max_concurrency).await?
            }
        }

        self.transition(PanelState::Aggregating);
        driver.notifier().emit(&format!("{}.start", AggregatorStage::NAME));
        driver.run_stage(self.aggregator.as_ref(), state).await?;
        driver.notifier().emit(&format!("{}.done", AggregatorStage::NAME));
        Ok(())
    }
}

#[async_trait]
impl SubGraph for PersonaGraph {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, driver: &Driver, state: &mut SharedState) -> Result<(), PipelineError> {
        self.reset();
        info!(graph = %self.name, personas = self.stages.len(), schedule = ?self.schedule, "running persona panel");

        match self.run_panel(driver, state).await {
            Ok(()) => {
                self.transition(PanelState::Done);
                Ok(())
            }
            Err(e) => {
                warn!(graph = %self.name, error = %e, "persona panel failed");
                self.transition(PanelState::Failed);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, ScorerError};
    use crate::panel::testing::{FakeAggregator, FakeScorer, context_state};
    use crate::pipeline::state::fields;
    use crate::pipeline::{StageContext, Step};
    use crate::progress::Notifier;
    use crate::progress::testing::CollectingSink;
    use crate::retry::testing::RecordingSleeper;
    use crate::retry::{Backoff, RetryPolicy, RetryingInvoker};
    use crate::scoring::{AggregateResult, Label};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct Harness {
        driver: Driver,
        sink: Arc<CollectingSink>,
        sleeper: Arc<RecordingSleeper>,
    }

    fn harness() -> Harness {
        let sink = Arc::new(CollectingSink::default());
        let sleeper = Arc::new(RecordingSleeper::default());
        let ctx = StageContext::new(
            RetryingInvoker::new(sleeper.clone()),
            RetryPolicy::default().with_backoff(Backoff::Fixed(Duration::from_secs(1))),
            std::env::temp_dir(),
            CancellationToken::new(),
        );
        Harness {
            driver: Driver::new(ctx, Notifier::new(Uuid::new_v4(), Some(sink.clone()))),
            sink,
            sleeper,
        }
    }

    fn graph(scorer: Arc<FakeScorer>, aggregator: Arc<FakeAggregator>) -> PersonaGraph {
        PersonaGraph::new(Persona::builtin_panel(), scorer, aggregator)
    }

    #[tokio::test]
    async fn test_sequential_panel_runs_in_declared_order() {
        let h = harness();
        let scorer = Arc::new(FakeScorer::new());
        let aggregator = Arc::new(FakeAggregator::new());
        let graph = graph(scorer.clone(), aggregator.clone());
        let mut state = context_state();

        graph.execute(&h.driver, &mut state).await.unwrap();

        assert_eq!(
            scorer.calls(),
            vec!["visionary", "finance_shark", "customer_advocate", "skeptic"]
        );
        assert_eq!(
            graph.trace(),
            vec![
                PanelState::NotStarted,
                PanelState::Persona(0),
                PanelState::Persona(1),
                PanelState::Persona(2),
                PanelState::Persona(3),
                PanelState::Aggregating,
                PanelState::Done,
            ]
        );
        assert_eq!(aggregator.calls(), 1);

        let aggregate: AggregateResult = state.read(fields::AGGREGATE).unwrap();
        assert_eq!(aggregate.final_label, Label::Favorable);

        let results = graph.results(&state).unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[3].persona_id, "skeptic");
        assert_eq!(results[3].verdict.label, Label::Unfavorable);

        assert_eq!(
            h.sink.stages(),
            vec![
                "persona.visionary.start",
                "persona.visionary.done",
                "persona.finance_shark.start",
                "persona.finance_shark.done",
                "persona.customer_advocate.start",
                "persona.customer_advocate.done",
                "persona.skeptic.start",
                "persona.skeptic.done",
                "aggregate.start",
                "aggregate.done",
            ]
        );
    }

    #[tokio::test]
    async fn test_permanent_persona_failure_skips_aggregator() {
        let h = harness();
        let scorer = Arc::new(
            FakeScorer::new()
                .failing("customer_advocate", vec![ScorerError::permanent("malformed verdict")]),
        );
        let aggregator = Arc::new(FakeAggregator::new());
        let graph = graph(scorer.clone(), aggregator.clone());
        let mut state = context_state();

        let err = graph.execute(&h.driver, &mut state).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert_eq!(aggregator.calls(), 0);
        assert!(!state.contains(fields::AGGREGATE));
        assert!(!state.contains(&fields::persona("skeptic")));
        assert_eq!(
            scorer.calls(),
            vec!["visionary", "finance_shark", "customer_advocate"]
        );
        assert_eq!(graph.trace().last(), Some(&PanelState::Failed));
        assert!(!graph.trace().contains(&PanelState::Aggregating));

        let stages = h.sink.stages();
        assert!(stages.contains(&"persona.finance_shark.done".to_string()));
        assert!(!stages.contains(&"persona.customer_advocate.done".to_string()));
        assert!(!stages.contains(&"persona.skeptic.done".to_string()));
        assert!(h.sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_transient_persona_failure_is_retried() {
        let h = harness();
        let scorer = Arc::new(FakeScorer::new().failing(
            "finance_shark",
            vec![ScorerError::transient("429"), ScorerError::transient("429")],
        ));
        let aggregator = Arc::new(FakeAggregator::new());
        let graph = graph(scorer.clone(), aggregator.clone());
        let mut state = context_state();

        graph.execute(&h.driver, &mut state).await.unwrap();

        assert_eq!(h.sleeper.recorded(), vec![Duration::from_secs(1); 2]);
        assert_eq!(
            scorer.calls().iter().filter(|c| *c == "finance_shark").count(),
            3
        );
        assert_eq!(aggregator.calls(), 1);
    }

    #[tokio::test]
    async fn test_sequential_spacing_between_personas() {
        let h = harness();
        let graph = graph(Arc::new(FakeScorer::new()), Arc::new(FakeAggregator::new()))
            .with_schedule(PersonaSchedule::Sequential {
                spacing: Duration::from_millis(250),
            });
        let mut state = context_state();

        graph.execute(&h.driver, &mut state).await.unwrap();

        // Three gaps between four personas; none before the first
        assert_eq!(h.sleeper.recorded(), vec![Duration::from_millis(250); 3]);
    }

    #[tokio::test]
    async fn test_parallel_schedule_merges_in_declared_order() {
        let h = harness();
        let scorer = Arc::new(FakeScorer::new());
        let aggregator = Arc::new(FakeAggregator::new());
        let graph = graph(scorer.clone(), aggregator.clone()).with_schedule(
            PersonaSchedule::Parallel { max_concurrency: 4 },
        );
        let mut state = context_state();

        graph.execute(&h.driver, &mut state).await.unwrap();

        let ids: Vec<String> = graph
            .results(&state)
            .unwrap()
            .into_iter()
            .map(|r| r.persona_id)
            .collect();
        assert_eq!(ids, graph.persona_ids());
        assert_eq!(scorer.calls().len(), 4);
        assert_eq!(aggregator.calls(), 1);
        assert_eq!(graph.trace().last(), Some(&PanelState::Done));
    }

    #[tokio::test]
    async fn test_parallel_start_events_wait_for_a_slot() {
        let h = harness();
        let graph = graph(Arc::new(FakeScorer::new()), Arc::new(FakeAggregator::new()))
            .with_schedule(PersonaSchedule::Parallel { max_concurrency: 1 });
        let mut state = context_state();

        graph.execute(&h.driver, &mut state).await.unwrap();

        let persona_events: Vec<String> = h
            .sink
            .stages()
            .into_iter()
            .filter(|s| s.starts_with("persona."))
            .collect();
        assert_eq!(persona_events.len(), 8);
        // With one slot every start is immediately followed by its own done
        for pair in persona_events.chunks(2) {
            let id = pair[0].strip_suffix(".start").unwrap();
            assert_eq!(pair[1], format!("{}.done", id));
        }
    }

    #[tokio::test]
    async fn test_graph_as_plan_step_emits_bracketing_events() {
        let h = harness();
        let graph: Arc<dyn SubGraph> = Arc::new(graph(
            Arc::new(FakeScorer::new()),
            Arc::new(FakeAggregator::new()),
        ));
        let mut state = context_state();

        h.driver
            .execute_step(&Step::Graph(graph), &mut state)
            .await
            .unwrap();

        let stages = h.sink.stages();
        assert_eq!(stages.first().map(String::as_str), Some("sharks.start"));
        assert_eq!(stages.last().map(String::as_str), Some("sharks.done"));
    }

    #[tokio::test]
    async fn test_missing_context_fails_before_any_scorer_call() {
        let h = harness();
        let scorer = Arc::new(FakeScorer::new());
        let graph = graph(scorer.clone(), Arc::new(FakeAggregator::new()));
        let mut state = SharedState::new();

        let err = graph.execute(&h.driver, &mut state).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
        assert!(scorer.calls().is_empty());
    }

    #[test]
    fn test_panel_state_terminal() {
        assert!(PanelState::Done.is_terminal());
        assert!(PanelState::Failed.is_terminal());
        assert!(!PanelState::Persona(2).is_terminal());
    }
}
