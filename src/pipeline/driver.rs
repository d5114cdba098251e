//! Sequential driver over [`SharedState`].
//!
//! The driver is the only place the run state is mutated. It validates each
//! stage's field contract, runs parallel groups on spawned tasks bounded by a
//! semaphore, and merges their updates in declared order once every member
//! has finished.

use super::parallel::{CancelPolicy, ParallelGroup};
use super::stage::{Stage, StageContext, StageOutcome, validate_outputs};
use super::state::{PartialUpdate, SharedState};
use crate::errors::PipelineError;
use crate::progress::Notifier;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A composite step that drives its own stages through the [`Driver`].
#[async_trait]
pub trait SubGraph: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, driver: &Driver, state: &mut SharedState) -> Result<(), PipelineError>;
}

/// One entry in a run plan.
#[derive(Clone)]
pub enum Step {
    Single(Arc<dyn Stage>),
    Parallel(ParallelGroup),
    /// A fan-out group followed by the stage that consumes all of its fields.
    FanIn {
        name: String,
        group: ParallelGroup,
        aggregate: Arc<dyn Stage>,
    },
    Graph(Arc<dyn SubGraph>),
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Single(stage) => f.debug_tuple("Single").field(&stage.name()).finish(),
            Step::Parallel(group) => f.debug_tuple("Parallel").field(group).finish(),
            Step::FanIn {
                name,
                group,
                aggregate,
            } => f
                .debug_struct("FanIn")
                .field("name", name)
                .field("group", group)
                .field("aggregate", &aggregate.name())
                .finish(),
            Step::Graph(graph) => f.debug_tuple("Graph").field(&graph.name()).finish(),
        }
    }
}

impl Step {
    /// Build a fan-out/fan-in step.
    ///
    /// The aggregate must declare every field the group produces as an input.
    pub fn fan_in(
        name: &str,
        group: ParallelGroup,
        aggregate: Arc<dyn Stage>,
    ) -> Result<Self, PipelineError> {
        let inputs = aggregate.inputs();
        if let Some(field) = group.outputs().into_iter().find(|f| !inputs.contains(f)) {
            return Err(PipelineError::MissingInput {
                stage: aggregate.name().to_string(),
                field,
            });
        }
        Ok(Step::FanIn {
            name: name.to_string(),
            group,
            aggregate,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Single(stage) => stage.name(),
            Step::Parallel(group) => group.name(),
            Step::FanIn { name, .. } => name,
            Step::Graph(graph) => graph.name(),
        }
    }
}

/// Executes stages and steps against one run's state.
#[derive(Debug, Clone)]
pub struct Driver {
    ctx: StageContext,
    notifier: Notifier,
}

impl Driver {
    pub fn new(ctx: StageContext, notifier: Notifier) -> Self {
        Self { ctx, notifier }
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Fail with `Cancelled` if the run has been cancelled.
    pub fn check_cancelled(&self, stage: &str) -> Result<(), PipelineError> {
        if self.ctx.cancel.is_cancelled() {
            info!(stage, "run cancelled");
            return Err(PipelineError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }

    /// Run one stage and merge its update. Returns the new state version.
    pub async fn run_stage(
        &self,
        stage: &dyn Stage,
        state: &mut SharedState,
    ) -> Result<u64, PipelineError> {
        let name = stage.name();
        self.check_cancelled(name)?;

        let input = state.get(name, &stage.inputs())?;
        debug!(stage = name, version = input.version(), "running stage");

        let update = stage.run(&self.ctx, input).await.into_result()?;
        validate_outputs(stage, &update)?;

        let version = state.merge(name, update)?;
        debug!(stage = name, version, "stage merged");
        Ok(version)
    }

    /// Run every member of `group` concurrently, then merge in declared order.
    ///
    /// The join waits for all members even when some fail. Successful updates
    /// are merged regardless, and the first error in declared order (a member
    /// failure or a merge conflict) is returned.
    pub async fn run_parallel(
        &self,
        group: &ParallelGroup,
        state: &mut SharedState,
    ) -> Result<u64, PipelineError> {
        self.check_cancelled(group.name())?;

        // All inputs are resolved against the pre-group state.
        let mut inputs = Vec::with_capacity(group.members().len());
        for member in group.members() {
            inputs.push(state.get(member.name(), &member.inputs())?);
        }

        let semaphore = Arc::new(Semaphore::new(
            group.max_concurrency().min(Semaphore::MAX_PERMITS),
        ));
        let mut handles: Vec<JoinHandle<Result<PartialUpdate, PipelineError>>> =
            Vec::with_capacity(inputs.len());

        for (member, input) in group.members().iter().zip(inputs) {
            let member = Arc::clone(member);
            let ctx = self.ctx.clone();
            let notifier = self.notifier.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel_policy = group.cancel_policy();
            let announce = group.announces_starts();

            handles.push(tokio::spawn(async move {
                let name = member.name().to_string();
                let _permit =
                    semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| PipelineError::TaskFailed {
                            stage: name.clone(),
                            message: e.to_string(),
                        })?;

                if ctx.cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled { stage: name });
                }
                if announce {
                    notifier.emit(&format!("{}.start", name));
                }

                let outcome = match cancel_policy {
                    CancelPolicy::Drain => member.run(&ctx, input).await,
                    CancelPolicy::Interrupt => tokio::select! {
                        outcome = member.run(&ctx, input) => outcome,
                        _ = ctx.cancel.cancelled() => StageOutcome::Failure(
                            PipelineError::Cancelled { stage: name.clone() },
                        ),
                    },
                };

                let update = outcome.into_result()?;
                validate_outputs(member.as_ref(), &update)?;

                notifier.emit_with(
                    &format!("{}.done", name),
                    json!({ "fields": update.fields().collect::<Vec<_>>() }),
                );
                Ok(update)
            }));
        }

        let mut first_error: Option<PipelineError> = None;
        let mut version = state.version();

        for (member, handle) in group.members().iter().zip(handles) {
            let result = handle.await.unwrap_or_else(|e| {
                Err(PipelineError::TaskFailed {
                    stage: member.name().to_string(),
                    message: e.to_string(),
                })
            });

            let merged = result.and_then(|update| state.merge(member.name(), update));
            match merged {
                Ok(v) => version = v,
                Err(e) => {
                    warn!(group = group.name(), stage = member.name(), error = %e, "parallel member failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(group = group.name(), version, "parallel group merged");
                Ok(version)
            }
        }
    }

    /// Execute one plan step, emitting `<name>.start` and `<name>.done`.
    pub async fn execute_step(
        &self,
        step: &Step,
        state: &mut SharedState,
    ) -> Result<(), PipelineError> {
        let name = step.name();
        self.check_cancelled(name)?;
        self.notifier.emit(&format!("{}.start", name));

        match step {
            Step::Single(stage) => {
                self.run_stage(stage.as_ref(), state).await?;
            }
            Step::Parallel(group) => {
                self.run_parallel(group, state).await?;
            }
            Step::FanIn {
                group, aggregate, ..
            } => {
                self.run_parallel(group, state).await?;
                self.run_stage(aggregate.as_ref(), state).await?;
                self.notifier.emit(&format!("{}.done", aggregate.name()));
            }
            Step::Graph(graph) => {
                graph.execute(self, state).await?;
            }
        }

        self.notifier
            .emit_with(&format!("{}.done", name), json!({ "version": state.version() }));
        Ok(())
    }

    /// Execute steps strictly in order, stopping at the first failure.
    pub async fn run_plan(&self, plan: &[Step], state: &mut SharedState) -> Result<(), PipelineError> {
        for step in plan {
            self.execute_step(step, state).await?;
        }
        // A cancel that lands while the last step runs still cancels the run.
        self.check_cancelled("complete")
    }
}
