//! The unit of work the driver schedules.

use super::state::{PartialUpdate, StateSnapshot};
use crate::errors::PipelineError;
use crate::retry::{RetryPolicy, RetryingInvoker};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Result of running one stage handler.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Success(PartialUpdate),
    Failure(PipelineError),
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success(_))
    }

    pub fn into_result(self) -> Result<PartialUpdate, PipelineError> {
        match self {
            StageOutcome::Success(update) => Ok(update),
            StageOutcome::Failure(err) => Err(err),
        }
    }
}

impl From<Result<PartialUpdate, PipelineError>> for StageOutcome {
    fn from(result: Result<PartialUpdate, PipelineError>) -> Self {
        match result {
            Ok(update) => StageOutcome::Success(update),
            Err(err) => StageOutcome::Failure(err),
        }
    }
}

/// Run-scoped services handed to every stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub invoker: RetryingInvoker,
    pub policy: RetryPolicy,
    pub workdir: PathBuf,
    pub cancel: CancellationToken,
}

impl StageContext {
    /// Build a context whose invoker shares the run's cancellation token, so
    /// backoff waits end as soon as the run is cancelled.
    pub fn new(
        invoker: RetryingInvoker,
        policy: RetryPolicy,
        workdir: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            invoker: invoker.with_cancellation(cancel.clone()),
            policy,
            workdir: workdir.into(),
            cancel,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}

/// A named unit of work with declared field contracts.
///
/// The driver guarantees every declared input is present before `run` is
/// called, and rejects updates that write anything outside `outputs`.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Fields this stage reads.
    fn inputs(&self) -> Vec<String>;

    /// Fields this stage writes on success.
    fn outputs(&self) -> Vec<String>;

    async fn run(&self, ctx: &StageContext, input: StateSnapshot) -> StageOutcome;
}

/// Check a successful update against the stage's declared outputs.
pub fn validate_outputs(stage: &dyn Stage, update: &PartialUpdate) -> Result<(), PipelineError> {
    let declared: BTreeSet<String> = stage.outputs().into_iter().collect();
    let written: BTreeSet<&str> = update.fields().collect();

    if let Some(field) = written.iter().find(|f| !declared.contains(**f)) {
        return Err(PipelineError::UndeclaredOutput {
            stage: stage.name().to_string(),
            field: field.to_string(),
        });
    }

    if let Some(field) = declared.iter().find(|f| !written.contains(f.as_str())) {
        return Err(PipelineError::MissingOutput {
            stage: stage.name().to_string(),
            field: field.clone(),
        });
    }

    Ok(())
}

/// A stage backed by a closure, for small glue stages and tests.
pub struct FnStage<F> {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    handler: F,
}

impl<F, Fut> FnStage<F>
where
    F: Fn(StateSnapshot) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageOutcome> + Send + 'static,
{
    pub fn new(name: &str, inputs: &[&str], outputs: &[&str], handler: F) -> Self {
        Self {
            name: name.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(StateSnapshot) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageOutcome> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<String> {
        self.outputs.clone()
    }

    async fn run(&self, _ctx: &StageContext, input: StateSnapshot) -> StageOutcome {
        (self.handler)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage() -> FnStage<impl Fn(StateSnapshot) -> std::future::Ready<StageOutcome> + Send + Sync>
    {
        FnStage::new("transcribe", &["audio"], &["transcript", "segments"], |_| {
            std::future::ready(StageOutcome::Success(PartialUpdate::new()))
        })
    }

    #[test]
    fn test_validate_outputs_accepts_exact_contract() {
        let update = PartialUpdate::new()
            .with_value("transcript", json!("hi"))
            .with_value("segments", json!([]));
        assert!(validate_outputs(&stage(), &update).is_ok());
    }

    #[test]
    fn test_validate_outputs_rejects_undeclared_field() {
        let update = PartialUpdate::new()
            .with_value("transcript", json!("hi"))
            .with_value("segments", json!([]))
            .with_value("tone_metrics", json!({}));
        let err = validate_outputs(&stage(), &update).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UndeclaredOutput { ref field, .. } if field == "tone_metrics"
        ));
    }

    #[test]
    fn test_validate_outputs_rejects_missing_field() {
        let update = PartialUpdate::new().with_value("transcript", json!("hi"));
        let err = validate_outputs(&stage(), &update).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingOutput { ref field, .. } if field == "segments"
        ));
    }

    #[test]
    fn test_outcome_conversions() {
        let ok = StageOutcome::from(Ok::<_, PipelineError>(PartialUpdate::new()));
        assert!(ok.is_success());

        let err = StageOutcome::from(Err::<PartialUpdate, _>(PipelineError::Workspace(
            "gone".into(),
        )));
        assert!(!err.is_success());
        assert!(err.into_result().is_err());
    }

    #[tokio::test]
    async fn test_context_shares_cancellation_with_invoker() {
        let cancel = CancellationToken::new();
        let ctx = StageContext::new(
            RetryingInvoker::default(),
            RetryPolicy::default(),
            "/tmp",
            cancel.clone(),
        );
        cancel.cancel();
        assert!(ctx.cancel.is_cancelled());
        assert_eq!(ctx.workdir(), Path::new("/tmp"));
    }
}
