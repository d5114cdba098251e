//! Typed error hierarchy for the pitch panel.
//!
//! Four enums cover the subsystems:
//! - `ScorerError`: a single external call (scorer, upstream producer, LLM)
//! - `PipelineError`: the one terminal error a run surfaces
//! - `SinkError`: progress notification failures, never propagated
//! - `ConfigError`: configuration loading and validation

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of one externally-callable operation.
///
/// The split between `Transient` and `Permanent` drives the retry policy:
/// only transient failures are retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScorerError {
    /// Rate-limited or temporarily unavailable.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Invalid input or malformed upstream data.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Referenced input does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input exists but could not be decoded.
    #[error("decode failure: {0}")]
    DecodeFailure(String),
}

impl ScorerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether the operation may succeed if simply tried again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Classification of a terminal run error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Permanent,
    FieldConflict,
    RetriesExhausted,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::FieldConflict => "field_conflict",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Errors that abort a pipeline run.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: ScorerError,
    },

    #[error("Field '{field}' already written in this run (stage '{stage}')")]
    FieldConflict { stage: String, field: String },

    #[error("Stage '{stage}' requires field '{field}' which is not present")]
    MissingInput { stage: String, field: String },

    #[error("Stage '{stage}' wrote undeclared field '{field}'")]
    UndeclaredOutput { stage: String, field: String },

    #[error("Stage '{stage}' succeeded without writing declared field '{field}'")]
    MissingOutput { stage: String, field: String },

    #[error("Field '{field}' holds malformed data: {message}")]
    MalformedField { field: String, message: String },

    #[error("Stage '{stage}' gave up after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        stage: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Stage '{stage}' exceeded its {deadline:?} deadline after {attempts} attempt(s)")]
    DeadlineExceeded {
        stage: String,
        attempts: u32,
        deadline: Duration,
    },

    #[error("Stage '{stage}' panicked or was aborted: {message}")]
    TaskFailed { stage: String, message: String },

    #[error("Failed to prepare run workspace: {0}")]
    Workspace(String),

    #[error("Run cancelled before stage '{stage}'")]
    Cancelled { stage: String },
}

impl PipelineError {
    pub fn stage(stage: &str, source: ScorerError) -> Self {
        Self::Stage {
            stage: stage.to_string(),
            source,
        }
    }

    /// Terminal classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Stage { source, .. } if source.is_transient() => ErrorKind::Transient,
            Self::Stage { .. } => ErrorKind::Permanent,
            Self::FieldConflict { .. } => ErrorKind::FieldConflict,
            Self::MissingInput { .. }
            | Self::UndeclaredOutput { .. }
            | Self::MissingOutput { .. }
            | Self::MalformedField { .. }
            | Self::TaskFailed { .. }
            | Self::Workspace(_) => ErrorKind::Permanent,
            Self::RetriesExhausted { .. } | Self::DeadlineExceeded { .. } => {
                ErrorKind::RetriesExhausted
            }
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Whether this error counts as permanent in the transient/permanent taxonomy.
    ///
    /// Field contract violations are permanent: re-running cannot fix them.
    pub fn is_permanent(&self) -> bool {
        matches!(self.kind(), ErrorKind::Permanent | ErrorKind::FieldConflict)
    }
}

/// A progress sink rejected an event.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Progress channel is full")]
    Full,

    #[error("Progress channel is closed")]
    Closed,

    #[error("Progress sink failed: {0}")]
    Other(String),
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scorer_error_transient_classification() {
        assert!(ScorerError::transient("429").is_transient());
        assert!(!ScorerError::permanent("bad json").is_transient());
        assert!(!ScorerError::NotFound("a.mp4".into()).is_transient());
        assert!(!ScorerError::DecodeFailure("codec".into()).is_transient());
    }

    #[test]
    fn test_pipeline_error_kinds() {
        let err = PipelineError::stage("tone", ScorerError::permanent("x"));
        assert_eq!(err.kind(), ErrorKind::Permanent);

        let err = PipelineError::FieldConflict {
            stage: "tone".into(),
            field: "tone_metrics".into(),
        };
        assert_eq!(err.kind(), ErrorKind::FieldConflict);
        assert!(err.is_permanent());

        let err = PipelineError::DeadlineExceeded {
            stage: "tone".into(),
            attempts: 2,
            deadline: Duration::from_secs(5),
        };
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        assert!(!err.is_permanent());

        let err = PipelineError::Cancelled {
            stage: "sharks".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_pipeline_error_carries_root_cause() {
        use std::error::Error as _;
        let err = PipelineError::stage("transcribe", ScorerError::DecodeFailure("wav".into()));
        let source = err.source().expect("stage error has a source");
        assert!(source.to_string().contains("wav"));
        assert!(err.to_string().contains("transcribe"));
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::RetriesExhausted.to_string(), "retries_exhausted");
        assert_eq!(ErrorKind::FieldConflict.to_string(), "field_conflict");
    }

    #[test]
    fn test_all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ScorerError::transient("x"));
        assert_std_error(&PipelineError::Workspace("x".into()));
        assert_std_error(&SinkError::Full);
        assert_std_error(&ConfigError::Invalid("x".into()));
    }
}
