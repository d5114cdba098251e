//! Shared run state: a single-writer-per-field accumulating record.
//!
//! `SharedState` is owned by the driver for the lifetime of one run and is
//! only ever mutated through [`SharedState::merge`]. Stages never see the
//! state itself; they receive an immutable [`StateSnapshot`] restricted to
//! the fields they declared as inputs.

use crate::errors::PipelineError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Well-known field names written by the built-in stages.
pub mod fields {
    pub const SOURCE: &str = "source";
    pub const AUDIO: &str = "audio";
    pub const TRANSCRIPT: &str = "transcript";
    pub const SEGMENTS: &str = "segments";
    pub const TONE_METRICS: &str = "tone_metrics";
    pub const PITCH_STRUCTURE: &str = "content.pitch_structure";
    /// Dimension scores, structure and viability combined by the fan-in stage.
    pub const CONTENT_ANALYSIS: &str = "content.analysis";
    pub const AGGREGATE: &str = "panel.aggregate";

    /// Field holding the score for one content dimension.
    pub fn dimension(id: &str) -> String {
        format!("content.dimension.{}", id)
    }

    /// Field holding one persona's result.
    pub fn persona(id: &str) -> String {
        format!("persona.{}", id)
    }
}

/// A partial update produced by one stage, merged into the state after the
/// stage (or its enclosing parallel group) completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialUpdate {
    entries: Vec<(String, Value)>,
}

impl PartialUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a serializable value under `field`.
    pub fn with<T: Serialize>(mut self, field: &str, value: &T) -> Result<Self, PipelineError> {
        let value = serde_json::to_value(value).map_err(|e| PipelineError::MalformedField {
            field: field.to_string(),
            message: e.to_string(),
        })?;
        self.entries.push((field.to_string(), value));
        Ok(self)
    }

    /// Add a raw JSON value under `field`.
    pub fn with_value(mut self, field: &str, value: Value) -> Self {
        self.entries.push((field.to_string(), value));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Immutable view of (part of) the state handed to a stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    values: Arc<BTreeMap<String, Value>>,
    version: u64,
}

impl StateSnapshot {
    /// State version this snapshot was taken at.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Deserialize `field` into `T`.
    ///
    /// A field that is absent here was not declared as an input by the
    /// reading stage.
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Result<T, PipelineError> {
        let value = self
            .values
            .get(field)
            .ok_or_else(|| PipelineError::MissingInput {
                stage: "<snapshot>".to_string(),
                field: field.to_string(),
            })?;
        serde_json::from_value(value.clone()).map_err(|e| PipelineError::MalformedField {
            field: field.to_string(),
            message: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The accumulating record for one run.
#[derive(Debug, Default)]
pub struct SharedState {
    values: Arc<BTreeMap<String, Value>>,
    writers: BTreeMap<String, String>,
    version: u64,
}

impl SharedState {
    /// Create an empty state at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stage that wrote `field`, if any.
    pub fn writer_of(&self, field: &str) -> Option<&str> {
        self.writers.get(field).map(String::as_str)
    }

    /// Full snapshot of the current state.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            values: Arc::clone(&self.values),
            version: self.version,
        }
    }

    /// Snapshot restricted to `fields`; every field must be present.
    pub fn get<S: AsRef<str>>(&self, stage: &str, fields: &[S]) -> Result<StateSnapshot, PipelineError> {
        let mut values = BTreeMap::new();
        for field in fields {
            let field = field.as_ref();
            let value = self
                .values
                .get(field)
                .ok_or_else(|| PipelineError::MissingInput {
                    stage: stage.to_string(),
                    field: field.to_string(),
                })?;
            values.insert(field.to_string(), value.clone());
        }
        Ok(StateSnapshot {
            values: Arc::new(values),
            version: self.version,
        })
    }

    /// Typed read of one field from the full state.
    pub fn read<T: DeserializeOwned>(&self, field: &str) -> Result<T, PipelineError> {
        self.snapshot().get(field)
    }

    /// Merge a stage's partial update, returning the new version.
    ///
    /// The update is checked as a whole before anything is applied: if any
    /// key already exists (or appears twice in the update) the state is left
    /// untouched and `FieldConflict` is returned.
    pub fn merge(&mut self, stage: &str, update: PartialUpdate) -> Result<u64, PipelineError> {
        let mut seen = std::collections::BTreeSet::new();
        for field in update.fields() {
            if self.values.contains_key(field) || !seen.insert(field) {
                return Err(PipelineError::FieldConflict {
                    stage: stage.to_string(),
                    field: field.to_string(),
                });
            }
        }

        if update.is_empty() {
            return Ok(self.version);
        }

        let values = Arc::make_mut(&mut self.values);
        for (field, value) in update.entries {
            self.writers.insert(field.clone(), stage.to_string());
            values.insert(field, value);
        }
        self.version += 1;

        tracing::trace!(stage, version = self.version, "merged stage update");
        Ok(self.version)
    }
}
