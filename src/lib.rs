pub mod config;
pub mod content;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod panel;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod scoring;
pub mod ui;
pub mod upstream;

pub use errors::{ErrorKind, PipelineError, ScorerError};
pub use orchestrator::{Collaborators, FinalResult, Orchestrator, RunSettings};
