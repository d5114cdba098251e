//! Chat-model backed scorers.
//!
//! - [`client`]: single-attempt OpenAI-compatible chat client
//! - [`prompts`]: prompt builders per scoring task
//! - [`scorers`]: `Scorer`, `PanelAggregator` and `ContentAnalyst` implementations

pub mod client;
pub mod prompts;
pub mod scorers;

pub use client::{ChatClient, ChatMessage};
pub use scorers::{
    DEFAULT_PANEL_TEMPERATURE, DEFAULT_SCORING_TEMPERATURE, LlmContentAnalyst, LlmPanelAggregator,
    LlmPersonaScorer, extract_json,
};
