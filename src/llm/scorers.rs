//! Scorer implementations backed by a chat model.
//!
//! Model output is free text that should contain one JSON object. The object
//! is pulled out of a fenced block or the raw text, then decoded; anything
//! that cannot be decoded is a permanent failure.

use super::client::{ChatClient, ChatMessage};
use super::prompts::{
    build_aggregate_prompt, build_dimension_prompt, build_persona_prompt, build_structure_prompt,
    build_viability_prompt,
};
use crate::errors::ScorerError;
use crate::panel::Persona;
use crate::scoring::{
    AggregateResult, ContentAnalyst, Dimension, DimensionScore, Label, PanelAggregator,
    PersonaResult, PitchStructure, Scorer, ScoringContext, Verdict, ViabilityAssessment,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Temperature used for scoring calls unless configured otherwise.
pub const DEFAULT_SCORING_TEMPERATURE: f32 = 0.2;

/// Temperature used for persona and panel calls unless configured otherwise.
pub const DEFAULT_PANEL_TEMPERATURE: f32 = 0.3;

/// Extract a JSON object from model output.
///
/// Looks for a ```json fence, then any fence containing a brace, then the
/// first balanced `{...}` in the raw text.
pub fn extract_json(response: &str) -> Option<String> {
    if let Some(start) = response.find("```json") {
        let after_marker = &response[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    if let Some(start) = response.find("```") {
        let after_marker = &response[start + 3..];
        if let Some(end) = after_marker.find("```") {
            if let Some(json_start) = after_marker[..end].find('{') {
                let content = after_marker[json_start..end].trim();
                if !content.is_empty() {
                    return Some(content.to_string());
                }
            }
        }
    }

    let start = response.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in response[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(response[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode the JSON object embedded in `response`.
pub fn parse_reply<T: DeserializeOwned>(response: &str) -> Result<T, ScorerError> {
    let value = parse_value(response)?;
    decode(value)
}

fn parse_value(response: &str) -> Result<Value, ScorerError> {
    let json = extract_json(response)
        .ok_or_else(|| ScorerError::permanent("Model reply contains no JSON object"))?;
    serde_json::from_str(&json)
        .map_err(|e| ScorerError::permanent(format!("Model reply is not valid JSON: {}", e)))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ScorerError> {
    serde_json::from_value(value)
        .map_err(|e| ScorerError::permanent(format!("Model reply has the wrong shape: {}", e)))
}

/// Coerce a numeric `key` (possibly a float or numeric string) to an
/// integer in 0..=100.
fn normalize_score(value: &mut Value, key: &str) {
    let Some(slot) = value.get_mut(key) else {
        return;
    };
    let number = match slot {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    if let Some(n) = number {
        *slot = Value::from(n.round().clamp(0.0, 100.0) as u64);
    }
}

#[derive(Debug, Deserialize)]
struct PersonaReply {
    #[serde(alias = "rationale")]
    feedback: String,
    #[serde(alias = "label")]
    decision: String,
}

#[derive(Debug, Deserialize)]
struct PanelReply {
    #[serde(alias = "merged_rationale")]
    combined_feedback: String,
    #[serde(alias = "final_label")]
    final_recommendation: String,
}

fn parse_label(raw: &str) -> Result<Label, ScorerError> {
    raw.parse::<Label>().map_err(ScorerError::Permanent)
}

/// Persona scorer that prompts a chat model in character.
pub struct LlmPersonaScorer {
    client: Arc<ChatClient>,
    temperature: f32,
}

impl LlmPersonaScorer {
    pub fn new(client: Arc<ChatClient>) -> Self {
        Self {
            client,
            temperature: DEFAULT_PANEL_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl Scorer for LlmPersonaScorer {
    async fn score(&self, persona: &Persona, context: &ScoringContext) -> Result<Verdict, ScorerError> {
        let messages = build_persona_prompt(persona, context);
        let reply = self.client.complete(&messages, self.temperature).await?;
        let parsed: PersonaReply = parse_reply(&reply)?;
        Ok(Verdict::new(parse_label(&parsed.decision)?, parsed.feedback))
    }
}

/// Aggregator that asks a chat model to moderate the panel.
pub struct LlmPanelAggregator {
    client: Arc<ChatClient>,
    temperature: f32,
}

impl LlmPanelAggregator {
    pub fn new(client: Arc<ChatClient>) -> Self {
        Self {
            client,
            temperature: DEFAULT_PANEL_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl PanelAggregator for LlmPanelAggregator {
    async fn aggregate(
        &self,
        context: &ScoringContext,
        results: &[PersonaResult],
    ) -> Result<AggregateResult, ScorerError> {
        let messages = build_aggregate_prompt(context, results);
        let reply = self.client.complete(&messages, self.temperature).await?;
        let parsed: PanelReply = parse_reply(&reply)?;
        Ok(AggregateResult {
            merged_rationale: parsed.combined_feedback,
            final_label: parse_label(&parsed.final_recommendation)?,
        })
    }
}

/// Content analyst that scores each dimension with a focused prompt.
pub struct LlmContentAnalyst {
    client: Arc<ChatClient>,
    temperature: f32,
}

impl LlmContentAnalyst {
    pub fn new(client: Arc<ChatClient>) -> Self {
        Self {
            client,
            temperature: DEFAULT_SCORING_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn ask(&self, messages: Vec<ChatMessage>) -> Result<Value, ScorerError> {
        let reply = self.client.complete(&messages, self.temperature).await?;
        parse_value(&reply)
    }
}

#[async_trait]
impl ContentAnalyst for LlmContentAnalyst {
    async fn score_dimension(
        &self,
        dimension: &Dimension,
        transcript: &str,
    ) -> Result<DimensionScore, ScorerError> {
        let mut value = self.ask(build_dimension_prompt(dimension, transcript)).await?;
        normalize_score(&mut value, "score");
        decode(value)
    }

    async fn assess_structure(&self, transcript: &str) -> Result<PitchStructure, ScorerError> {
        let mut value = self.ask(build_structure_prompt(transcript)).await?;
        normalize_score(&mut value, "structure_quality_score");
        decode(value)
    }

    async fn assess_viability(
        &self,
        transcript: &str,
        dimensions: &BTreeMap<String, DimensionScore>,
        structure: &PitchStructure,
    ) -> Result<ViabilityAssessment, ScorerError> {
        let mut value = self
            .ask(build_viability_prompt(transcript, dimensions, structure))
            .await?;
        normalize_score(&mut value, "score");
        decode(value)
    }
}
