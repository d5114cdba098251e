//! Value types produced by scorers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Qualitative outcome shared by persona verdicts and the panel aggregate.
///
/// Deserialization also accepts the investor-panel spellings
/// (`"Invest"`, `"Not Invest"`, `"Need More Info"`) that scoring models
/// are prompted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    #[serde(alias = "Invest", alias = "favorable")]
    Favorable,
    #[serde(alias = "Not Invest", alias = "unfavorable")]
    Unfavorable,
    #[serde(alias = "Need More Info", alias = "needs_more_info")]
    NeedsMoreInfo,
}

impl Label {
    pub fn all() -> [Label; 3] {
        [Label::Favorable, Label::Unfavorable, Label::NeedsMoreInfo]
    }

    /// Phrase used when prompting a scoring model.
    pub fn prompt_phrase(&self) -> &'static str {
        match self {
            Label::Favorable => "Invest",
            Label::Unfavorable => "Not Invest",
            Label::NeedsMoreInfo => "Need More Info",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Favorable => write!(f, "Favorable"),
            Label::Unfavorable => write!(f, "Unfavorable"),
            Label::NeedsMoreInfo => write!(f, "NeedsMoreInfo"),
        }
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "favorable" | "invest" => Ok(Label::Favorable),
            "unfavorable" | "notinvest" => Ok(Label::Unfavorable),
            "needsmoreinfo" | "needmoreinfo" => Ok(Label::NeedsMoreInfo),
            _ => Err(format!(
                "Invalid label '{}'. Valid values: Favorable, Unfavorable, NeedsMoreInfo",
                s
            )),
        }
    }
}

/// A labeled, rationale-carrying scoring outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub label: Label,
    pub rationale: String,
}

impl Verdict {
    pub fn new(label: Label, rationale: impl Into<String>) -> Self {
        Self {
            label,
            rationale: rationale.into(),
        }
    }
}

/// One persona's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaResult {
    pub persona_id: String,
    pub verdict: Verdict,
}

/// The panel's combined outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub merged_rationale: String,
    pub final_label: Label,
}

/// Score for one content dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionScore {
    /// 0..=100
    pub score: u8,
    pub reason: String,
}

impl DimensionScore {
    /// Copy with the score capped at 100.
    pub fn clamped(&self) -> Self {
        Self {
            score: self.score.min(100),
            reason: self.reason.clone(),
        }
    }
}

/// Narrative structure of the pitch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchStructure {
    pub hook_present: bool,
    pub problem_present: bool,
    pub solution_present: bool,
    pub ask_present: bool,
    #[serde(default)]
    pub detected_order: Vec<String>,
    /// 0..=100
    pub structure_quality_score: u8,
    pub structure_comment: String,
}

/// Business viability, judged from the transcript plus all dimension scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViabilityAssessment {
    /// 0..=100
    pub score: u8,
    pub risk_level: String,
    pub summary_comment: String,
    #[serde(default)]
    pub key_strengths: Vec<String>,
    #[serde(default)]
    pub key_risks: Vec<String>,
}

/// Content analysis as reported in the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub dimensions: BTreeMap<String, DimensionScore>,
    pub pitch_structure: PitchStructure,
    pub viability: ViabilityAssessment,
}

/// Vocal delivery metrics keyed by metric name.
pub type ToneMetrics = BTreeMap<String, f64>;

/// A timed transcript segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Transcriber output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

/// Upstream context every persona scores independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringContext {
    pub transcript: String,
    pub tone_metrics: ToneMetrics,
    pub content: ContentAnalysis,
}
