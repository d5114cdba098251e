//! Terminal rendering for the CLI: a progress spinner fed by run events and
//! a plain-text report of the final result.

pub mod icons;

use crate::errors::SinkError;
use crate::orchestrator::FinalResult;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::scoring::Label;
use console::style;
use icons::{CHECK, CROSS, MIC, SHARK, STOP};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write;
use std::time::Duration;

/// Progress sink that drives a spinner and prints milestone lines.
pub struct PanelUI {
    spinner: ProgressBar,
    verbose: bool,
}

impl PanelUI {
    pub fn new(verbose: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
            spinner.set_style(spinner_style);
        }
        spinner.enable_steady_tick(Duration::from_millis(120));
        Self { spinner, verbose }
    }

    /// Spinner that draws nothing, for tests.
    pub fn hidden(verbose: bool) -> Self {
        Self {
            spinner: ProgressBar::hidden(),
            verbose,
        }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressSink for PanelUI {
    fn notify(&self, event: &ProgressEvent) -> Result<(), SinkError> {
        let update = describe(event);
        if let Some(line) = update.line {
            self.spinner.println(line);
        } else if self.verbose {
            self.spinner
                .println(format!("  {}", style(&event.stage).dim()));
        }
        if let Some(status) = update.status {
            self.spinner.set_message(status);
        }
        if update.finished {
            self.spinner.finish_and_clear();
        }
        Ok(())
    }
}

/// What one event means for the terminal.
#[derive(Debug, Default, PartialEq)]
pub struct EventDisplay {
    /// A line to print above the spinner.
    pub line: Option<String>,
    /// New spinner message.
    pub status: Option<String>,
    /// The run is over.
    pub finished: bool,
}

fn payload_str<'a>(event: &'a ProgressEvent, key: &str) -> &'a str {
    event
        .payload
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

fn payload_label(event: &ProgressEvent, key: &str) -> Option<Label> {
    event
        .payload
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Map a run event to terminal output.
pub fn describe(event: &ProgressEvent) -> EventDisplay {
    let stage = event.stage.as_str();
    let line = |text: String| EventDisplay {
        line: Some(text),
        ..EventDisplay::default()
    };
    let status = |text: &str| EventDisplay {
        status: Some(text.to_string()),
        ..EventDisplay::default()
    };

    match stage {
        "start" => EventDisplay {
            line: Some(format!("{}Evaluating {}", MIC, payload_str(event, "source"))),
            status: Some("Extracting audio...".to_string()),
            finished: false,
        },
        "extract_audio.done" => EventDisplay {
            line: Some(format!("{}Audio extracted", CHECK)),
            status: Some("Transcribing and analyzing tone...".to_string()),
            finished: false,
        },
        "transcribe.done" => line(format!("{}Transcript ready", CHECK)),
        "tone.done" => line(format!("{}Tone analyzed", CHECK)),
        "content.start" => status("Scoring pitch content..."),
        "viability.done" => line(format!("{}Content analyzed", CHECK)),
        "sharks.start" => line(format!("{}The panel is in session", SHARK)),
        "aggregate.start" => status("Panel is deliberating..."),
        "aggregate.done" => line(format!("{}Panel verdict ready", CHECK)),
        "complete" => EventDisplay {
            line: None,
            status: None,
            finished: true,
        },
        "failed" => EventDisplay {
            line: Some(format!(
                "{}Run failed: {}",
                CROSS,
                style(payload_str(event, "error")).red()
            )),
            status: None,
            finished: true,
        },
        "cancelled" => EventDisplay {
            line: Some(format!("{}Run cancelled", STOP)),
            status: None,
            finished: true,
        },
        _ => persona_event(event).unwrap_or_default(),
    }
}

fn persona_event(event: &ProgressEvent) -> Option<EventDisplay> {
    let rest = event.stage.strip_prefix("persona.")?;
    if let Some(id) = rest.strip_suffix(".start") {
        return Some(EventDisplay {
            status: Some(format!("{} is thinking...", id)),
            ..EventDisplay::default()
        });
    }
    let id = rest.strip_suffix(".done")?;
    let verdict = payload_label(event, "label")
        .map(|l| styled_label(l).to_string())
        .unwrap_or_default();
    Some(EventDisplay {
        line: Some(format!("{}{}: {}", CHECK, id, verdict)),
        ..EventDisplay::default()
    })
}

fn styled_label(label: Label) -> console::StyledObject<&'static str> {
    let phrase = label.prompt_phrase();
    match label {
        Label::Favorable => style(phrase).green().bold(),
        Label::Unfavorable => style(phrase).red().bold(),
        Label::NeedsMoreInfo => style(phrase).yellow().bold(),
    }
}

/// Human-readable report of a finished run.
pub fn render_result(result: &FinalResult) -> String {
    let mut out = String::new();
    let content = &result.content;

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", style("Delivery").bold().underlined());
    for (metric, value) in &result.tone_metrics {
        let _ = writeln!(out, "  {:<28} {:>8.2}", metric, value);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", style("Content").bold().underlined());
    for (id, score) in &content.dimensions {
        let _ = writeln!(out, "  {:<28} {:>3}  {}", id, score.score, style(&score.reason).dim());
    }
    let structure = &content.pitch_structure;
    let _ = writeln!(
        out,
        "  {:<28} {:>3}  {}",
        "pitch_structure",
        structure.structure_quality_score,
        style(&structure.structure_comment).dim()
    );
    let viability = &content.viability;
    let _ = writeln!(
        out,
        "  {:<28} {:>3}  risk: {}",
        "viability", viability.score, viability.risk_level
    );
    if !viability.summary_comment.is_empty() {
        let _ = writeln!(out, "  {}", viability.summary_comment);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", style("Panel").bold().underlined());
    for persona in &result.persona_results {
        let _ = writeln!(
            out,
            "  {} ({})",
            style(&persona.persona_id).bold(),
            styled_label(persona.verdict.label)
        );
        let _ = writeln!(out, "    {}", persona.verdict.rationale);
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} {}",
        style("Final recommendation:").bold(),
        styled_label(result.aggregate.final_label)
    );
    let _ = writeln!(out, "{}", result.aggregate.merged_rationale);
    let _ = writeln!(
        out,
        "{}",
        style(format!("run {} in {} ms", result.run_id, result.duration_ms)).dim()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn event(stage: &str, payload: Value) -> ProgressEvent {
        ProgressEvent {
            run_id: Uuid::nil(),
            sequence: 0,
            stage: stage.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_persona_done_shows_label() {
        let display = describe(&event("persona.skeptic.done", json!({"label": "Unfavorable"})));
        let line = display.line.unwrap();
        assert!(line.contains("skeptic"));
        assert!(line.contains("Not Invest"));
        assert!(!display.finished);
    }

    #[test]
    fn test_persona_start_updates_status() {
        let display = describe(&event("persona.visionary.start", Value::Null));
        assert!(display.line.is_none());
        assert_eq!(display.status.as_deref(), Some("visionary is thinking..."));
    }

    #[test]
    fn test_terminal_events_finish() {
        assert!(describe(&event("complete", json!({}))).finished);
        let failed = describe(&event("failed", json!({"error": "boom"})));
        assert!(failed.finished);
        assert!(failed.line.unwrap().contains("boom"));
        assert!(describe(&event("cancelled", Value::Null)).finished);
    }

    #[test]
    fn test_unknown_events_are_quiet() {
        assert_eq!(
            describe(&event("content.revenue_logic.done", Value::Null)),
            EventDisplay::default()
        );
    }

    #[test]
    fn test_hidden_ui_accepts_events() {
        let ui = PanelUI::hidden(true);
        assert!(ui.notify(&event("start", json!({"source": "a.mp4"}))).is_ok());
        assert!(ui.notify(&event("complete", json!({}))).is_ok());
    }
}
