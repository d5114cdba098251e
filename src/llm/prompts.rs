//! Prompt builders for the LLM-backed scorers.

use super::client::ChatMessage;
use crate::panel::Persona;
use crate::scoring::{
    Dimension, DimensionScore, Label, PersonaResult, PitchStructure, ScoringContext,
};
use std::collections::BTreeMap;

fn label_choices() -> String {
    let labels: Vec<&str> = Label::all().iter().map(|l| l.prompt_phrase()).collect();
    match labels.as_slice() {
        [init @ .., last] => format!("{}, or {}", init.join(", "), last),
        [] => String::new(),
    }
}

fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

fn context_block(context: &ScoringContext) -> String {
    format!(
        "TRANSCRIPT:\n{}\n\nTONE_SCORES (JSON):\n{}\n\nANALYSIS (JSON):\n{}",
        context.transcript,
        pretty(&context.tone_metrics),
        pretty(&context.content)
    )
}

/// Messages asking one persona for a verdict.
pub fn build_persona_prompt(persona: &Persona, context: &ScoringContext) -> Vec<ChatMessage> {
    let choices = label_choices();
    let system = format!(
        r#"You are {name}, an investor on a panel hearing a startup pitch.
Your focus: {focus}.

You will receive:
- transcript: what the founder said
- tone_scores: vocal delivery metrics (confidence, pace, expressiveness)
- analysis: content dimension scores, pitch structure, and business viability

Your tasks:
1. Identify the strengths and weaknesses that matter for your focus.
2. Write 1-2 short paragraphs of feedback in the first person, speaking directly to the founder. Reference specific strengths and weaknesses.
3. End with a clear decision: {choices}. Be explicit about why.

Respond with a single JSON object:
{{"persona": "{name}", "feedback": "<your feedback>", "decision": "<one of: {choices}>"}}"#,
        name = persona.display_name(),
        focus = persona.focus_phrase(),
        choices = choices,
    );

    let user = format!(
        "Here is the context.\n\n{}\n\nNow respond in character as {}.",
        context_block(context),
        persona.display_name()
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Messages asking the moderator to combine every persona's verdict.
pub fn build_aggregate_prompt(context: &ScoringContext, results: &[PersonaResult]) -> Vec<ChatMessage> {
    let choices = label_choices();
    let system = format!(
        r#"You are the moderator of an investor panel that just heard a startup pitch.
You will receive the transcript, tone scores, content analysis, and each investor's feedback and decision.

Your job:
1. Combine their feedback into one panel-style response spoken on behalf of the group ("we"), referencing how individual investors felt.
2. Decide the panel's final recommendation: {choices}. Base it primarily on the investors' individual decisions.

Respond with a single JSON object:
{{"combined_feedback": "<panel feedback>", "final_recommendation": "<one of: {choices}>"}}"#,
        choices = choices,
    );

    let mut user = context_block(context);
    for result in results {
        user.push_str(&format!(
            "\n\n{} FEEDBACK:\n{}\nDecision: {}",
            result.persona_id.to_uppercase(),
            result.verdict.rationale,
            result.verdict.label.prompt_phrase()
        ));
    }
    user.push_str("\n\nNow produce the combined panel feedback and the final recommendation.");

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// A transcript excerpt paired with the reply a good scorer gives for it.
struct WorkedExample {
    transcript: &'static str,
    reply: &'static str,
}

const fn example(transcript: &'static str, reply: &'static str) -> WorkedExample {
    WorkedExample { transcript, reply }
}

/// One strong and one weak example per built-in dimension.
fn dimension_examples(id: &str) -> &'static [WorkedExample] {
    const PROBLEM_CLARITY: &[WorkedExample] = &[
        example(
            "Hi Sharks, today small grocery shop owners lose hours every week manually writing bills and tracking credit in notebooks. They often misplace records and lose up to 10% of revenue due to errors.",
            r#"{"score": 90, "reason": "The problem is very clear: who is affected (small shop owners), what happens (manual bookkeeping), and the consequence (lost time and revenue)."}"#,
        ),
        example(
            "So yeah, things are kind of messy in this space and people don't have great tools.",
            r#"{"score": 40, "reason": "The problem is vague: the speaker says things are messy but does not specify who is affected or what the concrete problem is."}"#,
        ),
    ];
    const PRODUCT_DIFFERENTIATION: &[WorkedExample] = &[
        example(
            "Today, restaurants use Excel and WhatsApp to manage suppliers. Our product is a single dashboard that automatically syncs orders, invoices, and inventory in real time, unlike existing tools which are manual.",
            r#"{"score": 88, "reason": "The founder compares the product with Excel and WhatsApp and names the benefit: automatic, real-time syncing instead of manual tools."}"#,
        ),
        example(
            "Our app is unique and better than anything out there.",
            r#"{"score": 45, "reason": "The founder claims uniqueness but gives no concrete comparison or explanation of what is different."}"#,
        ),
    ];
    const BUSINESS_MODEL_STRENGTH: &[WorkedExample] = &[
        example(
            "We charge small clinics a monthly subscription of $99 per doctor. They pay us directly for our practice management software.",
            r#"{"score": 90, "reason": "The model is clearly defined: who pays (small clinics), how much ($99 per doctor), and how often (monthly)."}"#,
        ),
        example(
            "We will figure out monetization later once we have users.",
            r#"{"score": 20, "reason": "The founder defers monetization and does not describe a current business model."}"#,
        ),
    ];
    const MARKET_OPPORTUNITY: &[WorkedExample] = &[
        example(
            "We are targeting the $10B global pet care market, growing at 12% annually.",
            r#"{"score": 92, "reason": "The founder gives a specific market size and growth rate, which makes the opportunity clear."}"#,
        ),
        example(
            "This is a huge space with a lot of potential.",
            r#"{"score": 50, "reason": "The founder calls the market huge but gives no numbers or specifics."}"#,
        ),
    ];
    const REVENUE_LOGIC: &[WorkedExample] = &[
        example(
            "We take a 5% commission on every transaction between hotels and suppliers on our platform.",
            r#"{"score": 85, "reason": "A commission on each transaction fits a marketplace connecting hotels and suppliers."}"#,
        ),
        example(
            "We solve problems for poor farmers, and they will pay us $1000 per month.",
            r#"{"score": 35, "reason": "Charging poor farmers $1000 per month is unrealistic given their ability to pay."}"#,
        ),
    ];
    const COMPETITION_AWARENESS: &[WorkedExample] = &[
        example(
            "Today, companies use tools like Salesforce and HubSpot. We integrate with them but focus only on after-sales support.",
            r#"{"score": 88, "reason": "The founder names the major incumbents and positions the product relative to them."}"#,
        ),
        example(
            "We don't really have competitors because no one does what we do.",
            r#"{"score": 40, "reason": "Claiming there are no competitors ignores alternatives and the status quo."}"#,
        ),
    ];

    match id {
        "problem_clarity" => PROBLEM_CLARITY,
        "product_differentiation" => PRODUCT_DIFFERENTIATION,
        "business_model_strength" => BUSINESS_MODEL_STRENGTH,
        "market_opportunity" => MARKET_OPPORTUNITY,
        "revenue_logic" => REVENUE_LOGIC,
        "competition_awareness" => COMPETITION_AWARENESS,
        _ => &[],
    }
}

const STRUCTURE_EXAMPLES: &[WorkedExample] = &[example(
    "Hi, we have a problem. Our solution is great. Please invest.",
    r#"{"hook_present": true, "problem_present": true, "solution_present": true, "ask_present": true, "detected_order": ["hook", "problem", "solution", "ask"], "structure_quality_score": 90, "structure_comment": "The pitch presents every key element in the expected order."}"#,
)];

const VIABILITY_EXAMPLE_INPUT: &str = r#"TRANSCRIPT:
We solve a clear problem with a unique product.

DIMENSION_SCORES (JSON):
{"problem_clarity": {"score": 85, "reason": "Clear pain point"}}

PITCH_STRUCTURE (JSON):
{"structure_quality_score": 80}

Generate the business viability analysis."#;

const VIABILITY_EXAMPLE_REPLY: &str = r#"{"score": 75, "risk_level": "medium", "summary_comment": "Solid problem clarity but limited business model details.", "key_strengths": ["Clear problem statement"], "key_risks": ["Unclear monetization"]}"#;

/// Append each example as a user turn answered by an assistant turn.
fn push_examples(
    messages: &mut Vec<ChatMessage>,
    examples: &[WorkedExample],
    instruction: Option<&str>,
) {
    for ex in examples {
        let user = match instruction {
            Some(instruction) => format!("TRANSCRIPT:\n{}\n\n{}", ex.transcript, instruction),
            None => format!("TRANSCRIPT:\n{}", ex.transcript),
        };
        messages.push(ChatMessage::user(user));
        messages.push(ChatMessage::assistant(ex.reply));
    }
}

/// Messages scoring one content dimension.
///
/// Built-in dimensions carry worked examples ahead of the real transcript.
pub fn build_dimension_prompt(dimension: &Dimension, transcript: &str) -> Vec<ChatMessage> {
    let system = format!(
        r#"You are a VC and pitch coach. Your ONLY task is to evaluate '{title}' in a startup pitch transcript.
Look at: {focus}.
- score must be an integer between 0 and 100
- reason must briefly explain the score
Do NOT evaluate any other dimension.

Respond with a single JSON object: {{"score": <0-100>, "reason": "<why>"}}"#,
        title = dimension.title,
        focus = dimension.focus,
    );

    let examples = dimension_examples(&dimension.id);
    let mut messages = vec![ChatMessage::system(system)];
    push_examples(&mut messages, examples, None);

    let closing = if examples.is_empty() {
        format!("Now evaluate ONLY '{}'.", dimension.title)
    } else {
        format!(
            "Now evaluate ONLY '{}' as in the examples above.",
            dimension.title
        )
    };
    messages.push(ChatMessage::user(format!(
        "TRANSCRIPT:\n{}\n\n{}",
        transcript, closing
    )));
    messages
}

const STRUCTURE_INSTRUCTION: &str =
    "Identify whether a hook, problem, solution, and ask are present, and in which order.";

/// Messages detecting the hook / problem / solution / ask structure.
pub fn build_structure_prompt(transcript: &str) -> Vec<ChatMessage> {
    let system = r#"You are a pitch coach. Detect whether the transcript follows a clear structure: Hook -> Problem -> Solution -> Ask.

Respond with a single JSON object:
{"hook_present": <bool>, "problem_present": <bool>, "solution_present": <bool>, "ask_present": <bool>, "detected_order": ["hook", "problem", ...], "structure_quality_score": <0-100>, "structure_comment": "<comment>"}"#;

    let mut messages = vec![ChatMessage::system(system)];
    push_examples(&mut messages, STRUCTURE_EXAMPLES, Some(STRUCTURE_INSTRUCTION));
    messages.push(ChatMessage::user(format!(
        "TRANSCRIPT:\n{}\n\n{}",
        transcript, STRUCTURE_INSTRUCTION
    )));
    messages
}

/// Messages judging business viability from the dimension scores.
pub fn build_viability_prompt(
    transcript: &str,
    dimensions: &BTreeMap<String, DimensionScore>,
    structure: &PitchStructure,
) -> Vec<ChatMessage> {
    let names: Vec<&str> = dimensions.keys().map(|k| k.as_str()).collect();
    let system = format!(
        r#"You are a venture capitalist evaluating an early-stage startup pitch.
You receive:
1) The full transcript of the pitch.
2) Pre-computed scores for {names}.
3) A pitch_structure analysis (hook, problem, solution, ask, and order).

Return ONLY a JSON object with these fields:
- score (integer 0-100)
- risk_level ("low", "medium", or "high")
- summary_comment (string)
- key_strengths (array of strings)
- key_risks (array of strings)"#,
        names = names.join(", "),
    );
    let user = format!(
        "TRANSCRIPT:\n{}\n\nDIMENSION_SCORES (JSON):\n{}\n\nPITCH_STRUCTURE (JSON):\n{}\n\nGenerate the business viability analysis. Return ONLY the JSON object.",
        transcript,
        pretty(dimensions),
        pretty(structure)
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(VIABILITY_EXAMPLE_INPUT),
        ChatMessage::assistant(VIABILITY_EXAMPLE_REPLY),
        ChatMessage::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PersonaKind;
    use crate::panel::testing::sample_content;
    use crate::scoring::Verdict;

    fn context() -> ScoringContext {
        ScoringContext {
            transcript: "We help clinics bill faster.".to_string(),
            tone_metrics: BTreeMap::from([("confidence_score".to_string(), 72.0)]),
            content: sample_content(),
        }
    }

    #[test]
    fn test_persona_prompt_carries_focus_and_choices() {
        let persona = Persona::new(PersonaKind::FinanceShark);
        let messages = build_persona_prompt(&persona, &context());

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("The Finance Shark"));
        assert!(messages[0].content.contains("unit economics"));
        assert!(messages[0].content.contains("Invest, Not Invest, or Need More Info"));
        assert!(messages[1].content.contains("We help clinics bill faster."));
        assert!(messages[1].content.contains("confidence_score"));
    }

    #[test]
    fn test_aggregate_prompt_lists_every_persona_in_order() {
        let results = vec![
            PersonaResult {
                persona_id: "visionary".into(),
                verdict: Verdict::new(Label::Favorable, "Big market."),
            },
            PersonaResult {
                persona_id: "skeptic".into(),
                verdict: Verdict::new(Label::Unfavorable, "Crowded space."),
            },
        ];
        let messages = build_aggregate_prompt(&context(), &results);
        let user = &messages[1].content;

        let visionary = user.find("VISIONARY FEEDBACK").unwrap();
        let skeptic = user.find("SKEPTIC FEEDBACK").unwrap();
        assert!(visionary < skeptic);
        assert!(user.contains("Decision: Not Invest"));
    }

    #[test]
    fn test_dimension_prompt_is_scoped() {
        let dimension = Dimension::builtin("revenue_logic").unwrap();
        let messages = build_dimension_prompt(&dimension, "We charge $99/month.");
        assert!(messages[0].content.contains("'revenue logic'"));
        let last = messages.last().unwrap();
        assert_eq!(last.role, "user");
        assert!(last.content.contains("$99/month"));
        assert!(last.content.contains("as in the examples above"));
    }

    #[test]
    fn test_builtin_dimensions_carry_worked_examples() {
        for dimension in Dimension::builtins() {
            let messages = build_dimension_prompt(&dimension, "We sell shovels.");
            let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
            assert_eq!(
                roles,
                vec!["system", "user", "assistant", "user", "assistant", "user"],
                "{}",
                dimension.id
            );
            // Each worked reply is a valid dimension score
            for reply in messages.iter().filter(|m| m.role == "assistant") {
                let score: DimensionScore = serde_json::from_str(&reply.content).unwrap();
                assert!(score.score <= 100);
            }
        }
    }

    #[test]
    fn test_custom_dimension_has_no_examples() {
        let dimension = Dimension::new("team", "team strength", "founder experience");
        let messages = build_dimension_prompt(&dimension, "Two ex-Stripe engineers.");
        assert_eq!(messages.len(), 2);
        assert!(!messages[1].content.contains("examples above"));
    }

    #[test]
    fn test_structure_and_viability_examples_parse() {
        let messages = build_structure_prompt("Hello sharks.");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, "assistant");
        let structure: PitchStructure = serde_json::from_str(&messages[2].content).unwrap();
        assert!(structure.ask_present);
        assert!(messages[3].content.contains("Hello sharks."));

        let dimensions = BTreeMap::from([(
            "problem_clarity".to_string(),
            DimensionScore {
                score: 80,
                reason: "clear".to_string(),
            },
        )]);
        let messages = build_viability_prompt("Hello sharks.", &dimensions, &structure);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, "assistant");
        assert!(serde_json::from_str::<serde_json::Value>(&messages[2].content).is_ok());
        assert!(messages[3].content.contains("problem_clarity"));
    }
}
