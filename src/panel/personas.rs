//! Panel personas.
//!
//! Each persona scores the same upstream context from its own angle. The
//! built-in panel mirrors a four-investor pitch panel; custom personas can be
//! added with their own focus areas.
//!
//! ## Example
//!
//! ```
//! use pitch_panel::panel::{Persona, PersonaKind};
//!
//! let skeptic = Persona::new(PersonaKind::Skeptic);
//! assert_eq!(skeptic.id(), "skeptic");
//! assert_eq!(skeptic.display_name(), "The Skeptic");
//! assert!(skeptic.focus_areas().iter().any(|a| a.contains("competition")));
//!
//! let legal = Persona::new(PersonaKind::Custom("Legal Eagle".to_string()))
//!     .with_focus_areas(vec!["regulatory exposure".to_string()]);
//! assert_eq!(legal.id(), "legal_eagle");
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of panel persona.
///
/// Parsing accepts the snake_case id, a hyphenated form, or a short alias
/// (`"finance"`, `"customer"`); anything else becomes `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PersonaKind {
    /// Market potential and long-term upside.
    Visionary,
    /// Revenue model and unit economics.
    FinanceShark,
    /// Problem clarity and customer value.
    CustomerAdvocate,
    /// Risks and hidden assumptions.
    Skeptic,
    /// User-defined persona.
    Custom(String),
}

impl PersonaKind {
    /// Human-readable name used when prompting.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Visionary => "The Visionary",
            Self::FinanceShark => "The Finance Shark",
            Self::CustomerAdvocate => "The Customer Advocate",
            Self::Skeptic => "The Skeptic",
            Self::Custom(name) => name,
        }
    }

    /// Stable identifier, also used for the `persona.<id>` state field.
    pub fn id(&self) -> String {
        match self {
            Self::Visionary => "visionary".to_string(),
            Self::FinanceShark => "finance_shark".to_string(),
            Self::CustomerAdvocate => "customer_advocate".to_string(),
            Self::Skeptic => "skeptic".to_string(),
            Self::Custom(name) => name
                .trim()
                .to_lowercase()
                .replace([' ', '-'], "_"),
        }
    }

    /// Default focus areas. Custom personas have none.
    pub fn focus_areas(&self) -> Vec<&'static str> {
        match self {
            Self::Visionary => vec!["market potential", "long-term upside", "innovation"],
            Self::FinanceShark => vec![
                "revenue model",
                "pricing",
                "margins",
                "unit economics",
                "path to profitability",
            ],
            Self::CustomerAdvocate => vec![
                "problem clarity",
                "user pain",
                "whether the solution truly helps customers",
            ],
            Self::Skeptic => vec![
                "risks",
                "hidden assumptions",
                "competition",
                "reasons this might fail",
            ],
            Self::Custom(_) => vec![],
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    /// The built-in panel in its fixed scoring order.
    pub fn all_builtins() -> Vec<Self> {
        vec![
            Self::Visionary,
            Self::FinanceShark,
            Self::CustomerAdvocate,
            Self::Skeptic,
        ]
    }
}

impl std::fmt::Display for PersonaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for PersonaKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "visionary" | "the visionary" => Self::Visionary,
            "finance" | "finance_shark" | "finance-shark" | "the finance shark" => {
                Self::FinanceShark
            }
            "customer" | "customer_advocate" | "customer-advocate" | "the customer advocate" => {
                Self::CustomerAdvocate
            }
            "skeptic" | "sceptic" | "the skeptic" => Self::Skeptic,
            _ => Self::Custom(s.trim().to_string()),
        })
    }
}

impl Serialize for PersonaKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Custom(name) => serializer.serialize_str(name),
            builtin => serializer.serialize_str(&builtin.id()),
        }
    }
}

impl<'de> Deserialize<'de> for PersonaKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match PersonaKind::from_str(&raw) {
            Ok(kind) => Ok(kind),
            Err(never) => match never {},
        }
    }
}

/// A persona on the panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub kind: PersonaKind,
    /// Overrides the kind's default focus areas when non-empty.
    #[serde(default)]
    pub custom_focus_areas: Vec<String>,
}

impl Persona {
    pub fn new(kind: PersonaKind) -> Self {
        Self {
            kind,
            custom_focus_areas: Vec::new(),
        }
    }

    pub fn with_focus_areas(mut self, areas: Vec<String>) -> Self {
        self.custom_focus_areas = areas;
        self
    }

    pub fn id(&self) -> String {
        self.kind.id()
    }

    pub fn display_name(&self) -> &str {
        self.kind.display_name()
    }

    pub fn focus_areas(&self) -> Vec<&str> {
        if self.custom_focus_areas.is_empty() {
            self.kind.focus_areas()
        } else {
            self.custom_focus_areas.iter().map(|s| s.as_str()).collect()
        }
    }

    /// Focus areas joined into one phrase, e.g. `"risks, competition, and reasons this might fail"`.
    pub fn focus_phrase(&self) -> String {
        let areas = self.focus_areas();
        match areas.as_slice() {
            [] => "the pitch as a whole".to_string(),
            [one] => one.to_string(),
            [init @ .., last] => format!("{}, and {}", init.join(", "), last),
        }
    }

    /// The default four-persona panel.
    pub fn builtin_panel() -> Vec<Persona> {
        PersonaKind::all_builtins()
            .into_iter()
            .map(Persona::new)
            .collect()
    }

    /// Parse a comma-separated persona list, e.g. `"skeptic,finance"`.
    ///
    /// Empty entries are skipped; duplicate ids are rejected.
    pub fn parse_list(list: &str) -> Result<Vec<Persona>, String> {
        let mut personas: Vec<Persona> = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Ok(kind) = entry.parse::<PersonaKind>();
            let persona = Persona::new(kind);
            if personas.iter().any(|p| p.id() == persona.id()) {
                return Err(format!("Persona '{}' listed more than once", persona.id()));
            }
            personas.push(persona);
        }
        if personas.is_empty() {
            return Err("Persona list is empty".to_string());
        }
        Ok(personas)
    }
}
