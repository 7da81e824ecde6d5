//! Core types for persona specifications.
//!
//! A persona is declared at design time as a set of axioms (hard invariants),
//! primitives (soft constraints drawn against a violation budget) and engrams
//! (persistent dispositions that may adapt without breaking identity).
//!
//! With the `typescript` feature enabled, these types can be exported to TypeScript
//! using ts-rs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::predicate::Predicate;

/// What text an axiom predicate is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AxiomScope {
    /// The response alone
    State,
    /// Every prior response plus the response
    History,
    /// The last `horizon` prior responses plus the response
    Trajectory { horizon: usize },
}

impl Default for AxiomScope {
    fn default() -> Self {
        Self::State
    }
}

impl AxiomScope {
    /// Get string representation for logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::History => "history",
            Self::Trajectory { .. } => "trajectory",
        }
    }

    /// Build the text this scope checks from prior responses and the new one.
    pub fn compose<S: AsRef<str>>(&self, history: &[S], response: &str) -> String {
        let prior: &[S] = match self {
            Self::State => &[],
            Self::History => history,
            Self::Trajectory { horizon } => {
                let start = history.len().saturating_sub(*horizon);
                &history[start..]
            }
        };

        let mut text = String::new();
        for entry in prior {
            text.push_str(entry.as_ref());
            text.push('\n');
        }
        text.push_str(response);
        text
    }
}

/// A non-negotiable invariant of the persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Axiom {
    /// Unique identifier
    pub id: String,
    /// What the predicate asserts, in plain language
    pub statement: String,
    /// Why the persona holds this invariant
    #[serde(default)]
    pub rationale: String,
    /// Text the predicate is checked against
    #[serde(default)]
    pub scope: AxiomScope,
    /// The invariant itself
    pub predicate: Predicate,
    /// Safe substitute response offered when a candidate breaks this axiom
    #[serde(default)]
    pub fallback: Option<String>,
}

impl Axiom {
    /// Create a state-scoped axiom.
    pub fn new(id: impl Into<String>, statement: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            id: id.into(),
            statement: statement.into(),
            rationale: String::new(),
            scope: AxiomScope::State,
            predicate,
            fallback: None,
        }
    }

    /// Builder: set the scope.
    pub fn with_scope(mut self, scope: AxiomScope) -> Self {
        self.scope = scope;
        self
    }

    /// Builder: set the rationale.
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// Builder: set the fallback response.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Check the axiom against prior responses and a new response.
    pub fn holds<S: AsRef<str>>(&self, history: &[S], response: &str) -> bool {
        self.predicate.holds(&self.scope.compose(history, response))
    }
}

/// Textual remediation a primitive can apply to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Rewrite {
    /// Phrase to look for (case-insensitive)
    pub find: String,
    /// Replacement text
    pub replace: String,
}

impl Rewrite {
    /// Create a rewrite.
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
        }
    }

    /// Apply the rewrite. Returns `None` when the phrase does not occur.
    pub fn apply(&self, text: &str) -> Option<String> {
        let needle: Vec<char> = self.find.chars().flat_map(char::to_lowercase).collect();
        if needle.is_empty() {
            return None;
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        let mut pos = 0;
        let mut replaced = false;
        while let Some(ch) = text[pos..].chars().next() {
            match folded_match_len(&text[pos..], &needle) {
                Some(len) => {
                    out.push_str(&text[cursor..pos]);
                    out.push_str(&self.replace);
                    pos += len;
                    cursor = pos;
                    replaced = true;
                }
                None => pos += ch.len_utf8(),
            }
        }
        if !replaced {
            return None;
        }
        out.push_str(&text[cursor..]);
        Some(out)
    }
}

/// Byte length of the prefix of `text` whose lowercase form equals `needle`.
///
/// Only matches that end on a char boundary of `text` count.
fn folded_match_len(text: &str, needle: &[char]) -> Option<usize> {
    let mut matched = 0;
    for (offset, ch) in text.char_indices() {
        if matched == needle.len() {
            return Some(offset);
        }
        for lower in ch.to_lowercase() {
            if needle.get(matched) != Some(&lower) {
                return None;
            }
            matched += 1;
        }
    }
    (matched == needle.len()).then_some(text.len())
}

/// A soft behavioral constraint tolerated within a bounded budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Primitive {
    /// Unique identifier
    pub id: String,
    /// What the constraint asks for, in plain language
    pub statement: String,
    /// Constraint checked against the response
    pub predicate: Predicate,
    /// Optional per-primitive violation allowance
    #[serde(default)]
    pub tolerance: Option<u32>,
    /// Remediation used by the regeneration guard
    #[serde(default)]
    pub rewrite: Option<Rewrite>,
}

impl Primitive {
    /// Create a primitive.
    pub fn new(id: impl Into<String>, statement: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            id: id.into(),
            statement: statement.into(),
            predicate,
            tolerance: None,
            rewrite: None,
        }
    }

    /// Builder: set a per-primitive tolerance.
    pub fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Builder: set the remediation rewrite.
    pub fn with_rewrite(mut self, rewrite: Rewrite) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    /// Check the constraint against a response.
    pub fn holds(&self, response: &str) -> bool {
        self.predicate.holds(response)
    }
}

/// Decay/reinforcement rule for an engram's live strength.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct EngramRule {
    /// Fraction of strength lost each turn (0.0 - 1.0)
    pub decay: f64,
    /// Strength gained when a turn exhibits the disposition (0.0 - 1.0)
    pub reinforcement: f64,
}

impl Default for EngramRule {
    fn default() -> Self {
        Self {
            decay: 0.1,
            reinforcement: 0.1,
        }
    }
}

impl EngramRule {
    /// Next strength given the current one and an observation (0.0 or 1.0).
    pub fn step(&self, current: f64, observed: f64) -> f64 {
        (current * (1.0 - self.decay) + self.reinforcement * observed).clamp(0.0, 1.0)
    }
}

/// A persistent disposition of the persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Engram {
    /// Unique key
    pub key: String,
    /// What the disposition is
    #[serde(default)]
    pub description: String,
    /// Expected share of turns exhibiting the disposition (0.0 - 1.0)
    pub baseline: f64,
    /// Phrases whose presence marks a turn as exhibiting the disposition
    #[serde(default)]
    pub cues: Vec<String>,
    /// How the live strength evolves
    #[serde(default)]
    pub rule: EngramRule,
}

impl Engram {
    /// Create an engram with the default rule.
    pub fn new(key: impl Into<String>, baseline: f64, cues: Vec<String>) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
            baseline,
            cues,
            rule: EngramRule::default(),
        }
    }

    /// Builder: set the evolution rule.
    pub fn with_rule(mut self, rule: EngramRule) -> Self {
        self.rule = rule;
        self
    }

    /// Whether a response exhibits this disposition.
    pub fn observed_in(&self, response: &str) -> bool {
        let lowered = response.to_lowercase();
        self.cues
            .iter()
            .filter(|c| !c.trim().is_empty())
            .any(|c| lowered.contains(&c.to_lowercase()))
    }
}

/// A declared persona definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct PersonaSpec {
    /// Unique identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Monotonic version, bumped by every sealed amendment
    #[serde(default = "default_version")]
    pub version: u32,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Hard invariants, in declaration order
    pub axioms: Vec<Axiom>,
    /// Soft constraints, in declaration order
    #[serde(default)]
    pub primitives: Vec<Primitive>,
    /// Session-wide primitive violation budget
    #[serde(default)]
    pub primitive_budget: u32,
    /// Persistent dispositions
    #[serde(default)]
    pub engrams: Vec<Engram>,
    /// When the definition was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl PersonaSpec {
    /// Create an empty draft.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            version: 1,
            description: String::new(),
            axioms: Vec::new(),
            primitives: Vec::new(),
            primitive_budget: 0,
            engrams: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Builder: add an axiom.
    pub fn with_axiom(mut self, axiom: Axiom) -> Self {
        self.axioms.push(axiom);
        self
    }

    /// Builder: add a primitive.
    pub fn with_primitive(mut self, primitive: Primitive) -> Self {
        self.primitives.push(primitive);
        self
    }

    /// Builder: add an engram.
    pub fn with_engram(mut self, engram: Engram) -> Self {
        self.engrams.push(engram);
        self
    }

    /// Builder: set the primitive budget.
    pub fn with_primitive_budget(mut self, budget: u32) -> Self {
        self.primitive_budget = budget;
        self
    }

    /// Parse a persona document from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| PersonaError::Parse(e.to_string()))
    }

    /// Parse a persona document from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PersonaError::Parse(e.to_string()))
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| PersonaError::Parse(e.to_string()))
    }

    /// Look up an axiom by id.
    pub fn axiom(&self, id: &str) -> Option<&Axiom> {
        self.axioms.iter().find(|a| a.id == id)
    }

    /// Look up a primitive by id.
    pub fn primitive(&self, id: &str) -> Option<&Primitive> {
        self.primitives.iter().find(|p| p.id == id)
    }

    /// Look up an engram by key.
    pub fn engram(&self, key: &str) -> Option<&Engram> {
        self.engrams.iter().find(|e| e.key == key)
    }
}

/// Error types for persona specification operations.
#[derive(Debug, thiserror::Error)]
pub enum PersonaError {
    /// Spec is malformed or its axioms contradict each other
    #[error("Invalid persona spec: {}", .reasons.join("; "))]
    SpecInvalid { reasons: Vec<String> },

    /// Amendment attempted without a governance sign-off
    #[error("Governance sign-off required to amend persona {0}")]
    GovernanceRequired(String),

    /// Sign-off was provided but did not verify
    #[error("Governance sign-off rejected for persona {0}")]
    SignOffRejected(String),

    /// Persona not found
    #[error("Persona not found: {0}")]
    NotFound(String),

    /// Persona is already sealed
    #[error("Persona already sealed: {0}")]
    AlreadySealed(String),

    /// Persona has not been sealed yet
    #[error("Persona not sealed: {0}")]
    NotSealed(String),

    /// Persona document could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
}

impl PersonaError {
    /// Shorthand for a single-reason [`PersonaError::SpecInvalid`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::SpecInvalid {
            reasons: vec![reason.into()],
        }
    }
}

pub type Result<T> = std::result::Result<T, PersonaError>;
