//! Predicate language for axioms and primitives.
//!
//! Predicates are evaluated against a block of response text. Phrase matching
//! is case-insensitive substring matching; there is no semantic model behind it.

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// A boolean predicate over response text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Text must not contain the phrase
    Forbids { phrase: String },
    /// Text must contain the phrase
    Requires { phrase: String },
    /// Phrase may appear at most `max` times
    MaxOccurrences { phrase: String, max: usize },
    /// Text may be at most `chars` characters long
    MaxLength { chars: usize },
    /// Negation
    Not { predicate: Box<Predicate> },
    /// Every predicate must hold
    AllOf { predicates: Vec<Predicate> },
    /// At least one predicate must hold
    AnyOf { predicates: Vec<Predicate> },
}

impl Predicate {
    /// Shorthand for [`Predicate::Forbids`].
    pub fn forbids(phrase: impl Into<String>) -> Self {
        Self::Forbids {
            phrase: phrase.into(),
        }
    }

    /// Shorthand for [`Predicate::Requires`].
    pub fn requires(phrase: impl Into<String>) -> Self {
        Self::Requires {
            phrase: phrase.into(),
        }
    }

    /// Shorthand for [`Predicate::MaxOccurrences`].
    pub fn max_occurrences(phrase: impl Into<String>, max: usize) -> Self {
        Self::MaxOccurrences {
            phrase: phrase.into(),
            max,
        }
    }

    /// Shorthand for [`Predicate::Not`].
    pub fn negate(predicate: Predicate) -> Self {
        Self::Not {
            predicate: Box::new(predicate),
        }
    }

    /// Check whether the predicate holds for the given text.
    pub fn holds(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.holds_lowered(text, &lowered)
    }

    fn holds_lowered(&self, text: &str, lowered: &str) -> bool {
        match self {
            Self::Forbids { phrase } => !lowered.contains(&phrase.to_lowercase()),
            Self::Requires { phrase } => lowered.contains(&phrase.to_lowercase()),
            Self::MaxOccurrences { phrase, max } => {
                count_occurrences(lowered, &phrase.to_lowercase()) <= *max
            }
            Self::MaxLength { chars } => text.chars().count() <= *chars,
            Self::Not { predicate } => !predicate.holds_lowered(text, lowered),
            Self::AllOf { predicates } => predicates.iter().all(|p| p.holds_lowered(text, lowered)),
            Self::AnyOf { predicates } => predicates.iter().any(|p| p.holds_lowered(text, lowered)),
        }
    }

    /// Structural problems with this predicate, prefixed with `path`.
    pub fn problems(&self, path: &str) -> Vec<String> {
        let mut problems = Vec::new();
        match self {
            Self::Forbids { phrase } | Self::Requires { phrase } | Self::MaxOccurrences { phrase, .. } => {
                if phrase.trim().is_empty() {
                    problems.push(format!("{}: empty phrase", path));
                }
            }
            Self::MaxLength { .. } => {}
            Self::Not { predicate } => problems.extend(predicate.problems(&format!("{}.not", path))),
            Self::AllOf { predicates } | Self::AnyOf { predicates } => {
                if predicates.is_empty() {
                    problems.push(format!("{}: empty predicate group", path));
                }
                for (i, p) in predicates.iter().enumerate() {
                    problems.extend(p.problems(&format!("{}[{}]", path, i)));
                }
            }
        }
        problems
    }

    /// Phrases that must be present whenever this predicate holds.
    pub fn required_phrases(&self) -> Vec<String> {
        match self {
            Self::Requires { phrase } => vec![phrase.to_lowercase()],
            Self::Not { predicate } => match predicate.as_ref() {
                Self::Forbids { phrase } => vec![phrase.to_lowercase()],
                _ => vec![],
            },
            Self::AllOf { predicates } => predicates.iter().flat_map(|p| p.required_phrases()).collect(),
            _ => vec![],
        }
    }

    /// Phrases that must be absent whenever this predicate holds.
    pub fn forbidden_phrases(&self) -> Vec<String> {
        match self {
            Self::Forbids { phrase } => vec![phrase.to_lowercase()],
            Self::MaxOccurrences { phrase, max: 0 } => vec![phrase.to_lowercase()],
            Self::Not { predicate } => match predicate.as_ref() {
                Self::Requires { phrase } => vec![phrase.to_lowercase()],
                _ => vec![],
            },
            Self::AllOf { predicates } => predicates.iter().flat_map(|p| p.forbidden_phrases()).collect(),
            _ => vec![],
        }
    }

    /// Tightest length limit this predicate imposes, if any.
    pub fn length_limit(&self) -> Option<usize> {
        match self {
            Self::MaxLength { chars } => Some(*chars),
            Self::AllOf { predicates } => predicates.iter().filter_map(|p| p.length_limit()).min(),
            _ => None,
        }
    }
}

/// Count non-overlapping occurrences of `needle` in `haystack`.
fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}
