//! Sealing persona specifications for deployment.
//!
//! A sealed spec has been validated, carries a digest of its axioms and
//! exposes no way to change them. Amendments produce a new sealed version
//! with the same axioms (see [`crate::governance`]).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::types::*;

/// A validated persona whose axioms are fixed for a deployment.
#[derive(Debug, Clone, Serialize)]
pub struct SealedPersonaSpec {
    spec: PersonaSpec,
    axiom_digest: String,
    sealed_at: DateTime<Utc>,
}

impl SealedPersonaSpec {
    /// Validate and seal a spec.
    pub fn seal(spec: PersonaSpec) -> Result<Self> {
        let mut reasons = validate(&spec);
        reasons.extend(contradictions(&spec.axioms));
        if !reasons.is_empty() {
            tracing::warn!(persona_id = %spec.id, problems = reasons.len(), "Rejected persona spec");
            return Err(PersonaError::SpecInvalid { reasons });
        }

        let axiom_digest = digest_axioms(&spec.axioms);
        tracing::info!(
            persona_id = %spec.id,
            version = spec.version,
            digest = %axiom_digest,
            "Sealed persona spec"
        );

        Ok(Self {
            spec,
            axiom_digest,
            sealed_at: Utc::now(),
        })
    }

    /// Re-seal an amended spec, keeping the digest of the original axioms.
    pub(crate) fn reseal(spec: PersonaSpec, axiom_digest: String) -> Result<Self> {
        let reasons = validate(&spec);
        if !reasons.is_empty() {
            return Err(PersonaError::SpecInvalid { reasons });
        }
        if digest_axioms(&spec.axioms) != axiom_digest {
            return Err(PersonaError::invalid("amendment altered sealed axioms"));
        }
        Ok(Self {
            spec,
            axiom_digest,
            sealed_at: Utc::now(),
        })
    }

    /// Persona id.
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Sealed version.
    pub fn version(&self) -> u32 {
        self.spec.version
    }

    /// The underlying spec.
    pub fn spec(&self) -> &PersonaSpec {
        &self.spec
    }

    /// Axioms, in declaration order.
    pub fn axioms(&self) -> &[Axiom] {
        &self.spec.axioms
    }

    /// Primitives, in declaration order.
    pub fn primitives(&self) -> &[Primitive] {
        &self.spec.primitives
    }

    /// Engrams.
    pub fn engrams(&self) -> &[Engram] {
        &self.spec.engrams
    }

    /// Session-wide primitive violation budget.
    pub fn primitive_budget(&self) -> u32 {
        self.spec.primitive_budget
    }

    /// SHA256 digest of the axioms at sealing time.
    pub fn axiom_digest(&self) -> &str {
        &self.axiom_digest
    }

    /// When this version was sealed.
    pub fn sealed_at(&self) -> DateTime<Utc> {
        self.sealed_at
    }

    /// Recompute the axiom digest and compare it with the sealed one.
    pub fn verify_integrity(&self) -> bool {
        digest_axioms(&self.spec.axioms) == self.axiom_digest
    }

    /// Whether two personas share the same identity structure.
    pub fn equivalent(&self, other: &SealedPersonaSpec) -> bool {
        equivalent(&self.spec, &other.spec)
    }

    /// Clone out the spec, e.g. to start a new draft.
    pub fn into_spec(self) -> PersonaSpec {
        self.spec
    }
}

/// Validate and seal a spec.
pub fn seal(spec: PersonaSpec) -> Result<SealedPersonaSpec> {
    SealedPersonaSpec::seal(spec)
}

/// Two personas are equivalent when their axiom ids, primitive ids and engram
/// keys match in order.
pub fn equivalent(a: &PersonaSpec, b: &PersonaSpec) -> bool {
    a.axioms.iter().map(|x| &x.id).eq(b.axioms.iter().map(|x| &x.id))
        && a.primitives.iter().map(|x| &x.id).eq(b.primitives.iter().map(|x| &x.id))
        && a.engrams.iter().map(|x| &x.key).eq(b.engrams.iter().map(|x| &x.key))
}

/// SHA256 over the canonical JSON encoding of the axioms.
pub fn digest_axioms(axioms: &[Axiom]) -> String {
    let json = serde_json::to_vec(axioms).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&json);
    hex::encode(hasher.finalize())
}

/// Structural problems with a spec.
pub fn validate(spec: &PersonaSpec) -> Vec<String> {
    let mut problems = Vec::new();

    if spec.id.trim().is_empty() {
        problems.push("persona id is empty".to_string());
    }
    if spec.axioms.is_empty() {
        problems.push("persona declares no axioms".to_string());
    }

    let mut seen = HashSet::new();
    for (i, axiom) in spec.axioms.iter().enumerate() {
        let path = format!("axioms[{}]", i);
        if axiom.id.trim().is_empty() {
            problems.push(format!("{}: empty id", path));
        } else if !seen.insert(axiom.id.as_str()) {
            problems.push(format!("{}: duplicate axiom id '{}'", path, axiom.id));
        }
        if let AxiomScope::Trajectory { horizon: 0 } = axiom.scope {
            problems.push(format!("{}: trajectory horizon must be at least 1", path));
        }
        problems.extend(axiom.predicate.problems(&path));
    }

    let mut seen = HashSet::new();
    for (i, primitive) in spec.primitives.iter().enumerate() {
        let path = format!("primitives[{}]", i);
        if primitive.id.trim().is_empty() {
            problems.push(format!("{}: empty id", path));
        } else if !seen.insert(primitive.id.as_str()) {
            problems.push(format!("{}: duplicate primitive id '{}'", path, primitive.id));
        }
        if let Some(rewrite) = &primitive.rewrite {
            if rewrite.find.trim().is_empty() {
                problems.push(format!("{}: rewrite has an empty search phrase", path));
            }
        }
        problems.extend(primitive.predicate.problems(&path));
    }

    let mut seen = HashSet::new();
    for (i, engram) in spec.engrams.iter().enumerate() {
        let path = format!("engrams[{}]", i);
        if engram.key.trim().is_empty() {
            problems.push(format!("{}: empty key", path));
        } else if !seen.insert(engram.key.as_str()) {
            problems.push(format!("{}: duplicate engram key '{}'", path, engram.key));
        }
        if !unit_interval(engram.baseline) {
            problems.push(format!("{}: baseline must be within [0, 1]", path));
        }
        if !unit_interval(engram.rule.decay) || !unit_interval(engram.rule.reinforcement) {
            problems.push(format!("{}: rule factors must be within [0, 1]", path));
        }
    }

    problems
}

/// Pairs of axioms that can never hold together.
///
/// On the first turn every scope checks the response alone, so a required
/// phrase must appear in that response whatever the requiring axiom's scope.
/// Any axiom forbidding that phrase (or a substring of it) or capping the
/// length below it contradicts it.
pub fn contradictions(axioms: &[Axiom]) -> Vec<String> {
    let mut found = Vec::new();

    for requirer in axioms {
        for required in requirer.predicate.required_phrases() {
            for other in axioms {
                for forbidden in other.predicate.forbidden_phrases() {
                    if required.contains(&forbidden) {
                        found.push(format!(
                            "axiom '{}' requires \"{}\" but axiom '{}' forbids \"{}\"",
                            requirer.id, required, other.id, forbidden
                        ));
                    }
                }
                if let Some(limit) = other.predicate.length_limit() {
                    if required.chars().count() > limit {
                        found.push(format!(
                            "axiom '{}' requires \"{}\" but axiom '{}' caps length at {}",
                            requirer.id, required, other.id, limit
                        ));
                    }
                }
            }
        }
    }

    found
}

fn unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}
