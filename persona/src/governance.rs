//! Governance-gated amendment of sealed personas.
//!
//! Primitives and engrams may evolve after sealing, but only with a sign-off
//! from a reviewer. Axioms are carried over verbatim into every new version.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::seal::SealedPersonaSpec;
use crate::types::*;

/// A single change to the evolvable part of a persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AmendmentChange {
    /// Append a new primitive
    AddPrimitive { primitive: Primitive },
    /// Replace the primitive with the same id
    ReplacePrimitive { primitive: Primitive },
    /// Remove a primitive by id
    RemovePrimitive { id: String },
    /// Change the session-wide primitive budget
    SetPrimitiveBudget { budget: u32 },
    /// Insert or replace an engram by key
    UpsertEngram { engram: Engram },
    /// Remove an engram by key
    RemoveEngram { key: String },
}

/// A set of changes submitted together for sign-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amendment {
    /// Changes, applied in order
    pub changes: Vec<AmendmentChange>,
    /// Why the persona is being changed
    #[serde(default)]
    pub rationale: String,
}

impl Amendment {
    /// Create an amendment.
    pub fn new(rationale: impl Into<String>) -> Self {
        Self {
            changes: Vec::new(),
            rationale: rationale.into(),
        }
    }

    /// Builder: add a change.
    pub fn with_change(mut self, change: AmendmentChange) -> Self {
        self.changes.push(change);
        self
    }

    /// SHA256 over the canonical JSON encoding of the amendment.
    pub fn digest(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&json);
        hex::encode(hasher.finalize())
    }

    /// Apply the changes to a copy of the spec.
    fn apply_to(&self, spec: &PersonaSpec) -> Result<PersonaSpec> {
        let mut next = spec.clone();

        for change in &self.changes {
            match change {
                AmendmentChange::AddPrimitive { primitive } => {
                    if next.primitive(&primitive.id).is_some() {
                        return Err(PersonaError::invalid(format!(
                            "primitive '{}' already exists",
                            primitive.id
                        )));
                    }
                    next.primitives.push(primitive.clone());
                }
                AmendmentChange::ReplacePrimitive { primitive } => {
                    let slot = next
                        .primitives
                        .iter_mut()
                        .find(|p| p.id == primitive.id)
                        .ok_or_else(|| {
                            PersonaError::invalid(format!("primitive '{}' does not exist", primitive.id))
                        })?;
                    *slot = primitive.clone();
                }
                AmendmentChange::RemovePrimitive { id } => {
                    let before = next.primitives.len();
                    next.primitives.retain(|p| &p.id != id);
                    if next.primitives.len() == before {
                        return Err(PersonaError::invalid(format!("primitive '{}' does not exist", id)));
                    }
                }
                AmendmentChange::SetPrimitiveBudget { budget } => {
                    next.primitive_budget = *budget;
                }
                AmendmentChange::UpsertEngram { engram } => {
                    match next.engrams.iter_mut().find(|e| e.key == engram.key) {
                        Some(slot) => *slot = engram.clone(),
                        None => next.engrams.push(engram.clone()),
                    }
                }
                AmendmentChange::RemoveEngram { key } => {
                    let before = next.engrams.len();
                    next.engrams.retain(|e| &e.key != key);
                    if next.engrams.len() == before {
                        return Err(PersonaError::invalid(format!("engram '{}' does not exist", key)));
                    }
                }
            }
        }

        next.version = spec.version + 1;
        Ok(next)
    }
}

/// Reviewer approval for an amendment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignOff {
    /// Who approved
    pub reviewer: String,
    /// Approval token, checked by a [`SignOffVerifier`]
    pub token: String,
    /// When the approval was issued
    pub issued_at: DateTime<Utc>,
}

impl SignOff {
    /// Issue a shared-secret token for amending `persona_id` at `version`.
    pub fn issue(
        reviewer: impl Into<String>,
        secret: &str,
        persona_id: &str,
        version: u32,
        amendment: &Amendment,
    ) -> Self {
        Self {
            reviewer: reviewer.into(),
            token: shared_secret_token(secret, persona_id, version, amendment),
            issued_at: Utc::now(),
        }
    }
}

/// Compute the token a [`SharedSecretVerifier`] expects.
pub fn shared_secret_token(secret: &str, persona_id: &str, version: u32, amendment: &Amendment) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"|");
    hasher.update(persona_id.as_bytes());
    hasher.update(b"|");
    hasher.update(version.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(amendment.digest().as_bytes());
    hex::encode(hasher.finalize())
}

/// Trait for checking governance sign-offs.
///
/// Allows different approval mechanisms (shared secret, external review
/// service, multi-party approval) behind one seam.
#[async_trait]
pub trait SignOffVerifier: Send + Sync {
    /// Whether the sign-off approves this amendment of this persona version.
    async fn verify(&self, sign_off: &SignOff, persona_id: &str, version: u32, amendment: &Amendment) -> bool;
}

/// Verifier for tokens derived from a shared governance secret.
pub struct SharedSecretVerifier {
    secret: String,
}

impl SharedSecretVerifier {
    /// Create a verifier for the given secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

#[async_trait]
impl SignOffVerifier for SharedSecretVerifier {
    async fn verify(&self, sign_off: &SignOff, persona_id: &str, version: u32, amendment: &Amendment) -> bool {
        if sign_off.reviewer.trim().is_empty() {
            return false;
        }
        sign_off.token == shared_secret_token(&self.secret, persona_id, version, amendment)
    }
}

/// Amend the primitives and engrams of a sealed persona.
///
/// Produces the next sealed version. Axioms and their digest are unchanged.
pub async fn amend_primitives(
    spec: &SealedPersonaSpec,
    amendment: &Amendment,
    sign_off: Option<&SignOff>,
    verifier: &dyn SignOffVerifier,
) -> Result<SealedPersonaSpec> {
    let sign_off = sign_off.ok_or_else(|| PersonaError::GovernanceRequired(spec.id().to_string()))?;

    if !verifier.verify(sign_off, spec.id(), spec.version(), amendment).await {
        tracing::warn!(
            persona_id = %spec.id(),
            reviewer = %sign_off.reviewer,
            "Amendment sign-off rejected"
        );
        return Err(PersonaError::SignOffRejected(spec.id().to_string()));
    }

    let next = amendment.apply_to(spec.spec())?;
    let sealed = SealedPersonaSpec::reseal(next, spec.axiom_digest().to_string())?;

    tracing::info!(
        persona_id = %sealed.id(),
        version = sealed.version(),
        reviewer = %sign_off.reviewer,
        changes = amendment.changes.len(),
        "Amended persona"
    );

    Ok(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Predicate;
    use crate::seal::seal;

    const SECRET: &str = "governance-secret";

    fn sealed() -> SealedPersonaSpec {
        seal(
            PersonaSpec::new("mentor")
                .with_axiom(Axiom::new("not_human", "Never claim to be human", Predicate::forbids("i am human")))
                .with_primitive(Primitive::new("polite", "Be polite", Predicate::forbids("shut up")))
                .with_primitive_budget(2),
        )
        .unwrap()
    }

    fn budget_change() -> Amendment {
        Amendment::new("loosen budget").with_change(AmendmentChange::SetPrimitiveBudget { budget: 5 })
    }

    #[tokio::test]
    async fn test_amend_requires_sign_off() {
        let spec = sealed();
        let verifier = SharedSecretVerifier::new(SECRET);

        let err = amend_primitives(&spec, &budget_change(), None, &verifier).await.unwrap_err();
        assert!(matches!(err, PersonaError::GovernanceRequired(id) if id == "mentor"));
    }

    #[tokio::test]
    async fn test_amend_rejects_bad_token() {
        let spec = sealed();
        let verifier = SharedSecretVerifier::new(SECRET);
        let forged = SignOff::issue("mallory", "wrong-secret", "mentor", 1, &budget_change());

        let err = amend_primitives(&spec, &budget_change(), Some(&forged), &verifier)
            .await
            .unwrap_err();
        assert!(matches!(err, PersonaError::SignOffRejected(_)));
    }

    #[tokio::test]
    async fn test_token_is_bound_to_amendment() {
        let spec = sealed();
        let verifier = SharedSecretVerifier::new(SECRET);
        let sign_off = SignOff::issue("alice", SECRET, "mentor", 1, &budget_change());
        let other = Amendment::new("sneaky").with_change(AmendmentChange::SetPrimitiveBudget { budget: 100 });

        assert!(amend_primitives(&spec, &other, Some(&sign_off), &verifier).await.is_err());
    }

    #[tokio::test]
    async fn test_amend_keeps_axioms() {
        let spec = sealed();
        let verifier = SharedSecretVerifier::new(SECRET);
        let amendment = Amendment::new("add brevity")
            .with_change(AmendmentChange::AddPrimitive {
                primitive: Primitive::new("brief", "Be brief", Predicate::MaxLength { chars: 500 }),
            })
            .with_change(AmendmentChange::RemovePrimitive { id: "polite".into() })
            .with_change(AmendmentChange::UpsertEngram {
                engram: Engram::new("warmth", 0.3, vec!["glad".into()]),
            });
        let sign_off = SignOff::issue("alice", SECRET, "mentor", 1, &amendment);

        let next = amend_primitives(&spec, &amendment, Some(&sign_off), &verifier).await.unwrap();
        assert_eq!(next.version(), 2);
        assert_eq!(next.axioms(), spec.axioms());
        assert_eq!(next.axiom_digest(), spec.axiom_digest());
        assert!(next.verify_integrity());
        assert_eq!(next.primitives().len(), 1);
        assert_eq!(next.primitives()[0].id, "brief");
        assert_eq!(next.engrams().len(), 1);
        // The original version is untouched.
        assert_eq!(spec.primitives()[0].id, "polite");
    }

    #[tokio::test]
    async fn test_amend_replaces_primitive_and_engrams() {
        let spec = seal(
            PersonaSpec::new("mentor")
                .with_axiom(Axiom::new("not_human", "Never claim to be human", Predicate::forbids("i am human")))
                .with_primitive(Primitive::new("polite", "Be polite", Predicate::forbids("shut up")))
                .with_engram(Engram::new("warmth", 0.5, vec!["glad".into()]))
                .with_engram(Engram::new("candor", 0.5, vec!["honestly".into()])),
        )
        .unwrap();
        let verifier = SharedSecretVerifier::new(SECRET);
        let amendment = Amendment::new("retune")
            .with_change(AmendmentChange::ReplacePrimitive {
                primitive: Primitive::new("polite", "Be courteous", Predicate::forbids("be quiet")).with_tolerance(1),
            })
            .with_change(AmendmentChange::UpsertEngram {
                engram: Engram::new("warmth", 0.8, vec!["happy to".into()]),
            })
            .with_change(AmendmentChange::RemoveEngram { key: "candor".into() });
        let sign_off = SignOff::issue("alice", SECRET, "mentor", 1, &amendment);

        let next = amend_primitives(&spec, &amendment, Some(&sign_off), &verifier).await.unwrap();

        assert_eq!(next.primitives().len(), 1);
        assert_eq!(next.primitives()[0].statement, "Be courteous");
        assert_eq!(next.primitives()[0].tolerance, Some(1));
        assert_eq!(next.engrams().len(), 1);
        assert_eq!(next.engrams()[0].key, "warmth");
        assert_eq!(next.engrams()[0].baseline, 0.8);
        assert_eq!(next.engrams()[0].cues, vec!["happy to".to_string()]);
        assert_eq!(next.axiom_digest(), spec.axiom_digest());
    }

    #[tokio::test]
    async fn test_amend_rejects_unknown_targets() {
        let spec = sealed();
        let verifier = SharedSecretVerifier::new(SECRET);

        for change in [
            AmendmentChange::ReplacePrimitive {
                primitive: Primitive::new("ghost", "x", Predicate::forbids("y")),
            },
            AmendmentChange::RemoveEngram { key: "ghost".into() },
        ] {
            let amendment = Amendment::new("typo").with_change(change);
            let sign_off = SignOff::issue("alice", SECRET, "mentor", 1, &amendment);
            let err = amend_primitives(&spec, &amendment, Some(&sign_off), &verifier).await.unwrap_err();
            assert!(err.to_string().contains("'ghost' does not exist"));
        }
    }

    #[tokio::test]
    async fn test_amend_rejects_unknown_primitive() {
        let spec = sealed();
        let verifier = SharedSecretVerifier::new(SECRET);
        let amendment = Amendment::new("typo").with_change(AmendmentChange::RemovePrimitive { id: "nope".into() });
        let sign_off = SignOff::issue("alice", SECRET, "mentor", 1, &amendment);

        let err = amend_primitives(&spec, &amendment, Some(&sign_off), &verifier).await.unwrap_err();
        assert!(matches!(err, PersonaError::SpecInvalid { .. }));
    }
}
