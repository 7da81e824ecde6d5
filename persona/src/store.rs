//! Persona specification store.
//!
//! Holds draft and sealed personas. Reads are shared; amendments take the
//! write lock for the whole governance transaction so no reader observes a
//! half-applied change.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::governance::{amend_primitives, Amendment, SharedSecretVerifier, SignOff, SignOffVerifier};
use crate::seal::SealedPersonaSpec;
use crate::types::*;

/// Stored state for one persona id.
#[derive(Default)]
struct PersonaRecord {
    /// Unsealed definition, if one has been registered
    draft: Option<PersonaSpec>,
    /// Sealed versions, oldest first
    sealed: Vec<Arc<SealedPersonaSpec>>,
}

/// In-memory store of persona specifications.
pub struct PersonaStore {
    records: Arc<RwLock<HashMap<String, PersonaRecord>>>,
    verifier: Arc<dyn SignOffVerifier>,
}

impl PersonaStore {
    /// Create a store that checks amendments with the given verifier.
    pub fn new(verifier: Arc<dyn SignOffVerifier>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            verifier,
        }
    }

    /// Create a store using shared-secret sign-off tokens.
    pub fn with_shared_secret(secret: impl Into<String>) -> Self {
        Self::new(Arc::new(SharedSecretVerifier::new(secret)))
    }

    /// Register a draft persona. Fails if the id is already sealed.
    pub async fn register(&self, spec: PersonaSpec) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.entry(spec.id.clone()).or_default();
        if !record.sealed.is_empty() {
            return Err(PersonaError::AlreadySealed(spec.id));
        }

        tracing::debug!(persona_id = %spec.id, "Registered draft persona");
        record.draft = Some(spec);
        Ok(())
    }

    /// Register a draft from a YAML document. Returns the persona id.
    pub async fn register_yaml(&self, yaml: &str) -> Result<String> {
        let spec = PersonaSpec::from_yaml(yaml)?;
        let id = spec.id.clone();
        self.register(spec).await?;
        Ok(id)
    }

    /// Register a draft from a JSON document. Returns the persona id.
    pub async fn register_json(&self, json: &str) -> Result<String> {
        let spec = PersonaSpec::from_json(json)?;
        let id = spec.id.clone();
        self.register(spec).await?;
        Ok(id)
    }

    /// Load the current definition: the latest sealed version, else the draft.
    pub async fn load(&self, id: &str) -> Result<PersonaSpec> {
        let records = self.records.read().await;
        let record = records.get(id).ok_or_else(|| PersonaError::NotFound(id.to_string()))?;

        if let Some(latest) = record.sealed.last() {
            return Ok(latest.spec().clone());
        }
        record
            .draft
            .clone()
            .ok_or_else(|| PersonaError::NotFound(id.to_string()))
    }

    /// Seal the registered draft.
    pub async fn seal(&self, id: &str) -> Result<Arc<SealedPersonaSpec>> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| PersonaError::NotFound(id.to_string()))?;

        if !record.sealed.is_empty() {
            return Err(PersonaError::AlreadySealed(id.to_string()));
        }
        let draft = record
            .draft
            .clone()
            .ok_or_else(|| PersonaError::NotFound(id.to_string()))?;

        let sealed = Arc::new(SealedPersonaSpec::seal(draft)?);
        record.draft = None;
        record.sealed.push(Arc::clone(&sealed));
        Ok(sealed)
    }

    /// Latest sealed version.
    pub async fn sealed(&self, id: &str) -> Result<Arc<SealedPersonaSpec>> {
        let records = self.records.read().await;
        let record = records.get(id).ok_or_else(|| PersonaError::NotFound(id.to_string()))?;
        record
            .sealed
            .last()
            .cloned()
            .ok_or_else(|| PersonaError::NotSealed(id.to_string()))
    }

    /// A specific sealed version.
    pub async fn sealed_version(&self, id: &str, version: u32) -> Result<Arc<SealedPersonaSpec>> {
        let records = self.records.read().await;
        let record = records.get(id).ok_or_else(|| PersonaError::NotFound(id.to_string()))?;
        record
            .sealed
            .iter()
            .find(|s| s.version() == version)
            .cloned()
            .ok_or_else(|| PersonaError::NotFound(format!("{}@{}", id, version)))
    }

    /// Amend the latest sealed version under governance sign-off.
    pub async fn amend_primitives(
        &self,
        id: &str,
        amendment: &Amendment,
        sign_off: Option<&SignOff>,
    ) -> Result<Arc<SealedPersonaSpec>> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| PersonaError::NotFound(id.to_string()))?;
        let current = record
            .sealed
            .last()
            .cloned()
            .ok_or_else(|| PersonaError::NotSealed(id.to_string()))?;

        let next = Arc::new(amend_primitives(&current, amendment, sign_off, self.verifier.as_ref()).await?);
        record.sealed.push(Arc::clone(&next));
        Ok(next)
    }

    /// All sealed versions, oldest first.
    pub async fn versions(&self, id: &str) -> Vec<Arc<SealedPersonaSpec>> {
        let records = self.records.read().await;
        records.get(id).map(|r| r.sealed.clone()).unwrap_or_default()
    }

    /// Known persona ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let records = self.records.read().await;
        let mut ids: Vec<String> = records.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of known personas.
    pub async fn count(&self) -> usize {
        let records = self.records.read().await;
        records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::AmendmentChange;
    use crate::predicate::Predicate;

    const SECRET: &str = "s3cret";

    fn mentor() -> PersonaSpec {
        PersonaSpec::new("mentor")
            .with_axiom(Axiom::new("not_human", "Never claim to be human", Predicate::forbids("i am human")))
            .with_primitive_budget(2)
    }

    #[tokio::test]
    async fn test_register_load_seal() {
        let store = PersonaStore::with_shared_secret(SECRET);
        store.register(mentor()).await.unwrap();

        assert_eq!(store.load("mentor").await.unwrap().id, "mentor");
        assert!(matches!(store.sealed("mentor").await, Err(PersonaError::NotSealed(_))));

        let sealed = store.seal("mentor").await.unwrap();
        assert_eq!(sealed.version(), 1);
        assert!(matches!(store.seal("mentor").await, Err(PersonaError::AlreadySealed(_))));
        assert!(matches!(store.register(mentor()).await, Err(PersonaError::AlreadySealed(_))));
    }

    #[tokio::test]
    async fn test_missing_persona() {
        let store = PersonaStore::with_shared_secret(SECRET);
        assert!(matches!(store.load("ghost").await, Err(PersonaError::NotFound(_))));
        assert!(store.versions("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_draft_stays_unsealed() {
        let store = PersonaStore::with_shared_secret(SECRET);
        store.register(PersonaSpec::new("blank")).await.unwrap();

        assert!(matches!(store.seal("blank").await, Err(PersonaError::SpecInvalid { .. })));
        assert!(store.load("blank").await.is_ok());
        assert!(store.versions("blank").await.is_empty());
    }

    #[tokio::test]
    async fn test_sealed_axioms_identical_across_reads() {
        let store = PersonaStore::with_shared_secret(SECRET);
        store.register(mentor()).await.unwrap();
        store.seal("mentor").await.unwrap();

        let first = store.sealed("mentor").await.unwrap().axioms().to_vec();
        let amendment = Amendment::new("budget").with_change(AmendmentChange::SetPrimitiveBudget { budget: 4 });
        let sign_off = SignOff::issue("alice", SECRET, "mentor", 1, &amendment);
        store
            .amend_primitives("mentor", &amendment, Some(&sign_off))
            .await
            .unwrap();
        let second = store.sealed("mentor").await.unwrap();

        assert_eq!(second.version(), 2);
        assert_eq!(second.primitive_budget(), 4);
        assert_eq!(first, second.axioms());
        assert_eq!(store.versions("mentor").await.len(), 2);
        assert_eq!(store.sealed_version("mentor", 1).await.unwrap().primitive_budget(), 2);
    }

    #[tokio::test]
    async fn test_amend_without_sign_off_leaves_store_unchanged() {
        let store = PersonaStore::with_shared_secret(SECRET);
        store.register(mentor()).await.unwrap();
        store.seal("mentor").await.unwrap();

        let amendment = Amendment::new("budget").with_change(AmendmentChange::SetPrimitiveBudget { budget: 9 });
        let err = store.amend_primitives("mentor", &amendment, None).await.unwrap_err();
        assert!(matches!(err, PersonaError::GovernanceRequired(_)));
        assert_eq!(store.versions("mentor").await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_yaml() {
        let store = PersonaStore::with_shared_secret(SECRET);
        let id = store
            .register_yaml(
                "id: guide\naxioms:\n  - id: a\n    statement: no lies\n    predicate: {kind: forbids, phrase: trust me blindly}\n",
            )
            .await
            .unwrap();
        assert_eq!(id, "guide");
        assert_eq!(store.ids().await, vec!["guide".to_string()]);
    }

    #[tokio::test]
    async fn test_register_json() {
        let store = PersonaStore::with_shared_secret(SECRET);
        let id = store
            .register_json(
                r#"{
                    "id": "guide",
                    "axioms": [
                        {"id": "a", "statement": "no lies", "predicate": {"kind": "forbids", "phrase": "trust me blindly"}}
                    ],
                    "primitive_budget": 3
                }"#,
            )
            .await
            .unwrap();
        assert_eq!(id, "guide");

        let sealed = store.seal("guide").await.unwrap();
        assert_eq!(sealed.primitive_budget(), 3);
        assert_eq!(sealed.axioms()[0].id, "a");

        assert!(matches!(store.register_json("{not json").await, Err(PersonaError::Parse(_))));
    }
}
