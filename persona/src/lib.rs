//! Persona Specification Store
//!
//! A persona is a declared interactional identity. This crate models the
//! persona document and its lifecycle:
//!
//! - **Axioms**: hard invariants, immutable once the persona is sealed
//! - **Primitives**: soft constraints drawn against a violation budget
//! - **Engrams**: persistent dispositions with a decay/reinforcement rule
//!
//! # Key Components
//!
//! - [`Predicate`]: The small text predicate language axioms and primitives use
//! - [`SealedPersonaSpec`]: A validated persona ready for deployment
//! - [`amend_primitives`]: Governance-gated evolution of primitives and engrams
//! - [`PersonaStore`]: Shared, read-mostly store of drafts and sealed versions
//!
//! # Example
//!
//! ```ignore
//! use persona::{Axiom, PersonaSpec, PersonaStore, Predicate};
//!
//! let store = PersonaStore::with_shared_secret("governance-secret");
//! store.register(
//!     PersonaSpec::new("mentor")
//!         .with_axiom(Axiom::new("not_human", "Never claim to be human", Predicate::forbids("i am human")))
//!         .with_primitive_budget(2),
//! ).await?;
//! let sealed = store.seal("mentor").await?;
//! ```

pub mod governance;
pub mod predicate;
pub mod seal;
pub mod store;
pub mod types;

// Re-export main types
pub use governance::{amend_primitives, Amendment, AmendmentChange, SharedSecretVerifier, SignOff, SignOffVerifier};
pub use predicate::Predicate;
pub use seal::{equivalent, seal, SealedPersonaSpec};
pub use store::PersonaStore;
pub use types::*;
