//! mas-bayes: Bayesian risk inference for market-abuse surveillance
//!
//! This crate contains the pure inference logic with NO database or
//! transport dependencies:
//! - Node catalog (shared node definitions, arena-plus-index)
//! - Typed conditional probability tables with build-time shape validation
//! - Network builder (topological sort, cycle and polytree checks)
//! - Evidence resolution with prior/uniform fallback
//! - Exact forward-pass inference over polytrees
//! - Evidence Sufficiency Index (ESI) scoring and risk adjustment
//! - YAML model definitions and an atomically swappable model registry
//!
//! Alert ingestion, case management, and persistence live upstream; this
//! crate takes mapped evidence in and hands scored assessments back.

pub mod catalog;
pub mod cpt;
pub mod engine;
pub mod esi;
pub mod evidence;
pub mod inference;
pub mod model;
pub mod network;
pub mod registry;

// Re-export commonly used types
pub use catalog::{CatalogError, NodeCatalog, NodeCategory, NodeDef};
pub use cpt::{Cpt, CptError, PROB_TOLERANCE};
pub use engine::{EngineError, RiskAssessment, RiskEngine};
pub use esi::{EsiBadge, EsiBreakdown, EsiComponents, EsiError, EsiWeights};
pub use evidence::{
    EvidenceError, EvidenceSet, EvidenceValue, FallbackKind, FallbackRecord, ResolvedEvidence,
    StateRef,
};
pub use inference::{infer, InferenceResult, Posterior};
pub use model::{ModelError, ModelSpec, NodeSpec};
pub use network::{BuildError, CompiledNetwork, NetworkBuilder};
pub use registry::{ModelRegistry, RegistryError};
