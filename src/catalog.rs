//! Node catalog — shared definitions for typology networks.
//!
//! Definitions live in an arena (`Vec<NodeDef>`) with an id → index map on
//! the side. Networks reference definitions by arena index; the CPTs that
//! quantify a definition belong to each network, never to the catalog, so
//! two typologies can share `q1_trade_pattern` while conditioning it on
//! different parents.

// `from_str() -> Option<Self>` mirrors the serde snake_case encoding and
// returns None for unknown values rather than an error.
#![allow(clippy::should_implement_trait)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpt::PROB_TOLERANCE;

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    #[error("duplicate state '{state}' on node '{node}'")]
    DuplicateState { node: String, state: String },

    #[error("node '{node}' needs at least two states, got {got}")]
    TooFewStates { node: String, got: usize },

    #[error("prior on node '{node}' has {got} weights for {expected} states")]
    PriorLength {
        node: String,
        expected: usize,
        got: usize,
    },

    #[error("prior on node '{node}' sums to {sum:.9}, expected 1.0")]
    PriorSum { node: String, sum: f64 },

    #[error("prior on node '{node}' has weight {value} outside [0, 1]")]
    PriorWeight { node: String, value: f64 },
}

// ── Node category ────────────────────────────────────────────

/// Role of a node within a typology network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Receives mapped detection output; eligible for fallback substitution.
    Evidence,
    /// Aggregates parents; keeps fan-in at the outcome small.
    Intermediate,
    /// Named risk driver between aggregation and outcome; computed, never
    /// observed directly.
    RiskFactor,
    /// Single per network; its marginal is the risk posterior.
    Outcome,
}

impl NodeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evidence => "evidence",
            Self::Intermediate => "intermediate",
            Self::RiskFactor => "risk_factor",
            Self::Outcome => "outcome",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "evidence" => Some(Self::Evidence),
            "intermediate" => Some(Self::Intermediate),
            "risk_factor" => Some(Self::RiskFactor),
            "outcome" => Some(Self::Outcome),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Node definition ──────────────────────────────────────────

/// A reusable node definition: identity, states, and optional prior.
///
/// State order is significant — CPT columns and evidence indices resolve
/// against it, and outcome nodes order states benign → severe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub category: NodeCategory,
    pub states: Vec<String>,
    /// Marginal used when an evidence node arrives unobserved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<Vec<f64>>,
    /// Key the upstream evidence mapper publishes this node under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_key: Option<String>,
    /// Grouping tag for cross-cluster diversity scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NodeDef {
    pub fn new(
        id: impl Into<String>,
        category: NodeCategory,
        states: Vec<impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            category,
            states: states.into_iter().map(Into::into).collect(),
            prior: None,
            evidence_key: None,
            cluster: None,
            description: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_prior(mut self, prior: Vec<f64>) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn with_evidence_key(mut self, key: impl Into<String>) -> Self {
        self.evidence_key = Some(key.into());
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    /// Resolve a state label to its index in declaration order.
    pub fn state_index(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s == name)
    }

    /// Uniform distribution over this node's states.
    pub fn uniform(&self) -> Vec<f64> {
        vec![1.0 / self.states.len() as f64; self.states.len()]
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.states.len() < 2 {
            return Err(CatalogError::TooFewStates {
                node: self.id.clone(),
                got: self.states.len(),
            });
        }
        for (i, state) in self.states.iter().enumerate() {
            if self.states[..i].contains(state) {
                return Err(CatalogError::DuplicateState {
                    node: self.id.clone(),
                    state: state.clone(),
                });
            }
        }
        if let Some(prior) = &self.prior {
            if prior.len() != self.states.len() {
                return Err(CatalogError::PriorLength {
                    node: self.id.clone(),
                    expected: self.states.len(),
                    got: prior.len(),
                });
            }
            for &w in prior {
                if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                    return Err(CatalogError::PriorWeight {
                        node: self.id.clone(),
                        value: w,
                    });
                }
            }
            let sum: f64 = prior.iter().sum();
            if (sum - 1.0).abs() > PROB_TOLERANCE {
                return Err(CatalogError::PriorSum {
                    node: self.id.clone(),
                    sum,
                });
            }
        }
        Ok(())
    }
}

// ── Catalog ──────────────────────────────────────────────────

/// Arena of node definitions with an id index.
///
/// Insertion order is stable; arena indices returned by [`insert`] remain
/// valid for the life of the catalog (definitions are never removed).
///
/// [`insert`]: NodeCatalog::insert
#[derive(Debug, Clone, Default)]
pub struct NodeCatalog {
    arena: Vec<NodeDef>,
    index: HashMap<String, usize>,
}

impl NodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a definition, returning its arena index.
    pub fn insert(&mut self, def: NodeDef) -> Result<usize, CatalogError> {
        def.validate()?;
        if self.index.contains_key(&def.id) {
            return Err(CatalogError::DuplicateNode(def.id));
        }
        let idx = self.arena.len();
        self.index.insert(def.id.clone(), idx);
        self.arena.push(def);
        Ok(idx)
    }

    pub fn get(&self, id: &str) -> Option<&NodeDef> {
        self.index.get(id).map(|&i| &self.arena[i])
    }

    pub fn get_by_index(&self, idx: usize) -> Option<&NodeDef> {
        self.arena.get(idx)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Definitions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeDef> {
        self.arena.iter()
    }
}
