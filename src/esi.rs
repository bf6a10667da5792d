//! Evidence Sufficiency Index.
//!
//! A posterior tells you how risky the observed pattern looks; the ESI
//! tells you how much observation actually backs it. Five components, each
//! in [0, 1], weighted into a single score:
//!
//! - `node_activation_ratio` — share of evidence nodes actually observed
//! - `mean_confidence_score` — mean mapper confidence across observations
//! - `fallback_ratio_component` — 1 minus the fallback ratio
//! - `contribution_entropy` — normalized Shannon entropy of observation
//!   confidences; high when no single input dominates
//! - `cross_cluster_diversity` — share of evidence clusters with at least
//!   one observation
//!
//! The adjusted risk score damps the raw posterior by the ESI and can
//! never exceed it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpt::PROB_TOLERANCE;
use crate::evidence::ResolvedEvidence;
use crate::network::CompiledNetwork;

/// Confidences below this contribute no entropy mass.
const MIN_ENTROPY_WEIGHT: f64 = 1e-10;

/// Bucket for evidence nodes that declare no cluster tag.
const UNCLUSTERED: &str = "uncategorized";

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EsiError {
    #[error("esi weight '{component}' is {value}, outside [0, 1]")]
    WeightRange { component: &'static str, value: f64 },

    #[error("esi weights sum to {sum:.9}, expected 1.0")]
    WeightSum { sum: f64 },
}

// ── Weights ──────────────────────────────────────────────────

/// Component weights; defaults are equal fifths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EsiWeights {
    pub activation: f64,
    pub confidence: f64,
    pub fallback: f64,
    pub entropy: f64,
    pub diversity: f64,
}

impl Default for EsiWeights {
    fn default() -> Self {
        Self {
            activation: 0.2,
            confidence: 0.2,
            fallback: 0.2,
            entropy: 0.2,
            diversity: 0.2,
        }
    }
}

impl EsiWeights {
    pub fn validate(&self) -> Result<(), EsiError> {
        let named = [
            ("activation", self.activation),
            ("confidence", self.confidence),
            ("fallback", self.fallback),
            ("entropy", self.entropy),
            ("diversity", self.diversity),
        ];
        for (component, value) in named {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EsiError::WeightRange { component, value });
            }
        }
        let sum: f64 = named.iter().map(|(_, v)| v).sum();
        if (sum - 1.0).abs() > PROB_TOLERANCE {
            return Err(EsiError::WeightSum { sum });
        }
        Ok(())
    }
}

// ── Badges ───────────────────────────────────────────────────

/// Analyst-facing sufficiency band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EsiBadge {
    Strong,
    Moderate,
    Limited,
    Sparse,
}

impl EsiBadge {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::Strong
        } else if score >= 0.6 {
            Self::Moderate
        } else if score >= 0.4 {
            Self::Limited
        } else {
            Self::Sparse
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Moderate => "moderate",
            Self::Limited => "limited",
            Self::Sparse => "sparse",
        }
    }
}

impl std::fmt::Display for EsiBadge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Breakdown ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsiComponents {
    pub node_activation_ratio: f64,
    pub mean_confidence_score: f64,
    pub fallback_ratio_component: f64,
    pub contribution_entropy: f64,
    pub cross_cluster_diversity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsiBreakdown {
    pub score: f64,
    pub badge: EsiBadge,
    pub components: EsiComponents,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

// ── Calculation ──────────────────────────────────────────────

/// Score the evidence behind one resolution. Weights must have passed
/// [`EsiWeights::validate`].
pub fn calculate(
    network: &CompiledNetwork,
    resolved: &ResolvedEvidence,
    weights: &EsiWeights,
) -> EsiBreakdown {
    let eligible = resolved.eligible_count();
    if eligible == 0 {
        return EsiBreakdown {
            score: 0.0,
            badge: EsiBadge::Sparse,
            components: EsiComponents {
                node_activation_ratio: 0.0,
                mean_confidence_score: 0.0,
                fallback_ratio_component: 0.0,
                contribution_entropy: 0.0,
                cross_cluster_diversity: 0.0,
            },
            flags: vec!["no_evidence_model".to_string()],
        };
    }

    let observed = resolved.observed_count();
    let node_activation_ratio = observed as f64 / eligible as f64;
    let fallback_ratio_component = 1.0 - resolved.fallback_ratio();

    let confidences: Vec<f64> = network
        .evidence_nodes()
        .iter()
        .filter_map(|&idx| resolved.confidence(idx))
        .collect();
    let mean_confidence_score = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    let contribution_entropy = normalized_entropy(&confidences);
    let cross_cluster_diversity = cluster_diversity(network, resolved);

    let score = (weights.activation * node_activation_ratio
        + weights.confidence * mean_confidence_score
        + weights.fallback * fallback_ratio_component
        + weights.entropy * contribution_entropy
        + weights.diversity * cross_cluster_diversity)
        .clamp(0.0, 1.0);

    EsiBreakdown {
        score,
        badge: EsiBadge::from_score(score),
        components: EsiComponents {
            node_activation_ratio,
            mean_confidence_score,
            fallback_ratio_component,
            contribution_entropy,
            cross_cluster_diversity,
        },
        flags: Vec::new(),
    }
}

/// Damp a raw risk score by evidence sufficiency. Monotone: never above
/// the raw score.
pub fn adjusted_risk(risk_score: f64, esi_score: f64) -> f64 {
    (risk_score * esi_score).clamp(0.0, 1.0)
}

/// Shannon entropy of the confidences as contribution weights, normalized
/// to [0, 1] by the maximum `ln(n)`. Below two observations there is no
/// spread to measure.
fn normalized_entropy(confidences: &[f64]) -> f64 {
    let n = confidences.len();
    if n < 2 {
        return 0.0;
    }
    let total: f64 = confidences.iter().sum();
    let weights: Vec<f64> = if total > MIN_ENTROPY_WEIGHT {
        confidences.iter().map(|&c| c / total).collect()
    } else {
        // All-zero confidences still spread evenly across observations.
        vec![1.0 / n as f64; n]
    };
    let entropy: f64 = weights
        .iter()
        .filter(|&&w| w > MIN_ENTROPY_WEIGHT)
        .map(|&w| -w * w.ln())
        .sum();
    (entropy / (n as f64).ln()).clamp(0.0, 1.0)
}

/// Distinct clusters with at least one observation over distinct clusters
/// eligible. Untagged nodes pool into one shared bucket, so an untagged
/// model scores 1.0 as soon as anything is observed.
fn cluster_diversity(network: &CompiledNetwork, resolved: &ResolvedEvidence) -> f64 {
    use std::collections::HashSet;

    let mut eligible_clusters: HashSet<&str> = HashSet::new();
    let mut active_clusters: HashSet<&str> = HashSet::new();
    for &idx in network.evidence_nodes() {
        let def = &network.node(idx).def;
        let key = def.cluster.as_deref().unwrap_or(UNCLUSTERED);
        eligible_clusters.insert(key);
        if resolved.confidence(idx).is_some() {
            active_clusters.insert(key);
        }
    }
    if eligible_clusters.is_empty() {
        return 0.0;
    }
    active_clusters.len() as f64 / eligible_clusters.len() as f64
}


// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------
