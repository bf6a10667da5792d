//! Evidence assignment and fallback resolution.
//!
//! The upstream mapper hands over observed states per node id; resolution
//! pins those nodes, substitutes a prior (or uniform) for every
//! evidence-eligible node left unobserved, and records each substitution.
//! Missing evidence never aborts an assessment — only malformed evidence
//! does (unknown ids or states, evidence aimed at a non-evidence node).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::catalog::{NodeCategory, NodeDef};
use crate::network::CompiledNetwork;

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("evidence references unknown node '{0}'")]
    UnknownNode(String),

    #[error("evidence for node '{node}' names unknown state '{state}'")]
    UnknownState { node: String, state: String },

    #[error("node '{node}' is {category}, only evidence nodes accept observations")]
    NotEvidenceNode { node: String, category: String },

    #[error("evidence for node '{node}' has confidence {confidence}, outside [0, 1]")]
    BadConfidence { node: String, confidence: f64 },
}

// ── Evidence input ───────────────────────────────────────────

/// An observed state, by declared label or by position. Mappers that work
/// off the node's state ordering send the index; human-authored evidence
/// files use the label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateRef {
    Index(usize),
    Name(String),
}

impl StateRef {
    /// Position in the node's declared state order, None when the
    /// reference does not resolve.
    fn resolve(&self, def: &NodeDef) -> Option<usize> {
        match self {
            Self::Index(i) if *i < def.n_states() => Some(*i),
            Self::Index(_) => None,
            Self::Name(name) => def.state_index(name),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Index(i) => format!("#{i}"),
            Self::Name(name) => name.clone(),
        }
    }
}

/// One observed value: a state reference plus mapper confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceValue {
    pub state: StateRef,
    /// Mapper confidence in the observation; feeds ESI, not the posterior.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl EvidenceValue {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: StateRef::Name(state.into()),
            confidence: 1.0,
        }
    }

    pub fn at_index(index: usize) -> Self {
        Self {
            state: StateRef::Index(index),
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Mapped evidence for one assessment, keyed by node id.
///
/// Serializes as the bare map, so an evidence file is just
/// `node_id: {state: ..., confidence: ...}` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceSet {
    values: HashMap<String, EvidenceValue>,
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, node: impl Into<String>, state: impl Into<String>) -> Self {
        self.values
            .insert(node.into(), EvidenceValue::new(state.into()));
        self
    }

    pub fn with_confident(
        mut self,
        node: impl Into<String>,
        state: impl Into<String>,
        confidence: f64,
    ) -> Self {
        self.values.insert(
            node.into(),
            EvidenceValue::new(state.into()).with_confidence(confidence),
        );
        self
    }

    pub fn with_index(mut self, node: impl Into<String>, state: usize) -> Self {
        self.values.insert(node.into(), EvidenceValue::at_index(state));
        self
    }

    pub fn insert(&mut self, node: impl Into<String>, value: EvidenceValue) {
        self.values.insert(node.into(), value);
    }

    pub fn get(&self, node: &str) -> Option<&EvidenceValue> {
        self.values.get(node)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EvidenceValue)> {
        self.values.iter()
    }
}

// ── Fallback records ─────────────────────────────────────────

/// What stood in for a missing observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    /// The node's declared prior.
    Prior,
    /// Uniform over the node's states (no prior declared).
    Uniform,
}

impl FallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prior => "prior",
            Self::Uniform => "uniform",
        }
    }
}

/// One substitution performed during resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub node: String,
    pub kind: FallbackKind,
    pub distribution: Vec<f64>,
}

// ── Resolution ───────────────────────────────────────────────

/// Per-node distributions for every evidence-eligible node, plus the
/// bookkeeping ESI needs.
#[derive(Debug, Clone)]
pub struct ResolvedEvidence {
    /// network node index → resolved distribution
    distributions: HashMap<usize, Vec<f64>>,
    /// network node index → supplied confidence (observed nodes only)
    confidences: HashMap<usize, f64>,
    fallbacks: Vec<FallbackRecord>,
    fallback_ratio: f64,
    observed_count: usize,
    eligible_count: usize,
}

impl ResolvedEvidence {
    pub fn distribution(&self, node_idx: usize) -> Option<&[f64]> {
        self.distributions.get(&node_idx).map(Vec::as_slice)
    }

    /// Confidence supplied with the observation, None for fallen-back nodes.
    pub fn confidence(&self, node_idx: usize) -> Option<f64> {
        self.confidences.get(&node_idx).copied()
    }

    pub fn confidences(&self) -> &HashMap<usize, f64> {
        &self.confidences
    }

    pub fn fallbacks(&self) -> &[FallbackRecord] {
        &self.fallbacks
    }

    /// Fallen-back share of evidence-eligible nodes, 0.0 for a network
    /// without any.
    pub fn fallback_ratio(&self) -> f64 {
        self.fallback_ratio
    }

    pub fn observed_count(&self) -> usize {
        self.observed_count
    }

    pub fn eligible_count(&self) -> usize {
        self.eligible_count
    }
}

/// Pin observed nodes, substitute priors or uniforms for the rest, and
/// reject anything the network cannot interpret.
pub fn resolve(
    network: &CompiledNetwork,
    evidence: &EvidenceSet,
) -> Result<ResolvedEvidence, EvidenceError> {
    // Surface mapper mistakes before touching any node.
    for (node_id, value) in evidence.iter() {
        let idx = network
            .index_of(node_id)
            .ok_or_else(|| EvidenceError::UnknownNode(node_id.clone()))?;
        let def = &network.node(idx).def;
        if def.category != NodeCategory::Evidence {
            return Err(EvidenceError::NotEvidenceNode {
                node: node_id.clone(),
                category: def.category.as_str().to_string(),
            });
        }
        if value.state.resolve(def).is_none() {
            return Err(EvidenceError::UnknownState {
                node: node_id.clone(),
                state: value.state.describe(),
            });
        }
        if !value.confidence.is_finite() || !(0.0..=1.0).contains(&value.confidence) {
            return Err(EvidenceError::BadConfidence {
                node: node_id.clone(),
                confidence: value.confidence,
            });
        }
    }

    let mut distributions = HashMap::new();
    let mut confidences = HashMap::new();
    let mut fallbacks = Vec::new();

    for &idx in network.evidence_nodes() {
        let def = &network.node(idx).def;
        match evidence.get(&def.id) {
            Some(value) => {
                // Validated above; pin a point mass on the observed state.
                let state = value.state.resolve(def).ok_or_else(|| {
                    EvidenceError::UnknownState {
                        node: def.id.clone(),
                        state: value.state.describe(),
                    }
                })?;
                let mut dist = vec![0.0; def.n_states()];
                dist[state] = 1.0;
                distributions.insert(idx, dist);
                confidences.insert(idx, value.confidence);
            }
            None => {
                let (kind, dist) = match &def.prior {
                    Some(prior) => (FallbackKind::Prior, prior.clone()),
                    None => (FallbackKind::Uniform, def.uniform()),
                };
                debug!(
                    node = %def.id,
                    kind = kind.as_str(),
                    "no evidence supplied, substituting fallback"
                );
                fallbacks.push(FallbackRecord {
                    node: def.id.clone(),
                    kind,
                    distribution: dist.clone(),
                });
                distributions.insert(idx, dist);
            }
        }
    }

    let eligible_count = network.evidence_nodes().len();
    let observed_count = eligible_count - fallbacks.len();
    let fallback_ratio = if eligible_count == 0 {
        0.0
    } else {
        fallbacks.len() as f64 / eligible_count as f64
    };

    Ok(ResolvedEvidence {
        distributions,
        confidences,
        fallbacks,
        fallback_ratio,
        observed_count,
        eligible_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NodeCatalog, NodeCategory, NodeDef};
    use crate::cpt::Cpt;
    use crate::network::NetworkBuilder;

    fn two_evidence_network() -> CompiledNetwork {
        let mut catalog = NodeCatalog::new();
        catalog
            .insert(
                NodeDef::new("q1", NodeCategory::Evidence, vec!["no", "yes"])
                    .with_prior(vec![0.8, 0.2]),
            )
            .unwrap();
        catalog
            .insert(NodeDef::new("q2", NodeCategory::Evidence, vec!["no", "yes"]))
            .unwrap();
        catalog
            .insert(NodeDef::new(
                "risk",
                NodeCategory::Outcome,
                vec!["low", "high"],
            ))
            .unwrap();
        let mut builder = NetworkBuilder::new("test");
        builder
            .attach("q1", vec![], None)
            .attach("q2", vec![], None)
            .attach(
                "risk",
                vec!["q1".into(), "q2".into()],
                Some(Cpt::new(2, vec![2, 2], vec![0.5; 8]).unwrap()),
            );
        builder.build(&catalog).unwrap()
    }

    // ── observed evidence ────────────────────────────────────

    #[test]
    fn observed_nodes_pin_to_point_mass() {
        let net = two_evidence_network();
        let evidence = EvidenceSet::new().with("q1", "yes").with("q2", "no");
        let resolved = resolve(&net, &evidence).unwrap();

        let q1 = net.index_of("q1").unwrap();
        assert_eq!(resolved.distribution(q1).unwrap(), &[0.0, 1.0]);
        assert_eq!(resolved.fallbacks().len(), 0);
        assert!((resolved.fallback_ratio() - 0.0).abs() < 1e-12);
        assert_eq!(resolved.observed_count(), 2);
        assert_eq!(resolved.confidence(q1), Some(1.0));
    }

    #[test]
    fn confidence_travels_with_observation() {
        let net = two_evidence_network();
        let evidence = EvidenceSet::new()
            .with_confident("q1", "yes", 0.65)
            .with("q2", "no");
        let resolved = resolve(&net, &evidence).unwrap();
        let q1 = net.index_of("q1").unwrap();
        assert!((resolved.confidence(q1).unwrap() - 0.65).abs() < 1e-12);
        // Confidence shapes ESI, not the pinned distribution.
        assert_eq!(resolved.distribution(q1).unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn state_index_form_pins_like_a_name() {
        let net = two_evidence_network();
        let evidence = EvidenceSet::new().with_index("q1", 1).with("q2", "no");
        let resolved = resolve(&net, &evidence).unwrap();
        let q1 = net.index_of("q1").unwrap();
        assert_eq!(resolved.distribution(q1).unwrap(), &[0.0, 1.0]);
        assert_eq!(resolved.observed_count(), 2);
    }

    #[test]
    fn state_index_deserializes_from_bare_number() {
        let yaml = "q1: { state: 1, confidence: 0.7 }\nq2: { state: no }\n";
        let set: EvidenceSet = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(set.get("q1").unwrap().state, StateRef::Index(1));
        assert_eq!(
            set.get("q2").unwrap().state,
            StateRef::Name("no".to_string())
        );
    }

    // ── fallback ─────────────────────────────────────────────

    #[test]
    fn missing_evidence_falls_back_to_prior_then_uniform() {
        let net = two_evidence_network();
        let resolved = resolve(&net, &EvidenceSet::new()).unwrap();

        assert_eq!(resolved.fallbacks().len(), 2);
        assert!((resolved.fallback_ratio() - 1.0).abs() < 1e-12);

        // q1 declares a prior, q2 does not.
        let by_node: HashMap<&str, &FallbackRecord> = resolved
            .fallbacks()
            .iter()
            .map(|r| (r.node.as_str(), r))
            .collect();
        assert_eq!(by_node["q1"].kind, FallbackKind::Prior);
        assert_eq!(by_node["q1"].distribution, vec![0.8, 0.2]);
        assert_eq!(by_node["q2"].kind, FallbackKind::Uniform);
        assert_eq!(by_node["q2"].distribution, vec![0.5, 0.5]);
    }

    #[test]
    fn half_observed_yields_half_ratio() {
        let net = two_evidence_network();
        let evidence = EvidenceSet::new().with("q1", "yes");
        let resolved = resolve(&net, &evidence).unwrap();
        assert!((resolved.fallback_ratio() - 0.5).abs() < 1e-12);
        assert_eq!(resolved.observed_count(), 1);
        assert_eq!(resolved.eligible_count(), 2);
        assert_eq!(resolved.fallbacks()[0].node, "q2");
    }

    #[test]
    fn fallback_records_follow_attachment_order() {
        let net = two_evidence_network();
        let resolved = resolve(&net, &EvidenceSet::new()).unwrap();
        let order: Vec<&str> = resolved
            .fallbacks()
            .iter()
            .map(|r| r.node.as_str())
            .collect();
        assert_eq!(order, vec!["q1", "q2"]);
    }

    // ── malformed evidence ───────────────────────────────────

    #[test]
    fn unknown_node_rejected() {
        let net = two_evidence_network();
        let evidence = EvidenceSet::new().with("q9", "yes");
        let err = resolve(&net, &evidence).unwrap_err();
        assert!(matches!(err, EvidenceError::UnknownNode(id) if id == "q9"));
    }

    #[test]
    fn unknown_state_rejected() {
        let net = two_evidence_network();
        let evidence = EvidenceSet::new().with("q1", "definitely");
        let err = resolve(&net, &evidence).unwrap_err();
        assert!(
            matches!(err, EvidenceError::UnknownState { ref node, ref state }
                if node == "q1" && state == "definitely")
        );
    }

    #[test]
    fn out_of_range_state_index_rejected() {
        let net = two_evidence_network();
        let evidence = EvidenceSet::new().with_index("q1", 5);
        let err = resolve(&net, &evidence).unwrap_err();
        assert!(
            matches!(err, EvidenceError::UnknownState { ref node, ref state }
                if node == "q1" && state == "#5")
        );
    }

    #[test]
    fn evidence_on_outcome_rejected() {
        let net = two_evidence_network();
        let evidence = EvidenceSet::new().with("risk", "high");
        let err = resolve(&net, &evidence).unwrap_err();
        assert!(matches!(err, EvidenceError::NotEvidenceNode { .. }));
    }

    #[test]
    fn out_of_range_confidence_rejected() {
        let net = two_evidence_network();
        let evidence = EvidenceSet::new().with_confident("q1", "yes", 1.3);
        let err = resolve(&net, &evidence).unwrap_err();
        assert!(matches!(err, EvidenceError::BadConfidence { .. }));
    }
}
