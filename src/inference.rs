//! Exact forward-pass inference over compiled polytree networks.
//!
//! One sweep in topological order. Evidence-eligible nodes take their
//! resolved distribution, roots take their single CPT column (or declared
//! prior), and every interior node marginalizes its CPT against the parent
//! marginals already computed:
//!
//! `P(node = s) = Σ_combo CPT[s | combo] · Π_p P(parent_p = combo_p)`
//!
//! On a polytree with pinned or root-resolved evidence the parent marginals
//! entering a node are independent, so the sweep is exact — the builder
//! refuses anything else. Given a well-built network this pass cannot fail.

use serde::{Deserialize, Serialize};

use crate::cpt::{Cpt, PROB_TOLERANCE};
use crate::evidence::ResolvedEvidence;
use crate::network::CompiledNetwork;

/// Distribution over the outcome node's states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    pub states: Vec<String>,
    pub probabilities: Vec<f64>,
}

impl Posterior {
    pub fn probability_of(&self, state: &str) -> Option<f64> {
        self.states
            .iter()
            .position(|s| s == state)
            .map(|i| self.probabilities[i])
    }
}

/// Full sweep output: per-node marginals plus the outcome view.
#[derive(Debug, Clone)]
pub struct InferenceResult {
    marginals: Vec<Vec<f64>>,
    outcome: Posterior,
    risk_score: f64,
}

impl InferenceResult {
    /// Marginal for a node by network index, in state-declaration order.
    pub fn marginal(&self, node_idx: usize) -> &[f64] {
        &self.marginals[node_idx]
    }

    pub fn marginals(&self) -> &[Vec<f64>] {
        &self.marginals
    }

    pub fn outcome(&self) -> &Posterior {
        &self.outcome
    }

    /// Summed posterior mass on the outcome's elevated states.
    pub fn risk_score(&self) -> f64 {
        self.risk_score
    }
}

/// Run the forward pass. `resolved` must come from
/// [`resolve`](crate::evidence::resolve) on the same network.
pub fn infer(network: &CompiledNetwork, resolved: &ResolvedEvidence) -> InferenceResult {
    let mut marginals: Vec<Vec<f64>> = vec![Vec::new(); network.len()];

    for &idx in network.topo_order() {
        let node = network.node(idx);
        let mut dist = if let Some(pinned) = resolved.distribution(idx) {
            pinned.to_vec()
        } else {
            match &node.cpt {
                Some(cpt) if node.parents.is_empty() => cpt.column(0).to_vec(),
                Some(cpt) => marginalize(cpt, &node.parents, &marginals),
                None => node
                    .def
                    .prior
                    .clone()
                    .unwrap_or_else(|| node.def.uniform()),
            }
        };

        // Drift guard: products of many columns can wander a few ulps.
        let sum: f64 = dist.iter().sum();
        if sum > 0.0 && (sum - 1.0).abs() > PROB_TOLERANCE {
            for v in &mut dist {
                *v /= sum;
            }
        }

        marginals[idx] = dist;
    }

    let outcome_idx = network.outcome();
    let outcome_def = &network.node(outcome_idx).def;
    let outcome = Posterior {
        states: outcome_def.states.clone(),
        probabilities: marginals[outcome_idx].clone(),
    };
    let risk_score = network
        .risk_states()
        .iter()
        .map(|&s| marginals[outcome_idx][s])
        .sum();

    InferenceResult {
        marginals,
        outcome,
        risk_score,
    }
}

/// Weighted sum of CPT columns, odometer-enumerating parent combinations
/// in the table's own order (last parent fastest).
fn marginalize(cpt: &Cpt, parents: &[usize], marginals: &[Vec<f64>]) -> Vec<f64> {
    let n_states = cpt.n_states();
    let cards = cpt.parent_cards();
    let mut out = vec![0.0; n_states];
    let mut states = vec![0usize; parents.len()];

    for combo in 0..cpt.n_combos() {
        let mut weight = 1.0;
        for (pos, &parent) in parents.iter().enumerate() {
            weight *= marginals[parent][states[pos]];
        }
        if weight > 0.0 {
            let column = cpt.column(combo);
            for (s, out_s) in out.iter_mut().enumerate() {
                *out_s += weight * column[s];
            }
        }
        for pos in (0..states.len()).rev() {
            states[pos] += 1;
            if states[pos] < cards[pos] {
                break;
            }
            states[pos] = 0;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NodeCatalog, NodeCategory, NodeDef};
    use crate::evidence::{resolve, EvidenceSet};
    use crate::network::NetworkBuilder;

    fn close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "expected {b}, got {a}");
    }

    /// q1, q2 binary evidence feeding a binary outcome.
    /// Columns: (q1=no,q2=no) (no,yes) (yes,no) (yes,yes).
    fn v_network() -> CompiledNetwork {
        let mut catalog = NodeCatalog::new();
        catalog
            .insert(
                NodeDef::new("q1", NodeCategory::Evidence, vec!["no", "yes"])
                    .with_prior(vec![0.8, 0.2]),
            )
            .unwrap();
        catalog
            .insert(
                NodeDef::new("q2", NodeCategory::Evidence, vec!["no", "yes"])
                    .with_prior(vec![0.6, 0.4]),
            )
            .unwrap();
        catalog
            .insert(NodeDef::new(
                "risk",
                NodeCategory::Outcome,
                vec!["low", "high"],
            ))
            .unwrap();
        let cpt = Cpt::new(
            2,
            vec![2, 2],
            vec![
                0.95, 0.05, // no, no
                0.70, 0.30, // no, yes
                0.60, 0.40, // yes, no
                0.10, 0.90, // yes, yes
            ],
        )
        .unwrap();
        let mut builder = NetworkBuilder::new("v");
        builder
            .attach("q1", vec![], None)
            .attach("q2", vec![], None)
            .attach("risk", vec!["q1".into(), "q2".into()], Some(cpt));
        builder.build(&catalog).unwrap()
    }

    // ── hand-checked posteriors ──────────────────────────────

    #[test]
    fn fully_observed_posterior_matches_hand_arithmetic() {
        let net = v_network();
        let evidence = EvidenceSet::new().with("q1", "yes").with("q2", "no");
        let resolved = resolve(&net, &evidence).unwrap();
        let result = infer(&net, &resolved);

        // Pinned to column (yes, no).
        close(result.outcome().probability_of("low").unwrap(), 0.6);
        close(result.outcome().probability_of("high").unwrap(), 0.4);
        close(result.risk_score(), 0.4);
    }

    #[test]
    fn missing_evidence_marginalizes_over_prior() {
        let net = v_network();
        let evidence = EvidenceSet::new().with("q1", "yes");
        let resolved = resolve(&net, &evidence).unwrap();
        let result = infer(&net, &resolved);

        // q2 falls back to [0.6, 0.4]:
        //   P(high) = 0.6·0.40 + 0.4·0.90 = 0.60
        close(result.risk_score(), 0.6);
        close(result.outcome().probability_of("low").unwrap(), 0.4);
    }

    #[test]
    fn no_evidence_uses_both_priors() {
        let net = v_network();
        let resolved = resolve(&net, &EvidenceSet::new()).unwrap();
        let result = infer(&net, &resolved);

        // P(high) = 0.8·(0.6·0.05 + 0.4·0.30) + 0.2·(0.6·0.40 + 0.4·0.90)
        //         = 0.8·0.15 + 0.2·0.60 = 0.24
        close(result.risk_score(), 0.24);
    }

    // ── structure handling ───────────────────────────────────

    #[test]
    fn chain_propagates_through_intermediate() {
        let mut catalog = NodeCatalog::new();
        catalog
            .insert(
                NodeDef::new("q1", NodeCategory::Evidence, vec!["no", "yes"])
                    .with_prior(vec![0.5, 0.5]),
            )
            .unwrap();
        catalog
            .insert(NodeDef::new(
                "mid",
                NodeCategory::Intermediate,
                vec!["calm", "hot"],
            ))
            .unwrap();
        catalog
            .insert(NodeDef::new(
                "risk",
                NodeCategory::Outcome,
                vec!["low", "high"],
            ))
            .unwrap();

        let mid_cpt = Cpt::new(2, vec![2], vec![0.9, 0.1, 0.2, 0.8]).unwrap();
        let risk_cpt = Cpt::new(2, vec![2], vec![0.95, 0.05, 0.3, 0.7]).unwrap();
        let mut builder = NetworkBuilder::new("chain");
        builder
            .attach("q1", vec![], None)
            .attach("mid", vec!["q1".into()], Some(mid_cpt))
            .attach("risk", vec!["mid".into()], Some(risk_cpt));
        let net = builder.build(&catalog).unwrap();

        let evidence = EvidenceSet::new().with("q1", "yes");
        let resolved = resolve(&net, &evidence).unwrap();
        let result = infer(&net, &resolved);

        // mid = [0.2, 0.8]; P(high) = 0.2·0.05 + 0.8·0.7 = 0.57
        let mid = net.index_of("mid").unwrap();
        close(result.marginal(mid)[1], 0.8);
        close(result.risk_score(), 0.57);
    }

    #[test]
    fn elevated_subset_sums_outcome_mass() {
        let mut catalog = NodeCatalog::new();
        catalog
            .insert(
                NodeDef::new("q1", NodeCategory::Evidence, vec!["no", "yes"])
                    .with_prior(vec![0.9, 0.1]),
            )
            .unwrap();
        catalog
            .insert(NodeDef::new(
                "risk",
                NodeCategory::Outcome,
                vec!["low", "medium", "high"],
            ))
            .unwrap();
        let cpt = Cpt::new(
            3,
            vec![2],
            vec![
                0.80, 0.15, 0.05, // q1 = no
                0.10, 0.50, 0.40, // q1 = yes
            ],
        )
        .unwrap();
        let mut builder = NetworkBuilder::new("subset");
        builder
            .attach("q1", vec![], None)
            .attach("risk", vec!["q1".into()], Some(cpt))
            .elevated_states(vec!["medium".into(), "high".into()]);
        let net = builder.build(&catalog).unwrap();

        let evidence = EvidenceSet::new().with("q1", "yes");
        let resolved = resolve(&net, &evidence).unwrap();
        let result = infer(&net, &resolved);

        // P(medium) + P(high), not P(high) alone.
        close(result.risk_score(), 0.9);
        close(result.outcome().probability_of("high").unwrap(), 0.4);
    }

    #[test]
    fn depth_four_chain_through_risk_factor() {
        // evidence → intermediate → risk factor → outcome, all binary.
        let mut catalog = NodeCatalog::new();
        catalog
            .insert(
                NodeDef::new("q1", NodeCategory::Evidence, vec!["no", "yes"])
                    .with_prior(vec![0.7, 0.3]),
            )
            .unwrap();
        catalog
            .insert(NodeDef::new(
                "signals",
                NodeCategory::Intermediate,
                vec!["calm", "hot"],
            ))
            .unwrap();
        catalog
            .insert(NodeDef::new(
                "intent",
                NodeCategory::RiskFactor,
                vec!["absent", "present"],
            ))
            .unwrap();
        catalog
            .insert(NodeDef::new(
                "risk",
                NodeCategory::Outcome,
                vec!["low", "high"],
            ))
            .unwrap();

        let step = Cpt::new(2, vec![2], vec![0.9, 0.1, 0.2, 0.8]).unwrap();
        let mut builder = NetworkBuilder::new("deep");
        builder
            .attach("q1", vec![], None)
            .attach("signals", vec!["q1".into()], Some(step.clone()))
            .attach("intent", vec!["signals".into()], Some(step.clone()))
            .attach("risk", vec!["intent".into()], Some(step));
        let net = builder.build(&catalog).unwrap();

        let evidence = EvidenceSet::new().with("q1", "yes");
        let resolved = resolve(&net, &evidence).unwrap();
        let result = infer(&net, &resolved);

        // signals = [0.2, 0.8]; intent = [0.34, 0.66];
        // P(high) = 0.34·0.1 + 0.66·0.8 = 0.562
        let intent = net.index_of("intent").unwrap();
        close(result.marginal(intent)[1], 0.66);
        close(result.risk_score(), 0.562);
    }

    #[test]
    fn mixed_radix_column_selection() {
        // 3-state parents pinned to (1, 2) must hit column 1·3 + 2 = 5.
        let mut catalog = NodeCatalog::new();
        for id in ["a", "b"] {
            catalog
                .insert(NodeDef::new(
                    id,
                    NodeCategory::Evidence,
                    vec!["s0", "s1", "s2"],
                ))
                .unwrap();
        }
        catalog
            .insert(NodeDef::new(
                "risk",
                NodeCategory::Outcome,
                vec!["low", "high"],
            ))
            .unwrap();

        let mut values = Vec::new();
        for combo in 0..9 {
            let p_high = combo as f64 / 10.0;
            values.push(1.0 - p_high);
            values.push(p_high);
        }
        let cpt = Cpt::new(2, vec![3, 3], values).unwrap();
        let mut builder = NetworkBuilder::new("radix");
        builder
            .attach("a", vec![], None)
            .attach("b", vec![], None)
            .attach("risk", vec!["a".into(), "b".into()], Some(cpt));
        let net = builder.build(&catalog).unwrap();

        let evidence = EvidenceSet::new().with("a", "s1").with("b", "s2");
        let resolved = resolve(&net, &evidence).unwrap();
        let result = infer(&net, &resolved);
        close(result.risk_score(), 0.5);
    }

    #[test]
    fn unquantified_root_intermediate_goes_uniform() {
        let mut catalog = NodeCatalog::new();
        catalog
            .insert(NodeDef::new(
                "latent",
                NodeCategory::Intermediate,
                vec!["a", "b"],
            ))
            .unwrap();
        catalog
            .insert(NodeDef::new(
                "risk",
                NodeCategory::Outcome,
                vec!["low", "high"],
            ))
            .unwrap();
        let mut builder = NetworkBuilder::new("t");
        builder
            .attach("latent", vec![], None)
            .attach(
                "risk",
                vec!["latent".into()],
                Some(Cpt::new(2, vec![2], vec![0.9, 0.1, 0.4, 0.6]).unwrap()),
            );
        let net = builder.build(&catalog).unwrap();
        let resolved = resolve(&net, &EvidenceSet::new()).unwrap();
        let result = infer(&net, &resolved);

        let latent = net.index_of("latent").unwrap();
        close(result.marginal(latent)[0], 0.5);
        close(result.risk_score(), 0.35);
    }

    // ── hygiene ──────────────────────────────────────────────

    #[test]
    fn every_marginal_normalizes() {
        let net = v_network();
        let resolved = resolve(&net, &EvidenceSet::new()).unwrap();
        let result = infer(&net, &resolved);
        for marginal in result.marginals() {
            let sum: f64 = marginal.iter().sum();
            assert!((sum - 1.0).abs() < PROB_TOLERANCE);
        }
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let net = v_network();
        let evidence = EvidenceSet::new().with_confident("q1", "yes", 0.9);
        let resolved = resolve(&net, &evidence).unwrap();
        let first = infer(&net, &resolved);
        let second = infer(&net, &resolved);
        assert_eq!(first.marginals(), second.marginals());
        assert_eq!(
            first.risk_score().to_bits(),
            second.risk_score().to_bits()
        );
    }
}
