//! Network builder and compiled typology networks.
//!
//! Implements Kahn's algorithm for topological sorting with:
//! - Cycle detection with clear error messages
//! - Stable sort (preserves attachment order when no dependency relationship)
//! - Polytree enforcement on the undirected skeleton, so the forward-pass
//!   engine never meets a structure it cannot answer exactly
//! - Evidence-at-the-roots enforcement: a pinned node with parents would
//!   leave its ancestors untouched by the forward pass
//!
//! A [`CompiledNetwork`] is immutable and self-contained: node definitions
//! are resolved out of the catalog at build time, so a served network stays
//! valid while the authoring catalog keeps evolving.

use std::collections::{BinaryHeap, HashMap};

use thiserror::Error;

use crate::catalog::{NodeCatalog, NodeCategory, NodeDef};
use crate::cpt::Cpt;

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown node: '{0}' is not in the catalog")]
    UnknownNode(String),

    #[error("node '{node}' lists parent '{parent}' which is not attached to this network")]
    UnattachedParent { node: String, parent: String },

    #[error("node '{node}' attached twice")]
    DuplicateAttachment { node: String },

    #[error("node '{node}' lists parent '{parent}' twice")]
    DuplicateParent { node: String, parent: String },

    #[error("node '{node}' has parents but no cpt")]
    MissingCpt { node: String },

    #[error("cpt on node '{node}' covers {got} child states, node declares {expected}")]
    CptStates {
        node: String,
        expected: usize,
        got: usize,
    },

    #[error(
        "cpt on node '{node}' declares parent cardinalities {got:?}, \
         attached parents have {expected:?}"
    )]
    CptParents {
        node: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("evidence node '{node}' has {parents} parent(s); evidence nodes must be roots")]
    EvidenceWithParents { node: String, parents: usize },

    #[error("network must have exactly one outcome node, found {found}")]
    OutcomeCount { found: usize },

    #[error("elevated state '{state}' is not a state of outcome node '{node}'")]
    ElevatedState { node: String, state: String },

    #[error("{explanation}")]
    Cycle {
        nodes: Vec<String>,
        explanation: String,
    },

    #[error(
        "network is not a polytree: undirected cycle closes at edge \
         '{parent}' -> '{node}'"
    )]
    NotPolytree { node: String, parent: String },
}

// ── Builder ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Attachment {
    node_id: String,
    parents: Vec<String>,
    cpt: Option<Cpt>,
}

/// Accumulates node attachments for one typology, then compiles them
/// against a catalog.
#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    typology: String,
    attachments: Vec<Attachment>,
    elevated: Vec<String>,
}

impl NetworkBuilder {
    pub fn new(typology: impl Into<String>) -> Self {
        Self {
            typology: typology.into(),
            attachments: Vec::new(),
            elevated: Vec::new(),
        }
    }

    /// Declare the outcome states whose combined mass forms the risk
    /// score. When left empty, the state named `high` (else the last
    /// state) carries it alone.
    pub fn elevated_states(&mut self, states: Vec<String>) -> &mut Self {
        self.elevated = states;
        self
    }

    /// Attach a catalog node with its parents and (for non-roots) its CPT.
    ///
    /// Root nodes may omit the CPT; at inference time they fall back to the
    /// definition's prior, or uniform when no prior is declared.
    pub fn attach(
        &mut self,
        node_id: impl Into<String>,
        parents: Vec<String>,
        cpt: Option<Cpt>,
    ) -> &mut Self {
        self.attachments.push(Attachment {
            node_id: node_id.into(),
            parents,
            cpt,
        });
        self
    }

    /// Resolve, validate, and freeze the network.
    ///
    /// Validation order: identity (catalog and parent resolution,
    /// duplicates), quantification (CPT shape against resolved parents),
    /// structure (single outcome, acyclicity, polytree skeleton).
    pub fn build(&self, catalog: &NodeCatalog) -> Result<CompiledNetwork, BuildError> {
        let n = self.attachments.len();

        // Identity: every attachment resolves, exactly once.
        let mut local_index: HashMap<String, usize> = HashMap::with_capacity(n);
        for (idx, att) in self.attachments.iter().enumerate() {
            if !catalog.contains(&att.node_id) {
                return Err(BuildError::UnknownNode(att.node_id.clone()));
            }
            if local_index.insert(att.node_id.clone(), idx).is_some() {
                return Err(BuildError::DuplicateAttachment {
                    node: att.node_id.clone(),
                });
            }
        }

        let mut nodes: Vec<CompiledNode> = Vec::with_capacity(n);
        for att in &self.attachments {
            // Presence established by the identity pass; clone the resolved
            // def into the artifact.
            let def = catalog
                .get(&att.node_id)
                .cloned()
                .ok_or_else(|| BuildError::UnknownNode(att.node_id.clone()))?;

            let mut parent_indices = Vec::with_capacity(att.parents.len());
            for (i, parent) in att.parents.iter().enumerate() {
                if att.parents[..i].contains(parent) {
                    return Err(BuildError::DuplicateParent {
                        node: att.node_id.clone(),
                        parent: parent.clone(),
                    });
                }
                let &pidx =
                    local_index
                        .get(parent)
                        .ok_or_else(|| BuildError::UnattachedParent {
                            node: att.node_id.clone(),
                            parent: parent.clone(),
                        })?;
                parent_indices.push(pidx);
            }

            nodes.push(CompiledNode {
                def,
                parents: parent_indices,
                cpt: att.cpt.clone(),
            });
        }

        // Quantification: CPT shape must match the resolved parents.
        for (idx, node) in nodes.iter().enumerate() {
            let expected_cards: Vec<usize> = node
                .parents
                .iter()
                .map(|&p| nodes[p].def.n_states())
                .collect();
            match &node.cpt {
                Some(cpt) => {
                    if cpt.n_states() != node.def.n_states() {
                        return Err(BuildError::CptStates {
                            node: node.def.id.clone(),
                            expected: node.def.n_states(),
                            got: cpt.n_states(),
                        });
                    }
                    if cpt.parent_cards() != expected_cards.as_slice() {
                        return Err(BuildError::CptParents {
                            node: node.def.id.clone(),
                            expected: expected_cards,
                            got: cpt.parent_cards().to_vec(),
                        });
                    }
                }
                None => {
                    if !nodes[idx].parents.is_empty() {
                        return Err(BuildError::MissingCpt {
                            node: node.def.id.clone(),
                        });
                    }
                }
            }
        }

        // Structure: evidence enters at the roots. The forward pass only
        // propagates downstream; an observed node with parents would
        // never update its ancestors.
        for node in &nodes {
            if node.def.category == NodeCategory::Evidence && !node.parents.is_empty() {
                return Err(BuildError::EvidenceWithParents {
                    node: node.def.id.clone(),
                    parents: node.parents.len(),
                });
            }
        }

        // Structure: exactly one outcome node.
        let outcomes: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.def.category == NodeCategory::Outcome)
            .map(|(i, _)| i)
            .collect();
        if outcomes.len() != 1 {
            return Err(BuildError::OutcomeCount {
                found: outcomes.len(),
            });
        }
        let outcome = outcomes[0];

        let topo_order = topological_order(&nodes)?;
        check_polytree(&nodes)?;

        let outcome_def = &nodes[outcome].def;
        let risk_states = if self.elevated.is_empty() {
            vec![outcome_def
                .state_index("high")
                .unwrap_or(outcome_def.n_states() - 1)]
        } else {
            let mut indices = Vec::with_capacity(self.elevated.len());
            for state in &self.elevated {
                let idx = outcome_def.state_index(state).ok_or_else(|| {
                    BuildError::ElevatedState {
                        node: outcome_def.id.clone(),
                        state: state.clone(),
                    }
                })?;
                if !indices.contains(&idx) {
                    indices.push(idx);
                }
            }
            indices.sort_unstable();
            indices
        };

        let evidence_nodes: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.def.category == NodeCategory::Evidence)
            .map(|(i, _)| i)
            .collect();

        let node_index = local_index;

        Ok(CompiledNetwork {
            typology: self.typology.clone(),
            nodes,
            node_index,
            topo_order,
            outcome,
            risk_states,
            evidence_nodes,
        })
    }
}

// ── Topological sort (Kahn, stable) ──────────────────────────

/// Wrapper for BinaryHeap to get min-heap behavior (stable sort by
/// attachment order)
#[derive(Debug, Eq, PartialEq)]
struct MinHeapEntry {
    node_idx: usize,
}

impl Ord for MinHeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap
        other.node_idx.cmp(&self.node_idx)
    }
}

impl PartialOrd for MinHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn topological_order(nodes: &[CompiledNode]) -> Result<Vec<usize>, BuildError> {
    let n = nodes.len();

    // adj[i] = nodes that list i as a parent (i must come before them)
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree: Vec<usize> = vec![0; n];
    for (idx, node) in nodes.iter().enumerate() {
        for &parent in &node.parents {
            adj[parent].push(idx);
            in_degree[idx] += 1;
        }
    }

    // Min-heap keyed on attachment index keeps the order reproducible
    // when several nodes are simultaneously ready.
    let mut heap: BinaryHeap<MinHeapEntry> = BinaryHeap::new();
    for (idx, &degree) in in_degree.iter().enumerate() {
        if degree == 0 {
            heap.push(MinHeapEntry { node_idx: idx });
        }
    }

    let mut sorted_indices: Vec<usize> = Vec::with_capacity(n);
    while let Some(entry) = heap.pop() {
        let idx = entry.node_idx;
        sorted_indices.push(idx);
        for &next_idx in &adj[idx] {
            in_degree[next_idx] -= 1;
            if in_degree[next_idx] == 0 {
                heap.push(MinHeapEntry { node_idx: next_idx });
            }
        }
    }

    if sorted_indices.len() != n {
        let remaining: Vec<usize> = (0..n).filter(|i| !sorted_indices.contains(i)).collect();
        let cycle_nodes: Vec<String> = remaining
            .iter()
            .map(|&i| nodes[i].def.id.clone())
            .collect();

        let mut explanation = String::from("circular dependency detected:\n");
        for id in &cycle_nodes {
            explanation.push_str(&format!("  --> node '{id}'\n"));
        }
        explanation.push_str("these nodes depend on each other in a cycle");

        return Err(BuildError::Cycle {
            nodes: cycle_nodes,
            explanation,
        });
    }

    Ok(sorted_indices)
}

// ── Polytree check ───────────────────────────────────────────

/// Union-find over node indices; an edge joining two already-joined
/// nodes closes an undirected cycle.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    /// Returns false when both ends were already connected.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        self.parent[ra] = rb;
        true
    }
}

fn check_polytree(nodes: &[CompiledNode]) -> Result<(), BuildError> {
    let mut ds = DisjointSet::new(nodes.len());
    for (idx, node) in nodes.iter().enumerate() {
        for &parent in &node.parents {
            if !ds.union(parent, idx) {
                return Err(BuildError::NotPolytree {
                    node: node.def.id.clone(),
                    parent: nodes[parent].def.id.clone(),
                });
            }
        }
    }
    Ok(())
}

// ── Compiled artifact ────────────────────────────────────────

/// One node as compiled into a network.
#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub def: NodeDef,
    /// Indices into the network's node table, in declaration order.
    pub parents: Vec<usize>,
    /// None only for root nodes (prior- or uniform-driven).
    pub cpt: Option<Cpt>,
}

/// An immutable, validated typology network ready for inference.
#[derive(Debug, Clone)]
pub struct CompiledNetwork {
    typology: String,
    nodes: Vec<CompiledNode>,
    node_index: HashMap<String, usize>,
    topo_order: Vec<usize>,
    outcome: usize,
    risk_states: Vec<usize>,
    evidence_nodes: Vec<usize>,
}

impl CompiledNetwork {
    pub fn typology(&self) -> &str {
        &self.typology
    }

    pub fn nodes(&self) -> &[CompiledNode] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &CompiledNode {
        &self.nodes[idx]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.node_index.get(id).copied()
    }

    /// Node indices in evaluation order; parents always precede children.
    pub fn topo_order(&self) -> &[usize] {
        &self.topo_order
    }

    /// Index of the single outcome node.
    pub fn outcome(&self) -> usize {
        self.outcome
    }

    /// Outcome states whose combined mass carries the risk score: the
    /// model-declared elevated subset, else the state named `high`, else
    /// the last (most severe) state. Sorted, duplicate-free.
    pub fn risk_states(&self) -> &[usize] {
        &self.risk_states
    }

    /// Indices of evidence-eligible nodes, in attachment order.
    pub fn evidence_nodes(&self) -> &[usize] {
        &self.evidence_nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Undirected edge count (one per parent link).
    pub fn n_edges(&self) -> usize {
        self.nodes.iter().map(|n| n.parents.len()).sum()
    }
}
