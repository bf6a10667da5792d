//! Typology model definitions.
//!
//! Loads YAML model files and compiles them into networks. Each file
//! carries one typology: node declarations (states, priors, clusters) plus
//! structure (parents and flat CPT columns, listed with the last parent
//! varying fastest). Definitions register into the shared catalog on
//! compile; two typologies may declare the same node as long as the
//! semantic fields agree.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{CatalogError, NodeCatalog, NodeCategory, NodeDef};
use crate::cpt::{Cpt, CptError};
use crate::network::{BuildError, CompiledNetwork, NetworkBuilder};

// ── Schema ───────────────────────────────────────────────────

/// One node as declared in a model file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub category: NodeCategory,
    pub states: Vec<String>,
    #[serde(default)]
    pub prior: Option<Vec<f64>>,
    #[serde(default)]
    pub parents: Vec<String>,
    /// Flat CPT values, `parents` combinations × this node's states.
    #[serde(default)]
    pub cpt: Option<Vec<f64>>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub evidence_key: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NodeSpec {
    fn to_def(&self) -> NodeDef {
        NodeDef {
            id: self.id.clone(),
            label: self.label.clone(),
            category: self.category,
            states: self.states.clone(),
            prior: self.prior.clone(),
            evidence_key: self.evidence_key.clone(),
            cluster: self.cluster.clone(),
            description: self.description.clone(),
        }
    }
}

/// A complete typology definition as read from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub typology: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Outcome states whose combined mass forms the scalar risk score.
    /// Empty means the state named `high`, else the last outcome state.
    #[serde(default)]
    pub elevated: Vec<String>,
    pub nodes: Vec<NodeSpec>,
}

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Failed to read model file {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse model YAML: {0}")]
    ParseError(String),
}

/// Compile failures carry the typology (and where possible the node) so a
/// bulk load can report exactly which definition is at fault.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("typology '{typology}' defines no nodes")]
    Empty { typology: String },

    #[error("typology '{typology}', node '{node}': {source}")]
    Catalog {
        typology: String,
        node: String,
        #[source]
        source: CatalogError,
    },

    #[error(
        "typology '{typology}' redefines node '{node}' with different \
         states, prior, cluster, or evidence key"
    )]
    NodeConflict { typology: String, node: String },

    #[error("typology '{typology}', node '{node}' lists unknown parent '{parent}'")]
    UnknownParent {
        typology: String,
        node: String,
        parent: String,
    },

    #[error("typology '{typology}', node '{node}': {source}")]
    Cpt {
        typology: String,
        node: String,
        #[source]
        source: CptError,
    },

    #[error("typology '{typology}': {source}")]
    Build {
        typology: String,
        #[source]
        source: BuildError,
    },
}

// ── Loading ──────────────────────────────────────────────────

impl ModelSpec {
    /// Load a model definition from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|e| ModelError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        debug!("Loaded model definition from {:?}", path);
        Self::load_from_str(&content)
    }

    /// Load a model definition from a YAML string
    pub fn load_from_str(yaml: &str) -> Result<Self, ModelError> {
        serde_yaml::from_str(yaml).map_err(|e| ModelError::ParseError(e.to_string()))
    }

    /// Register this model's nodes into the catalog and build its network.
    ///
    /// Node definitions already in the catalog are reused when their
    /// semantic fields match; a mismatch is a conflict, not a silent
    /// override.
    pub fn compile(&self, catalog: &mut NodeCatalog) -> Result<CompiledNetwork, CompileError> {
        if self.nodes.is_empty() {
            return Err(CompileError::Empty {
                typology: self.typology.clone(),
            });
        }

        for node in &self.nodes {
            let def = node.to_def();
            match catalog.get(&def.id) {
                Some(existing) => {
                    if !compatible(existing, &def) {
                        return Err(CompileError::NodeConflict {
                            typology: self.typology.clone(),
                            node: def.id,
                        });
                    }
                }
                None => {
                    catalog
                        .insert(def)
                        .map_err(|source| CompileError::Catalog {
                            typology: self.typology.clone(),
                            node: node.id.clone(),
                            source,
                        })?;
                }
            }
        }

        // Parent cardinalities resolve within the file; attachment is
        // always file-local even when definitions are shared.
        let states_by_id: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.states.len()))
            .collect();

        let mut builder = NetworkBuilder::new(&self.typology);
        for node in &self.nodes {
            let cpt = match &node.cpt {
                Some(values) => {
                    let mut parent_cards = Vec::with_capacity(node.parents.len());
                    for parent in &node.parents {
                        let &cards = states_by_id.get(parent.as_str()).ok_or_else(|| {
                            CompileError::UnknownParent {
                                typology: self.typology.clone(),
                                node: node.id.clone(),
                                parent: parent.clone(),
                            }
                        })?;
                        parent_cards.push(cards);
                    }
                    let cpt = Cpt::new(node.states.len(), parent_cards, values.clone()).map_err(
                        |source| CompileError::Cpt {
                            typology: self.typology.clone(),
                            node: node.id.clone(),
                            source,
                        },
                    )?;
                    Some(cpt)
                }
                None => None,
            };
            builder.attach(&node.id, node.parents.clone(), cpt);
        }
        builder.elevated_states(self.elevated.clone());

        builder
            .build(catalog)
            .map_err(|source| CompileError::Build {
                typology: self.typology.clone(),
                source,
            })
    }
}

/// Shared-definition compatibility: identity fields must agree; label and
/// description are presentation and may differ.
fn compatible(existing: &NodeDef, incoming: &NodeDef) -> bool {
    existing.category == incoming.category
        && existing.states == incoming.states
        && existing.prior == incoming.prior
        && existing.cluster == incoming.cluster
        && existing.evidence_key == incoming.evidence_key
}
