//! Model registry: load once, serve read-only, swap atomically.
//!
//! A publication is an immutable map of typology → compiled network plus
//! the catalog it was compiled against. Readers clone the `Arc` under a
//! short read lock and keep working against that snapshot; a reload builds
//! the complete replacement off-line and swaps the `Arc` in one write.
//! Publication is all-or-nothing — one bad model file and nothing changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::NodeCatalog;
use crate::model::{CompileError, ModelError, ModelSpec};
use crate::network::CompiledNetwork;

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no model registered for typology '{0}'")]
    MissingModel(String),

    #[error("failed to scan models directory {path}: {source}")]
    Scan {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("model '{origin}': {source}")]
    Load {
        origin: String,
        #[source]
        source: ModelError,
    },

    #[error("model '{origin}': {source}")]
    Compile {
        origin: String,
        #[source]
        source: CompileError,
    },

    #[error("typology '{typology}' defined by both '{first}' and '{second}'")]
    DuplicateTypology {
        typology: String,
        first: String,
        second: String,
    },
}

// ── Publication ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct Publication {
    networks: HashMap<String, Arc<CompiledNetwork>>,
    catalog: Arc<NodeCatalog>,
}

impl Publication {
    /// Compile every spec against one shared catalog; first failure wins.
    fn build(specs: Vec<(String, ModelSpec)>) -> Result<Self, RegistryError> {
        let mut catalog = NodeCatalog::new();
        let mut networks: HashMap<String, Arc<CompiledNetwork>> = HashMap::new();
        let mut origins: HashMap<String, String> = HashMap::new();

        for (origin, spec) in specs {
            if let Some(first) = origins.get(&spec.typology) {
                return Err(RegistryError::DuplicateTypology {
                    typology: spec.typology.clone(),
                    first: first.clone(),
                    second: origin,
                });
            }
            let network = spec
                .compile(&mut catalog)
                .map_err(|source| RegistryError::Compile {
                    origin: origin.clone(),
                    source,
                })?;
            debug!(
                typology = %spec.typology,
                nodes = network.len(),
                edges = network.n_edges(),
                "compiled typology model"
            );
            origins.insert(spec.typology.clone(), origin);
            networks.insert(spec.typology.clone(), Arc::new(network));
        }

        Ok(Self {
            networks,
            catalog: Arc::new(catalog),
        })
    }

    fn build_from_dir(dir: &Path) -> Result<Self, RegistryError> {
        let mut files = Vec::new();
        if !dir.exists() {
            warn!("Models directory does not exist: {:?}", dir);
            return Ok(Self::default());
        }
        collect_model_files(dir, &mut files)?;
        files.sort();

        let mut specs = Vec::with_capacity(files.len());
        for path in files {
            let origin = path.display().to_string();
            let spec = ModelSpec::load_from_file(&path).map_err(|source| {
                RegistryError::Load {
                    origin: origin.clone(),
                    source,
                }
            })?;
            specs.push((origin, spec));
        }
        Self::build(specs)
    }
}

fn collect_model_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RegistryError> {
    let entries = std::fs::read_dir(dir).map_err(|source| RegistryError::Scan {
        path: dir.display().to_string(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| RegistryError::Scan {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_model_files(&path, out)?;
        } else if path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
    Ok(())
}

// ── Registry ─────────────────────────────────────────────────

/// Thread-safe home of the current publication.
#[derive(Debug)]
pub struct ModelRegistry {
    current: RwLock<Arc<Publication>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// An empty registry; every lookup misses until a load publishes.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Publication::default())),
        }
    }

    /// Load and publish every model under a directory (recursive).
    pub fn load_from_dir(dir: &Path) -> Result<Self, RegistryError> {
        let publication = Publication::build_from_dir(dir)?;
        info!(
            "Published {} typology models from {:?}",
            publication.networks.len(),
            dir
        );
        Ok(Self {
            current: RwLock::new(Arc::new(publication)),
        })
    }

    /// Compile and publish in-memory specs (embedders and tests).
    pub fn load_from_specs(specs: Vec<ModelSpec>) -> Result<Self, RegistryError> {
        let tagged = specs
            .into_iter()
            .map(|s| (s.typology.clone(), s))
            .collect();
        let publication = Publication::build(tagged)?;
        info!("Published {} typology models", publication.networks.len());
        Ok(Self {
            current: RwLock::new(Arc::new(publication)),
        })
    }

    /// Rebuild from a directory and swap the whole publication.
    ///
    /// The replacement compiles before any lock is taken; on failure the
    /// currently served publication stays untouched. Readers holding the
    /// previous snapshot keep it until they drop their `Arc`.
    pub fn reload_from_dir(&self, dir: &Path) -> Result<usize, RegistryError> {
        let publication = Publication::build_from_dir(dir)?;
        let count = publication.networks.len();
        let mut guard = self.current.write().unwrap();
        *guard = Arc::new(publication);
        drop(guard);
        info!("Reloaded registry: {} typology models from {:?}", count, dir);
        Ok(count)
    }

    pub fn get(&self, typology: &str) -> Option<Arc<CompiledNetwork>> {
        self.current.read().unwrap().networks.get(typology).cloned()
    }

    pub fn require(&self, typology: &str) -> Result<Arc<CompiledNetwork>, RegistryError> {
        self.get(typology)
            .ok_or_else(|| RegistryError::MissingModel(typology.to_string()))
    }

    /// Catalog snapshot the current publication compiled against.
    pub fn catalog(&self) -> Arc<NodeCatalog> {
        self.current.read().unwrap().catalog.clone()
    }

    /// Registered typology names, sorted.
    pub fn typologies(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .current
            .read()
            .unwrap()
            .networks
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.current.read().unwrap().networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().unwrap().networks.is_empty()
    }
}
