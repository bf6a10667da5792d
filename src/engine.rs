//! Risk assessment service.
//!
//! One call ties the pipeline together: look up the compiled network,
//! resolve evidence (recording fallbacks), run the forward pass, score
//! sufficiency, damp the risk, and stamp the result for the case record.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::esi::{adjusted_risk, calculate, EsiBreakdown, EsiError, EsiWeights};
use crate::evidence::{resolve, EvidenceError, EvidenceSet, FallbackRecord};
use crate::inference::{infer, Posterior};
use crate::network::CompiledNetwork;
use crate::registry::{ModelRegistry, RegistryError};

/// Above this fallback share an assessment is flagged as running mostly
/// on priors.
const DEGRADED_EVIDENCE_RATIO: f64 = 0.5;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("evidence: {0}")]
    Evidence(#[from] EvidenceError),

    #[error("esi weights: {0}")]
    Weights(#[from] EsiError),
}

/// A scored, stamped assessment ready for the case pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub assessment_id: Uuid,
    pub typology: String,
    pub evaluated_at: DateTime<Utc>,
    /// Summed posterior mass on the outcome's elevated states.
    pub risk_score: f64,
    /// Risk damped by evidence sufficiency; never above `risk_score`.
    pub adjusted_risk_score: f64,
    pub posterior: Posterior,
    /// Per-node marginals keyed by node id.
    pub marginals: BTreeMap<String, Vec<f64>>,
    pub esi: EsiBreakdown,
    pub fallback_ratio: f64,
    pub fallbacks: Vec<FallbackRecord>,
}

/// Stateless evaluator over a shared registry.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    registry: Arc<ModelRegistry>,
    weights: EsiWeights,
}

impl RiskEngine {
    /// Engine with equal ESI component weights.
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            weights: EsiWeights::default(),
        }
    }

    /// Engine with caller-supplied ESI weights (validated here).
    pub fn with_weights(
        registry: Arc<ModelRegistry>,
        weights: EsiWeights,
    ) -> Result<Self, EngineError> {
        weights.validate()?;
        Ok(Self { registry, weights })
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Assess mapped evidence against a registered typology.
    pub fn assess(
        &self,
        typology: &str,
        evidence: &EvidenceSet,
    ) -> Result<RiskAssessment, EngineError> {
        let network = self.registry.require(typology)?;
        self.assess_network(&network, evidence)
    }

    /// Assess against a network the caller already holds (single-model
    /// tools, registry bypass in tests).
    pub fn assess_network(
        &self,
        network: &CompiledNetwork,
        evidence: &EvidenceSet,
    ) -> Result<RiskAssessment, EngineError> {
        let resolved = resolve(network, evidence)?;
        let result = infer(network, &resolved);
        let esi = calculate(network, &resolved, &self.weights);
        let adjusted_risk_score = adjusted_risk(result.risk_score(), esi.score);

        if resolved.fallback_ratio() > DEGRADED_EVIDENCE_RATIO {
            warn!(
                typology = network.typology(),
                fallback_ratio = resolved.fallback_ratio(),
                "assessment running mostly on priors"
            );
        }

        let marginals: BTreeMap<String, Vec<f64>> = network
            .nodes()
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.def.id.clone(), result.marginal(idx).to_vec()))
            .collect();

        let assessment = RiskAssessment {
            assessment_id: Uuid::new_v4(),
            typology: network.typology().to_string(),
            evaluated_at: Utc::now(),
            risk_score: result.risk_score(),
            adjusted_risk_score,
            posterior: result.outcome().clone(),
            marginals,
            esi,
            fallback_ratio: resolved.fallback_ratio(),
            fallbacks: resolved.fallbacks().to_vec(),
        };

        info!(
            assessment_id = %assessment.assessment_id,
            typology = %assessment.typology,
            risk = assessment.risk_score,
            adjusted = assessment.adjusted_risk_score,
            esi = assessment.esi.score,
            badge = %assessment.esi.badge,
            "assessment complete"
        );

        Ok(assessment)
    }
}
