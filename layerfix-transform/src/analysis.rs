//! Issue detection and layer recommendation

use crate::backend::LocalBackend;
use crate::layers::{LayerId, LayerRegistry};
use crate::transformers::{DetectedIssue, LayerTransformer};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rough size of the change a recommendation implies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatedImpact {
    Low,
    Medium,
    High,
}

impl EstimatedImpact {
    pub fn from_issue_count(count: usize) -> Self {
        match count {
            0..=2 => EstimatedImpact::Low,
            3..=5 => EstimatedImpact::Medium,
            _ => EstimatedImpact::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub detected_issues: Vec<DetectedIssue>,
    /// Dependency-closed, ascending
    pub recommended_layers: Vec<LayerId>,
    pub confidence: f64,
    pub estimated_impact: EstimatedImpact,
    pub reasoning: Vec<String>,
}

/// Runs every transformer's detector over a source string
pub struct Analyzer {
    transformers: Vec<Arc<dyn LayerTransformer>>,
    registry: LayerRegistry,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("transformers", &self.transformers.len())
            .finish()
    }
}

impl Analyzer {
    pub fn new(transformers: Vec<Arc<dyn LayerTransformer>>, registry: LayerRegistry) -> Self {
        Self { transformers, registry }
    }

    pub fn from_backend(backend: &LocalBackend, registry: LayerRegistry) -> Self {
        Self::new(backend.transformers().cloned().collect(), registry)
    }

    pub async fn analyze(&self, code: &str) -> Result<AnalysisReport> {
        let mut detected_issues = Vec::new();
        for transformer in &self.transformers {
            detected_issues.extend(transformer.detect_issues(code).await);
        }

        let mut by_layer: BTreeMap<LayerId, usize> = BTreeMap::new();
        for issue in &detected_issues {
            *by_layer.entry(issue.layer_id()).or_default() += 1;
        }

        let requested: Vec<LayerId> = by_layer.keys().copied().collect();
        let resolution = self.registry.resolve(&requested)?;

        let mut reasoning: Vec<String> = by_layer
            .iter()
            .map(|(layer, count)| {
                format!(
                    "Layer {} ({}): {} issue(s) detected",
                    layer,
                    self.registry.name_of(*layer),
                    count
                )
            })
            .collect();
        reasoning.extend(resolution.warnings.iter().cloned());
        if detected_issues.is_empty() {
            reasoning.push("No known issues detected".to_string());
        }

        let confidence = if detected_issues.is_empty() {
            0.0
        } else {
            (0.5 + 0.1 * detected_issues.len() as f64).min(0.95)
        };

        Ok(AnalysisReport {
            estimated_impact: EstimatedImpact::from_issue_count(detected_issues.len()),
            detected_issues,
            recommended_layers: resolution.corrected_layers,
            confidence,
            reasoning,
        })
    }
}
