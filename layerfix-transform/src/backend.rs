//! Layer backends
//!
//! The executor only sees [`LayerBackend`]. [`LocalBackend`] runs the
//! in-process transformers; remote services plug in behind the same trait.

use crate::layers::LayerId;
use crate::learner::{PatternLearner, RuleUsage};
use crate::transformers::{
    AdaptivePatternTransformer, ComponentTransformer, ConfigTransformer, EntityCleanupTransformer,
    HydrationTransformer, LayerTransformer, RouterTransformer, TestingTransformer,
};
use crate::types::TransformOptions;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// What a backend reports for one layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerExecution {
    pub success: bool,
    pub transformed_code: Option<String>,
    pub change_count: usize,
    pub improvements: Vec<String>,
    pub error: Option<String>,
    /// Learned rules consulted by the adaptive layer
    #[serde(default)]
    pub rule_usage: RuleUsage,
}

impl LayerExecution {
    pub fn succeeded(code: String, change_count: usize, improvements: Vec<String>) -> Self {
        Self {
            success: true,
            transformed_code: Some(code),
            change_count,
            improvements,
            error: None,
            rule_usage: RuleUsage::default(),
        }
    }

    pub fn with_rule_usage(mut self, usage: RuleUsage) -> Self {
        self.rule_usage = usage;
        self
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Executes one layer over a code string.
///
/// A returned `Err` is treated exactly like `success == false`.
#[async_trait]
pub trait LayerBackend: Send + Sync {
    async fn execute(&self, layer_id: LayerId, code: &str, options: &TransformOptions) -> Result<LayerExecution>;
}

/// In-process backend with one transformer per layer
pub struct LocalBackend {
    transformers: BTreeMap<LayerId, Arc<dyn LayerTransformer>>,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("layers", &self.transformers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LocalBackend {
    /// All seven canonical transformers; the adaptive layer shares `learner`
    pub fn new(learner: Arc<PatternLearner>) -> Self {
        let transformers: Vec<Arc<dyn LayerTransformer>> = vec![
            Arc::new(ConfigTransformer::new()),
            Arc::new(EntityCleanupTransformer::new()),
            Arc::new(ComponentTransformer::new()),
            Arc::new(HydrationTransformer::new()),
            Arc::new(RouterTransformer::new()),
            Arc::new(TestingTransformer::new()),
            Arc::new(AdaptivePatternTransformer::new(learner)),
        ];
        Self::with_transformers(transformers)
    }

    pub fn with_transformers(transformers: Vec<Arc<dyn LayerTransformer>>) -> Self {
        Self {
            transformers: transformers.into_iter().map(|t| (t.layer_id(), t)).collect(),
        }
    }

    pub fn transformer(&self, layer_id: LayerId) -> Option<&Arc<dyn LayerTransformer>> {
        self.transformers.get(&layer_id)
    }

    pub fn transformers(&self) -> impl Iterator<Item = &Arc<dyn LayerTransformer>> {
        self.transformers.values()
    }
}

#[async_trait]
impl LayerBackend for LocalBackend {
    async fn execute(&self, layer_id: LayerId, code: &str, _options: &TransformOptions) -> Result<LayerExecution> {
        let Some(transformer) = self.transformer(layer_id) else {
            return Ok(LayerExecution::failed(format!("no transformer registered for layer {}", layer_id)));
        };

        debug!("Running local transformer {} for layer {}", transformer.name(), layer_id);
        match transformer.transform(code).await {
            Ok(fix) => Ok(LayerExecution::succeeded(fix.code, fix.change_count, fix.improvements)
                .with_rule_usage(fix.rule_usage)),
            Err(e) => Ok(LayerExecution::failed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::{PatternRepository, DEFAULT_MAX_PATTERNS};

    fn backend() -> LocalBackend {
        LocalBackend::new(Arc::new(PatternLearner::new(Arc::new(PatternRepository::in_memory(
            DEFAULT_MAX_PATTERNS,
        )))))
    }

    #[test]
    fn test_registers_every_layer() {
        let backend = backend();
        let ids: Vec<LayerId> = backend.transformers().map(|t| t.layer_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_execute_runs_transformer() {
        let execution = backend()
            .execute(2, "const a = \"&amp;\";", &TransformOptions::default())
            .await
            .unwrap();
        assert!(execution.success);
        assert_eq!(execution.transformed_code.as_deref(), Some("const a = \"&\";"));
        assert_eq!(execution.change_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_layer_fails_softly() {
        let backend = LocalBackend::with_transformers(Vec::new());
        let execution = backend.execute(3, "x", &TransformOptions::default()).await.unwrap();
        assert!(!execution.success);
        assert!(execution.error.unwrap().contains("layer 3"));
    }
}
