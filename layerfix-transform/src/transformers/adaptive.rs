//! Adaptive layer: re-apply rules learned from earlier commits

use super::{DetectedIssue, LayerFix, LayerTransformer};
use crate::layers::LayerId;
use crate::learner::PatternLearner;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AdaptivePatternTransformer {
    learner: Arc<PatternLearner>,
}

impl AdaptivePatternTransformer {
    pub fn new(learner: Arc<PatternLearner>) -> Self {
        Self { learner }
    }
}

#[async_trait]
impl LayerTransformer for AdaptivePatternTransformer {
    fn layer_id(&self) -> LayerId {
        7
    }

    fn name(&self) -> &'static str {
        "Adaptive Pattern Learning"
    }

    async fn transform(&self, code: &str) -> Result<LayerFix> {
        let outcome = self.learner.apply(code).await;
        if outcome.rule_count == 0 {
            return Ok(LayerFix::unchanged(code).with_rule_usage(outcome.usage));
        }

        let improvements = outcome
            .applied_rule_names
            .iter()
            .map(|name| format!("Applied learned pattern: {}", name))
            .collect();
        Ok(LayerFix::new(code, outcome.code, improvements).with_rule_usage(outcome.usage))
    }

    async fn detect_issues(&self, code: &str) -> Vec<DetectedIssue> {
        self.learner
            .matching(code)
            .await
            .into_iter()
            .map(|pattern| DetectedIssue::LearnedPatternMatch {
                pattern_id: pattern.id,
                description: pattern.description,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::{PatternRepository, DEFAULT_MAX_PATTERNS};

    #[tokio::test]
    async fn test_applies_learned_rules() {
        let learner = Arc::new(PatternLearner::new(Arc::new(PatternRepository::in_memory(DEFAULT_MAX_PATTERNS))));
        learner.learn("x.toBe(undefined)", "x.toBeUndefined()", 6).await.unwrap();
        let transformer = AdaptivePatternTransformer::new(learner);

        let code = "expect(y).toBe(undefined);";
        assert_eq!(transformer.detect_issues(code).await.len(), 1);

        let fix = transformer.transform(code).await.unwrap();
        assert_eq!(fix.code, "expect(y).toBeUndefined();");
        assert_eq!(fix.improvements.len(), 1);
        assert_eq!(fix.rule_usage.applied.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_rule_set_is_a_no_op() {
        let learner = Arc::new(PatternLearner::new(Arc::new(PatternRepository::in_memory(DEFAULT_MAX_PATTERNS))));
        let fix = AdaptivePatternTransformer::new(learner).transform("const a = 1;").await.unwrap();
        assert_eq!(fix, LayerFix::unchanged("const a = 1;"));
    }
}
