//! Pattern Learner
//!
//! Turns committed layer diffs into regex rewrite rules and re-applies the
//! confident ones to new code.

pub mod pattern;
pub mod repository;
pub mod store;

pub use pattern::{derive_rule, DerivedRule, EditSpan, LearnedPattern};
pub use repository::{Observation, PatternRepository, DEFAULT_MAX_PATTERNS};
pub use store::{FilePatternStore, MemoryPatternStore, PatternStore};

use crate::layers::{LayerId, LayerRegistry};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Rules below this confidence are never applied
pub const DEFAULT_MIN_APPLY_CONFIDENCE: f64 = 0.7;

/// Rule ids touched by one application, awaiting the layer's verdict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUsage {
    /// Rules that changed the code
    pub applied: Vec<String>,
    /// Rules that failed to compile or matched without changing anything
    pub failed: Vec<String>,
}

impl RuleUsage {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.failed.is_empty()
    }
}

/// Result of [`PatternLearner::apply`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub code: String,
    /// Descriptions of the rules that changed the code, in application order
    pub applied_rule_names: Vec<String>,
    pub rule_count: usize,
    /// Pass to [`PatternLearner::settle`] once the result is accepted or reverted
    pub usage: RuleUsage,
}

#[derive(Debug)]
pub struct PatternLearner {
    repository: Arc<PatternRepository>,
    min_confidence: f64,
}

impl PatternLearner {
    pub fn new(repository: Arc<PatternRepository>) -> Self {
        Self {
            repository,
            min_confidence: DEFAULT_MIN_APPLY_CONFIDENCE,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn repository(&self) -> &Arc<PatternRepository> {
        &self.repository
    }

    /// Learn from one committed edit. `None` when the pair yields no rule.
    pub async fn learn(&self, before: &str, after: &str, layer_id: LayerId) -> Option<Observation> {
        let rule = derive_rule(before, after)?;

        let category = LayerRegistry::canonical()
            .get(layer_id)
            .map_or("general", |spec| spec.tag.as_str());
        let description = format!(
            "{} -> {}",
            layerfix_utils::safe_truncate(&rule.removed, 40),
            layerfix_utils::safe_truncate(&rule.inserted, 40)
        );
        let candidate = LearnedPattern::new(rule.matcher, rule.replacement, category, layer_id, description);

        let observation = self.repository.observe(candidate).await;
        debug!(
            "Observed pattern {} (new: {}, confidence {:.2})",
            observation.pattern.id, observation.is_new, observation.pattern.confidence
        );
        Some(observation)
    }

    /// Apply every confident rule in priority order.
    ///
    /// Works on a snapshot and records nothing; the returned usage is
    /// settled after validation.
    pub async fn apply(&self, code: &str) -> ApplyOutcome {
        let mut candidates: Vec<LearnedPattern> = self
            .repository
            .snapshot()
            .await
            .into_iter()
            .filter(|p| p.confidence >= self.min_confidence)
            .collect();
        candidates.sort_by(|a, b| b.priority().total_cmp(&a.priority()).then_with(|| a.id.cmp(&b.id)));

        let mut current = code.to_string();
        let mut applied_rule_names = Vec::new();
        let mut usage = RuleUsage::default();

        for pattern in &candidates {
            let regex = match Regex::new(&pattern.matcher) {
                Ok(regex) => regex,
                Err(e) => {
                    warn!("Learned pattern {} does not compile: {}", pattern.id, e);
                    usage.failed.push(pattern.id.clone());
                    continue;
                }
            };

            if !regex.is_match(&current) {
                continue;
            }

            let replaced = regex.replace_all(&current, pattern.replacement.as_str()).into_owned();
            if replaced == current {
                usage.failed.push(pattern.id.clone());
                continue;
            }

            current = replaced;
            applied_rule_names.push(pattern.description.clone());
            usage.applied.push(pattern.id.clone());
        }

        ApplyOutcome {
            code: current,
            rule_count: applied_rule_names.len(),
            applied_rule_names,
            usage,
        }
    }

    /// Write back the bookkeeping for one application. Applied rules earn a
    /// success only when their output was committed; a reverted output
    /// counts against every rule that touched it.
    pub async fn settle(&self, usage: &RuleUsage, committed: bool) {
        if usage.is_empty() {
            return;
        }
        if committed {
            self.repository.record_results(&usage.applied, &usage.failed).await;
        } else {
            let blamed: Vec<String> = usage.applied.iter().chain(&usage.failed).cloned().collect();
            self.repository.record_results(&[], &blamed).await;
        }
    }

    /// Confident rules whose matcher hits `code`. Read only.
    pub async fn matching(&self, code: &str) -> Vec<LearnedPattern> {
        self.repository
            .snapshot()
            .await
            .into_iter()
            .filter(|p| p.confidence >= self.min_confidence)
            .filter(|p| Regex::new(&p.matcher).is_ok_and(|regex| regex.is_match(code)))
            .collect()
    }

    pub async fn persist(&self) -> bool {
        self.repository.persist().await
    }
}
