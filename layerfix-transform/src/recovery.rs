//! Error recovery
//!
//! Bounded retries with exponential backoff. Every recovered candidate goes
//! back through the [`SafetyValidator`] before it is handed to the executor.

use crate::backend::LayerBackend;
use crate::classifier::{ErrorCategory, ErrorRecord};
use crate::layers::LayerId;
use crate::types::TransformOptions;
use crate::validator::SafetyValidator;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default number of recovery attempts per failure
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Delay before the first attempt; doubles each attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// A category-specific way to produce a replacement result
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, record: &ErrorRecord) -> bool;

    /// Candidate code for the layer, or `None` when this attempt gave nothing
    async fn recover(
        &self,
        record: &ErrorRecord,
        layer_id: LayerId,
        code: &str,
        options: &TransformOptions,
    ) -> Result<Option<String>>;
}

/// Re-invoke the backend for transient failures
pub struct RetryBackend {
    backend: Arc<dyn LayerBackend>,
}

impl RetryBackend {
    pub fn new(backend: Arc<dyn LayerBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl RecoveryStrategy for RetryBackend {
    fn name(&self) -> &'static str {
        "retry_backend"
    }

    fn handles(&self, record: &ErrorRecord) -> bool {
        record.retryable
            && matches!(
                record.category,
                ErrorCategory::Syntax | ErrorCategory::AstParsing | ErrorCategory::Timeout
            )
    }

    async fn recover(
        &self,
        _record: &ErrorRecord,
        layer_id: LayerId,
        code: &str,
        options: &TransformOptions,
    ) -> Result<Option<String>> {
        let budget = Duration::from_millis(options.layer_timeout_ms);
        match tokio::time::timeout(budget, self.backend.execute(layer_id, code, options)).await {
            Ok(Ok(execution)) if execution.success => Ok(execution.transformed_code),
            Ok(Ok(_)) | Err(_) => Ok(None),
            Ok(Err(e)) => Err(e),
        }
    }
}

/// Result of [`ErrorRecovery::recover`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub recovered: bool,
    pub code: Option<String>,
    pub attempts: u32,
    pub strategy: Option<String>,
}

pub struct ErrorRecovery {
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
    validator: SafetyValidator,
    max_attempts: u32,
    base_delay: Duration,
}

impl std::fmt::Debug for ErrorRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRecovery")
            .field("strategies", &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

impl ErrorRecovery {
    pub fn new(validator: SafetyValidator, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            validator,
            max_attempts,
            base_delay,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `base × 2^(attempt − 1)` for 1-based attempts
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// One recovery attempt: wait out the backoff, ask the first matching
    /// strategy, validate the candidate against `code`.
    pub async fn attempt_recovery(
        &self,
        record: &ErrorRecord,
        layer_id: LayerId,
        code: &str,
        attempt: u32,
        options: &TransformOptions,
    ) -> Option<(String, &'static str)> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let strategy = self.strategies.iter().find(|s| s.handles(record))?;

        tokio::time::sleep(self.backoff_delay(attempt)).await;

        let candidate = match strategy.recover(record, layer_id, code, options).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return None,
            Err(e) => {
                debug!("Recovery strategy {} failed for layer {}: {}", strategy.name(), layer_id, e);
                return None;
            }
        };

        let verdict = self.validator.check(code, &candidate, layer_id);
        if verdict.should_revert {
            debug!(
                "Recovered candidate for layer {} rejected: {}",
                layer_id,
                verdict.reason()
            );
            return None;
        }
        Some((candidate, strategy.name()))
    }

    /// Run attempts until one yields a validated candidate or the budget is
    /// spent.
    pub async fn recover(
        &self,
        record: &ErrorRecord,
        layer_id: LayerId,
        code: &str,
        options: &TransformOptions,
    ) -> RecoveryOutcome {
        let mut outcome = RecoveryOutcome::default();
        if !self.strategies.iter().any(|s| s.handles(record)) {
            return outcome;
        }

        for attempt in 1..=self.max_attempts {
            if options.is_cancelled() {
                break;
            }
            outcome.attempts = attempt;
            if let Some((candidate, strategy)) = self.attempt_recovery(record, layer_id, code, attempt, options).await {
                info!("Layer {} recovered on attempt {} via {}", layer_id, attempt, strategy);
                outcome.recovered = true;
                outcome.code = Some(candidate);
                outcome.strategy = Some(strategy.to_string());
                break;
            }
        }
        outcome
    }
}
