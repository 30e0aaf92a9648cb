//! Transformation Executor
//!
//! Drives one pipeline run per `transform` call:
//! resolve → for each layer (backend → validate → commit or roll back →
//! learn) → aggregate. Runtime failures never escape as errors; they are
//! recorded on the run's outcomes and history.

use crate::analysis::{AnalysisReport, Analyzer};
use crate::backend::{LayerBackend, LayerExecution, LocalBackend};
use crate::classifier::{ErrorClassifier, ErrorRecord};
use crate::config::EngineConfig;
use crate::events::{EventSink, PipelineEvent, TracingEventSink};
use crate::history::{count_line_changes, StepHistory};
use crate::layers::{LayerId, LayerRegistry, LayerResolution, LayerTag};
use crate::learner::{FilePatternStore, PatternLearner, PatternRepository, PatternStore, RuleUsage};
use crate::recovery::{ErrorRecovery, RetryBackend};
use crate::types::{FailureKind, LayerOutcome, PipelineState, TransformOptions, TransformationResult};
use crate::validator::SafetyValidator;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Builder for [`TransformationExecutor`]
pub struct ExecutorBuilder {
    config: EngineConfig,
    backend: Option<Arc<dyn LayerBackend>>,
    store: Option<Arc<dyn PatternStore>>,
    events: Arc<dyn EventSink>,
}

impl ExecutorBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            backend: None,
            store: None,
            events: Arc::new(TracingEventSink),
        }
    }

    /// Use a custom backend instead of the local transformers
    pub fn backend(mut self, backend: Arc<dyn LayerBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Overrides `pattern_store_path`
    pub fn pattern_store(mut self, store: Arc<dyn PatternStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Validate the configuration, wire components and load persisted rules
    pub async fn build(self) -> Result<TransformationExecutor> {
        self.config.validate()?;

        let store = self.store.or_else(|| {
            self.config
                .pattern_store_path
                .as_ref()
                .map(|path| Arc::new(FilePatternStore::new(path)) as Arc<dyn PatternStore>)
        });
        let repository = Arc::new(match store {
            Some(store) => PatternRepository::with_store(store, self.config.max_patterns),
            None => PatternRepository::in_memory(self.config.max_patterns),
        });
        repository.load().await;

        let learner = Arc::new(PatternLearner::new(repository).with_min_confidence(self.config.min_apply_confidence));
        let registry = LayerRegistry::canonical().clone();
        let local = LocalBackend::new(learner.clone());
        let analyzer = Analyzer::from_backend(&local, registry.clone());
        let backend = self.backend.unwrap_or_else(|| Arc::new(local));
        let validator = SafetyValidator::with_registry(registry.clone());
        let recovery = ErrorRecovery::new(
            validator.clone(),
            self.config.recovery_max_attempts,
            self.config.recovery_base_delay(),
        )
        .with_strategy(Arc::new(RetryBackend::new(backend.clone())));

        info!("Transformation executor ready ({} layers)", registry.ids().count());

        Ok(TransformationExecutor {
            registry,
            backend,
            validator,
            classifier: ErrorClassifier::new(),
            learner,
            recovery,
            analyzer,
            events: self.events,
            config: self.config,
        })
    }
}

/// Shared, reentrant pipeline executor; wrap in `Arc` for concurrent calls
pub struct TransformationExecutor {
    registry: LayerRegistry,
    backend: Arc<dyn LayerBackend>,
    validator: SafetyValidator,
    classifier: ErrorClassifier,
    learner: Arc<PatternLearner>,
    recovery: ErrorRecovery,
    analyzer: Analyzer,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
}

impl std::fmt::Debug for TransformationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformationExecutor")
            .field("config", &self.config)
            .field("recovery", &self.recovery)
            .finish()
    }
}

/// Per-run mutable state
struct RunState {
    run_id: String,
    history: StepHistory,
    current: String,
    outcomes: Vec<LayerOutcome>,
    state: PipelineState,
    /// A new rule was observed
    learned: bool,
    /// Existing rules had their counters updated
    applied: bool,
}

/// Why a backend call produced no usable code
struct LayerFailure {
    message: String,
    kind: FailureKind,
}

impl TransformationExecutor {
    /// Executor over the local transformers
    pub async fn new(config: EngineConfig) -> Result<Self> {
        ExecutorBuilder::new(config).build().await
    }

    pub fn builder(config: EngineConfig) -> ExecutorBuilder {
        ExecutorBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    pub fn learner(&self) -> &Arc<PatternLearner> {
        &self.learner
    }

    /// Options seeded from the engine configuration
    pub fn default_options(&self) -> TransformOptions {
        self.config.default_options()
    }

    /// Normalize requested layers into their dependency closure
    pub fn resolve_layers(&self, requested: &[LayerId]) -> Result<LayerResolution> {
        self.registry.resolve(requested)
    }

    pub async fn analyze(&self, code: &str) -> Result<AnalysisReport> {
        self.analyzer.analyze(code).await
    }

    /// Run the requested layers (plus dependencies) over `code`.
    ///
    /// Errors only for unknown layers and invalid options, before anything
    /// runs.
    pub async fn transform(
        &self,
        code: &str,
        layers: &[LayerId],
        options: &TransformOptions,
    ) -> Result<TransformationResult> {
        options.validate()?;
        let resolution = self.registry.resolve(layers)?;
        for warning in &resolution.warnings {
            info!("{}", warning);
        }
        let order = self.registry.execution_order(&resolution.corrected_layers);

        let started = Instant::now();
        let deadline = started + Duration::from_millis(options.timeout_ms);
        let mut run = RunState {
            run_id: Uuid::new_v4().to_string(),
            history: StepHistory::new(code),
            current: code.to_string(),
            outcomes: Vec::with_capacity(order.len()),
            state: PipelineState::Idle,
            learned: false,
            applied: false,
        };

        self.events.emit(&PipelineEvent::TransformationStarted {
            run_id: run.run_id.clone(),
            layers: order.clone(),
            code_length: code.len(),
        });

        if code.trim().is_empty() {
            for layer_id in &order {
                let outcome = LayerOutcome::skipped(*layer_id, code, "empty input");
                run.history.record(*layer_id, code, false, 0, 0, outcome.error.clone());
                self.emit_completed(&run.run_id, &outcome);
                run.outcomes.push(outcome);
            }
        } else {
            for layer_id in &order {
                if options.is_cancelled() {
                    self.transition(&mut run, PipelineState::Cancelled, options);
                    break;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    self.transition(&mut run, PipelineState::TimedOut, options);
                    break;
                }

                self.run_layer(&mut run, *layer_id, options, remaining).await;

                if run.state == PipelineState::TimedOut {
                    break;
                }
            }
        }

        if !run.state.is_terminal() {
            self.transition(&mut run, PipelineState::Completed, options);
        }

        if (run.learned || run.applied) && !options.dry_run {
            self.learner.persist().await;
        }

        let successful_layers = run.outcomes.iter().filter(|o| o.success).count();
        let total_execution_time_ms = elapsed_ms(started);
        self.events.emit(&PipelineEvent::TransformationCompleted {
            run_id: run.run_id.clone(),
            final_state: run.state,
            successful_layers,
            total_execution_time_ms,
        });

        Ok(TransformationResult {
            original_code: code.to_string(),
            final_code: run.current,
            outcomes: run.outcomes,
            successful_layers,
            total_execution_time_ms,
            step_history: run.history.into_steps(),
            final_state: run.state,
            resolution,
        })
    }

    async fn run_layer(&self, run: &mut RunState, layer_id: LayerId, options: &TransformOptions, remaining: Duration) {
        let layer_started = Instant::now();
        self.transition(run, PipelineState::Running(layer_id), options);
        self.events.emit(&PipelineEvent::LayerStarted {
            run_id: run.run_id.clone(),
            layer_id,
        });

        let layer_budget = Duration::from_millis(options.layer_timeout_ms);
        let budget = layer_budget.min(remaining);
        let mut executed = self
            .call_backend(layer_id, &run.current, options, budget, budget < layer_budget)
            .await;

        let mut error_record = None;
        if let Err(failure) = &executed {
            let record = self.classify(&run.run_id, &failure.message, layer_id);
            if options.enable_recovery && record.retryable && failure.kind != FailureKind::PipelineTimeout {
                let remaining = deadline_remaining(layer_started, remaining);
                let recovered = tokio::time::timeout(
                    remaining,
                    self.recovery.recover(&record, layer_id, &run.current, options),
                )
                .await;
                if let Ok(outcome) = recovered {
                    if let Some(code) = outcome.code {
                        executed = Ok(LayerExecution::succeeded(
                            code,
                            0,
                            vec![format!(
                                "Recovered after {} attempt(s) via {}",
                                outcome.attempts,
                                outcome.strategy.unwrap_or_default()
                            )],
                        ));
                    }
                }
            }
            error_record = Some(record);
        }

        let execution = match executed {
            Ok(execution) => execution,
            Err(failure) => {
                let elapsed = elapsed_ms(layer_started);
                let mut outcome = LayerOutcome::failed(layer_id, &run.current, failure.kind, failure.message.clone());
                outcome.execution_time_ms = elapsed;
                outcome.error_record = error_record;
                run.history.record(layer_id, &run.current, false, elapsed, 0, Some(failure.message));
                self.emit_completed(&run.run_id, &outcome);
                run.outcomes.push(outcome);
                if failure.kind == FailureKind::PipelineTimeout {
                    self.transition(run, PipelineState::TimedOut, options);
                }
                return;
            }
        };

        let candidate = execution.transformed_code.unwrap_or_else(|| run.current.clone());
        self.transition(run, PipelineState::Validating(layer_id), options);
        let verdict = self.validator.check(&run.current, &candidate, layer_id);
        let elapsed = elapsed_ms(layer_started);

        if verdict.should_revert {
            self.transition(run, PipelineState::RolledBack(layer_id), options);
            self.settle_rules(run, &execution.rule_usage, false, options).await;
            let reason = verdict.reason().to_string();
            self.events.emit(&PipelineEvent::ValidationReverted {
                run_id: run.run_id.clone(),
                layer_id,
                reason: reason.clone(),
            });

            let outcome = LayerOutcome {
                layer_id,
                success: false,
                code: run.current.clone(),
                execution_time_ms: elapsed,
                change_count: 0,
                improvements: Vec::new(),
                revert_reason: Some(reason.clone()),
                error: Some(reason.clone()),
                failure: verdict.failure,
                error_record,
                validation: Some(verdict),
            };
            run.history.record(layer_id, &run.current, false, elapsed, 0, Some(reason));
            self.emit_completed(&run.run_id, &outcome);
            run.outcomes.push(outcome);
            return;
        }

        let change_count = count_line_changes(&run.current, &candidate);
        self.transition(run, PipelineState::Committed(layer_id), options);
        self.settle_rules(run, &execution.rule_usage, true, options).await;

        if change_count > 0 && self.should_learn(layer_id, options) {
            if let Some(observation) = self.learner.learn(&run.current, &candidate, layer_id).await {
                run.learned = true;
                self.events.emit(&PipelineEvent::PatternLearned {
                    run_id: run.run_id.clone(),
                    layer_id,
                    pattern_id: observation.pattern.id,
                    is_new: observation.is_new,
                });
            }
        }

        run.current = candidate;
        run.history.record(layer_id, &run.current, true, elapsed, change_count, None);

        let outcome = LayerOutcome {
            layer_id,
            success: true,
            code: run.current.clone(),
            execution_time_ms: elapsed,
            change_count,
            improvements: execution.improvements,
            revert_reason: None,
            error: None,
            failure: None,
            error_record,
            validation: Some(verdict),
        };
        self.emit_completed(&run.run_id, &outcome);
        run.outcomes.push(outcome);
    }

    /// Backend call under `budget`; `pipeline_bound` marks a budget cut
    /// short by the pipeline deadline.
    async fn call_backend(
        &self,
        layer_id: LayerId,
        code: &str,
        options: &TransformOptions,
        budget: Duration,
        pipeline_bound: bool,
    ) -> std::result::Result<LayerExecution, LayerFailure> {
        match tokio::time::timeout(budget, self.backend.execute(layer_id, code, options)).await {
            Ok(Ok(execution)) if execution.success => Ok(execution),
            Ok(Ok(execution)) => Err(LayerFailure {
                message: execution
                    .error
                    .unwrap_or_else(|| format!("layer {} backend reported failure", layer_id)),
                kind: FailureKind::LayerBackendFailure,
            }),
            Ok(Err(e)) => Err(LayerFailure {
                message: e.to_string(),
                kind: FailureKind::LayerBackendFailure,
            }),
            Err(_) if pipeline_bound => Err(LayerFailure {
                message: format!("pipeline timed out during layer {}", layer_id),
                kind: FailureKind::PipelineTimeout,
            }),
            Err(_) => Err(LayerFailure {
                message: format!("layer {} timed out after {}ms", layer_id, budget.as_millis()),
                kind: FailureKind::LayerTimeout,
            }),
        }
    }

    fn classify(&self, run_id: &str, message: &str, layer_id: LayerId) -> ErrorRecord {
        let record = self.classifier.classify(message, None, layer_id);
        self.events.emit(&PipelineEvent::ErrorClassified {
            run_id: run_id.to_string(),
            layer_id,
            category: record.category,
            severity: record.severity,
        });
        record
    }

    /// Learned-rule bookkeeping for a validated layer; nothing on dry runs
    async fn settle_rules(&self, run: &mut RunState, usage: &RuleUsage, committed: bool, options: &TransformOptions) {
        if options.dry_run || usage.is_empty() {
            return;
        }
        self.learner.settle(usage, committed).await;
        run.applied = true;
    }

    fn should_learn(&self, layer_id: LayerId, options: &TransformOptions) -> bool {
        self.config.learning_enabled
            && !options.dry_run
            && self.registry.get(layer_id).map(|spec| spec.tag) != Some(LayerTag::Adaptive)
    }

    fn transition(&self, run: &mut RunState, state: PipelineState, options: &TransformOptions) {
        if options.verbose {
            info!(run_id = %run.run_id, ?state, "pipeline state");
        } else {
            debug!(run_id = %run.run_id, ?state, "pipeline state");
        }
        run.state = state;
    }

    fn emit_completed(&self, run_id: &str, outcome: &LayerOutcome) {
        self.events.emit(&PipelineEvent::LayerCompleted {
            run_id: run_id.to_string(),
            layer_id: outcome.layer_id,
            success: outcome.success,
            change_count: outcome.change_count,
            execution_time_ms: outcome.execution_time_ms,
            failure: outcome.failure,
        });
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Pipeline budget left after part of `remaining` was spent since `since`
fn deadline_remaining(since: Instant, remaining: Duration) -> Duration {
    remaining.saturating_sub(since.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::LearnedPattern;

    #[tokio::test]
    async fn test_entity_layer_scenario() {
        let executor = TransformationExecutor::new(EngineConfig::default()).await.unwrap();
        let result = executor
            .transform(r#"const test = "&quot;test&quot;";"#, &[2], &TransformOptions::default())
            .await
            .unwrap();

        assert_eq!(result.final_code, r#"const test = "test";"#);
        assert_eq!(result.successful_layers, 1);
        assert_eq!(result.final_state, PipelineState::Completed);
        assert_eq!(result.step_history.len(), 2);
        assert_eq!(result.code_at_step(0), Some(r#"const test = "&quot;test&quot;";"#));
    }

    #[tokio::test]
    async fn test_empty_input_scenario() {
        let executor = TransformationExecutor::new(EngineConfig::default()).await.unwrap();
        let result = executor.transform("", &[1, 2, 3], &TransformOptions::default()).await.unwrap();

        assert_eq!(result.successful_layers, 0);
        assert_eq!(result.final_code, "");
        assert_eq!(result.outcomes.len(), 3);
        assert!(result.outcomes.iter().all(|o| o.error.as_deref() == Some("empty input")));
    }

    #[tokio::test]
    async fn test_unknown_layer_is_rejected_before_running() {
        let executor = TransformationExecutor::new(EngineConfig::default()).await.unwrap();
        let err = executor
            .transform("const a = 1;", &[2, 99], &TransformOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::TransformError::UnknownLayer(99)));
    }

    #[tokio::test]
    async fn test_zero_timeout_is_invalid_input() {
        let executor = TransformationExecutor::new(EngineConfig::default()).await.unwrap();
        let options = TransformOptions { timeout_ms: 0, ..TransformOptions::default() };
        assert!(matches!(
            executor.transform("const a = 1;", &[2], &options).await,
            Err(crate::TransformError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_learning_is_skipped_on_dry_run() {
        let executor = TransformationExecutor::new(EngineConfig::default()).await.unwrap();
        let options = TransformOptions { dry_run: true, ..TransformOptions::default() };
        executor
            .transform("const a = \"&amp;\";", &[2], &options)
            .await
            .unwrap();
        assert!(executor.learner().repository().is_empty().await);

        executor
            .transform("const a = \"&amp;\";", &[2], &TransformOptions::default())
            .await
            .unwrap();
        assert_eq!(executor.learner().repository().len().await, 1);
    }

    async fn executor_with_rule(matcher: &str, replacement: &str) -> TransformationExecutor {
        let executor = TransformationExecutor::new(EngineConfig::default()).await.unwrap();
        executor
            .learner()
            .repository()
            .observe(LearnedPattern::new(
                matcher.to_string(),
                replacement.to_string(),
                "general",
                7,
                "test rule".to_string(),
            ))
            .await;
        executor
    }

    #[tokio::test]
    async fn test_reverted_adaptive_output_counts_against_the_rule() {
        let executor = executor_with_rule("= 1;", "= (1;").await;

        let result = executor
            .transform("const a = 1;", &[7], &TransformOptions::default())
            .await
            .unwrap();
        assert_eq!(result.final_code, "const a = 1;");
        assert!(result.outcome_for(7).unwrap().was_reverted());

        let pattern = &executor.learner().repository().snapshot().await[0];
        assert_eq!(pattern.success_count, 1);
        assert_eq!(pattern.failure_count, 1);
        assert!((pattern.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_committed_adaptive_output_credits_the_rule() {
        let executor = executor_with_rule("var ", "let ").await;

        let result = executor
            .transform("var a = 1;", &[7], &TransformOptions::default())
            .await
            .unwrap();
        assert_eq!(result.final_code, "let a = 1;");

        let pattern = &executor.learner().repository().snapshot().await[0];
        assert_eq!(pattern.success_count, 2);
        assert_eq!(pattern.failure_count, 0);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_rule_counters_alone() {
        let executor = executor_with_rule("var ", "let ").await;
        let options = TransformOptions { dry_run: true, ..TransformOptions::default() };

        let result = executor.transform("var a = 1;", &[7], &options).await.unwrap();
        assert_eq!(result.final_code, "let a = 1;");

        let pattern = &executor.learner().repository().snapshot().await[0];
        assert_eq!(pattern.success_count, 1);
        assert_eq!(pattern.failure_count, 0);
    }

    #[tokio::test]
    async fn test_adaptive_only_run_persists_counters() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn PatternStore> = Arc::new(FilePatternStore::new(dir.path().join("patterns.json")));
        let executor = TransformationExecutor::builder(EngineConfig::default())
            .pattern_store(store.clone())
            .build()
            .await
            .unwrap();
        executor
            .learner()
            .repository()
            .observe(LearnedPattern::new("var ".into(), "let ".into(), "general", 7, "var to let".into()))
            .await;

        executor
            .transform("var a = 1;", &[7], &TransformOptions::default())
            .await
            .unwrap();

        let stored = store.load().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].success_count, 2);
    }
}
