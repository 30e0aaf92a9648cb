//! Pipeline request and result types

use crate::classifier::ErrorRecord;
use crate::history::StepState;
use crate::layers::{LayerId, LayerResolution};
use crate::validator::ValidationVerdict;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Runtime failure taxonomy attached to layer outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SyntaxError,
    AstParsingError,
    CorruptionDetected,
    StructuralIntegrityViolation,
    LayerBackendFailure,
    LayerTimeout,
    PipelineTimeout,
    DependencyCycle,
    PatternApplicationError,
    StorageUnavailable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::SyntaxError => "syntax_error",
            FailureKind::AstParsingError => "ast_parsing_error",
            FailureKind::CorruptionDetected => "corruption_detected",
            FailureKind::StructuralIntegrityViolation => "structural_integrity_violation",
            FailureKind::LayerBackendFailure => "layer_backend_failure",
            FailureKind::LayerTimeout => "layer_timeout",
            FailureKind::PipelineTimeout => "pipeline_timeout",
            FailureKind::DependencyCycle => "dependency_cycle",
            FailureKind::PatternApplicationError => "pattern_application_error",
            FailureKind::StorageUnavailable => "storage_unavailable",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Executor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "layer", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running(LayerId),
    Validating(LayerId),
    Committed(LayerId),
    RolledBack(LayerId),
    Completed,
    TimedOut,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::TimedOut | PipelineState::Cancelled
        )
    }
}

/// Cooperative cancellation shared between a caller and a running pipeline
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Log every state transition at info level
    pub verbose: bool,
    /// Run the pipeline without learning patterns or persisting anything
    pub dry_run: bool,
    /// Budget for the whole pipeline
    pub timeout_ms: u64,
    /// Budget for a single backend call
    pub layer_timeout_ms: u64,
    /// Retry retryable backend failures through the recovery strategies
    pub enable_recovery: bool,
    #[serde(skip)]
    pub cancellation: Option<CancellationFlag>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            dry_run: false,
            timeout_ms: 120_000,
            layer_timeout_ms: 30_000,
            enable_recovery: false,
            cancellation: None,
        }
    }
}

impl TransformOptions {
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = Some(flag);
        self
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.timeout_ms == 0 {
            return Err(crate::TransformError::InvalidInput(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.layer_timeout_ms == 0 {
            return Err(crate::TransformError::InvalidInput(
                "layer_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(CancellationFlag::is_cancelled)
    }
}

/// What happened to one layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerOutcome {
    pub layer_id: LayerId,
    pub success: bool,
    /// Code after this layer (the previous code when reverted or failed)
    pub code: String,
    pub execution_time_ms: u64,
    pub change_count: usize,
    pub improvements: Vec<String>,
    pub revert_reason: Option<String>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub error_record: Option<ErrorRecord>,
    pub validation: Option<ValidationVerdict>,
}

impl LayerOutcome {
    pub(crate) fn failed(layer_id: LayerId, code: &str, failure: FailureKind, error: String) -> Self {
        Self {
            layer_id,
            success: false,
            code: code.to_string(),
            execution_time_ms: 0,
            change_count: 0,
            improvements: Vec::new(),
            revert_reason: None,
            error: Some(error),
            failure: Some(failure),
            error_record: None,
            validation: None,
        }
    }

    /// A layer that never ran, e.g. on empty input
    pub(crate) fn skipped(layer_id: LayerId, code: &str, reason: &str) -> Self {
        Self {
            failure: None,
            ..Self::failed(layer_id, code, FailureKind::LayerBackendFailure, reason.to_string())
        }
    }

    pub fn was_reverted(&self) -> bool {
        self.revert_reason.is_some()
    }
}

/// Aggregate result of one `transform` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationResult {
    pub original_code: String,
    pub final_code: String,
    pub outcomes: Vec<LayerOutcome>,
    pub successful_layers: usize,
    pub total_execution_time_ms: u64,
    pub step_history: Vec<StepState>,
    pub final_state: PipelineState,
    pub resolution: LayerResolution,
}

impl TransformationResult {
    /// Unified diff of the original against the final code
    pub fn unified_diff(&self) -> String {
        similar::TextDiff::from_lines(&self.original_code, &self.final_code)
            .unified_diff()
            .context_radius(3)
            .header("original", "transformed")
            .to_string()
    }

    /// Code as it stood after the given step (0 is the original input)
    pub fn code_at_step(&self, step: usize) -> Option<&str> {
        self.step_history
            .iter()
            .find(|state| state.step == step)
            .map(|state| state.code.as_str())
    }

    pub fn outcome_for(&self, layer_id: LayerId) -> Option<&LayerOutcome> {
        self.outcomes.iter().find(|o| o.layer_id == layer_id)
    }

    pub fn has_changes(&self) -> bool {
        self.original_code != self.final_code
    }
}
