//! layerfix Transform - Layered Code Rewriting Engine
//!
//! Runs a caller-selected set of rewrite layers over JavaScript, TypeScript
//! and JSX source in dependency order, validating every layer's output
//! before accepting it.
//!
//! Key features:
//! - Static layer DAG with dependency closure of requested layers
//! - Tiered safety validation, including tree-sitter semantic checks
//! - Append-only step history with lookup-based rollback
//! - Diff-based pattern learning with confidence scoring
//! - Error classification with bounded, validated recovery

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analysis;
pub mod backend;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod events;
pub mod history;
pub mod layers;
pub mod learner;
pub mod parser;
pub mod recovery;
pub mod transformers;
pub mod types;
pub mod validator;

// Re-export main types for convenience
pub use analysis::{AnalysisReport, Analyzer, EstimatedImpact};
pub use backend::{LayerBackend, LayerExecution, LocalBackend};
pub use classifier::{ErrorCategory, ErrorClassifier, ErrorRecord, Severity};
pub use config::EngineConfig;
pub use engine::{ExecutorBuilder, TransformationExecutor};
pub use events::{EventSink, PipelineEvent, RecordingEventSink, TracingEventSink};
pub use history::{count_line_changes, StepHistory, StepState};
pub use layers::{LayerId, LayerRegistry, LayerResolution, LayerSpec, LayerTag};
pub use learner::{
    ApplyOutcome, FilePatternStore, LearnedPattern, MemoryPatternStore, PatternLearner,
    PatternRepository, PatternStore, RuleUsage,
};
pub use parser::{AccessMetrics, KeyMetrics, ParsedSource, SourceGrammar};
pub use recovery::{ErrorRecovery, RecoveryOutcome, RecoveryStrategy, RetryBackend};
pub use transformers::{DetectedIssue, LayerFix, LayerTransformer};
pub use types::{
    CancellationFlag, FailureKind, LayerOutcome, PipelineState, TransformOptions,
    TransformationResult,
};
pub use validator::{SafetyValidator, SemanticReport, ValidationVerdict};

/// Result type for transformation operations
pub type Result<T> = std::result::Result<T, TransformError>;

/// Error types for transformation operations
///
/// Only programmer errors and infrastructure failures surface here; every
/// recoverable runtime condition inside a pipeline run is reported on the
/// run's [`LayerOutcome`]s instead.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// A requested layer id is not in the registry
    #[error("Unknown layer: {0}")]
    UnknownLayer(LayerId),

    /// The static layer table contains a dependency cycle
    #[error("Dependency cycle in layer table involving layers {0:?}")]
    DependencyCycle(Vec<LayerId>),

    /// Malformed request or options
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Layer backend failure
    #[error("Layer {layer_id} failed: {message}")]
    Backend { layer_id: LayerId, message: String },

    /// Pattern store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Utility error
    #[error("Utility error: {0}")]
    Util(#[from] layerfix_utils::UtilError),

    /// Tree-sitter language error
    #[error("Language error: {0}")]
    Language(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Regex error
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<tree_sitter::LanguageError> for TransformError {
    fn from(err: tree_sitter::LanguageError) -> Self {
        TransformError::Language(format!("{:?}", err))
    }
}
