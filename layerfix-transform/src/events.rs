//! Pipeline events
//!
//! One event per real unit of work. The default sink turns them into
//! structured `tracing` records.

use crate::classifier::{ErrorCategory, Severity};
use crate::layers::LayerId;
use crate::types::{FailureKind, PipelineState};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    TransformationStarted {
        run_id: String,
        layers: Vec<LayerId>,
        code_length: usize,
    },
    LayerStarted {
        run_id: String,
        layer_id: LayerId,
    },
    LayerCompleted {
        run_id: String,
        layer_id: LayerId,
        success: bool,
        change_count: usize,
        execution_time_ms: u64,
        failure: Option<FailureKind>,
    },
    ValidationReverted {
        run_id: String,
        layer_id: LayerId,
        reason: String,
    },
    PatternLearned {
        run_id: String,
        layer_id: LayerId,
        pattern_id: String,
        is_new: bool,
    },
    ErrorClassified {
        run_id: String,
        layer_id: LayerId,
        category: ErrorCategory,
        severity: Severity,
    },
    TransformationCompleted {
        run_id: String,
        final_state: PipelineState,
        successful_layers: usize,
        total_execution_time_ms: u64,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> &str {
        match self {
            PipelineEvent::TransformationStarted { run_id, .. }
            | PipelineEvent::LayerStarted { run_id, .. }
            | PipelineEvent::LayerCompleted { run_id, .. }
            | PipelineEvent::ValidationReverted { run_id, .. }
            | PipelineEvent::PatternLearned { run_id, .. }
            | PipelineEvent::ErrorClassified { run_id, .. }
            | PipelineEvent::TransformationCompleted { run_id, .. } => run_id,
        }
    }
}

/// Receiver of pipeline events; must not block
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::TransformationStarted { run_id, layers, code_length } => {
                info!(run_id = %run_id, ?layers, code_length, "transformation started");
            }
            PipelineEvent::LayerStarted { run_id, layer_id } => {
                debug!(run_id = %run_id, layer_id, "layer started");
            }
            PipelineEvent::LayerCompleted {
                run_id,
                layer_id,
                success,
                change_count,
                execution_time_ms,
                failure,
            } => {
                info!(
                    run_id = %run_id,
                    layer_id,
                    success,
                    change_count,
                    execution_time_ms,
                    failure = failure.map(|f| f.as_str()),
                    "layer completed"
                );
            }
            PipelineEvent::ValidationReverted { run_id, layer_id, reason } => {
                warn!(run_id = %run_id, layer_id, reason = %reason, "layer output reverted");
            }
            PipelineEvent::PatternLearned { run_id, layer_id, pattern_id, is_new } => {
                debug!(run_id = %run_id, layer_id, pattern_id = %pattern_id, is_new, "pattern learned");
            }
            PipelineEvent::ErrorClassified { run_id, layer_id, category, severity } => {
                warn!(
                    run_id = %run_id,
                    layer_id,
                    category = category.as_str(),
                    severity = severity.as_str(),
                    "layer error classified"
                );
            }
            PipelineEvent::TransformationCompleted {
                run_id,
                final_state,
                successful_layers,
                total_execution_time_ms,
            } => {
                info!(
                    run_id = %run_id,
                    ?final_state,
                    successful_layers,
                    total_execution_time_ms,
                    "transformation completed"
                );
            }
        }
    }
}

/// Keeps every event in memory; useful for inspection and tests
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingEventSink::new();
        sink.emit(&PipelineEvent::LayerStarted { run_id: "r".into(), layer_id: 1 });
        sink.emit(&PipelineEvent::LayerStarted { run_id: "r".into(), layer_id: 2 });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], PipelineEvent::LayerStarted { run_id: "r".into(), layer_id: 2 });
        assert_eq!(events[0].run_id(), "r");
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let event = PipelineEvent::ValidationReverted {
            run_id: "r".into(),
            layer_id: 3,
            reason: "syntax error".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "validation_reverted");
        assert_eq!(json["layer_id"], 3);
    }
}
