//! Step History
//!
//! Append-only log of code snapshots for one pipeline run. Step 0 is always
//! the original input; rolling back to a step is a lookup, never a replay.

use crate::layers::LayerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One snapshot in the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub step: usize,
    /// `None` for the initial snapshot
    pub layer_id: Option<LayerId>,
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub execution_time_ms: u64,
    pub change_count: usize,
    pub error: Option<String>,
}

/// Append-only sequence of [`StepState`]s
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepHistory {
    steps: Vec<StepState>,
}

impl StepHistory {
    /// Start a history whose step 0 is `original`
    pub fn new(original: &str) -> Self {
        Self {
            steps: vec![StepState {
                step: 0,
                layer_id: None,
                code: original.to_string(),
                timestamp: Utc::now(),
                success: true,
                execution_time_ms: 0,
                change_count: 0,
                error: None,
            }],
        }
    }

    /// Append a layer step and return its index
    pub fn record(
        &mut self,
        layer_id: LayerId,
        code: &str,
        success: bool,
        execution_time_ms: u64,
        change_count: usize,
        error: Option<String>,
    ) -> usize {
        let step = self.steps.len();
        self.steps.push(StepState {
            step,
            layer_id: Some(layer_id),
            code: code.to_string(),
            timestamp: Utc::now(),
            success,
            execution_time_ms,
            change_count,
            error,
        });
        step
    }

    pub fn original(&self) -> &str {
        &self.steps[0].code
    }

    /// Code of the most recent successful step
    pub fn last_committed(&self) -> &str {
        self.steps
            .iter()
            .rev()
            .find(|s| s.success)
            .map_or_else(|| self.original(), |s| s.code.as_str())
    }

    /// Snapshot to restore when rolling back to `step`
    pub fn rollback_to(&self, step: usize) -> Option<&StepState> {
        self.steps.get(step)
    }

    pub fn steps(&self) -> &[StepState] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<StepState> {
        self.steps
    }
}

/// Line-level change count:
/// `|len(before) - len(after)|` plus the number of differing lines in the
/// common prefix range.
pub fn count_line_changes(before: &str, after: &str) -> usize {
    let before_lines: Vec<&str> = before.split('\n').collect();
    let after_lines: Vec<&str> = after.split('\n').collect();

    let length_delta = before_lines.len().abs_diff(after_lines.len());
    let differing = before_lines
        .iter()
        .zip(after_lines.iter())
        .filter(|(b, a)| b != a)
        .count();

    length_delta + differing
}
