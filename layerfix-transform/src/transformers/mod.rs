//! Layer transformers
//!
//! One transformer per layer. Each rewrites a whole source string and can
//! report the issues it would fix without changing anything.

use crate::history::count_line_changes;
use crate::layers::LayerId;
use crate::learner::RuleUsage;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod adaptive;
pub mod components;
pub mod config;
pub mod entities;
pub mod hydration;
pub mod router;
pub mod testing;

pub use adaptive::AdaptivePatternTransformer;
pub use components::ComponentTransformer;
pub use config::ConfigTransformer;
pub use entities::EntityCleanupTransformer;
pub use hydration::HydrationTransformer;
pub use router::RouterTransformer;
pub use testing::TestingTransformer;

/// An issue one of the layers knows how to fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectedIssue {
    OutdatedCompileTarget { target: String, line: usize },
    DeprecatedConfigFlag { flag: String, line: usize },
    HtmlEntity { entity: String, line: usize },
    MissingListKey { line: usize },
    ImageWithoutAlt { line: usize },
    UnguardedBrowserApi { api: String, line: usize },
    MissingUseClient { trigger: String },
    LegacyRouterImport { line: usize },
    LegacyLinkAnchor { line: usize },
    FocusedTest { line: usize },
    NullishAssertion { line: usize },
    LearnedPatternMatch { pattern_id: String, description: String },
}

impl DetectedIssue {
    /// Layer that fixes this issue
    pub fn layer_id(&self) -> LayerId {
        match self {
            DetectedIssue::OutdatedCompileTarget { .. } | DetectedIssue::DeprecatedConfigFlag { .. } => 1,
            DetectedIssue::HtmlEntity { .. } => 2,
            DetectedIssue::MissingListKey { .. } | DetectedIssue::ImageWithoutAlt { .. } => 3,
            DetectedIssue::UnguardedBrowserApi { .. } => 4,
            DetectedIssue::MissingUseClient { .. }
            | DetectedIssue::LegacyRouterImport { .. }
            | DetectedIssue::LegacyLinkAnchor { .. } => 5,
            DetectedIssue::FocusedTest { .. } | DetectedIssue::NullishAssertion { .. } => 6,
            DetectedIssue::LearnedPatternMatch { .. } => 7,
        }
    }

    pub fn description(&self) -> String {
        match self {
            DetectedIssue::OutdatedCompileTarget { target, line } => {
                format!("line {}: outdated compile target {}", line, target)
            }
            DetectedIssue::DeprecatedConfigFlag { flag, line } => {
                format!("line {}: deprecated config flag {}", line, flag)
            }
            DetectedIssue::HtmlEntity { entity, line } => format!("line {}: HTML entity {}", line, entity),
            DetectedIssue::MissingListKey { line } => format!("line {}: list item rendered without key", line),
            DetectedIssue::ImageWithoutAlt { line } => format!("line {}: <img> without alt", line),
            DetectedIssue::UnguardedBrowserApi { api, line } => {
                format!("line {}: {} accessed without a browser guard", line, api)
            }
            DetectedIssue::MissingUseClient { trigger } => {
                format!("client-only {} used without 'use client'", trigger)
            }
            DetectedIssue::LegacyRouterImport { line } => format!("line {}: next/router import", line),
            DetectedIssue::LegacyLinkAnchor { line } => format!("line {}: <a> nested in <Link>", line),
            DetectedIssue::FocusedTest { line } => format!("line {}: focused test", line),
            DetectedIssue::NullishAssertion { line } => {
                format!("line {}: toBe(null/undefined) assertion", line)
            }
            DetectedIssue::LearnedPatternMatch { description, .. } => {
                format!("learned pattern applies: {}", description)
            }
        }
    }
}

/// Output of one transformer run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerFix {
    pub code: String,
    pub change_count: usize,
    pub improvements: Vec<String>,
    /// Learned rules consulted, settled by the executor after validation
    #[serde(default)]
    pub rule_usage: RuleUsage,
}

impl LayerFix {
    pub fn new(before: &str, after: String, improvements: Vec<String>) -> Self {
        Self {
            change_count: count_line_changes(before, &after),
            code: after,
            improvements,
            rule_usage: RuleUsage::default(),
        }
    }

    pub fn unchanged(code: &str) -> Self {
        Self {
            code: code.to_string(),
            change_count: 0,
            improvements: Vec::new(),
            rule_usage: RuleUsage::default(),
        }
    }

    pub fn with_rule_usage(mut self, usage: RuleUsage) -> Self {
        self.rule_usage = usage;
        self
    }
}

/// A single layer's rewrite rules
#[async_trait]
pub trait LayerTransformer: Send + Sync {
    fn layer_id(&self) -> LayerId;

    fn name(&self) -> &'static str;

    /// Rewrite `code`; must be idempotent on its own output
    async fn transform(&self, code: &str) -> Result<LayerFix>;

    /// Report what `transform` would fix
    async fn detect_issues(&self, code: &str) -> Vec<DetectedIssue>;
}

/// Byte offset of the `>` closing a JSX opening tag; `from` points just
/// past the tag name. Skips braces and quoted attribute values.
pub(crate) fn opening_tag_end(code: &str, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (offset, ch) in code[from..].char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') if depth == 0 => quote = Some(ch),
            (None, '{') => depth += 1,
            (None, '}') => depth = depth.saturating_sub(1),
            (None, '>') if depth == 0 => return Some(from + offset),
            (None, '<') if depth == 0 => return None,
            _ => {}
        }
    }
    None
}

/// Byte offset just past the `)` matching the `(` at `open`
pub(crate) fn matching_paren_end(code: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in code[open..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => quote = Some(ch),
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Apply non-overlapping `(start, end, replacement)` edits
pub(crate) fn apply_edits(code: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    edits.sort_by_key(|(start, end, _)| (*start, *end));
    let mut output = String::with_capacity(code.len() + edits.len() * 16);
    let mut cursor = 0;
    for (start, end, replacement) in edits {
        if start < cursor {
            continue;
        }
        output.push_str(&code[cursor..start]);
        output.push_str(&replacement);
        cursor = end;
    }
    output.push_str(&code[cursor..]);
    output
}

pub(crate) fn line_at(code: &str, offset: usize) -> usize {
    layerfix_utils::line_number_at(code, offset)
}
