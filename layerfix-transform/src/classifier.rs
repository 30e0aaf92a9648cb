//! Error Classifier
//!
//! Maps free-form failure messages to a bounded taxonomy with severity,
//! retry and automation hints.

use crate::layers::LayerId;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Syntax,
    AstParsing,
    TypeError,
    ReferenceError,
    Jsx,
    Import,
    Timeout,
    Memory,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::AstParsing => "ast_parsing",
            ErrorCategory::TypeError => "type_error",
            ErrorCategory::ReferenceError => "reference_error",
            ErrorCategory::Jsx => "jsx",
            ErrorCategory::Import => "import",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Memory => "memory",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
    pub recovery_options: Vec<String>,
    pub retryable: bool,
    /// Whether an automated recovery strategy exists
    pub automated: bool,
    pub layer_id: LayerId,
}

struct ClassificationRule {
    category: ErrorCategory,
    matcher: Regex,
    severity: Severity,
    automated: bool,
    retryable: bool,
    suggestion: &'static str,
    recovery_options: &'static [&'static str],
}

impl ClassificationRule {
    fn new(
        category: ErrorCategory,
        pattern: &str,
        severity: Severity,
        automated: bool,
        retryable: bool,
        suggestion: &'static str,
        recovery_options: &'static [&'static str],
    ) -> Self {
        Self {
            category,
            matcher: Regex::new(pattern).unwrap(),
            severity,
            automated,
            retryable,
            suggestion,
            recovery_options,
        }
    }
}

lazy_static! {
    /// Ordered; the first matching rule wins
    static ref RULES: Vec<ClassificationRule> = vec![
        ClassificationRule::new(
            ErrorCategory::Syntax,
            r"(?i)syntaxerror|syntax error|unexpected token|unterminated",
            Severity::High,
            true,
            true,
            "Check the layer output for unbalanced brackets or quotes",
            &["retry layer", "skip layer", "revert to previous step"],
        ),
        ClassificationRule::new(
            ErrorCategory::AstParsing,
            r"(?i)\bast\b|parse error|failed to parse|parsing failed",
            Severity::Medium,
            true,
            true,
            "Retry with the regex fallback or skip the layer",
            &["retry layer", "skip layer"],
        ),
        ClassificationRule::new(
            ErrorCategory::TypeError,
            r"(?i)typeerror|is not a function|cannot read propert",
            Severity::High,
            false,
            false,
            "Inspect the value types flowing into the failing code",
            &["manual review"],
        ),
        ClassificationRule::new(
            ErrorCategory::ReferenceError,
            r"(?i)referenceerror|is not defined",
            Severity::High,
            false,
            false,
            "Declare or import the missing identifier",
            &["manual review", "add missing import"],
        ),
        ClassificationRule::new(
            ErrorCategory::Jsx,
            r"(?i)\bjsx\b|adjacent jsx|closing tag",
            Severity::Medium,
            true,
            false,
            "Check JSX element nesting and closing tags",
            &["skip layer", "revert to previous step"],
        ),
        ClassificationRule::new(
            ErrorCategory::Import,
            r"(?i)cannot find module|module not found|failed to resolve import|\bimport\b",
            Severity::High,
            false,
            false,
            "Verify module paths and installed dependencies",
            &["manual review"],
        ),
        ClassificationRule::new(
            ErrorCategory::Timeout,
            r"(?i)timed? ?out|deadline",
            Severity::Low,
            true,
            true,
            "Retry the layer or raise the layer timeout",
            &["retry layer", "increase timeout"],
        ),
        ClassificationRule::new(
            ErrorCategory::Memory,
            r"(?i)out of memory|heap|allocation failed|memory",
            Severity::Critical,
            true,
            false,
            "Split the input into smaller files",
            &["skip layer", "reduce input size"],
        ),
    ];
}

/// Stateless classifier over the ordered rule table
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a failure. Never fails; unmatched messages are `Unknown`.
    pub fn classify(&self, message: &str, stack: Option<&str>, layer_id: LayerId) -> ErrorRecord {
        let haystack = match stack {
            Some(stack) => format!("{}\n{}", message, stack),
            None => message.to_string(),
        };

        match RULES.iter().find(|rule| rule.matcher.is_match(&haystack)) {
            Some(rule) => ErrorRecord {
                category: rule.category,
                severity: rule.severity,
                message: message.to_string(),
                suggestion: rule.suggestion.to_string(),
                recovery_options: rule.recovery_options.iter().map(|s| s.to_string()).collect(),
                retryable: rule.retryable,
                automated: rule.automated,
                layer_id,
            },
            None => ErrorRecord {
                category: ErrorCategory::Unknown,
                severity: Severity::Medium,
                message: message.to_string(),
                suggestion: "Review the layer output manually".to_string(),
                recovery_options: vec!["manual review".to_string()],
                retryable: false,
                automated: false,
                layer_id,
            },
        }
    }
}
