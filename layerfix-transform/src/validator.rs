//! Safety Validator
//!
//! Judges a layer's before/after pair in tiers, stopping at the first tier
//! that rejects the change:
//! 1. no-op
//! 2. syntax (permissive parse of both versions)
//! 3. corruption signatures
//! 4. structural integrity anchors
//! 5. AST semantic checks for component and hydration layers

use crate::layers::{LayerId, LayerRegistry, LayerTag};
use crate::parser::{AccessMetrics, KeyMetrics, ParsedSource};
use crate::types::FailureKind;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

lazy_static! {
    /// Patterns that only ever appear in output mangled by a bad rewrite
    static ref CORRUPTION_SIGNATURES: Vec<(&'static str, Regex)> = vec![
        (
            "doubled arrow function in event handler",
            Regex::new(r"on[A-Z]\w*=\{\s*\(\)\s*=>\s*\(\)\s*=>").unwrap(),
        ),
        (
            "malformed import block",
            Regex::new(r"import\s*\{[^}]*\bimport\b").unwrap(),
        ),
        (
            "JSX attribute with stray parenthesis",
            Regex::new(r"\w+=\{\s*\)").unwrap(),
        ),
        (
            "attribute value wrapped in doubled quotes",
            Regex::new(r#"\w=""[A-Za-z_][\w-]*"""#).unwrap(),
        ),
    ];

    /// Declarations whose disappearance signals a destructive rewrite
    static ref STRUCTURAL_ANCHORS: Vec<(&'static str, Regex)> = vec![
        ("export default", Regex::new(r"\bexport\s+default\b").unwrap()),
        ("export {", Regex::new(r"\bexport\s*\{").unwrap()),
        ("import", Regex::new(r"(?m)^\s*import\s").unwrap()),
        ("function declaration", Regex::new(r"\bfunction\s+\w+").unwrap()),
        ("const declaration", Regex::new(r"\bconst\s+\w+\s*=").unwrap()),
    ];
}

/// Before/after AST metrics gathered for component and hydration layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticReport {
    pub tag: LayerTag,
    pub keys_before: KeyMetrics,
    pub keys_after: KeyMetrics,
    pub access_before: AccessMetrics,
    pub access_after: AccessMetrics,
}

/// Outcome of [`SafetyValidator::check`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub should_revert: bool,
    /// Always set; human readable
    pub reason: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub failure: Option<FailureKind>,
    pub semantic: Option<SemanticReport>,
}

impl ValidationVerdict {
    fn accept(reason: &str) -> Self {
        Self {
            valid: true,
            should_revert: false,
            reason: Some(reason.to_string()),
            errors: Vec::new(),
            warnings: Vec::new(),
            failure: None,
            semantic: None,
        }
    }

    fn revert(failure: FailureKind, reason: &str, errors: Vec<String>) -> Self {
        Self {
            valid: false,
            should_revert: true,
            reason: Some(reason.to_string()),
            errors,
            warnings: Vec::new(),
            failure: Some(failure),
            semantic: None,
        }
    }

    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

/// Stateless judge of layer output
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    registry: LayerRegistry,
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyValidator {
    pub fn new() -> Self {
        Self::with_registry(LayerRegistry::canonical().clone())
    }

    pub fn with_registry(registry: LayerRegistry) -> Self {
        Self { registry }
    }

    pub fn check(&self, before: &str, after: &str, layer_id: LayerId) -> ValidationVerdict {
        if before == after {
            let mut verdict = ValidationVerdict::accept("no changes");
            verdict.warnings.push("no changes".to_string());
            return verdict;
        }

        let parsed_after = match ParsedSource::parse(after) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Layer {} output failed to parse: {}", layer_id, e);
                return ValidationVerdict::revert(FailureKind::SyntaxError, "syntax error", vec![e.to_string()]);
            }
        };

        if let Some(signature) = introduced_corruption(before, after) {
            return ValidationVerdict::revert(
                FailureKind::CorruptionDetected,
                &format!("corruption detected: {}", signature),
                vec![signature.to_string()],
            );
        }

        if let Err(message) = check_structure(before, after) {
            return ValidationVerdict::revert(
                FailureKind::StructuralIntegrityViolation,
                &message,
                vec![message.clone()],
            );
        }

        let tag = self.registry.get(layer_id).map(|spec| spec.tag);
        let mut verdict = ValidationVerdict::accept("validation passed");

        if matches!(tag, Some(LayerTag::Component | LayerTag::Hydration)) {
            // An unparsable input has no baseline to compare against
            let Ok(parsed_before) = ParsedSource::parse(before) else {
                verdict
                    .warnings
                    .push("input did not parse; semantic checks skipped".to_string());
                return verdict;
            };

            let report = SemanticReport {
                tag: tag.unwrap_or(LayerTag::Component),
                keys_before: parsed_before.list_key_metrics(),
                keys_after: parsed_after.list_key_metrics(),
                access_before: parsed_before.browser_access_metrics(),
                access_after: parsed_after.browser_access_metrics(),
            };

            if let Err(message) = check_semantics(&report) {
                let mut reverted = ValidationVerdict::revert(
                    FailureKind::StructuralIntegrityViolation,
                    &message,
                    vec![message.clone()],
                );
                reverted.semantic = Some(report);
                return reverted;
            }
            verdict.semantic = Some(report);
        }

        verdict
    }
}

/// First corruption signature present in `after` but absent from `before`
fn introduced_corruption(before: &str, after: &str) -> Option<&'static str> {
    CORRUPTION_SIGNATURES
        .iter()
        .find(|(_, regex)| regex.is_match(after) && !regex.is_match(before))
        .map(|(name, _)| *name)
}

fn check_structure(before: &str, after: &str) -> std::result::Result<(), String> {
    if after.trim().is_empty() && !before.trim().is_empty() {
        return Err("output is empty".to_string());
    }

    for (name, regex) in STRUCTURAL_ANCHORS.iter() {
        let count_before = regex.find_iter(before).count();
        let count_after = regex.find_iter(after).count();
        if count_after * 2 < count_before {
            return Err(format!(
                "critical pattern significantly reduced: {} ({} -> {})",
                name, count_before, count_after
            ));
        }
    }

    Ok(())
}

fn check_semantics(report: &SemanticReport) -> std::result::Result<(), String> {
    match report.tag {
        LayerTag::Component => {
            if report.keys_before.unkeyed > 0 && report.keys_after.keyed <= report.keys_before.keyed {
                return Err(format!(
                    "missing list keys were not added ({} un-keyed, keyed {} -> {})",
                    report.keys_before.unkeyed, report.keys_before.keyed, report.keys_after.keyed
                ));
            }
        }
        LayerTag::Hydration => {
            let before = report.access_before;
            let after = report.access_after;
            if before.unguarded > 0 && (after.guarded < before.guarded || after.unguarded > before.unguarded) {
                return Err(format!(
                    "browser API guards regressed (guarded {} -> {}, unguarded {} -> {})",
                    before.guarded, after.guarded, before.unguarded, after.unguarded
                ));
            }
        }
        _ => {}
    }
    Ok(())
}
