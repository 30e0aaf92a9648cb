//! Learned rewrite rules and edit-span extraction

use crate::layers::LayerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence assigned to a rule on first observation
pub const INITIAL_CONFIDENCE: f64 = 0.8;
/// Upper bound of the high-volume confidence bonus
pub const MAX_BONUS_CONFIDENCE: f64 = 0.95;

/// A confidence-scored regex rewrite rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: String,
    /// Regex source
    #[serde(rename = "pattern")]
    pub matcher: String,
    /// Replacement in `regex` expansion syntax
    pub replacement: String,
    pub confidence: f64,
    pub success_count: u32,
    pub failure_count: u32,
    #[serde(rename = "last_used")]
    pub last_used_at: DateTime<Utc>,
    pub category: String,
    #[serde(default)]
    pub source_layer: LayerId,
    pub description: String,
}

impl LearnedPattern {
    pub fn new(matcher: String, replacement: String, category: &str, source_layer: LayerId, description: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            matcher,
            replacement,
            confidence: INITIAL_CONFIDENCE,
            success_count: 1,
            failure_count: 0,
            last_used_at: Utc::now(),
            category: category.to_string(),
            source_layer,
            description,
        }
    }

    /// Dedupe key
    pub fn key(&self) -> (String, String) {
        (self.category.clone(), self.matcher.clone())
    }

    /// `s / (s + f)`, with a capped bonus for rules that keep succeeding
    pub fn recompute_confidence(&mut self) {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            self.confidence = 0.0;
            return;
        }
        let mut confidence = f64::from(self.success_count) / f64::from(total);
        if self.success_count > 10 && confidence > 0.8 {
            confidence = (confidence + 0.05).min(MAX_BONUS_CONFIDENCE);
        }
        self.confidence = confidence;
    }

    pub fn record_success(&mut self) {
        self.success_count = self.success_count.saturating_add(1);
        self.last_used_at = Utc::now();
        self.recompute_confidence();
    }

    pub fn record_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.recompute_confidence();
    }

    /// Application order: higher first
    pub fn priority(&self) -> f64 {
        self.confidence * f64::from(self.success_count.max(1))
    }

    /// Eviction score: lowest are dropped first
    pub fn retention_score(&self) -> f64 {
        self.confidence * f64::from(self.success_count + self.failure_count)
    }
}

/// Byte range of the minimal edit between two strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditSpan {
    pub start: usize,
    pub before_end: usize,
    pub after_end: usize,
}

impl EditSpan {
    /// Trim the longest common prefix and suffix; `None` when equal
    pub fn between(before: &str, after: &str) -> Option<Self> {
        if before == after {
            return None;
        }

        let start = before
            .char_indices()
            .zip(after.chars())
            .find(|((_, b), a)| b != a)
            .map_or_else(|| before.len().min(after.len()), |((i, _), _)| i);

        let mut before_end = before.len();
        let mut after_end = after.len();
        let mut rev_before = before[start..].chars().rev();
        let mut rev_after = after[start..].chars().rev();
        while let (Some(b), Some(a)) = (rev_before.next(), rev_after.next()) {
            if b != a {
                break;
            }
            before_end -= b.len_utf8();
            after_end -= a.len_utf8();
        }

        Some(Self { start, before_end, after_end })
    }

    /// Grow a pure insertion to the full line it lands on
    fn widened_to_line(self, before: &str, after: &str) -> Self {
        let start = before[..self.start].rfind('\n').map_or(0, |i| i + 1);
        let before_end = before[self.before_end..]
            .find('\n')
            .map_or(before.len(), |i| self.before_end + i);
        let after_end = after[self.after_end..]
            .find('\n')
            .map_or(after.len(), |i| self.after_end + i);
        Self { start, before_end, after_end }
    }
}

/// A rewrite rule derived from one observed edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedRule {
    pub matcher: String,
    pub replacement: String,
    pub removed: String,
    pub inserted: String,
}

/// Derive a regex rule from a before/after pair.
///
/// Returns `None` when nothing changed or the removed text cannot anchor a
/// rule (blank).
pub fn derive_rule(before: &str, after: &str) -> Option<DerivedRule> {
    let mut span = EditSpan::between(before, after)?;
    if span.start == span.before_end {
        span = span.widened_to_line(before, after);
    }

    let removed = &before[span.start..span.before_end];
    let inserted = &after[span.start..span.after_end];
    if removed.trim().is_empty() {
        return None;
    }

    if let Some((prefix, suffix)) = wrapper_around(removed, inserted) {
        return Some(DerivedRule {
            matcher: format!("{}(.*?){}", regex::escape(prefix), regex::escape(suffix)),
            replacement: "${1}".to_string(),
            removed: removed.to_string(),
            inserted: inserted.to_string(),
        });
    }

    Some(DerivedRule {
        matcher: regex::escape(removed),
        replacement: inserted.replace('$', "$$"),
        removed: removed.to_string(),
        inserted: inserted.to_string(),
    })
}

/// When `inserted` sits inside `removed` with context on both sides, the
/// surrounding text is a wrapper that was stripped. Picks the most centred
/// occurrence.
fn wrapper_around<'a>(removed: &'a str, inserted: &str) -> Option<(&'a str, &'a str)> {
    if inserted.is_empty() || inserted.contains('\n') {
        return None;
    }

    removed
        .match_indices(inserted)
        .map(|(idx, _)| (&removed[..idx], &removed[idx + inserted.len()..]))
        .filter(|(prefix, suffix)| !prefix.is_empty() && !suffix.is_empty())
        .min_by_key(|(prefix, suffix)| prefix.len().abs_diff(suffix.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_confidence_formula() {
        let mut pattern = LearnedPattern::new("a".into(), "b".into(), "entities", 2, String::new());
        assert!((pattern.confidence - INITIAL_CONFIDENCE).abs() < f64::EPSILON);

        pattern.record_failure();
        assert!((pattern.confidence - 0.5).abs() < 1e-9);

        for _ in 0..20 {
            pattern.record_success();
        }
        // 21 / 22 plus the bonus, capped
        assert!((pattern.confidence - MAX_BONUS_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_bonus_requires_volume() {
        let mut pattern = LearnedPattern::new("a".into(), "b".into(), "entities", 2, String::new());
        pattern.success_count = 9;
        pattern.failure_count = 1;
        pattern.recompute_confidence();
        assert!((pattern.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_edit_span() {
        let span = EditSpan::between("const a = 1;", "const a = 22;").unwrap();
        assert_eq!(span, EditSpan { start: 10, before_end: 11, after_end: 12 });
        assert!(EditSpan::between("same", "same").is_none());
    }

    #[test]
    fn test_entity_wrapper_generalizes() {
        let rule = derive_rule(r#"const a = "&quot;x&quot;";"#, r#"const a = "x";"#).unwrap();
        assert_eq!(rule.removed, "&quot;x&quot;");
        assert_eq!(rule.inserted, "x");
        assert_eq!(rule.replacement, "${1}");

        let regex = regex::Regex::new(&rule.matcher).unwrap();
        assert_eq!(regex.replace_all(r#""&quot;y&quot;""#, rule.replacement.as_str()), r#""y""#);
    }

    #[test]
    fn test_wrapper_picks_centred_occurrence() {
        let rule = derive_rule("&quot;t&quot;", "t").unwrap();
        assert_eq!(rule.matcher, format!("{}(.*?){}", regex::escape("&quot;"), regex::escape("&quot;")));
    }

    #[test]
    fn test_deletion_and_literal_rules() {
        let rule = derive_rule("describe.only('x', f)", "describe('x', f)").unwrap();
        assert_eq!(rule.removed, ".only");
        assert_eq!(rule.replacement, "");

        let rule = derive_rule("let price = cost;", "let price = $total;").unwrap();
        assert_eq!(rule.matcher, "cost");
        assert_eq!(rule.replacement, "$$total");
    }

    #[test]
    fn test_pure_insertion_widens_to_line() {
        let rule = derive_rule("a\n<img src={s} />\nb", "a\n<img src={s} alt=\"\" />\nb").unwrap();
        assert_eq!(rule.removed, "<img src={s} />");
        assert_eq!(rule.inserted, "<img src={s} alt=\"\" />");
    }

    #[test]
    fn test_blank_removal_is_not_learned() {
        assert!(derive_rule("a\n\nb", "a\nx\nb").is_none());
        assert!(derive_rule("", "x").is_none());
    }

    proptest! {
        #[test]
        fn prop_literal_rule_reproduces_after(
            prefix in "[a-z ]{0,8}",
            removed in "[A-Z]{1,6}",
            inserted in "[0-9]{0,6}",
            suffix in "[a-z ]{0,8}",
        ) {
            let before = format!("{}{}{}", prefix, removed, suffix);
            let after = format!("{}{}{}", prefix, inserted, suffix);
            let rule = derive_rule(&before, &after).unwrap();
            let regex = regex::Regex::new(&rule.matcher).unwrap();
            prop_assert_eq!(regex.replace(&before, rule.replacement.as_str()).into_owned(), after);
        }
    }
}
