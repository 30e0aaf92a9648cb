//! Testing layer: focused tests and loose nullish assertions

use super::{line_at, DetectedIssue, LayerFix, LayerTransformer};
use crate::layers::LayerId;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FOCUSED: Regex = Regex::new(r"\b(describe|it|test)\.only\s*\(").unwrap();
    static ref TO_BE_UNDEFINED: Regex = Regex::new(r"\.toBe\(\s*undefined\s*\)").unwrap();
    static ref TO_BE_NULL: Regex = Regex::new(r"\.toBe\(\s*null\s*\)").unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TestingTransformer;

impl TestingTransformer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LayerTransformer for TestingTransformer {
    fn layer_id(&self) -> LayerId {
        6
    }

    fn name(&self) -> &'static str {
        "Testing & Validation"
    }

    async fn transform(&self, code: &str) -> Result<LayerFix> {
        let mut current = code.to_string();
        let mut improvements = Vec::new();

        let focused = FOCUSED.find_iter(&current).count();
        if focused > 0 {
            current = FOCUSED.replace_all(&current, "${1}(").into_owned();
            improvements.push(format!("Removed .only from {} test block(s)", focused));
        }

        let rewrites: [(&Regex, &str); 2] = [
            (&*TO_BE_UNDEFINED, ".toBeUndefined()"),
            (&*TO_BE_NULL, ".toBeNull()"),
        ];
        for (regex, replacement) in rewrites {
            let count = regex.find_iter(&current).count();
            if count > 0 {
                current = regex.replace_all(&current, replacement).into_owned();
                improvements.push(format!("Rewrote {} assertion(s) to {}", count, replacement));
            }
        }

        if improvements.is_empty() {
            return Ok(LayerFix::unchanged(code));
        }
        Ok(LayerFix::new(code, current, improvements))
    }

    async fn detect_issues(&self, code: &str) -> Vec<DetectedIssue> {
        let mut issues: Vec<DetectedIssue> = FOCUSED
            .find_iter(code)
            .map(|m| DetectedIssue::FocusedTest { line: line_at(code, m.start()) })
            .collect();
        let mut nullish: Vec<usize> = TO_BE_UNDEFINED
            .find_iter(code)
            .chain(TO_BE_NULL.find_iter(code))
            .map(|m| line_at(code, m.start()))
            .collect();
        nullish.sort_unstable();
        issues.extend(nullish.into_iter().map(|line| DetectedIssue::NullishAssertion { line }));
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: &str = "describe.only('math', () => {\n  it('adds', () => {\n    expect(find()).toBe(undefined);\n    expect(other()).toBe( null );\n  });\n  test.only('x', () => {});\n});\n";

    #[tokio::test]
    async fn test_unfocuses_and_tightens_assertions() {
        let fix = TestingTransformer::new().transform(SUITE).await.unwrap();
        assert_eq!(
            fix.code,
            "describe('math', () => {\n  it('adds', () => {\n    expect(find()).toBeUndefined();\n    expect(other()).toBeNull();\n  });\n  test('x', () => {});\n});\n"
        );
        assert_eq!(fix.change_count, 4);
        assert_eq!(fix.improvements.len(), 3);

        let again = TestingTransformer::new().transform(&fix.code).await.unwrap();
        assert_eq!(again.change_count, 0);
    }

    #[tokio::test]
    async fn test_detects_issues() {
        let issues = TestingTransformer::new().detect_issues(SUITE).await;
        assert_eq!(
            issues,
            vec![
                DetectedIssue::FocusedTest { line: 1 },
                DetectedIssue::FocusedTest { line: 6 },
                DetectedIssue::NullishAssertion { line: 3 },
                DetectedIssue::NullishAssertion { line: 4 },
            ]
        );
    }
}
