//! Configuration layer: tsconfig compile target and Next.js config flags

use super::{line_at, DetectedIssue, LayerFix, LayerTransformer};
use crate::layers::LayerId;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref OUTDATED_TARGET: Regex =
        Regex::new(r#"(["']?target["']?\s*:\s*["'])((?i:es3|es5))(["'])"#).unwrap();

    /// `appDir: true` on a line of its own, then inline forms
    static ref APP_DIR_LINE: Regex =
        Regex::new(r#"(?m)^[ \t]*["']?appDir["']?\s*:\s*true\s*,?[ \t]*\r?\n"#).unwrap();
    static ref APP_DIR_LEADING: Regex =
        Regex::new(r#"["']?appDir["']?\s*:\s*true\s*,\s*"#).unwrap();
    static ref APP_DIR_TRAILING: Regex =
        Regex::new(r#",\s*["']?appDir["']?\s*:\s*true\b"#).unwrap();
    static ref APP_DIR_ONLY: Regex =
        Regex::new(r#"\s*["']?appDir["']?\s*:\s*true\b\s*"#).unwrap();
}

pub const TARGET_REPLACEMENT: &str = "es2020";

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigTransformer;

impl ConfigTransformer {
    pub fn new() -> Self {
        Self
    }

    fn remove_app_dir(code: &str) -> Option<String> {
        for regex in [&*APP_DIR_LINE, &*APP_DIR_LEADING, &*APP_DIR_TRAILING, &*APP_DIR_ONLY] {
            if regex.is_match(code) {
                return Some(regex.replace_all(code, "").into_owned());
            }
        }
        None
    }
}

#[async_trait]
impl LayerTransformer for ConfigTransformer {
    fn layer_id(&self) -> LayerId {
        1
    }

    fn name(&self) -> &'static str {
        "Configuration"
    }

    async fn transform(&self, code: &str) -> Result<LayerFix> {
        let mut current = code.to_string();
        let mut improvements = Vec::new();

        let targets = OUTDATED_TARGET.find_iter(&current).count();
        if targets > 0 {
            current = OUTDATED_TARGET
                .replace_all(&current, format!("${{1}}{}${{3}}", TARGET_REPLACEMENT).as_str())
                .into_owned();
            improvements.push(format!("Raised compile target to {}", TARGET_REPLACEMENT));
        }

        if let Some(updated) = Self::remove_app_dir(&current) {
            current = updated;
            improvements.push("Removed deprecated experimental appDir flag".to_string());
        }

        if improvements.is_empty() {
            return Ok(LayerFix::unchanged(code));
        }
        Ok(LayerFix::new(code, current, improvements))
    }

    async fn detect_issues(&self, code: &str) -> Vec<DetectedIssue> {
        let mut issues: Vec<DetectedIssue> = OUTDATED_TARGET
            .captures_iter(code)
            .filter_map(|caps| {
                let target = caps.get(2)?;
                Some(DetectedIssue::OutdatedCompileTarget {
                    target: target.as_str().to_string(),
                    line: line_at(code, target.start()),
                })
            })
            .collect();

        if let Some(found) = APP_DIR_ONLY.find(code) {
            issues.push(DetectedIssue::DeprecatedConfigFlag {
                flag: "experimental.appDir".to_string(),
                line: line_at(code, found.start() + found.as_str().len() - found.as_str().trim_start().len()),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_raises_tsconfig_target() {
        let code = "{\n  \"compilerOptions\": {\n    \"target\": \"es5\",\n    \"strict\": true\n  }\n}";
        let fix = ConfigTransformer::new().transform(code).await.unwrap();
        assert!(fix.code.contains("\"target\": \"es2020\""));
        assert_eq!(fix.change_count, 1);

        let again = ConfigTransformer::new().transform(&fix.code).await.unwrap();
        assert_eq!(again.change_count, 0);
        assert_eq!(again.code, fix.code);
    }

    #[tokio::test]
    async fn test_removes_app_dir_flag() {
        let code = "module.exports = {\n  experimental: {\n    appDir: true,\n  },\n};\n";
        let fix = ConfigTransformer::new().transform(code).await.unwrap();
        assert_eq!(fix.code, "module.exports = {\n  experimental: {\n  },\n};\n");

        let inline = "const c = { experimental: { appDir: true, serverActions: true } };";
        let fix = ConfigTransformer::new().transform(inline).await.unwrap();
        assert_eq!(fix.code, "const c = { experimental: { serverActions: true } };");
    }

    #[tokio::test]
    async fn test_detects_issues() {
        let code = "{\n  \"target\": \"ES3\",\n  \"appDir\": true\n}";
        let issues = ConfigTransformer::new().detect_issues(code).await;
        assert_eq!(
            issues,
            vec![
                DetectedIssue::OutdatedCompileTarget { target: "ES3".to_string(), line: 2 },
                DetectedIssue::DeprecatedConfigFlag { flag: "experimental.appDir".to_string(), line: 3 },
            ]
        );
    }
}
