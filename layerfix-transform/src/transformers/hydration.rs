//! Hydration layer: guard Web Storage calls against server rendering

use super::{apply_edits, line_at, matching_paren_end, DetectedIssue, LayerFix, LayerTransformer};
use crate::layers::LayerId;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

pub const WINDOW_GUARD: &str = "typeof window !== \"undefined\"";

lazy_static! {
    static ref STORAGE_CALL: Regex =
        Regex::new(r"(?:\bwindow\.)?\b(?P<api>localStorage|sessionStorage)\.[A-Za-z_$][\w$]*\s*\(").unwrap();
    static ref BROWSER_MEMBER: Regex = Regex::new(r"\b(?P<api>window|document)\.[A-Za-z_$]").unwrap();
}

/// Line containing `offset`, as a byte range
fn line_bounds(code: &str, offset: usize) -> (usize, usize) {
    let start = code[..offset].rfind('\n').map_or(0, |i| i + 1);
    let end = code[offset..].find('\n').map_or(code.len(), |i| offset + i);
    (start, end)
}

fn is_guarded_line(line: &str) -> bool {
    line.contains("typeof window")
}

fn preceded_by_member_access(code: &str, start: usize) -> bool {
    code[..start]
        .chars()
        .next_back()
        .is_some_and(|c| c == '.' || c == '_' || c == '$' || c.is_alphanumeric())
}

/// An unguarded Storage call: `(start, end, api)`
fn unguarded_storage_calls(code: &str) -> Vec<(usize, usize, String)> {
    STORAGE_CALL
        .captures_iter(code)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if preceded_by_member_access(code, whole.start()) {
                return None;
            }
            let (line_start, line_end) = line_bounds(code, whole.start());
            if is_guarded_line(&code[line_start..line_end]) {
                return None;
            }
            let end = matching_paren_end(code, whole.end() - 1)?;
            Some((whole.start(), end, caps.name("api")?.as_str().to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HydrationTransformer;

impl HydrationTransformer {
    pub fn new() -> Self {
        Self
    }

    /// The call is a whole expression statement on its own line
    fn is_statement(code: &str, start: usize, end: usize) -> bool {
        let (line_start, _) = line_bounds(code, start);
        let (_, line_end) = line_bounds(code, end.saturating_sub(1));
        code[line_start..start].trim().is_empty()
            && end <= line_end
            && matches!(code[end..line_end].trim(), "" | ";")
    }
}

#[async_trait]
impl LayerTransformer for HydrationTransformer {
    fn layer_id(&self) -> LayerId {
        4
    }

    fn name(&self) -> &'static str {
        "Hydration & SSR"
    }

    async fn transform(&self, code: &str) -> Result<LayerFix> {
        let calls = unguarded_storage_calls(code);
        if calls.is_empty() {
            return Ok(LayerFix::unchanged(code));
        }

        let edits = calls
            .iter()
            .map(|(start, end, _)| {
                let call = &code[*start..*end];
                let guarded = if Self::is_statement(code, *start, *end) {
                    format!("{} && {}", WINDOW_GUARD, call)
                } else {
                    format!("({} && {})", WINDOW_GUARD, call)
                };
                (*start, *end, guarded)
            })
            .collect();

        Ok(LayerFix::new(
            code,
            apply_edits(code, edits),
            vec![format!("Guarded {} Web Storage call(s) for server rendering", calls.len())],
        ))
    }

    async fn detect_issues(&self, code: &str) -> Vec<DetectedIssue> {
        let mut issues: Vec<DetectedIssue> = unguarded_storage_calls(code)
            .into_iter()
            .map(|(start, _, api)| DetectedIssue::UnguardedBrowserApi { api, line: line_at(code, start) })
            .collect();

        for caps in BROWSER_MEMBER.captures_iter(code) {
            let (Some(whole), Some(api)) = (caps.get(0), caps.name("api")) else { continue };
            if preceded_by_member_access(code, whole.start()) {
                continue;
            }
            let (line_start, line_end) = line_bounds(code, whole.start());
            let line = &code[line_start..line_end];
            // window.localStorage calls are already reported above
            if is_guarded_line(line) || STORAGE_CALL.is_match(&code[whole.start()..line_end]) {
                continue;
            }
            issues.push(DetectedIssue::UnguardedBrowserApi {
                api: api.as_str().to_string(),
                line: line_at(code, whole.start()),
            });
        }

        issues.sort_by_key(|issue| match issue {
            DetectedIssue::UnguardedBrowserApi { line, .. } => *line,
            _ => 0,
        });
        issues
    }
}
