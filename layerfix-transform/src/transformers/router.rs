//! Next.js App Router layer

use super::{line_at, DetectedIssue, LayerFix, LayerTransformer};
use crate::layers::LayerId;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DIRECTIVE: Regex = Regex::new(r#"^\s*(?:(?://[^\n]*|/\*[\s\S]*?\*/)\s*)*['"]use (?:client|server)['"]"#).unwrap();
    static ref CLIENT_HOOK: Regex = Regex::new(
        r"\b(?P<hook>use(?:State|Effect|LayoutEffect|Reducer|Ref|Context|Callback|Memo|Router|SearchParams|Pathname|Transition))\s*\("
    )
    .unwrap();
    static ref EVENT_HANDLER: Regex = Regex::new(r"\b(?P<handler>on[A-Z]\w*)=\{").unwrap();
    static ref LEGACY_ROUTER_IMPORT: Regex = Regex::new(r#"(from\s+['"])next/router(['"])"#).unwrap();
    /// Pages Router APIs with no `next/navigation` counterpart on the router object
    static ref PAGES_ONLY_API: Regex =
        Regex::new(r"\.(?:query|asPath|events|pathname|isReady|locale|route|basePath)\b").unwrap();
    static ref LINK_WITH_ANCHOR: Regex =
        Regex::new(r"<Link\b(?P<attrs>[^>]*)>\s*<a>(?P<body>[\s\S]*?)</a>\s*</Link>").unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RouterTransformer;

impl RouterTransformer {
    pub fn new() -> Self {
        Self
    }

    /// First hook call or event handler that makes the module client-only
    fn client_trigger(code: &str) -> Option<String> {
        if DIRECTIVE.is_match(code) {
            return None;
        }
        CLIENT_HOOK
            .captures(code)
            .and_then(|caps| caps.name("hook"))
            .or_else(|| EVENT_HANDLER.captures(code).and_then(|caps| caps.name("handler")))
            .map(|m| m.as_str().to_string())
    }

    fn can_migrate_router(code: &str) -> bool {
        LEGACY_ROUTER_IMPORT.is_match(code) && !PAGES_ONLY_API.is_match(code)
    }
}

#[async_trait]
impl LayerTransformer for RouterTransformer {
    fn layer_id(&self) -> LayerId {
        5
    }

    fn name(&self) -> &'static str {
        "Next.js App Router"
    }

    async fn transform(&self, code: &str) -> Result<LayerFix> {
        let mut current = code.to_string();
        let mut improvements = Vec::new();

        if Self::can_migrate_router(&current) {
            current = LEGACY_ROUTER_IMPORT
                .replace_all(&current, "${1}next/navigation${2}")
                .into_owned();
            improvements.push("Moved next/router import to next/navigation".to_string());
        }

        let anchors = LINK_WITH_ANCHOR.find_iter(&current).count();
        if anchors > 0 {
            current = LINK_WITH_ANCHOR
                .replace_all(&current, "<Link${attrs}>${body}</Link>")
                .into_owned();
            improvements.push(format!("Removed {} legacy <a> child(ren) from <Link>", anchors));
        }

        if let Some(trigger) = Self::client_trigger(&current) {
            current = format!("'use client';\n\n{}", current);
            improvements.push(format!("Added 'use client' directive (uses {})", trigger));
        }

        if improvements.is_empty() {
            return Ok(LayerFix::unchanged(code));
        }
        Ok(LayerFix::new(code, current, improvements))
    }

    async fn detect_issues(&self, code: &str) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();

        if let Some(trigger) = Self::client_trigger(code) {
            issues.push(DetectedIssue::MissingUseClient { trigger });
        }
        if Self::can_migrate_router(code) {
            issues.extend(
                LEGACY_ROUTER_IMPORT
                    .find_iter(code)
                    .map(|m| DetectedIssue::LegacyRouterImport { line: line_at(code, m.start()) }),
            );
        }
        issues.extend(
            LINK_WITH_ANCHOR
                .find_iter(code)
                .map(|m| DetectedIssue::LegacyLinkAnchor { line: line_at(code, m.start()) }),
        );

        issues
    }
}
