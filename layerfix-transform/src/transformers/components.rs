//! Components layer: list keys and image alt text

use super::{apply_edits, line_at, opening_tag_end, DetectedIssue, LayerFix, LayerTransformer};
use crate::layers::LayerId;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `.map(item => <Tag` / `.map((item, i) => (<Tag` with an expression body
    static ref MAP_CALLBACK: Regex = Regex::new(
        r"\.map\(\s*(?P<params>\(\s*(?P<item>[A-Za-z_$][\w$]*)\s*(?:,\s*(?P<index>[A-Za-z_$][\w$]*)\s*)?\)|(?P<bare>[A-Za-z_$][\w$]*))\s*=>\s*\(?\s*<(?P<tag>[A-Za-z][\w.]*)"
    )
    .unwrap();
    static ref KEY_ATTR: Regex = Regex::new(r"(?:^|\s)key\s*=").unwrap();
    static ref IMG_TAG: Regex = Regex::new(r"<img\b").unwrap();
    static ref ALT_ATTR: Regex = Regex::new(r"(?:^|\s)alt\s*=").unwrap();
}

/// A `.map()` callback whose JSX root lacks a key
struct UnkeyedMap {
    params_start: usize,
    params_end: usize,
    item: String,
    index: Option<String>,
    tag_end: usize,
}

fn unkeyed_maps(code: &str) -> Vec<UnkeyedMap> {
    MAP_CALLBACK
        .captures_iter(code)
        .filter_map(|caps| {
            let params = caps.name("params")?;
            let tag = caps.name("tag")?;
            let tag_close = opening_tag_end(code, tag.end())?;
            if KEY_ATTR.is_match(&code[tag.end()..tag_close]) {
                return None;
            }

            let item = caps.name("item").or_else(|| caps.name("bare"))?.as_str().to_string();
            Some(UnkeyedMap {
                params_start: params.start(),
                params_end: params.end(),
                item,
                index: caps.name("index").map(|m| m.as_str().to_string()),
                tag_end: tag.end(),
            })
        })
        .collect()
}

/// Insertion points right after `<img` for tags without alt
fn images_without_alt(code: &str) -> Vec<usize> {
    IMG_TAG
        .find_iter(code)
        .filter_map(|m| {
            let close = opening_tag_end(code, m.end())?;
            (!ALT_ATTR.is_match(&code[m.end()..close])).then_some(m.end())
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentTransformer;

impl ComponentTransformer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LayerTransformer for ComponentTransformer {
    fn layer_id(&self) -> LayerId {
        3
    }

    fn name(&self) -> &'static str {
        "Components"
    }

    async fn transform(&self, code: &str) -> Result<LayerFix> {
        let maps = unkeyed_maps(code);
        let images = images_without_alt(code);
        if maps.is_empty() && images.is_empty() {
            return Ok(LayerFix::unchanged(code));
        }

        let mut edits = Vec::new();
        let mut improvements = Vec::new();

        for map in &maps {
            let index = match &map.index {
                Some(index) => index.clone(),
                None => {
                    let name = if map.item == "index" { "idx" } else { "index" };
                    edits.push((map.params_start, map.params_end, format!("({}, {})", map.item, name)));
                    name.to_string()
                }
            };
            edits.push((map.tag_end, map.tag_end, format!(" key={{{}.id || {}}}", map.item, index)));
        }
        if !maps.is_empty() {
            improvements.push(format!("Added key prop to {} list render(s)", maps.len()));
        }

        for position in &images {
            edits.push((*position, *position, " alt=\"\"".to_string()));
        }
        if !images.is_empty() {
            improvements.push(format!("Added alt text to {} image(s)", images.len()));
        }

        Ok(LayerFix::new(code, apply_edits(code, edits), improvements))
    }

    async fn detect_issues(&self, code: &str) -> Vec<DetectedIssue> {
        let mut issues: Vec<DetectedIssue> = unkeyed_maps(code)
            .into_iter()
            .map(|map| DetectedIssue::MissingListKey { line: line_at(code, map.tag_end) })
            .collect();
        issues.extend(
            images_without_alt(code)
                .into_iter()
                .map(|position| DetectedIssue::ImageWithoutAlt { line: line_at(code, position) }),
        );
        issues
    }
}
