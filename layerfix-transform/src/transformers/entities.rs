//! Entity cleanup layer: decode HTML entities that leaked into source

use super::{line_at, DetectedIssue, LayerFix, LayerTransformer};
use crate::layers::LayerId;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// A string literal whose quotes were themselves entity-encoded
    static ref WRAPPED_LITERAL: Regex = Regex::new(r#""&quot;([^"\n]*?)&quot;""#).unwrap();
    static ref ANY_ENTITY: Regex = Regex::new(r"&(?:quot|#x27|#39|apos|amp);").unwrap();
}

/// Improvement labels, indexed like the per-entity counters
const LABELS: [&str; 3] = ["&quot;", "&#39;", "&amp;"];

/// Upper bound on decoding passes; each pass that changes anything shortens
/// the code, so real input settles in two or three.
const MAX_PASSES: usize = 8;

/// Counter slot and decoded character of one entity
fn decoding(entity: &str) -> (usize, char) {
    match entity {
        "&quot;" => (0, '"'),
        "&amp;" => (2, '&'),
        _ => (1, '\''),
    }
}

/// Byte spans of single- and double-quoted literals, with their quote.
/// Literals end at their closing quote or at a newline.
fn literal_spans(code: &str) -> Vec<(usize, usize, char)> {
    let mut spans = Vec::new();
    let mut open: Option<(usize, char)> = None;
    let mut escaped = false;

    for (offset, ch) in code.char_indices() {
        match open {
            None if ch == '"' || ch == '\'' => open = Some((offset, ch)),
            None => {}
            Some(_) if escaped => escaped = false,
            Some(_) if ch == '\\' => escaped = true,
            Some((start, quote)) if ch == quote || ch == '\n' => {
                spans.push((start, offset, quote));
                open = None;
            }
            Some(_) => {}
        }
    }
    if let Some((start, quote)) = open {
        spans.push((start, code.len(), quote));
    }
    spans
}

/// Entities that can be decoded in place: `(start, end, slot, decoded)`.
/// An entity is kept when its character would close the enclosing literal.
fn decodable_entities(code: &str) -> Vec<(usize, usize, usize, char)> {
    let spans = literal_spans(code);
    ANY_ENTITY
        .find_iter(code)
        .filter_map(|m| {
            let (slot, decoded) = decoding(m.as_str());
            let enclosing = spans
                .iter()
                .find(|(start, end, _)| *start < m.start() && m.start() < *end)
                .map(|(_, _, quote)| *quote);
            (enclosing != Some(decoded)).then_some((m.start(), m.end(), slot, decoded))
        })
        .collect()
}

/// One unwrap-then-decode pass; every entity is decoded at most once
fn decode_pass(code: &str, wrapped: &mut usize, counts: &mut [usize; 3]) -> String {
    let found = WRAPPED_LITERAL.find_iter(code).count();
    let unwrapped = if found > 0 {
        *wrapped += found;
        WRAPPED_LITERAL.replace_all(code, "\"${1}\"").into_owned()
    } else {
        code.to_string()
    };

    let mut output = String::with_capacity(unwrapped.len());
    let mut cursor = 0;
    for (start, end, slot, decoded) in decodable_entities(&unwrapped) {
        output.push_str(&unwrapped[cursor..start]);
        output.push(decoded);
        cursor = end;
        counts[slot] += 1;
    }
    output.push_str(&unwrapped[cursor..]);
    output
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EntityCleanupTransformer;

impl EntityCleanupTransformer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LayerTransformer for EntityCleanupTransformer {
    fn layer_id(&self) -> LayerId {
        2
    }

    fn name(&self) -> &'static str {
        "Entity Cleanup"
    }

    /// Decodes until nothing changes, so `&amp;quot;` in text ends up as `"`
    /// and a second run is always a no-op.
    async fn transform(&self, code: &str) -> Result<LayerFix> {
        if !ANY_ENTITY.is_match(code) {
            return Ok(LayerFix::unchanged(code));
        }

        let mut current = code.to_string();
        let mut wrapped = 0;
        let mut counts = [0usize; 3];
        for _ in 0..MAX_PASSES {
            let next = decode_pass(&current, &mut wrapped, &mut counts);
            if next == current {
                break;
            }
            current = next;
        }

        let mut improvements = Vec::new();
        if wrapped > 0 {
            improvements.push(format!("Unwrapped {} entity-quoted string literal(s)", wrapped));
        }
        for (label, count) in LABELS.iter().zip(counts) {
            if count > 0 {
                improvements.push(format!("Decoded {} {} entit{}", count, label, if count == 1 { "y" } else { "ies" }));
            }
        }

        Ok(LayerFix::new(code, current, improvements))
    }

    async fn detect_issues(&self, code: &str) -> Vec<DetectedIssue> {
        let wrapped: Vec<(usize, usize)> = WRAPPED_LITERAL.find_iter(code).map(|m| (m.start(), m.end())).collect();
        let decodable: Vec<usize> = decodable_entities(code).into_iter().map(|(start, ..)| start).collect();

        ANY_ENTITY
            .find_iter(code)
            .filter(|m| {
                decodable.contains(&m.start())
                    || wrapped.iter().any(|(start, end)| *start <= m.start() && m.end() <= *end)
            })
            .map(|m| DetectedIssue::HtmlEntity {
                entity: m.as_str().to_string(),
                line: line_at(code, m.start()),
            })
            .collect()
    }
}
