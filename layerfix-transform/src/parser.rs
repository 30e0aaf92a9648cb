//! Permissive source parsing
//!
//! Every code version is parsed once into a [`ParsedSource`]; syntax checks
//! and semantic metrics all read from that single tree.

use crate::{Result, TransformError};
use serde::{Deserialize, Serialize};
use tree_sitter::{Language, Node, Parser, Tree};

/// Browser globals that are undefined during server rendering
pub const BROWSER_GLOBALS: [&str; 4] = ["localStorage", "sessionStorage", "window", "document"];

/// Grammar that accepted the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceGrammar {
    Tsx,
    TypeScript,
    JavaScript,
    /// Configuration documents such as `tsconfig.json`
    Json,
}

impl SourceGrammar {
    /// Code grammars in the order they are attempted
    const CODE_GRAMMARS: [SourceGrammar; 3] =
        [SourceGrammar::Tsx, SourceGrammar::TypeScript, SourceGrammar::JavaScript];

    fn language(self) -> Option<Language> {
        match self {
            SourceGrammar::Tsx => Some(tree_sitter_typescript::language_tsx()),
            SourceGrammar::TypeScript => Some(tree_sitter_typescript::language_typescript()),
            SourceGrammar::JavaScript => Some(tree_sitter_javascript::language()),
            SourceGrammar::Json => None,
        }
    }
}

/// List-rendering metrics: JSX roots returned from `.map()` callbacks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetrics {
    pub keyed: usize,
    pub unkeyed: usize,
}

/// Member accesses on browser-only globals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMetrics {
    pub guarded: usize,
    pub unguarded: usize,
}

/// A source string together with its syntax tree
pub struct ParsedSource {
    source: String,
    grammar: SourceGrammar,
    tree: Option<Tree>,
}

impl std::fmt::Debug for ParsedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedSource")
            .field("grammar", &self.grammar)
            .field("len", &self.source.len())
            .finish()
    }
}

impl ParsedSource {
    /// Try TSX, TypeScript and JavaScript in turn, then JSON.
    ///
    /// Fails with [`TransformError::Parse`] naming the first error location
    /// reported by the TSX grammar.
    pub fn parse(source: &str) -> Result<Self> {
        let mut first_error: Option<String> = None;

        for grammar in SourceGrammar::CODE_GRAMMARS {
            let Some(language) = grammar.language() else { continue };
            let mut parser = Parser::new();
            parser.set_language(language)?;

            let tree = parser
                .parse(source, None)
                .ok_or_else(|| TransformError::Parse("parser returned no tree".to_string()))?;

            if !tree.root_node().has_error() {
                return Ok(Self {
                    source: source.to_string(),
                    grammar,
                    tree: Some(tree),
                });
            }

            if first_error.is_none() {
                first_error = Some(describe_first_error(tree.root_node()));
            }
        }

        if looks_like_json(source) && serde_json::from_str::<serde_json::Value>(source).is_ok() {
            return Ok(Self {
                source: source.to_string(),
                grammar: SourceGrammar::Json,
                tree: None,
            });
        }

        Err(TransformError::Parse(
            first_error.unwrap_or_else(|| "unparsable source".to_string()),
        ))
    }

    /// Whether `source` parses under any supported grammar
    pub fn is_parseable(source: &str) -> bool {
        Self::parse(source).is_ok()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn grammar(&self) -> SourceGrammar {
        self.grammar
    }

    fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    /// Keyed vs un-keyed JSX roots returned from `.map()` callbacks
    pub fn list_key_metrics(&self) -> KeyMetrics {
        let mut metrics = KeyMetrics::default();
        let Some(tree) = &self.tree else { return metrics };

        visit(tree.root_node(), &mut |node| {
            if node.kind() != "call_expression" || !self.is_map_call(node) {
                return;
            }
            let Some(callback) = node
                .child_by_field_name("arguments")
                .and_then(|args| args.named_child(0))
            else {
                return;
            };
            if !matches!(callback.kind(), "arrow_function" | "function" | "function_expression") {
                return;
            }
            let Some(body) = callback.child_by_field_name("body") else { return };

            let mut roots = Vec::new();
            collect_returned_jsx(body, &mut roots);
            for root in roots {
                if self.has_key_attribute(root) {
                    metrics.keyed += 1;
                } else {
                    metrics.unkeyed += 1;
                }
            }
        });

        metrics
    }

    fn is_map_call(&self, call: Node<'_>) -> bool {
        call.child_by_field_name("function")
            .filter(|f| f.kind() == "member_expression")
            .and_then(|f| f.child_by_field_name("property"))
            .is_some_and(|p| self.text(p) == "map")
    }

    fn has_key_attribute(&self, jsx_root: Node<'_>) -> bool {
        let opening = if jsx_root.kind() == "jsx_element" {
            named_children(jsx_root)
                .into_iter()
                .find(|c| c.kind() == "jsx_opening_element")
        } else {
            Some(jsx_root)
        };

        opening.is_some_and(|open| {
            named_children(open).into_iter().any(|attr| {
                attr.kind() == "jsx_attribute"
                    && attr.named_child(0).is_some_and(|name| self.text(name) == "key")
            })
        })
    }

    /// Guarded vs unguarded member accesses on [`BROWSER_GLOBALS`]
    pub fn browser_access_metrics(&self) -> AccessMetrics {
        let mut metrics = AccessMetrics::default();
        let Some(tree) = &self.tree else { return metrics };

        visit(tree.root_node(), &mut |node| {
            if node.kind() != "member_expression" {
                return;
            }
            let is_browser_global = node
                .child_by_field_name("object")
                .filter(|o| o.kind() == "identifier")
                .is_some_and(|o| BROWSER_GLOBALS.contains(&self.text(o)));
            if !is_browser_global {
                return;
            }

            if self.is_guarded(node) {
                metrics.guarded += 1;
            } else {
                metrics.unguarded += 1;
            }
        });

        metrics
    }

    /// Reachable only through the guarded branch of a
    /// `typeof X !== "undefined"` check
    fn is_guarded(&self, node: Node<'_>) -> bool {
        let mut child = node;
        while let Some(parent) = child.parent() {
            let guarded = match parent.kind() {
                "binary_expression" => {
                    operator_of(parent) == Some("&&")
                        && parent.child_by_field_name("right") == Some(child)
                        && parent
                            .child_by_field_name("left")
                            .is_some_and(|left| self.contains_typeof_guard(left))
                }
                "ternary_expression" | "if_statement" => {
                    parent.child_by_field_name("consequence") == Some(child)
                        && parent
                            .child_by_field_name("condition")
                            .is_some_and(|cond| self.contains_typeof_guard(cond))
                }
                _ => false,
            };
            if guarded {
                return true;
            }
            child = parent;
        }
        false
    }

    fn contains_typeof_guard(&self, node: Node<'_>) -> bool {
        let mut found = false;
        visit(node, &mut |candidate| {
            if found || candidate.kind() != "binary_expression" {
                return;
            }
            if !matches!(operator_of(candidate), Some("!==" | "!=")) {
                return;
            }
            let (Some(left), Some(right)) = (
                candidate.child_by_field_name("left"),
                candidate.child_by_field_name("right"),
            ) else {
                return;
            };
            found = (self.is_typeof(left) && self.is_undefined_string(right))
                || (self.is_typeof(right) && self.is_undefined_string(left));
        });
        found
    }

    fn is_typeof(&self, node: Node<'_>) -> bool {
        node.kind() == "unary_expression" && operator_of(node) == Some("typeof")
    }

    fn is_undefined_string(&self, node: Node<'_>) -> bool {
        node.kind() == "string"
            && self.text(node).trim_matches(|c| c == '"' || c == '\'') == "undefined"
    }
}

fn operator_of<'t>(node: Node<'t>) -> Option<&'static str> {
    node.child_by_field_name("operator").map(|op| op.kind())
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Pre-order traversal of `node` and all of its descendants
fn visit<'t>(node: Node<'t>, f: &mut impl FnMut(Node<'t>)) {
    f(node);
    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            visit(cursor.node(), f);
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
}

/// JSX roots a callback body can evaluate to; stops at nested functions
fn collect_returned_jsx<'t>(node: Node<'t>, roots: &mut Vec<Node<'t>>) {
    match node.kind() {
        "jsx_element" | "jsx_self_closing_element" => roots.push(node),
        "parenthesized_expression" => {
            for child in named_children(node) {
                collect_returned_jsx(child, roots);
            }
        }
        "ternary_expression" => {
            for field in ["consequence", "alternative"] {
                if let Some(branch) = node.child_by_field_name(field) {
                    collect_returned_jsx(branch, roots);
                }
            }
        }
        "binary_expression" => {
            if let Some(right) = node.child_by_field_name("right") {
                collect_returned_jsx(right, roots);
            }
        }
        "return_statement" => {
            if let Some(value) = node.named_child(0) {
                collect_returned_jsx(value, roots);
            }
        }
        "statement_block" | "if_statement" | "else_clause" => {
            for child in named_children(node) {
                if child.kind() != "expression_statement" {
                    collect_returned_jsx(child, roots);
                }
            }
        }
        _ => {}
    }
}

fn looks_like_json(source: &str) -> bool {
    matches!(source.trim_start().chars().next(), Some('{' | '['))
}

fn describe_first_error(root: Node<'_>) -> String {
    let mut location = None;
    visit(root, &mut |node| {
        if location.is_none() && (node.is_error() || node.is_missing()) {
            let pos = node.start_position();
            location = Some((pos.row + 1, pos.column + 1, node.is_missing()));
        }
    });

    match location {
        Some((line, column, true)) => format!("syntax error: missing token at line {}, column {}", line, column),
        Some((line, column, false)) => format!("syntax error at line {}, column {}", line, column),
        None => "syntax error".to_string(),
    }
}
