//! Property extraction: a parsed program reduced to a fixed vocabulary
//! of structural and behavioral features.
//!
//! Extraction is a pure function of the tree (no I/O, no randomness)
//! so identical source always yields an identical bag. Every property in
//! the vocabulary is populated for any program that parsed; there is no
//! partially filled bag.

use std::collections::HashMap;

use quote::ToTokens;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use syn::visit::{self, Visit};

use crate::idents::{BindingCollector, IdentRewriter};
use crate::program::{ParseError, Program};

/// Bump whenever the extraction vocabulary or any property's derivation
/// changes; persisted bags with an older version are re-extracted.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PropertyBag {
    pub schema_version: u32,
    /// blake3 of the normalized source, names retained. Detects
    /// structure that is character-identical modulo whitespace.
    pub ast_hash: String,
    /// blake3 after renaming the entry function and every local binding
    /// to positional placeholders. Detects structural equivalence
    /// independent of naming.
    pub alpha_renamed_hash: String,
    pub control_flow_shape: ControlFlowShape,
    pub error_handling_shape: ErrorShape,
    pub loop_shape: LoopShape,
    /// Surface identifier set of the entry function, binding order.
    pub identifiers: Vec<String>,
    pub naming_style: NamingStyle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ControlFlowShape {
    pub branch_count: usize,
    pub max_nesting: usize,
    pub has_early_return: bool,
    pub has_tail_expression: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorShape {
    /// Number of conditions across the leading guard chain.
    pub guard_count: usize,
    /// Normalized condition text of each leading guard, in order.
    pub guard_conditions: Vec<String>,
    /// Explicit raise sites (`panic!`, `unreachable!`, `todo!`) anywhere
    /// in the entry function.
    pub raise_count: usize,
    /// More than one return point (explicit returns plus tail value).
    pub multi_branch_returns: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopShape {
    None,
    /// `for` over a range; bounds recorded where they are literals.
    BoundedFor {
        start: Option<i64>,
        end: Option<i64>,
        inclusive: bool,
    },
    While,
    Unbounded,
    Recursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NamingStyle {
    SnakeCase,
    SingleLetter,
    Mixed,
    NoBindings,
}

/// Extract the full property vocabulary from a parsed program.
pub fn extract_properties(program: &Program) -> PropertyBag {
    let entry = program.entry_fn();
    let identifiers = BindingCollector::collect(entry);
    PropertyBag {
        schema_version: SCHEMA_VERSION,
        ast_hash: content_hash(&program.normalized_source()),
        alpha_renamed_hash: content_hash(&alpha_renamed_source(program)),
        control_flow_shape: control_flow_shape(entry),
        error_handling_shape: error_shape(entry),
        loop_shape: loop_shape(entry),
        naming_style: classify_naming(&identifiers),
        identifiers,
    }
}

/// Text-level entry point: parse, then extract. Malformed input fails
/// fast; callers exclude such candidates before any distance scoring.
pub fn extract_properties_from_source(source: &str) -> Result<PropertyBag, ParseError> {
    let program = Program::parse(source)?;
    Ok(extract_properties(&program))
}

fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Render the program with the entry function name and all its bindings
/// replaced by positional placeholders (`f0`, `v0`, `v1`, ...). The
/// substitution is simultaneous, so programs already using placeholder
/// names still rename consistently.
fn alpha_renamed_source(program: &Program) -> String {
    let entry = program.entry_fn();
    let mut map = HashMap::new();
    map.insert(entry.sig.ident.to_string(), "f0".to_string());
    for (index, name) in BindingCollector::collect(entry).into_iter().enumerate() {
        map.insert(name, format!("v{index}"));
    }
    let mut file = program.ast().clone();
    IdentRewriter::new(map).rewrite_file(&mut file);
    prettyplease::unparse(&file)
}

fn control_flow_shape(entry: &syn::ItemFn) -> ControlFlowShape {
    struct FlowVisitor {
        branch_count: usize,
        depth: usize,
        max_nesting: usize,
        nested_return: bool,
    }
    impl FlowVisitor {
        fn nested<F: FnOnce(&mut Self)>(&mut self, inner: F) {
            self.depth += 1;
            self.max_nesting = self.max_nesting.max(self.depth);
            inner(self);
            self.depth -= 1;
        }
    }
    impl<'ast> Visit<'ast> for FlowVisitor {
        fn visit_expr_if(&mut self, node: &'ast syn::ExprIf) {
            self.branch_count += 1;
            self.visit_expr(&node.cond);
            self.nested(|v| v.visit_block(&node.then_branch));
            if let Some((_, else_branch)) = &node.else_branch {
                // else-if chains recurse back here and count themselves.
                match else_branch.as_ref() {
                    syn::Expr::If(_) => self.visit_expr(else_branch),
                    _ => self.nested(|v| v.visit_expr(else_branch)),
                }
            }
        }

        fn visit_expr_match(&mut self, node: &'ast syn::ExprMatch) {
            self.branch_count += node.arms.len();
            self.visit_expr(&node.expr);
            self.nested(|v| {
                for arm in &node.arms {
                    v.visit_arm(arm);
                }
            });
        }

        fn visit_expr_while(&mut self, node: &'ast syn::ExprWhile) {
            self.visit_expr(&node.cond);
            self.nested(|v| v.visit_block(&node.body));
        }

        fn visit_expr_for_loop(&mut self, node: &'ast syn::ExprForLoop) {
            self.visit_expr(&node.expr);
            self.nested(|v| v.visit_block(&node.body));
        }

        fn visit_expr_loop(&mut self, node: &'ast syn::ExprLoop) {
            self.nested(|v| v.visit_block(&node.body));
        }

        fn visit_expr_return(&mut self, node: &'ast syn::ExprReturn) {
            if self.depth > 0 {
                self.nested_return = true;
            }
            visit::visit_expr_return(self, node);
        }

        fn visit_macro(&mut self, _node: &'ast syn::Macro) {}
    }

    let mut visitor = FlowVisitor {
        branch_count: 0,
        depth: 0,
        max_nesting: 0,
        nested_return: false,
    };
    visitor.visit_block(&entry.block);

    let stmts = &entry.block.stmts;
    let top_level_early_return = stmts
        .iter()
        .take(stmts.len().saturating_sub(1))
        .any(|stmt| matches!(stmt, syn::Stmt::Expr(syn::Expr::Return(_), _)));
    let has_tail_expression = matches!(stmts.last(), Some(syn::Stmt::Expr(_, None)));

    ControlFlowShape {
        branch_count: visitor.branch_count,
        max_nesting: visitor.max_nesting,
        has_early_return: visitor.nested_return || top_level_early_return,
        has_tail_expression,
    }
}

const RAISE_MACROS: &[&str] = &["panic", "unreachable", "todo"];

pub(crate) fn is_raise_macro(mac: &syn::Macro) -> bool {
    mac.path
        .segments
        .last()
        .map(|segment| RAISE_MACROS.contains(&segment.ident.to_string().as_str()))
        .unwrap_or(false)
}

/// A block diverges when its last statement is a `return` or a raise
/// macro; everything after such a block in the enclosing chain is only
/// reachable when the guard condition failed.
pub(crate) fn block_diverges(block: &syn::Block) -> bool {
    match block.stmts.last() {
        Some(syn::Stmt::Expr(syn::Expr::Return(_), _)) => true,
        Some(syn::Stmt::Expr(syn::Expr::Macro(expr_macro), _)) => is_raise_macro(&expr_macro.mac),
        Some(syn::Stmt::Macro(stmt_macro)) => is_raise_macro(&stmt_macro.mac),
        _ => false,
    }
}

/// True for an `if`/`else if` chain where every arm diverges and no
/// final `else` exists: the early-exit guard idiom.
fn is_guard_chain(expr_if: &syn::ExprIf) -> bool {
    if !block_diverges(&expr_if.then_branch) {
        return false;
    }
    match &expr_if.else_branch {
        None => true,
        Some((_, else_branch)) => match else_branch.as_ref() {
            syn::Expr::If(nested) => is_guard_chain(nested),
            _ => false,
        },
    }
}

/// Whitespace-normalized condition text via its token stream.
fn condition_text(cond: &syn::Expr) -> String {
    let tokens: proc_macro2::TokenStream = cond.to_token_stream();
    tokens.to_string()
}

fn chain_conditions(expr_if: &syn::ExprIf, out: &mut Vec<String>) {
    out.push(condition_text(&expr_if.cond));
    if let Some((_, else_branch)) = &expr_if.else_branch {
        if let syn::Expr::If(nested) = else_branch.as_ref() {
            chain_conditions(nested, out);
        }
    }
}

/// Number of leading statements of `block` that form guard chains.
pub(crate) fn leading_guard_len(block: &syn::Block) -> usize {
    block
        .stmts
        .iter()
        .take_while(|stmt| match stmt {
            syn::Stmt::Expr(syn::Expr::If(expr_if), _) => is_guard_chain(expr_if),
            _ => false,
        })
        .count()
}

fn error_shape(entry: &syn::ItemFn) -> ErrorShape {
    let mut guard_conditions = Vec::new();
    for stmt in entry.block.stmts.iter().take(leading_guard_len(&entry.block)) {
        if let syn::Stmt::Expr(syn::Expr::If(expr_if), _) = stmt {
            chain_conditions(expr_if, &mut guard_conditions);
        }
    }

    struct RaiseVisitor {
        raises: usize,
        returns: usize,
    }
    impl<'ast> Visit<'ast> for RaiseVisitor {
        fn visit_macro(&mut self, node: &'ast syn::Macro) {
            if is_raise_macro(node) {
                self.raises += 1;
            }
        }
        fn visit_expr_return(&mut self, node: &'ast syn::ExprReturn) {
            self.returns += 1;
            visit::visit_expr_return(self, node);
        }
    }
    let mut visitor = RaiseVisitor {
        raises: 0,
        returns: 0,
    };
    visitor.visit_block(&entry.block);

    let tail_return = matches!(entry.block.stmts.last(), Some(syn::Stmt::Expr(_, None))) as usize;

    ErrorShape {
        guard_count: guard_conditions.len(),
        guard_conditions,
        raise_count: visitor.raises,
        multi_branch_returns: visitor.returns + tail_return > 1,
    }
}

fn loop_shape(entry: &syn::ItemFn) -> LoopShape {
    struct LoopVisitor {
        entry_name: String,
        recursive: bool,
        first_loop: Option<LoopShape>,
    }
    impl LoopVisitor {
        fn record(&mut self, shape: LoopShape) {
            if self.first_loop.is_none() {
                self.first_loop = Some(shape);
            }
        }
    }
    impl<'ast> Visit<'ast> for LoopVisitor {
        fn visit_expr_for_loop(&mut self, node: &'ast syn::ExprForLoop) {
            let shape = match node.expr.as_ref() {
                syn::Expr::Range(range) => LoopShape::BoundedFor {
                    start: range.start.as_deref().and_then(literal_int),
                    end: range.end.as_deref().and_then(literal_int),
                    inclusive: matches!(range.limits, syn::RangeLimits::Closed(_)),
                },
                _ => LoopShape::BoundedFor {
                    start: None,
                    end: None,
                    inclusive: false,
                },
            };
            self.record(shape);
            visit::visit_expr_for_loop(self, node);
        }

        fn visit_expr_while(&mut self, node: &'ast syn::ExprWhile) {
            self.record(LoopShape::While);
            visit::visit_expr_while(self, node);
        }

        fn visit_expr_loop(&mut self, node: &'ast syn::ExprLoop) {
            self.record(LoopShape::Unbounded);
            visit::visit_expr_loop(self, node);
        }

        fn visit_expr_call(&mut self, node: &'ast syn::ExprCall) {
            if let syn::Expr::Path(path) = node.func.as_ref() {
                if crate::idents::single_segment(path).as_deref() == Some(&self.entry_name) {
                    self.recursive = true;
                }
            }
            visit::visit_expr_call(self, node);
        }

        fn visit_macro(&mut self, _node: &'ast syn::Macro) {}
    }

    let mut visitor = LoopVisitor {
        entry_name: entry.sig.ident.to_string(),
        recursive: false,
        first_loop: None,
    };
    visitor.visit_block(&entry.block);

    if visitor.recursive {
        LoopShape::Recursive
    } else {
        visitor.first_loop.unwrap_or(LoopShape::None)
    }
}

fn literal_int(expr: &syn::Expr) -> Option<i64> {
    match expr {
        syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Int(lit),
            ..
        }) => lit.base10_parse().ok(),
        syn::Expr::Unary(syn::ExprUnary {
            op: syn::UnOp::Neg(_),
            expr,
            ..
        }) => literal_int(expr).map(|value| -value),
        _ => None,
    }
}

fn classify_naming(identifiers: &[String]) -> NamingStyle {
    if identifiers.is_empty() {
        return NamingStyle::NoBindings;
    }
    let snake = Regex::new("^[a-z][a-z0-9_]*$").expect("fixed pattern is valid");
    let all_single = identifiers.iter().all(|name| name.chars().count() == 1);
    if all_single {
        return NamingStyle::SingleLetter;
    }
    if identifiers.iter().all(|name| snake.is_match(name)) {
        NamingStyle::SnakeCase
    } else {
        NamingStyle::Mixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(source: &str) -> PropertyBag {
        extract_properties_from_source(source).expect("test source must parse")
    }

    #[test]
    fn extraction_is_deterministic() {
        let source = "fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }";
        assert_eq!(bag(source), bag(source));
    }

    #[test]
    fn guard_chain_is_detected() {
        let shape = bag(
            "fn f(n: i64) -> i64 {\n                if n < 0 { panic!(\"negative\"); } else if n == 0 { return 0; }\n                n\n            }",
        )
        .error_handling_shape;
        assert_eq!(shape.guard_count, 2);
        assert_eq!(shape.raise_count, 1);
        assert_eq!(shape.guard_conditions[0], "n < 0");
    }

    #[test]
    fn exhaustive_if_else_is_not_a_guard() {
        let shape =
            bag("fn f(n: i64) -> i64 { if n < 0 { return 0; } else { return n; } }")
                .error_handling_shape;
        assert_eq!(shape.guard_count, 0);
        assert!(shape.multi_branch_returns);
    }

    #[test]
    fn loop_shape_prefers_recursion() {
        let shape = bag(
            "fn fact(n: i64) -> i64 { if n <= 1 { return 1; } let mut acc = 1; for i in 1..n { acc = acc * i; } n * fact(n - 1) }",
        )
        .loop_shape;
        assert_eq!(shape, LoopShape::Recursive);
    }

    #[test]
    fn for_loop_bounds_are_recorded_when_literal() {
        let shape = bag("fn f() -> i64 { let mut s = 0; for i in 0..10 { s = s + i; } s }")
            .loop_shape;
        assert_eq!(
            shape,
            LoopShape::BoundedFor {
                start: Some(0),
                end: Some(10),
                inclusive: false,
            }
        );
    }

    #[test]
    fn naming_style_classification() {
        assert_eq!(bag("fn f(x: i64) -> i64 { x }").naming_style, NamingStyle::SingleLetter);
        assert_eq!(
            bag("fn f(total_sum: i64) -> i64 { total_sum }").naming_style,
            NamingStyle::SnakeCase
        );
        assert_eq!(
            bag("fn f(totalSum: i64, x: i64) -> i64 { totalSum + x }").naming_style,
            NamingStyle::Mixed
        );
    }

    #[test]
    fn alpha_hash_ignores_names_ast_hash_does_not() {
        let a = bag("fn f(x: i64) -> i64 { let y = x + 1; y }");
        let b = bag("fn f(a: i64) -> i64 { let b = a + 1; b }");
        assert_eq!(a.alpha_renamed_hash, b.alpha_renamed_hash);
        assert_ne!(a.ast_hash, b.ast_hash);
    }
}
