//! Identifier collection and rewriting over syn trees.

use std::collections::{HashMap, HashSet};

use syn::visit::{self, Visit};
use syn::visit_mut::{self, VisitMut};

/// Collects binding identifiers (parameters, locals, loop and closure
/// bindings) in first-occurrence order, deduplicated.
///
/// The order is load-bearing: alpha renaming and bijection recovery both
/// rely on two structurally identical functions yielding their bindings
/// in the same sequence.
pub struct BindingCollector {
    seen: Vec<String>,
}

impl BindingCollector {
    pub fn collect(item_fn: &syn::ItemFn) -> Vec<String> {
        let mut collector = Self { seen: Vec::new() };
        collector.visit_item_fn(item_fn);
        collector.seen
    }

    fn record(&mut self, ident: &syn::Ident) {
        let name = ident.to_string();
        if name != "_" && !self.seen.contains(&name) {
            self.seen.push(name);
        }
    }
}

impl<'ast> Visit<'ast> for BindingCollector {
    fn visit_pat_ident(&mut self, node: &'ast syn::PatIdent) {
        self.record(&node.ident);
        visit::visit_pat_ident(self, node);
    }

    fn visit_macro(&mut self, _node: &'ast syn::Macro) {
        // Macro interiors are opaque token streams; never mined for bindings.
    }
}

/// Binding names introduced by a single pattern (tuple, struct, slice and
/// sub-patterns included).
pub fn pattern_bindings(pat: &syn::Pat) -> Vec<String> {
    struct PatCollector {
        names: Vec<String>,
    }
    impl<'ast> Visit<'ast> for PatCollector {
        fn visit_pat_ident(&mut self, node: &'ast syn::PatIdent) {
            let name = node.ident.to_string();
            if name != "_" {
                self.names.push(name);
            }
            visit::visit_pat_ident(self, node);
        }
    }
    let mut collector = PatCollector { names: Vec::new() };
    collector.visit_pat(pat);
    collector.names
}

/// Single-segment value-path identifiers used in the function body that
/// are not bound anywhere in it. Ignores scoping order: a name bound
/// late still counts as bound. Good enough for collision screening;
/// scoped resolution lives in the validator.
pub fn free_identifiers(item_fn: &syn::ItemFn) -> Vec<String> {
    let bound: HashSet<String> = BindingCollector::collect(item_fn).into_iter().collect();

    struct PathCollector {
        used: Vec<String>,
    }
    impl<'ast> Visit<'ast> for PathCollector {
        fn visit_expr_path(&mut self, node: &'ast syn::ExprPath) {
            if let Some(name) = single_segment(node) {
                if !self.used.contains(&name) {
                    self.used.push(name);
                }
            }
            visit::visit_expr_path(self, node);
        }

        fn visit_macro(&mut self, _node: &'ast syn::Macro) {}
    }

    let mut collector = PathCollector { used: Vec::new() };
    collector.visit_item_fn(item_fn);
    collector
        .used
        .into_iter()
        .filter(|name| !bound.contains(name))
        .collect()
}

/// The identifier of a bare single-segment value path, if that is what
/// the expression is.
pub fn single_segment(expr_path: &syn::ExprPath) -> Option<String> {
    if expr_path.qself.is_some()
        || expr_path.path.leading_colon.is_some()
        || expr_path.path.segments.len() != 1
    {
        return None;
    }
    let segment = &expr_path.path.segments[0];
    if !segment.arguments.is_empty() {
        return None;
    }
    Some(segment.ident.to_string())
}

/// Rewrites identifiers under a simultaneous substitution map.
///
/// Only binding patterns, single-segment value paths and free-function
/// names are touched; method names, field members and macro interiors
/// are left alone. Every identifier site is rewritten at most once from
/// its original spelling, so swap maps (`x -> y`, `y -> x`) apply
/// without chaining.
pub struct IdentRewriter {
    map: HashMap<String, String>,
}

impl IdentRewriter {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn rewrite_file(&mut self, file: &mut syn::File) {
        self.visit_file_mut(file);
    }

    pub fn rewrite_block(&mut self, block: &mut syn::Block) {
        self.visit_block_mut(block);
    }

    fn rewrite_ident(&self, ident: &mut syn::Ident) {
        if let Some(new_name) = self.map.get(&ident.to_string()) {
            *ident = syn::Ident::new(new_name, ident.span());
        }
    }
}

impl VisitMut for IdentRewriter {
    fn visit_item_fn_mut(&mut self, node: &mut syn::ItemFn) {
        self.rewrite_ident(&mut node.sig.ident);
        visit_mut::visit_item_fn_mut(self, node);
    }

    fn visit_pat_ident_mut(&mut self, node: &mut syn::PatIdent) {
        self.rewrite_ident(&mut node.ident);
        visit_mut::visit_pat_ident_mut(self, node);
    }

    fn visit_expr_path_mut(&mut self, node: &mut syn::ExprPath) {
        if node.qself.is_none()
            && node.path.leading_colon.is_none()
            && node.path.segments.len() == 1
            && node.path.segments[0].arguments.is_empty()
        {
            self.rewrite_ident(&mut node.path.segments[0].ident);
        }
        visit_mut::visit_expr_path_mut(self, node);
    }

    fn visit_macro_mut(&mut self, _node: &mut syn::Macro) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str) -> syn::ItemFn {
        let file: syn::File = syn::parse_str(source).expect("test source must parse");
        file.items
            .into_iter()
            .find_map(|item| match item {
                syn::Item::Fn(f) => Some(f),
                _ => None,
            })
            .expect("test source must contain a function")
    }

    #[test]
    fn collects_bindings_in_declaration_order() {
        let item_fn = entry("fn f(a: i64, b: i64) -> i64 { let c = a; for i in 0..b { } c }");
        assert_eq!(BindingCollector::collect(&item_fn), ["a", "b", "c", "i"]);
    }

    #[test]
    fn free_identifiers_excludes_bound_names() {
        let item_fn = entry("fn f(a: i64) -> i64 { helper(a) + b }");
        let free = free_identifiers(&item_fn);
        assert!(free.contains(&"helper".to_string()));
        assert!(free.contains(&"b".to_string()));
        assert!(!free.contains(&"a".to_string()));
    }

    #[test]
    fn swap_map_applies_simultaneously() {
        let mut file: syn::File =
            syn::parse_str("fn f(x: i64, y: i64) -> i64 { x - y }").unwrap();
        let map = HashMap::from([
            ("x".to_string(), "y".to_string()),
            ("y".to_string(), "x".to_string()),
        ]);
        IdentRewriter::new(map).rewrite_file(&mut file);
        let rendered = prettyplease::unparse(&file);
        assert!(rendered.contains("y - x"));
    }
}
