//! Well-formedness and black-box equivalence checks.
//!
//! Well-formedness is the primary guard against corruption introduced by
//! a partial rewrite: beyond parsing, every free identifier referenced in
//! the entry function must resolve to a parameter, a prior local binding,
//! a file-level item or a known builtin. Equivalence is a bounded
//! behavioral proxy: both programs run over a shared probe matrix in the
//! interpreter and must agree on returned values and raise behavior.

use std::collections::HashSet;

use itertools::Itertools;
use syn::visit::{self, Visit};

use crate::idents::{pattern_bindings, single_segment};
use crate::interp::{run_entry, Outcome, ProbeConfig, Value};
use crate::program::Program;

/// Verdict of the well-formedness check.
#[derive(Debug, Clone)]
pub struct WellFormedness {
    pub ok: bool,
    pub reason: Option<String>,
}

impl WellFormedness {
    fn ok() -> Self {
        Self { ok: true, reason: None }
    }

    fn rejected(reason: String) -> Self {
        Self { ok: false, reason: Some(reason) }
    }
}

/// Three-valued equivalence verdict. `Unknown` means execution was not
/// feasible (unsupported construct, timeout, budget); the boolean API
/// collapses it to "not equivalent".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equivalence {
    Equivalent,
    NotEquivalent,
    Unknown,
}

const SCOPE_BUILTINS: &[&str] = &["drop"];

/// Parse the candidate and verify every free identifier in its entry
/// function resolves. Never panics; malformed input is a rejection with
/// a reason, not an error.
pub fn is_well_formed(code: &str) -> WellFormedness {
    let program = match Program::parse(code) {
        Ok(program) => program,
        Err(err) => return WellFormedness::rejected(err.to_string()),
    };

    let mut globals: HashSet<String> = SCOPE_BUILTINS.iter().map(|s| s.to_string()).collect();
    for item in &program.ast().items {
        match item {
            syn::Item::Fn(item_fn) => {
                globals.insert(item_fn.sig.ident.to_string());
            }
            syn::Item::Const(item_const) => {
                globals.insert(item_const.ident.to_string());
            }
            syn::Item::Static(item_static) => {
                globals.insert(item_static.ident.to_string());
            }
            _ => {}
        }
    }

    let entry = program.entry_fn();
    let mut checker = ScopeChecker {
        scopes: vec![HashSet::new()],
        globals,
        unresolved: None,
    };
    for input in &entry.sig.inputs {
        if let syn::FnArg::Typed(pat_type) = input {
            for name in pattern_bindings(&pat_type.pat) {
                checker.bind(name);
            }
        }
    }
    checker.visit_block(&entry.block);

    match checker.unresolved {
        Some(name) => WellFormedness::rejected(format!(
            "identifier `{name}` does not resolve to a parameter, local binding or known item"
        )),
        None => WellFormedness::ok(),
    }
}

/// Scope-chain resolver in the shape of a stack of frames; locals bind
/// into the innermost frame and lookups walk outward.
struct ScopeChecker {
    scopes: Vec<HashSet<String>>,
    globals: HashSet<String>,
    unresolved: Option<String>,
}

impl ScopeChecker {
    fn bind(&mut self, name: String) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name);
        }
    }

    fn resolves(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name))
            || self.globals.contains(name)
    }

    fn check_path(&mut self, name: String) {
        // Capitalized single segments are type constructors (Some, Ok,
        // struct literals); only value-level lowercase names can dangle.
        let looks_like_value = name
            .chars()
            .next()
            .map(|c| c.is_lowercase() || c == '_')
            .unwrap_or(false);
        if looks_like_value && !self.resolves(&name) && self.unresolved.is_none() {
            self.unresolved = Some(name);
        }
    }
}

impl<'ast> Visit<'ast> for ScopeChecker {
    fn visit_block(&mut self, node: &'ast syn::Block) {
        self.scopes.push(HashSet::new());
        visit::visit_block(self, node);
        self.scopes.pop();
    }

    fn visit_local(&mut self, node: &'ast syn::Local) {
        if let Some(init) = &node.init {
            self.visit_expr(&init.expr);
            if let Some((_, diverge)) = &init.diverge {
                self.visit_expr(diverge);
            }
        }
        for name in pattern_bindings(&node.pat) {
            self.bind(name);
        }
    }

    fn visit_expr_for_loop(&mut self, node: &'ast syn::ExprForLoop) {
        self.visit_expr(&node.expr);
        self.scopes.push(HashSet::new());
        for name in pattern_bindings(&node.pat) {
            self.bind(name);
        }
        self.visit_block(&node.body);
        self.scopes.pop();
    }

    fn visit_expr_closure(&mut self, node: &'ast syn::ExprClosure) {
        self.scopes.push(HashSet::new());
        for input in &node.inputs {
            for name in pattern_bindings(input) {
                self.bind(name);
            }
        }
        self.visit_expr(&node.body);
        self.scopes.pop();
    }

    fn visit_arm(&mut self, node: &'ast syn::Arm) {
        self.scopes.push(HashSet::new());
        for name in pattern_bindings(&node.pat) {
            self.bind(name);
        }
        if let Some((_, guard)) = &node.guard {
            self.visit_expr(guard);
        }
        self.visit_expr(&node.body);
        self.scopes.pop();
    }

    fn visit_expr_let(&mut self, node: &'ast syn::ExprLet) {
        self.visit_expr(&node.expr);
        for name in pattern_bindings(&node.pat) {
            self.bind(name);
        }
    }

    fn visit_expr_path(&mut self, node: &'ast syn::ExprPath) {
        if let Some(name) = single_segment(node) {
            self.check_path(name);
        }
        visit::visit_expr_path(self, node);
    }

    fn visit_macro(&mut self, _node: &'ast syn::Macro) {
        // Macro interiors are opaque tokens; not resolved.
    }
}

/// Run both programs over a shared probe matrix and compare outcomes.
pub fn check_equivalence(a: &str, b: &str, config: &ProbeConfig) -> Equivalence {
    let (Ok(program_a), Ok(program_b)) = (Program::parse(a), Program::parse(b)) else {
        return Equivalence::Unknown;
    };
    if program_a.entry_arity() != program_b.entry_arity() {
        return Equivalence::NotEquivalent;
    }

    for probe in probe_matrix(program_a.entry_arity()) {
        let left = run_entry(&program_a, &probe, config);
        let right = run_entry(&program_b, &probe, config);
        match (left, right) {
            (Ok(x), Ok(y)) => {
                if x != y {
                    return Equivalence::NotEquivalent;
                }
            }
            _ => return Equivalence::Unknown,
        }
    }
    Equivalence::Equivalent
}

/// Conservative boolean form: execution that is not possible counts as
/// not equivalent rather than raising.
pub fn are_semantically_equivalent(a: &str, b: &str, config: &ProbeConfig) -> bool {
    check_equivalence(a, b, config) == Equivalence::Equivalent
}

const PROBE_POINTS: [i64; 8] = [-7, -3, -1, 0, 1, 2, 3, 9];
const PROBE_CAP: usize = 128;

/// Deterministic probe vectors: the full cross product of the fixed
/// probe points, truncated at a fixed cap for higher arities.
fn probe_matrix(arity: usize) -> Vec<Vec<Value>> {
    if arity == 0 {
        return vec![Vec::new()];
    }
    (0..arity)
        .map(|_| PROBE_POINTS.iter().copied())
        .multi_cartesian_product()
        .take(PROBE_CAP)
        .map(|combo| combo.into_iter().map(Value::Int).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_program_passes() {
        let verdict = is_well_formed("fn f(n: i64) -> i64 { let m = n + 1; m }");
        assert!(verdict.ok, "unexpected rejection: {:?}", verdict.reason);
    }

    #[test]
    fn dangling_identifier_is_rejected() {
        let verdict = is_well_formed("fn f(n: i64) -> i64 { if limit < n { return 0; } n }");
        assert!(!verdict.ok);
        assert!(verdict.reason.as_deref().unwrap_or("").contains("limit"));
    }

    #[test]
    fn binding_is_not_visible_before_declaration() {
        let verdict = is_well_formed("fn f(n: i64) -> i64 { let a = b; let b = n; a + b }");
        assert!(!verdict.ok);
    }

    #[test]
    fn malformed_source_is_rejected_with_reason() {
        let verdict = is_well_formed("fn f( {");
        assert!(!verdict.ok);
        assert!(verdict.reason.is_some());
    }

    #[test]
    fn structurally_different_equivalents_compare_equal() {
        let a = "fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }";
        let b = "fn g(x: i64) -> i64 { if x > 0 { return x; } 0 }";
        assert!(are_semantically_equivalent(a, b, &ProbeConfig::default()));
    }

    #[test]
    fn behavioral_difference_is_detected() {
        let a = "fn f(n: i64) -> i64 { n }";
        let b = "fn f(n: i64) -> i64 { n + 1 }";
        assert!(!are_semantically_equivalent(a, b, &ProbeConfig::default()));
    }

    #[test]
    fn raise_behavior_participates_in_equivalence() {
        let panics = "fn f(n: i64) -> i64 { if n < 0 { panic!(\"negative\"); } n }";
        let total = "fn f(n: i64) -> i64 { if n < 0 { return 0; } n }";
        assert!(!are_semantically_equivalent(panics, total, &ProbeConfig::default()));
    }

    #[test]
    fn unexecutable_code_is_unknown_not_a_crash() {
        let a = "fn f(n: i64) -> i64 { n.abs() }";
        let b = "fn f(n: i64) -> i64 { n }";
        assert_eq!(
            check_equivalence(a, b, &ProbeConfig::default()),
            Equivalence::Unknown
        );
        assert!(!are_semantically_equivalent(a, b, &ProbeConfig::default()));
    }
}
