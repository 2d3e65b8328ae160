//! Error-handling alignment: adopt the canon's leading guard chain.
//!
//! When the candidate's guard/raise shape diverges from the canon's, the
//! canon's leading guard statements are transplanted in front of the
//! candidate's remaining body, with the canon's parameter names mapped
//! through the positional parameter correspondence. The rewrite is a
//! splice, never an invention: when the guard references anything that
//! does not map onto a candidate parameter, the variant declines.

use std::collections::{HashMap, HashSet};

use syn::visit::Visit;

use crate::canon::Canon;
use crate::distance::PropertyKind;
use crate::idents::{pattern_bindings, single_segment, IdentRewriter};
use crate::program::Program;
use crate::properties::{extract_properties, leading_guard_len};

use super::{render, with_entry_stmts, TransformAttempt, Transformer, ValidationMode};

pub struct ErrorHandlingAligner;

impl ErrorHandlingAligner {
    fn param_names(item_fn: &syn::ItemFn) -> Vec<String> {
        item_fn
            .sig
            .inputs
            .iter()
            .filter_map(|input| match input {
                syn::FnArg::Typed(pat_type) => pattern_bindings(&pat_type.pat).into_iter().next(),
                syn::FnArg::Receiver(_) => None,
            })
            .collect()
    }

    /// Identifiers used in value position inside the canon's guard
    /// statements.
    fn guard_identifiers(stmts: &[syn::Stmt]) -> Vec<String> {
        struct Collector {
            names: Vec<String>,
        }
        impl<'ast> Visit<'ast> for Collector {
            fn visit_expr_path(&mut self, node: &'ast syn::ExprPath) {
                if let Some(name) = single_segment(node) {
                    if !self.names.contains(&name) {
                        self.names.push(name);
                    }
                }
                syn::visit::visit_expr_path(self, node);
            }
            fn visit_macro(&mut self, _node: &'ast syn::Macro) {}
        }
        let mut collector = Collector { names: Vec::new() };
        for stmt in stmts {
            collector.visit_stmt(stmt);
        }
        collector.names
    }

    /// The canon-parameter → candidate-parameter map, or `None` when the
    /// arities differ or the guard references a non-parameter name.
    fn guard_map(candidate: &Program, canon: &Program) -> Option<HashMap<String, String>> {
        let candidate_params = Self::param_names(candidate.entry_fn());
        let canon_params = Self::param_names(canon.entry_fn());
        if candidate_params.len() != canon_params.len() {
            return None;
        }

        let canon_body = &canon.entry_fn().block;
        let guard_stmts = &canon_body.stmts[..leading_guard_len(canon_body)];
        let params: HashSet<&String> = canon_params.iter().collect();
        let referenced = Self::guard_identifiers(guard_stmts);
        if referenced.iter().any(|name| {
            let known_value = params.contains(name);
            let capitalized = name.chars().next().map(char::is_uppercase).unwrap_or(false);
            !known_value && !capitalized
        }) {
            return None;
        }

        Some(
            canon_params
                .into_iter()
                .zip(candidate_params)
                .filter(|(from, to)| from != to)
                .collect(),
        )
    }
}

impl Transformer for ErrorHandlingAligner {
    fn name(&self) -> &'static str {
        "align_error_handling"
    }

    fn target(&self) -> PropertyKind {
        PropertyKind::ErrorHandlingShape
    }

    fn validation(&self) -> ValidationMode {
        ValidationMode::AgainstCanon
    }

    fn can_transform(&self, candidate: &Program, canon: &Canon) -> bool {
        let bag = extract_properties(candidate);
        if bag.error_handling_shape == canon.properties.error_handling_shape {
            return false;
        }
        let candidate_guards = leading_guard_len(&candidate.entry_fn().block);
        let canon_guards = leading_guard_len(&canon.program.entry_fn().block);
        if candidate_guards == 0 && canon_guards == 0 {
            // The divergence sits deeper than the leading guard chain;
            // splicing guards cannot address it.
            return false;
        }
        Self::guard_map(candidate, &canon.program).is_some()
    }

    fn transform(&self, candidate: &Program, canon: &Canon) -> TransformAttempt {
        let Some(map) = Self::guard_map(candidate, &canon.program) else {
            return TransformAttempt::declined(candidate, "guard does not map onto parameters");
        };

        let canon_body = &canon.program.entry_fn().block;
        let canon_guard_len = leading_guard_len(canon_body);
        let mut spliced: Vec<syn::Stmt> = canon_body.stmts[..canon_guard_len].to_vec();
        if !map.is_empty() {
            let mut rewriter = IdentRewriter::new(map);
            let mut wrapper = syn::Block {
                brace_token: Default::default(),
                stmts: spliced,
            };
            rewriter.rewrite_block(&mut wrapper);
            spliced = wrapper.stmts;
        }

        let candidate_body = &candidate.entry_fn().block;
        let candidate_guard_len = leading_guard_len(candidate_body);
        spliced.extend(candidate_body.stmts[candidate_guard_len..].iter().cloned());

        let file = with_entry_stmts(candidate, spliced);
        TransformAttempt::applied(render(&file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon_from(source: &str) -> Canon {
        let program = Program::parse(source).expect("canon source must parse");
        let properties = extract_properties(&program);
        Canon {
            task_id: "test".to_string(),
            program,
            properties,
        }
    }

    #[test]
    fn adopts_canon_guard_and_drops_the_raise() {
        let candidate = Program::parse(
            "fn f(n: i64) -> i64 { if n < 0 { panic!(\"x\"); } else if n == 0 { return 0; } n }",
        )
        .unwrap();
        let canon = canon_from("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
        let aligner = ErrorHandlingAligner;
        assert!(aligner.can_transform(&candidate, &canon));
        let attempt = aligner.transform(&candidate, &canon);
        assert!(attempt.applied);
        assert!(!attempt.code.contains("panic"));
        let bag = extract_properties(&Program::parse(&attempt.code).unwrap());
        assert_eq!(bag.ast_hash, canon.properties.ast_hash);
    }

    #[test]
    fn maps_guard_through_parameter_correspondence() {
        let candidate = Program::parse(
            "fn f(value: i64) -> i64 { if value < 0 { panic!(\"x\"); } value }",
        )
        .unwrap();
        let canon = canon_from("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
        let attempt = ErrorHandlingAligner.transform(&candidate, &canon);
        assert!(attempt.applied);
        assert!(attempt.code.contains("value <= 0"));
        assert!(!attempt.code.contains("n <= 0"));
    }

    #[test]
    fn declines_on_arity_mismatch() {
        let candidate =
            Program::parse("fn f(a: i64, b: i64) -> i64 { if a < 0 { panic!(\"x\"); } a + b }")
                .unwrap();
        let canon = canon_from("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
        assert!(!ErrorHandlingAligner.can_transform(&candidate, &canon));
    }
}
