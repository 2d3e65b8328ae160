//! In-place-return conversion: flag variables and trailing returns
//! become direct tail expressions.
//!
//! Two narrow rewrites, both purely local:
//! - `let mut flag = init; if .. { flag = v } else { flag = w }; flag`
//!   collapses into the `if`/`else` chain as the tail expression, each
//!   terminal assignment replaced by its value;
//! - a final `return expr;` statement becomes the tail expression
//!   `expr`.

use syn::visit::Visit;

use crate::canon::Canon;
use crate::distance::PropertyKind;
use crate::idents::single_segment;
use crate::program::Program;
use crate::properties::extract_properties;

use super::{render, with_entry_stmts, TransformAttempt, Transformer, ValidationMode};

pub struct ReturnFlagInliner;

impl ReturnFlagInliner {
    /// Detect the flag pattern over the last three statements of the
    /// entry body and return the flag name.
    fn flag_site(candidate: &Program) -> Option<String> {
        let stmts = &candidate.entry_fn().block.stmts;
        if stmts.len() < 3 {
            return None;
        }
        let [init_stmt, branch_stmt, tail_stmt] = &stmts[stmts.len() - 3..] else {
            return None;
        };

        let syn::Stmt::Local(local) = init_stmt else {
            return None;
        };
        let flag = match &local.pat {
            syn::Pat::Ident(pat_ident) => pat_ident.ident.to_string(),
            _ => return None,
        };
        // The initializer is discarded by the rewrite; only values that
        // cannot have effects qualify.
        match local.init.as_ref().map(|init| init.expr.as_ref()) {
            Some(syn::Expr::Lit(_)) | Some(syn::Expr::Path(_)) => {}
            _ => return None,
        }

        let syn::Stmt::Expr(syn::Expr::If(expr_if), _) = branch_stmt else {
            return None;
        };
        if !Self::chain_assigns_only(expr_if, &flag) {
            return None;
        }

        let syn::Stmt::Expr(syn::Expr::Path(path), None) = tail_stmt else {
            return None;
        };
        if single_segment(path).as_deref() != Some(flag.as_str()) {
            return None;
        }

        // Any other read of the flag would observe the initializer or an
        // intermediate state the rewrite no longer produces.
        if Self::reads_flag(expr_if, &flag) {
            return None;
        }
        Some(flag)
    }

    /// Every terminal arm of the chain must end by assigning the flag,
    /// and an `else` must make the chain exhaustive.
    fn chain_assigns_only(expr_if: &syn::ExprIf, flag: &str) -> bool {
        if !Self::block_ends_with_assignment(&expr_if.then_branch, flag) {
            return false;
        }
        match &expr_if.else_branch {
            None => false,
            Some((_, else_branch)) => match else_branch.as_ref() {
                syn::Expr::If(nested) => Self::chain_assigns_only(nested, flag),
                syn::Expr::Block(else_block) => {
                    Self::block_ends_with_assignment(&else_block.block, flag)
                }
                _ => false,
            },
        }
    }

    fn block_ends_with_assignment(block: &syn::Block, flag: &str) -> bool {
        match block.stmts.last() {
            Some(syn::Stmt::Expr(syn::Expr::Assign(assign), Some(_))) => {
                matches!(assign.left.as_ref(), syn::Expr::Path(path)
                    if single_segment(path).as_deref() == Some(flag))
            }
            _ => false,
        }
    }

    /// True when the flag is read anywhere in the chain outside the
    /// left-hand side of its terminal assignments.
    fn reads_flag(expr_if: &syn::ExprIf, flag: &str) -> bool {
        struct Reads<'a> {
            flag: &'a str,
            found: bool,
        }
        impl<'a, 'ast> Visit<'ast> for Reads<'a> {
            fn visit_expr_assign(&mut self, node: &'ast syn::ExprAssign) {
                // Skip the LHS write; the RHS is still a read context.
                self.visit_expr(&node.right);
            }
            fn visit_expr_path(&mut self, node: &'ast syn::ExprPath) {
                if single_segment(node).as_deref() == Some(self.flag) {
                    self.found = true;
                }
                syn::visit::visit_expr_path(self, node);
            }
            fn visit_macro(&mut self, _node: &'ast syn::Macro) {}
        }
        let mut reads = Reads { flag, found: false };
        reads.visit_expr_if(expr_if);
        reads.found
    }

    /// Rewrite the chain so each terminal assignment becomes the arm's
    /// tail value.
    fn inline_chain(expr_if: &syn::ExprIf, flag: &str) -> syn::ExprIf {
        let mut rewritten = expr_if.clone();
        Self::inline_block(&mut rewritten.then_branch, flag);
        if let Some((_, else_branch)) = &mut rewritten.else_branch {
            match else_branch.as_mut() {
                syn::Expr::If(nested) => {
                    let inlined = Self::inline_chain(nested, flag);
                    *else_branch = Box::new(syn::Expr::If(inlined));
                }
                syn::Expr::Block(else_block) => Self::inline_block(&mut else_block.block, flag),
                _ => {}
            }
        }
        rewritten
    }

    fn inline_block(block: &mut syn::Block, flag: &str) {
        if let Some(syn::Stmt::Expr(syn::Expr::Assign(assign), _)) = block.stmts.last() {
            if matches!(assign.left.as_ref(), syn::Expr::Path(path)
                if single_segment(path).as_deref() == Some(flag))
            {
                let value = assign.right.as_ref().clone();
                let last = block.stmts.len() - 1;
                block.stmts[last] = syn::Stmt::Expr(value, None);
            }
        }
    }

    fn trailing_return_site(candidate: &Program) -> bool {
        matches!(
            candidate.entry_fn().block.stmts.last(),
            Some(syn::Stmt::Expr(syn::Expr::Return(expr_return), _))
                if expr_return.expr.is_some()
        )
    }
}

impl Transformer for ReturnFlagInliner {
    fn name(&self) -> &'static str {
        "inline_return_flag"
    }

    fn target(&self) -> PropertyKind {
        PropertyKind::ControlFlowShape
    }

    fn validation(&self) -> ValidationMode {
        ValidationMode::AgainstPrior
    }

    fn can_transform(&self, candidate: &Program, canon: &Canon) -> bool {
        let bag = extract_properties(candidate);
        if bag.alpha_renamed_hash == canon.properties.alpha_renamed_hash {
            // Already structurally aligned; only naming can differ.
            return false;
        }
        if Self::flag_site(candidate).is_some() {
            return true;
        }
        Self::trailing_return_site(candidate)
            && canon.properties.control_flow_shape.has_tail_expression
            && !bag.control_flow_shape.has_tail_expression
    }

    fn transform(&self, candidate: &Program, canon: &Canon) -> TransformAttempt {
        let stmts = &candidate.entry_fn().block.stmts;

        if let Some(flag) = Self::flag_site(candidate) {
            let base = stmts.len() - 3;
            let syn::Stmt::Expr(syn::Expr::If(expr_if), _) = &stmts[base + 1] else {
                return TransformAttempt::declined(candidate, "flag site shifted underfoot");
            };
            let inlined = Self::inline_chain(expr_if, &flag);
            let mut rewritten: Vec<syn::Stmt> = stmts[..base].to_vec();
            rewritten.push(syn::Stmt::Expr(syn::Expr::If(inlined), None));
            let file = with_entry_stmts(candidate, rewritten);
            return TransformAttempt::applied(render(&file));
        }

        if Self::trailing_return_site(candidate)
            && canon.properties.control_flow_shape.has_tail_expression
        {
            let mut rewritten: Vec<syn::Stmt> = stmts[..stmts.len() - 1].to_vec();
            let Some(syn::Stmt::Expr(syn::Expr::Return(expr_return), _)) = stmts.last() else {
                return TransformAttempt::declined(candidate, "trailing return vanished");
            };
            let Some(value) = &expr_return.expr else {
                return TransformAttempt::declined(candidate, "bare return has no value");
            };
            rewritten.push(syn::Stmt::Expr(value.as_ref().clone(), None));
            let file = with_entry_stmts(candidate, rewritten);
            return TransformAttempt::applied(render(&file));
        }

        TransformAttempt::declined(candidate, "no inlinable return pattern")
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
    fn collapses_flag_pattern_into_tail_chain() {
        let candidate = Program::parse(
            "fn f(n: i64) -> i64 { let mut result = 0; if n > 0 { result = n; } else { result = 0 - n; } result }",
        )
        .unwrap();
        let canon = canon_from("fn f(n: i64) -> i64 { if n > 0 { n } else { 0 - n } }");
        let inliner = ReturnFlagInliner;
        assert!(inliner.can_transform(&candidate, &canon));
        let attempt = inliner.transform(&candidate, &canon);
        assert!(attempt.applied);
        let bag = extract_properties(&Program::parse(&attempt.code).unwrap());
        assert_eq!(bag.ast_hash, canon.properties.ast_hash);
    }

    #[test]
    fn converts_trailing_return_to_tail_expression() {
        let candidate = Program::parse("fn f(n: i64) -> i64 { return n * 2; }").unwrap();
        let canon = canon_from("fn f(n: i64) -> i64 { n * 2 }");
        let inliner = ReturnFlagInliner;
        assert!(inliner.can_transform(&candidate, &canon));
        let attempt = inliner.transform(&candidate, &canon);
        assert!(attempt.applied);
        let bag = extract_properties(&Program::parse(&attempt.code).unwrap());
        assert_eq!(bag.ast_hash, canon.properties.ast_hash);
    }

    #[test]
    fn declines_when_flag_is_read_in_an_arm() {
        let candidate = Program::parse(
            "fn f(n: i64) -> i64 { let mut r = 1; if n > 0 { r = r + n; } else { r = 0; } r }",
        )
        .unwrap();
        assert!(ReturnFlagInliner::flag_site(&candidate).is_none());
    }

    #[test]
    fn declines_without_exhaustive_else() {
        let candidate = Program::parse(
            "fn f(n: i64) -> i64 { let mut r = 0; if n > 0 { r = n; } r }",
        )
        .unwrap();
        assert!(ReturnFlagInliner::flag_site(&candidate).is_none());
    }
}
