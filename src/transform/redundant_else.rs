//! Redundant-clause removal: hoist the body of an `else` that guards
//! the only remaining reachable path.
//!
//! When an `if` arm provably diverges (ends in `return` or a raise), its
//! `else` wrapper adds nesting without changing reachability; the else
//! body can follow the `if` directly. The rewrite only fires where the
//! hoisted statements remain valid in statement position.

use crate::canon::Canon;
use crate::distance::PropertyKind;
use crate::program::Program;
use crate::properties::{block_diverges, extract_properties};

use super::{render, with_entry_stmts, TransformAttempt, Transformer, ValidationMode};

pub struct RedundantElseRemover;

impl RedundantElseRemover {
    /// Index of the first top-level `if` statement with a divergent then
    /// branch and a plain `else { .. }` block that can be hoisted.
    fn site(candidate: &Program) -> Option<usize> {
        let stmts = &candidate.entry_fn().block.stmts;
        stmts.iter().enumerate().find_map(|(index, stmt)| {
            let syn::Stmt::Expr(syn::Expr::If(expr_if), _) = stmt else {
                return None;
            };
            if !block_diverges(&expr_if.then_branch) {
                return None;
            }
            let (_, else_branch) = expr_if.else_branch.as_ref()?;
            let syn::Expr::Block(else_block) = else_branch.as_ref() else {
                return None;
            };
            let last_site = index + 1 == stmts.len();
            if Self::hoistable(&else_block.block, last_site) {
                Some(index)
            } else {
                None
            }
        })
    }

    /// Hoisted statements must stand alone: a trailing tail expression
    /// is only legal when the site is the last statement of the body.
    fn hoistable(block: &syn::Block, last_site: bool) -> bool {
        if block.stmts.is_empty() {
            return true;
        }
        block.stmts.iter().enumerate().all(|(index, stmt)| {
            let last = index + 1 == block.stmts.len();
            match stmt {
                syn::Stmt::Expr(_, None) => last && last_site,
                syn::Stmt::Expr(_, Some(_)) | syn::Stmt::Local(_) | syn::Stmt::Macro(_) => true,
                syn::Stmt::Item(_) => false,
            }
        })
    }
}

impl Transformer for RedundantElseRemover {
    fn name(&self) -> &'static str {
        "remove_redundant_else"
    }

    fn target(&self) -> PropertyKind {
        PropertyKind::ControlFlowShape
    }

    fn validation(&self) -> ValidationMode {
        ValidationMode::AgainstPrior
    }

    fn can_transform(&self, candidate: &Program, canon: &Canon) -> bool {
        if Self::site(candidate).is_none() {
            return false;
        }
        let bag = extract_properties(candidate);
        bag.control_flow_shape != canon.properties.control_flow_shape
            || bag.error_handling_shape != canon.properties.error_handling_shape
    }

    fn transform(&self, candidate: &Program, _canon: &Canon) -> TransformAttempt {
        let Some(index) = Self::site(candidate) else {
            return TransformAttempt::declined(candidate, "no hoistable else clause");
        };
        let stmts = &candidate.entry_fn().block.stmts;
        let mut rewritten: Vec<syn::Stmt> = stmts[..index].to_vec();

        let syn::Stmt::Expr(syn::Expr::If(expr_if), semi) = &stmts[index] else {
            return TransformAttempt::declined(candidate, "site is not an if statement");
        };
        let mut stripped = expr_if.clone();
        let hoisted = match stripped.else_branch.take() {
            Some((_, else_branch)) => match *else_branch {
                syn::Expr::Block(else_block) => else_block.block.stmts,
                _ => return TransformAttempt::declined(candidate, "else is not a plain block"),
            },
            None => return TransformAttempt::declined(candidate, "site has no else clause"),
        };
        rewritten.push(syn::Stmt::Expr(syn::Expr::If(stripped), *semi));
        rewritten.extend(hoisted);
        rewritten.extend(stmts[index + 1..].iter().cloned());

        let file = with_entry_stmts(candidate, rewritten);
        TransformAttempt::applied(render(&file))
    }
}
