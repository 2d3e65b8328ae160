//! Source-to-source rewrite strategies.
//!
//! A closed, tagged set of transformer variants behind one capability
//! interface, registered in an explicit priority list. Every rewrite is
//! purely structural and local; a variant whose rewrite would require
//! inventing semantics declines through `can_transform`. Transformers
//! hold no state between invocations.

mod direct_return;
mod error_align;
mod redundant_else;
mod rename;

pub use direct_return::ReturnFlagInliner;
pub use error_align::ErrorHandlingAligner;
pub use redundant_else::RedundantElseRemover;
pub use rename::VariableRenamer;

use crate::canon::Canon;
use crate::distance::PropertyKind;
use crate::program::Program;

/// Output of one rewrite attempt: the rewritten code when `applied`,
/// otherwise the untouched input plus a note explaining the decline.
#[derive(Debug, Clone)]
pub struct TransformAttempt {
    pub code: String,
    pub applied: bool,
    pub note: Option<String>,
}

impl TransformAttempt {
    pub fn applied(code: String) -> Self {
        Self { code, applied: true, note: None }
    }

    pub fn declined(original: &Program, note: &str) -> Self {
        Self {
            code: original.source().to_string(),
            applied: false,
            note: Some(note.to_string()),
        }
    }
}

/// Which program a transformer's output must be behaviorally checked
/// against: rewrites that deliberately move behavior toward the canon
/// validate against the canon; behavior-preserving rewrites validate
/// against their own input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    AgainstCanon,
    AgainstPrior,
}

pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// The property whose distance contribution this variant reduces;
    /// the pipeline addresses the dominant contribution first.
    fn target(&self) -> PropertyKind;

    fn validation(&self) -> ValidationMode;

    /// Cheap syntactic precondition. Must not mutate anything and must
    /// return false rather than fail on ambiguous input.
    fn can_transform(&self, candidate: &Program, canon: &Canon) -> bool;

    fn transform(&self, candidate: &Program, canon: &Canon) -> TransformAttempt;
}

/// The fixed priority-ordered registry.
pub fn registry() -> Vec<Box<dyn Transformer>> {
    vec![
        Box::new(VariableRenamer),
        Box::new(ErrorHandlingAligner),
        Box::new(RedundantElseRemover),
        Box::new(ReturnFlagInliner),
    ]
}

/// Render a rewritten file back to canonical text.
pub(crate) fn render(file: &syn::File) -> String {
    prettyplease::unparse(file)
}

/// Clone the candidate's file with its entry function's statements
/// replaced.
pub(crate) fn with_entry_stmts(candidate: &Program, stmts: Vec<syn::Stmt>) -> syn::File {
    let mut file = candidate.ast().clone();
    let entry_name = candidate.entry_fn().sig.ident.to_string();
    for item in &mut file.items {
        if let syn::Item::Fn(item_fn) = item {
            if item_fn.sig.ident == entry_name {
                item_fn.block.stmts = stmts;
                break;
            }
        }
    }
    file
}
