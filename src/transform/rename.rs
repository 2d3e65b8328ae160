//! Variable renaming toward the canon's identifier choices.
//!
//! Fires only when the candidate and canon are structurally identical
//! under alpha renaming but differ with names retained. The mapping is
//! recovered positionally from the shared binding order: a total,
//! conflict-free bijection or nothing; a partial or heuristic rename
//! could leave a dangling name or introduce a capture.

use std::collections::{HashMap, HashSet};

use crate::canon::Canon;
use crate::distance::PropertyKind;
use crate::idents::{free_identifiers, BindingCollector, IdentRewriter};
use crate::program::Program;
use crate::properties::extract_properties;

use super::{render, TransformAttempt, Transformer, ValidationMode};

pub struct VariableRenamer;

impl VariableRenamer {
    /// Recover the candidate → canon identifier bijection from binding
    /// order. `None` when the correspondence is not total, not
    /// injective, or would capture a free identifier of the candidate.
    fn bijection(candidate: &Program, canon: &Program) -> Option<HashMap<String, String>> {
        let mut from = vec![candidate.entry_fn().sig.ident.to_string()];
        from.extend(BindingCollector::collect(candidate.entry_fn()));
        let mut to = vec![canon.entry_fn().sig.ident.to_string()];
        to.extend(BindingCollector::collect(canon.entry_fn()));
        if from.len() != to.len() {
            return None;
        }

        let mut map = HashMap::new();
        let mut targets = HashSet::new();
        for (source, target) in from.iter().zip(to.iter()) {
            if let Some(previous) = map.get(source) {
                if previous != target {
                    return None;
                }
                continue;
            }
            if !targets.insert(target.clone()) {
                return None;
            }
            map.insert(source.clone(), target.clone());
        }

        // A target name colliding with a name the candidate uses freely
        // (a helper function, a global) would change what that free name
        // refers to.
        let free: HashSet<String> = free_identifiers(candidate.entry_fn()).into_iter().collect();
        if map
            .iter()
            .any(|(source, target)| source != target && free.contains(target))
        {
            return None;
        }

        map.retain(|source, target| source != target);
        if map.is_empty() {
            None
        } else {
            Some(map)
        }
    }
}

impl Transformer for VariableRenamer {
    fn name(&self) -> &'static str {
        "rename_variables"
    }

    fn target(&self) -> PropertyKind {
        PropertyKind::AstHash
    }

    fn validation(&self) -> ValidationMode {
        ValidationMode::AgainstPrior
    }

    fn can_transform(&self, candidate: &Program, canon: &Canon) -> bool {
        let bag = extract_properties(candidate);
        bag.alpha_renamed_hash == canon.properties.alpha_renamed_hash
            && bag.ast_hash != canon.properties.ast_hash
            && Self::bijection(candidate, &canon.program).is_some()
    }

    fn transform(&self, candidate: &Program, canon: &Canon) -> TransformAttempt {
        let Some(map) = Self::bijection(candidate, &canon.program) else {
            return TransformAttempt::declined(candidate, "no total conflict-free bijection");
        };
        let mut file = candidate.ast().clone();
        IdentRewriter::new(map).rewrite_file(&mut file);
        TransformAttempt::applied(render(&file))
    }
}
