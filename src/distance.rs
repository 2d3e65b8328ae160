//! Weighted structural distance between two property bags.
//!
//! Each property has a dedicated sub-distance in [0, 1]; the aggregate
//! is the weighted sum normalized by the total weight. Every sub-distance
//! implemented here is symmetric; no property required a directional
//! metric, so `compute_distance(a, b) == compute_distance(b, a)`.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::properties::{ErrorShape, LoopShape, PropertyBag, SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum DistanceError {
    #[error("property bag is empty or was produced by a different extractor schema")]
    InvalidPropertyBag,
    #[error("distance weights must be finite and non-negative, with a positive sum")]
    InvalidWeights,
}

/// Fixed, externally versioned weighting configuration. Weights are an
/// artifact the caller owns, never derived or learned here.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DistanceWeights {
    pub schema_version: u32,
    pub ast_hash: f64,
    pub alpha_renamed_hash: f64,
    pub control_flow: f64,
    pub error_handling: f64,
    pub loop_shape: f64,
    pub identifiers: f64,
}

impl Default for DistanceWeights {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            ast_hash: 3.0,
            alpha_renamed_hash: 5.0,
            control_flow: 4.0,
            error_handling: 4.0,
            loop_shape: 3.0,
            identifiers: 2.0,
        }
    }
}

impl DistanceWeights {
    fn entries(&self) -> [f64; 6] {
        [
            self.ast_hash,
            self.alpha_renamed_hash,
            self.control_flow,
            self.error_handling,
            self.loop_shape,
            self.identifiers,
        ]
    }

    pub fn validate(&self) -> Result<(), DistanceError> {
        let entries = self.entries();
        if entries.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DistanceError::InvalidWeights);
        }
        if entries.iter().sum::<f64>() <= 0.0 {
            return Err(DistanceError::InvalidWeights);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    AstHash,
    AlphaRenamedHash,
    ControlFlowShape,
    ErrorHandlingShape,
    LoopShape,
    Identifiers,
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PropertyKind::AstHash => "ast_hash",
            PropertyKind::AlphaRenamedHash => "alpha_renamed_hash",
            PropertyKind::ControlFlowShape => "control_flow_shape",
            PropertyKind::ErrorHandlingShape => "error_handling_shape",
            PropertyKind::LoopShape => "loop_shape",
            PropertyKind::Identifiers => "identifiers",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PropertyContribution {
    pub property: PropertyKind,
    /// Raw sub-distance in [0, 1].
    pub sub_distance: f64,
    /// Sub-distance scaled by the property weight.
    pub weighted: f64,
    /// Weighted contribution divided by the total weight.
    pub share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DistanceReport {
    /// Normalized scalar in [0, 1]; 0 means the bags agree on every
    /// property.
    pub distance: f64,
    /// Per-property contributions, ranked by weighted contribution
    /// descending, so the dominant divergence comes first.
    pub contributions: Vec<PropertyContribution>,
}

/// Compute the weighted distance between a candidate bag and a canon bag.
pub fn compute_distance(
    candidate: &PropertyBag,
    canon: &PropertyBag,
    weights: &DistanceWeights,
) -> Result<DistanceReport, DistanceError> {
    weights.validate()?;
    check_bag(candidate)?;
    check_bag(canon)?;

    let pairs = [
        (
            PropertyKind::AstHash,
            exact(&candidate.ast_hash, &canon.ast_hash),
            weights.ast_hash,
        ),
        (
            PropertyKind::AlphaRenamedHash,
            exact(&candidate.alpha_renamed_hash, &canon.alpha_renamed_hash),
            weights.alpha_renamed_hash,
        ),
        (
            PropertyKind::ControlFlowShape,
            control_flow_distance(candidate, canon),
            weights.control_flow,
        ),
        (
            PropertyKind::ErrorHandlingShape,
            error_shape_distance(
                &candidate.error_handling_shape,
                &canon.error_handling_shape,
            ),
            weights.error_handling,
        ),
        (
            PropertyKind::LoopShape,
            loop_shape_distance(&candidate.loop_shape, &canon.loop_shape),
            weights.loop_shape,
        ),
        (
            PropertyKind::Identifiers,
            identifier_distance(candidate, canon),
            weights.identifiers,
        ),
    ];

    let total_weight: f64 = pairs.iter().map(|(_, _, weight)| weight).sum();
    let mut contributions: Vec<PropertyContribution> = pairs
        .iter()
        .map(|(property, sub_distance, weight)| PropertyContribution {
            property: *property,
            sub_distance: *sub_distance,
            weighted: sub_distance * weight,
            share: sub_distance * weight / total_weight,
        })
        .collect();
    contributions.sort_by(|a, b| {
        b.weighted
            .partial_cmp(&a.weighted)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let distance = contributions.iter().map(|c| c.share).sum::<f64>().clamp(0.0, 1.0);
    Ok(DistanceReport {
        distance,
        contributions,
    })
}

fn check_bag(bag: &PropertyBag) -> Result<(), DistanceError> {
    if bag.schema_version != SCHEMA_VERSION
        || bag.ast_hash.is_empty()
        || bag.alpha_renamed_hash.is_empty()
    {
        return Err(DistanceError::InvalidPropertyBag);
    }
    Ok(())
}

fn exact(a: &str, b: &str) -> f64 {
    if a == b {
        0.0
    } else {
        1.0
    }
}

fn ratio_gap(a: usize, b: usize) -> f64 {
    let max = a.max(b);
    if max == 0 {
        0.0
    } else {
        (a.abs_diff(b)) as f64 / max as f64
    }
}

fn control_flow_distance(candidate: &PropertyBag, canon: &PropertyBag) -> f64 {
    let a = &candidate.control_flow_shape;
    let b = &canon.control_flow_shape;
    let parts = [
        ratio_gap(a.branch_count, b.branch_count),
        ratio_gap(a.max_nesting, b.max_nesting),
        if a.has_early_return == b.has_early_return { 0.0 } else { 1.0 },
        if a.has_tail_expression == b.has_tail_expression { 0.0 } else { 1.0 },
    ];
    parts.iter().sum::<f64>() / parts.len() as f64
}

/// Similarity table for error-handling shapes:
///
/// | difference                                   | sub-distance |
/// |----------------------------------------------|--------------|
/// | identical shape                              | 0.0          |
/// | guards on both sides, boundaries differ      | 0.4          |
/// | raise on exactly one side                    | +0.6         |
/// | guard on exactly one side                    | 1.0          |
/// | multi-branch-return flag differs             | +0.2         |
///
/// A guard with a different boundary value scores well below a guard the
/// other side lacks entirely; components accumulate and cap at 1.
fn error_shape_distance(a: &ErrorShape, b: &ErrorShape) -> f64 {
    let a_guarded = a.guard_count > 0;
    let b_guarded = b.guard_count > 0;
    if a_guarded != b_guarded {
        return 1.0;
    }
    let mut score: f64 = 0.0;
    if a_guarded && a.guard_conditions != b.guard_conditions {
        score += 0.4;
    }
    if (a.raise_count > 0) != (b.raise_count > 0) {
        score += 0.6;
    }
    if a.multi_branch_returns != b.multi_branch_returns {
        score += 0.2;
    }
    score.min(1.0)
}

/// Similarity table for loop shapes: same kind with different literal
/// bounds is a small gap, two different loop kinds a middling one, a
/// loop against recursion larger, and looping against straight-line code
/// the full distance.
fn loop_shape_distance(a: &LoopShape, b: &LoopShape) -> f64 {
    if a == b {
        return 0.0;
    }
    match (a, b) {
        (LoopShape::BoundedFor { .. }, LoopShape::BoundedFor { .. }) => 0.3,
        (LoopShape::None, _) | (_, LoopShape::None) => 1.0,
        (LoopShape::Recursive, _) | (_, LoopShape::Recursive) => 0.7,
        _ => 0.5,
    }
}

fn identifier_distance(candidate: &PropertyBag, canon: &PropertyBag) -> f64 {
    let a: HashSet<&String> = candidate.identifiers.iter().collect();
    let b: HashSet<&String> = canon.identifiers.iter().collect();
    let union = a.union(&b).count();
    let jaccard_gap = if union == 0 {
        0.0
    } else {
        1.0 - a.intersection(&b).count() as f64 / union as f64
    };
    let style_gap = if candidate.naming_style == canon.naming_style {
        0.0
    } else {
        1.0
    };
    0.7 * jaccard_gap + 0.3 * style_gap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::extract_properties_from_source;

    fn bag(source: &str) -> PropertyBag {
        extract_properties_from_source(source).expect("test source must parse")
    }

    #[test]
    fn identical_bags_have_zero_distance() {
        let a = bag("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
        let report = compute_distance(&a, &a, &DistanceWeights::default()).unwrap();
        assert_eq!(report.distance, 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = bag("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
        let b = bag("fn g(x: i64) -> i64 { let mut s = 0; while x > s { s = s + 1; } s }");
        let weights = DistanceWeights::default();
        let forward = compute_distance(&a, &b, &weights).unwrap().distance;
        let backward = compute_distance(&b, &a, &weights).unwrap().distance;
        assert_eq!(forward, backward);
    }

    #[test]
    fn boundary_difference_scores_below_missing_guard() {
        let canon = bag("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
        let boundary = bag("fn f(n: i64) -> i64 { if n < 0 { return 0; } n }");
        let unguarded = bag("fn f(n: i64) -> i64 { n }");
        let weights = DistanceWeights::default();
        let near = compute_distance(&boundary, &canon, &weights).unwrap();
        let far = compute_distance(&unguarded, &canon, &weights).unwrap();
        let shape = |report: &DistanceReport| {
            report
                .contributions
                .iter()
                .find(|c| c.property == PropertyKind::ErrorHandlingShape)
                .map(|c| c.sub_distance)
                .unwrap_or(f64::NAN)
        };
        assert!(shape(&near) < shape(&far));
    }

    #[test]
    fn contributions_are_ranked_descending() {
        let a = bag("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
        let b = bag("fn f(n: i64) -> i64 { n }");
        let report = compute_distance(&a, &b, &DistanceWeights::default()).unwrap();
        for pair in report.contributions.windows(2) {
            assert!(pair[0].weighted >= pair[1].weighted);
        }
    }

    #[test]
    fn stale_schema_bag_is_rejected() {
        let mut stale = bag("fn f(n: i64) -> i64 { n }");
        stale.schema_version = SCHEMA_VERSION - 1;
        let fresh = bag("fn f(n: i64) -> i64 { n }");
        let err = compute_distance(&stale, &fresh, &DistanceWeights::default())
            .expect_err("stale bag must be rejected");
        assert!(matches!(err, DistanceError::InvalidPropertyBag));
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let a = bag("fn f(n: i64) -> i64 { n }");
        let weights = DistanceWeights {
            ast_hash: f64::NAN,
            ..DistanceWeights::default()
        };
        let err = compute_distance(&a, &a, &weights).expect_err("NaN weight must be rejected");
        assert!(matches!(err, DistanceError::InvalidWeights));
    }
}
