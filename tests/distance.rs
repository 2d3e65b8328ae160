//! Distance-calculator behavior: bounds, symmetry, similarity tables and
//! contribution ranking.

use realign::{
    compute_distance, extract_properties_from_source, DistanceError, DistanceWeights,
    PropertyBag, PropertyKind, SCHEMA_VERSION,
};

fn bag(source: &str) -> PropertyBag {
    extract_properties_from_source(source).expect("test source must parse")
}

#[test]
fn distance_stays_within_unit_interval() {
    let canon = bag("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
    let candidates = [
        "fn f(n: i64) -> i64 { n }",
        "fn g(x: i64) -> i64 { let mut s = 0; for i in 0..x { s = s + i; } s }",
        "fn h(a: i64) -> i64 { if a < 0 { panic!(\"bad\"); } a * a }",
    ];
    for candidate in candidates {
        let report = compute_distance(&bag(candidate), &canon, &DistanceWeights::default())
            .expect("bags are valid");
        assert!(
            (0.0..=1.0).contains(&report.distance),
            "distance {} out of range for {candidate}",
            report.distance
        );
    }
}

#[test]
fn distance_is_symmetric() {
    let a = bag("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
    let b = bag("fn g(x: i64) -> i64 { let mut s = 0; while s < x { s = s + 1; } s }");
    let weights = DistanceWeights::default();
    assert_eq!(
        compute_distance(&a, &b, &weights).unwrap().distance,
        compute_distance(&b, &a, &weights).unwrap().distance,
    );
}

#[test]
fn guard_boundary_difference_is_smaller_than_guard_absence() {
    let canon = bag("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
    let other_boundary = bag("fn f(n: i64) -> i64 { if n < 1 { return 0; } n }");
    let no_guard = bag("fn f(n: i64) -> i64 { n }");
    let weights = DistanceWeights::default();
    let near = compute_distance(&other_boundary, &canon, &weights).unwrap();
    let far = compute_distance(&no_guard, &canon, &weights).unwrap();
    let error_sub = |report: &realign::DistanceReport| {
        report
            .contributions
            .iter()
            .find(|c| c.property == PropertyKind::ErrorHandlingShape)
            .expect("error shape always contributes a row")
            .sub_distance
    };
    assert!(error_sub(&near) < error_sub(&far));
}

#[test]
fn dominant_contribution_comes_first() {
    let canon = bag("fn f(n: i64) -> i64 { if n <= 0 { return 0; } n }");
    let unguarded = bag("fn f(n: i64) -> i64 { n }");
    let report = compute_distance(&unguarded, &canon, &DistanceWeights::default()).unwrap();
    for pair in report.contributions.windows(2) {
        assert!(pair[0].weighted >= pair[1].weighted);
    }
    let total: f64 = report.contributions.iter().map(|c| c.share).sum();
    assert!((report.distance - total).abs() < 1e-12);
}

#[test]
fn mismatched_schema_bag_is_an_invariant_violation() {
    let mut stale = bag("fn f(n: i64) -> i64 { n }");
    stale.schema_version = SCHEMA_VERSION + 1;
    let fresh = bag("fn f(n: i64) -> i64 { n }");
    let err = compute_distance(&stale, &fresh, &DistanceWeights::default())
        .expect_err("schema mismatch must not be silently coerced");
    assert!(matches!(err, DistanceError::InvalidPropertyBag));
}
