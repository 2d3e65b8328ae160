//! Extraction-level properties: identity, renaming invariance, fail-fast
//! parsing.

use realign::{
    compute_distance, extract_properties_from_source, DistanceWeights, LoopShape, ParseError,
};

#[test]
fn identity_distance_is_zero() {
    let source = "fn f(n: i64) -> i64 {\n    if n <= 0 {\n        return 0;\n    }\n    let mut total = 0;\n    for i in 0..n {\n        total = total + i;\n    }\n    total\n}";
    let bag = extract_properties_from_source(source).expect("source must parse");
    let report =
        compute_distance(&bag, &bag, &DistanceWeights::default()).expect("bags are valid");
    assert_eq!(report.distance, 0.0);
}

#[test]
fn renaming_invariance_splits_the_two_hashes() {
    let original = "fn f(count: i64) -> i64 { let mut total = 0; for i in 0..count { total = total + i; } total }";
    // A bijective, conflict-free renaming of every local identifier.
    let renamed = "fn f(n: i64) -> i64 { let mut acc = 0; for k in 0..n { acc = acc + k; } acc }";
    let a = extract_properties_from_source(original).expect("original must parse");
    let b = extract_properties_from_source(renamed).expect("renamed must parse");
    assert_eq!(a.alpha_renamed_hash, b.alpha_renamed_hash);
    assert_ne!(a.ast_hash, b.ast_hash);
}

#[test]
fn whitespace_does_not_affect_either_hash() {
    let compact = "fn f(n: i64) -> i64 { n + 1 }";
    let sprawling = "fn f(\n    n: i64\n) -> i64 {\n        n     + 1\n}";
    let a = extract_properties_from_source(compact).expect("compact must parse");
    let b = extract_properties_from_source(sprawling).expect("sprawling must parse");
    assert_eq!(a.ast_hash, b.ast_hash);
    assert_eq!(a.alpha_renamed_hash, b.alpha_renamed_hash);
}

#[test]
fn malformed_source_fails_fast() {
    let err = extract_properties_from_source("fn f(n: i64 -> i64 { n }")
        .expect_err("unbalanced signature must not extract");
    assert!(matches!(err, ParseError::Syntax(_)));
}

#[test]
fn every_property_is_populated_for_a_parsed_program() {
    let bag = extract_properties_from_source(
        "fn f(n: i64) -> i64 { if n < 0 { panic!(\"negative\"); } let mut v = 0; while v < n { v = v + 1; } v }",
    )
    .expect("source must parse");
    assert!(!bag.ast_hash.is_empty());
    assert!(!bag.alpha_renamed_hash.is_empty());
    assert_eq!(bag.loop_shape, LoopShape::While);
    assert_eq!(bag.error_handling_shape.guard_count, 1);
    assert_eq!(bag.error_handling_shape.raise_count, 1);
    assert_eq!(bag.identifiers, vec!["n".to_string(), "v".to_string()]);
}

#[test]
fn extraction_is_a_pure_function_of_the_source() {
    let source = "fn f(a: i64, b: i64) -> i64 { if a > b { a } else { b } }";
    let first = extract_properties_from_source(source).expect("must parse");
    let second = extract_properties_from_source(source).expect("must parse");
    assert_eq!(first, second);
}
