//! Transformation pipeline: iterate transformers until the distance to
//! canon stabilizes at or under the success threshold.
//!
//! State machine: `Idle → Iterating → {Converged | Exhausted |
//! RolledBack}`. Each iteration re-measures distance, picks the
//! applicable transformer whose target property currently contributes
//! most (registry order breaks ties), validates the rewrite and either
//! accepts it or rolls back to the prior candidate. Every expected
//! failure mode lands in the structured result; only an unparseable
//! candidate or malformed configuration surface as errors. The canon is
//! never mutated.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canon::Canon;
use crate::distance::{compute_distance, DistanceError, DistanceReport, DistanceWeights, PropertyKind};
use crate::interp::ProbeConfig;
use crate::program::{ParseError, Program};
use crate::properties::extract_properties;
use crate::transform::{registry, Transformer, ValidationMode};
use crate::validate::{check_equivalence, is_well_formed, Equivalence};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("candidate does not parse: {0}")]
    Parse(#[from] ParseError),
    #[error("success threshold must be a finite value in [0, 1], got {0}")]
    Threshold(f64),
    #[error("iteration budget must be at least 1")]
    ZeroBudget,
    #[error(transparent)]
    Distance(#[from] DistanceError),
}

/// Terminal pipeline state. Only `Converged` maps to
/// `transformation_success = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    Converged,
    Exhausted,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Idle,
    Iterating,
    Done(PipelineOutcome),
}

/// Record of one pipeline invocation; immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransformationResult {
    pub original_code: String,
    pub final_code: String,
    pub initial_distance: f64,
    pub final_distance: f64,
    /// Transformer names actually applied, in application order.
    pub applied_transformers: Vec<String>,
    pub outcome: PipelineOutcome,
    pub transformation_success: bool,
    pub failure_reason: Option<String>,
    pub iterations: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub weights: DistanceWeights,
    pub probe: ProbeConfig,
}

/// Run the pipeline with default weights and probe limits.
pub fn run_pipeline(
    candidate_code: &str,
    canon: &Canon,
    success_threshold: f64,
    max_iterations: u32,
) -> Result<TransformationResult, PipelineError> {
    run_pipeline_with(
        candidate_code,
        canon,
        success_threshold,
        max_iterations,
        &PipelineConfig::default(),
    )
}

pub fn run_pipeline_with(
    candidate_code: &str,
    canon: &Canon,
    success_threshold: f64,
    max_iterations: u32,
    config: &PipelineConfig,
) -> Result<TransformationResult, PipelineError> {
    if !success_threshold.is_finite() || !(0.0..=1.0).contains(&success_threshold) {
        return Err(PipelineError::Threshold(success_threshold));
    }
    if max_iterations == 0 {
        return Err(PipelineError::ZeroBudget);
    }

    let state = PipelineState::Idle;
    let mut current = Program::parse(candidate_code)?;
    let mut report = compute_distance(
        &extract_properties(&current),
        &canon.properties,
        &config.weights,
    )?;
    let initial_distance = report.distance;

    let transformers = registry();
    // Transformers rejected at the current distance plateau; cleared on
    // strict progress.
    let mut plateau_exhausted: HashSet<&'static str> = HashSet::new();
    let mut applied: Vec<String> = Vec::new();
    let mut iterations = 0;
    let mut failure_reason: Option<String> = None;

    debug_assert_eq!(state, PipelineState::Idle);
    let mut state = PipelineState::Iterating;
    while iterations < max_iterations {
        iterations += 1;

        if report.distance <= success_threshold {
            state = PipelineState::Done(PipelineOutcome::Converged);
            break;
        }

        let mut eligible: Vec<&dyn Transformer> = transformers
            .iter()
            .filter(|t| !plateau_exhausted.contains(t.name()))
            .filter(|t| t.can_transform(&current, canon))
            .map(|t| t.as_ref())
            .collect();
        if eligible.is_empty() {
            state = PipelineState::Done(PipelineOutcome::Exhausted);
            failure_reason =
                Some("no applicable transformer and distance above threshold".to_string());
            break;
        }
        rank_by_contribution(&mut eligible, &transformers, &report);

        let mut progressed = false;
        for transformer in eligible {
            match try_step(transformer, &current, canon, &report, config)? {
                StepVerdict::Accepted {
                    program,
                    report: new_report,
                } => {
                    if new_report.distance < report.distance {
                        plateau_exhausted.clear();
                    } else {
                        // Accepted but flat: no progress credit, and the
                        // variant must not be reselected at this plateau.
                        plateau_exhausted.insert(transformer.name());
                    }
                    applied.push(transformer.name().to_string());
                    current = program;
                    report = new_report;
                    progressed = true;
                    break;
                }
                StepVerdict::Rejected => {
                    plateau_exhausted.insert(transformer.name());
                }
            }
        }

        if !progressed {
            state = PipelineState::Done(PipelineOutcome::RolledBack);
            failure_reason =
                Some("every eligible transformer was rejected by validation".to_string());
            break;
        }
    }

    // Budget ran out mid-iteration, or the last accepted step reached
    // the threshold exactly at the final iteration.
    if state == PipelineState::Iterating {
        state = if report.distance <= success_threshold {
            PipelineState::Done(PipelineOutcome::Converged)
        } else {
            failure_reason = Some("iteration budget exhausted above threshold".to_string());
            PipelineState::Done(PipelineOutcome::Exhausted)
        };
    }
    let outcome = match state {
        PipelineState::Done(outcome) => outcome,
        // Unreachable by construction; treat as a non-success.
        PipelineState::Idle | PipelineState::Iterating => PipelineOutcome::Exhausted,
    };

    Ok(TransformationResult {
        original_code: candidate_code.to_string(),
        final_code: current.source().to_string(),
        initial_distance,
        final_distance: report.distance,
        applied_transformers: applied,
        outcome,
        transformation_success: outcome == PipelineOutcome::Converged,
        failure_reason: if outcome == PipelineOutcome::Converged {
            None
        } else {
            failure_reason
        },
        iterations,
    })
}

enum StepVerdict {
    Accepted {
        program: Program,
        report: DistanceReport,
    },
    Rejected,
}

/// Apply one transformer and validate its output: well-formedness
/// always, behavioral equivalence where execution is feasible, and the
/// monotonicity gate: a step that increases distance is never accepted.
fn try_step(
    transformer: &dyn Transformer,
    current: &Program,
    canon: &Canon,
    report: &DistanceReport,
    config: &PipelineConfig,
) -> Result<StepVerdict, PipelineError> {
    let attempt = transformer.transform(current, canon);
    if !attempt.applied {
        return Ok(StepVerdict::Rejected);
    }

    let verdict = is_well_formed(&attempt.code);
    if !verdict.ok {
        return Ok(StepVerdict::Rejected);
    }
    let Ok(program) = Program::parse(&attempt.code) else {
        return Ok(StepVerdict::Rejected);
    };

    let reference = match transformer.validation() {
        ValidationMode::AgainstCanon => canon.program.source(),
        ValidationMode::AgainstPrior => current.source(),
    };
    if check_equivalence(&attempt.code, reference, &config.probe) == Equivalence::NotEquivalent {
        return Ok(StepVerdict::Rejected);
    }

    let new_report = compute_distance(
        &extract_properties(&program),
        &canon.properties,
        &config.weights,
    )?;
    if new_report.distance > report.distance {
        return Ok(StepVerdict::Rejected);
    }
    Ok(StepVerdict::Accepted {
        program,
        report: new_report,
    })
}

/// Order eligible transformers by the current weighted contribution of
/// their target property, descending; the fixed registry order breaks
/// ties.
fn rank_by_contribution(
    eligible: &mut [&dyn Transformer],
    transformers: &[Box<dyn Transformer>],
    report: &DistanceReport,
) {
    let contribution = |kind: PropertyKind| -> f64 {
        report
            .contributions
            .iter()
            .find(|c| c.property == kind)
            .map(|c| c.weighted)
            .unwrap_or(0.0)
    };
    let registry_index = |name: &str| -> usize {
        transformers
            .iter()
            .position(|t| t.name() == name)
            .unwrap_or(usize::MAX)
    };
    eligible.sort_by(|a, b| {
        contribution(b.target())
            .partial_cmp(&contribution(a.target()))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| registry_index(a.name()).cmp(&registry_index(b.name())))
    });
}
