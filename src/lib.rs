//! Structural distance and normalization pipeline for generated
//! programs: property extraction, canon-keyed distance scoring and an
//! ordered set of validated source-to-source transformers.

pub mod canon;
pub mod cli;
pub mod commands;
pub mod distance;
pub mod idents;
pub mod interp;
pub mod pipeline;
pub mod program;
pub mod properties;
pub mod transform;
pub mod validate;

pub use canon::{Canon, CanonError, CanonStore, CanonSystem, DirCanonStore, MemoryCanonStore, StoredCanon};
pub use commands::execute_command;
pub use distance::{
    compute_distance, DistanceError, DistanceReport, DistanceWeights, PropertyContribution,
    PropertyKind,
};
pub use interp::{run_entry, InterpError, Outcome, ProbeConfig, Value};
pub use pipeline::{
    run_pipeline, run_pipeline_with, PipelineConfig, PipelineError, PipelineOutcome,
    TransformationResult, DEFAULT_MAX_ITERATIONS,
};
pub use program::{ParseError, Program};
pub use properties::{
    extract_properties, extract_properties_from_source, ControlFlowShape, ErrorShape, LoopShape,
    NamingStyle, PropertyBag, SCHEMA_VERSION,
};
pub use transform::{registry, TransformAttempt, Transformer, ValidationMode};
pub use validate::{
    are_semantically_equivalent, check_equivalence, is_well_formed, Equivalence, WellFormedness,
};
