use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;

use crate::canon::{CanonSystem, DirCanonStore, StoredCanon};
use crate::cli::Command;
use crate::distance::{compute_distance, DistanceWeights};
use crate::pipeline::{run_pipeline_with, PipelineConfig, TransformationResult};
use crate::properties::{extract_properties_from_source, PropertyBag};

pub fn execute_command(command: Command) -> Result<()> {
    match command {
        Command::Schema { pretty } => {
            let schemas = json!({
                "property_bag": schemars::schema_for!(PropertyBag),
                "stored_canon": schemars::schema_for!(StoredCanon),
                "transformation_result": schemars::schema_for!(TransformationResult),
                "distance_weights": schemars::schema_for!(DistanceWeights),
            });
            print_json(&schemas, pretty)?;
        }
        Command::Extract { path } => {
            let source = read_source(&path)?;
            let bag = extract_properties_from_source(&source)
                .with_context(|| format!("extract {}", path.display()))?;
            print_json(&bag, true)?;
        }
        Command::Distance {
            candidate,
            canon,
            weights,
        } => {
            let candidate_bag = extract_properties_from_source(&read_source(&candidate)?)
                .with_context(|| format!("extract {}", candidate.display()))?;
            let canon_bag = extract_properties_from_source(&read_source(&canon)?)
                .with_context(|| format!("extract {}", canon.display()))?;
            let weights = load_weights(weights)?;
            let report = compute_distance(&candidate_bag, &canon_bag, &weights)?;
            print_json(&report, true)?;
        }
        Command::Converge {
            candidate,
            task_id,
            store,
            canon,
            threshold,
            max_iterations,
            weights,
        } => {
            let store = Arc::new(DirCanonStore::new(&store)?);
            let system = CanonSystem::new(store);
            let supplied = match &canon {
                Some(path) => Some(read_source(path)?),
                None => None,
            };
            let canon = system.get_or_create(&task_id, supplied.as_deref())?;
            let config = PipelineConfig {
                weights: load_weights(weights)?,
                ..PipelineConfig::default()
            };
            let result = run_pipeline_with(
                &read_source(&candidate)?,
                &canon,
                threshold,
                max_iterations,
                &config,
            )?;
            print_json(&result, true)?;
        }
        Command::CanonAdd {
            path,
            task_id,
            store,
        } => {
            let store = Arc::new(DirCanonStore::new(&store)?);
            let system = CanonSystem::new(store);
            let source = read_source(&path)?;
            let canon = system.get_or_create(&task_id, Some(&source))?;
            print_json(
                &json!({
                    "task_id": canon.task_id,
                    "ast_hash": canon.properties.ast_hash,
                }),
                true,
            )?;
        }
    }
    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn load_weights(path: Option<PathBuf>) -> Result<DistanceWeights> {
    let Some(path) = path else {
        return Ok(DistanceWeights::default());
    };
    let data = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    let weights: DistanceWeights =
        serde_json::from_slice(&data).with_context(|| format!("decode {}", path.display()))?;
    weights
        .validate()
        .with_context(|| format!("weights in {}", path.display()))?;
    Ok(weights)
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{rendered}");
    Ok(())
}
