use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "realign", about = "Structural distance + normalization pipeline", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Emit the JSON schemas of the public record types.
    Schema {
        #[arg(long)]
        pretty: bool,
    },
    /// Extract the property bag of a program.
    Extract {
        path: PathBuf,
    },
    /// Distance between two programs' property bags.
    Distance {
        candidate: PathBuf,
        canon: PathBuf,
        #[arg(long)]
        weights: Option<PathBuf>,
    },
    /// Run the transformation pipeline against a stored or supplied canon.
    Converge {
        candidate: PathBuf,
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        canon: Option<PathBuf>,
        #[arg(long, default_value_t = 0.05)]
        threshold: f64,
        #[arg(long = "max-iterations", default_value_t = crate::pipeline::DEFAULT_MAX_ITERATIONS)]
        max_iterations: u32,
        #[arg(long)]
        weights: Option<PathBuf>,
    },
    /// Register a canon for a task id.
    CanonAdd {
        path: PathBuf,
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long)]
        store: PathBuf,
    },
}
