//! Force tracker CLI
//!
//! Replays recorded location reports through the tracking service and prints
//! the filtered state of every force.
//!
//! # Usage
//!
//! ```bash
//! # Filter a recorded log and forecast 60 s ahead
//! forcetrack replay --input reports.json --horizon 60
//!
//! # Same, with custom noise settings and dead zones, as JSON
//! forcetrack replay --input reports.json --config tracker.json \
//!     --dead-zones zones.json --format json
//! ```

use clap::{Parser, Subcommand};

pub mod replay;

/// Force tracker command line interface
#[derive(Parser, Debug)]
#[command(name = "forcetrack")]
#[command(author, version, about = "Kalman-filtered tracking of field force locations")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a recorded report log and print the filtered forces
    Replay(replay::ReplayArgs),

    /// Display version information
    Version,
}
