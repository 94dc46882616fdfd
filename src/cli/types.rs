//! CLI type definitions
//!
//! Clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::domain::models::MergeStrategy;

#[derive(Parser, Debug)]
#[command(name = "storyweaver")]
#[command(about = "Deduplicate and order LLM-generated user stories", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .storyweaver/
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Merge duplicate stories from a JSON array
    Merge {
        /// JSON file holding an array of stories
        input: PathBuf,

        /// Write merged stories here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Override the configured merge strategy
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Assign story ids and order stories by dependency
        #[arg(long)]
        catalog: bool,
    },

    /// List candidate duplicate pairs without verifying them
    Candidates {
        /// JSON file holding an array of stories
        input: PathBuf,
    },

    /// Compare story counts before and after a merge
    Report {
        /// Stories before merging
        original: PathBuf,

        /// Stories after merging
        merged: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Rule-based verification and merging, no model calls
    Heuristic,
    /// Model-backed verification and synthesis
    Model,
}

impl From<StrategyArg> for MergeStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Heuristic => Self::Heuristic,
            StrategyArg::Model => Self::Model,
        }
    }
}
