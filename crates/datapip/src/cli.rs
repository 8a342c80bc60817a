use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "datapip", version, about = "Multi-agent data pipeline runner")]
pub struct Cli {
    /// Path to config file (default: ./datapip.toml, then the built-in pipeline)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan and execute a task
    Run {
        #[command(flatten)]
        task: TaskArgs,

        /// Data file for the collect step (.csv, .json, or .jsonl)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Extra task parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,

        /// Write the run result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the delegation plan without running it
    Plan {
        #[command(flatten)]
        task: TaskArgs,
    },
    /// Validate the config and the tool bindings
    Check,
}

#[derive(clap::Args, Debug)]
pub struct TaskArgs {
    /// Task description
    #[arg(short, long)]
    pub task: String,

    /// Capabilities to run (comma separated); skips keyword classification
    #[arg(short, long, value_delimiter = ',')]
    pub requires: Vec<String>,
}
