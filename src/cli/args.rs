use std::path::PathBuf;
use clap::{Parser, Subcommand};
use crate::config::defs::Step;
use crate::pipelines::Pipeline;

#[derive(Parser, Debug, Clone)]
#[command(name = "adna-pipelines", version, about = "Ancient DNA processing pipelines")]
pub struct Arguments {

    #[arg(short = 'c', long = "config", default_value = "config.yaml", global = true)]
    pub config: PathBuf,

    #[arg(short = 'v', long = "verbose", action, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, help = "Threads handed to each external tool; defaults to threads_default from the config")]
    pub threads: Option<usize>,

    #[arg(long, default_value_t = false, global = true, help = "Recompute artifacts that already exist")]
    pub overwrite: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a whole pipeline, or all of them in order
    Run {
        #[arg(default_value = "all", value_enum)]
        pipeline: Pipeline,

        #[arg(short = 's', long, value_delimiter = ',', help = "Species ids; defaults to every configured species")]
        species: Vec<String>,
    },

    /// Re-run a single step
    Stage {
        #[arg(value_enum)]
        step: Step,

        #[arg(short = 's', long, value_delimiter = ',')]
        species: Vec<String>,
    },

    /// Species comparison plots for one group of species
    Compare {
        #[arg(required = true, num_args = 2..)]
        species: Vec<String>,
    },

    /// Print the version of every configured tool
    CheckTools,
}
