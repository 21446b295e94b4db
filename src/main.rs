mod cli;
mod config;
mod pipelines;
mod stages;
mod utils;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{self, LevelFilter, debug, error, info, warn};
use crate::cli::{parse, Arguments, Command};
use crate::config::defs::{PipelineError, RunConfig, ALL_TOOL_TAGS};
use crate::config::species::Species;
use crate::config::store::ConfigStore;
use crate::stages::plots::ComparisonPlots;
use crate::stages::{PipelineReport, Stage};
use crate::utils::command::{check_version, CommandRunner};
use crate::utils::paths::ProjectDir;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();
    let args = parse();

    let store = ConfigStore::load(&args.config);

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        store.as_ref().map(ConfigStore::log_level).unwrap_or(LevelFilter::Info)
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n aDNA pipelines\n-------------\n");

    let store = match store {
        Ok(store) => store,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!("Project root is {}", store.project_root().display());

    let mut run_config = RunConfig::new(store, Arc::new(CommandRunner)).with_overwrite(args.overwrite);
    if let Some(threads) = args.threads {
        run_config = run_config.with_threads(threads);
    }
    debug!(
        "Using {} tool threads; {} physical cores available for worker pools",
        run_config.threads, run_config.available_cores
    );
    if run_config.overwrite {
        warn!("--overwrite given: existing artifacts will be recomputed");
    }
    let run_config = Arc::new(run_config);

    let report = match dispatch(&args, &run_config).await {
        Ok(Some(report)) => report,
        Ok(None) => return Ok(()),
        Err(e) => {
            error!("{} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    };

    report.log_summary();
    match write_report(&report, &run_config) {
        Ok(path) => info!("Run report written to {}", path.display()),
        Err(e) => warn!("Could not write run report: {}", e),
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


/// Runs the selected command. Only configuration and species selection errors
/// are returned; stage failures end up in the report.
async fn dispatch(args: &Arguments, run_config: &Arc<RunConfig>) -> Result<Option<PipelineReport>, PipelineError> {
    match &args.command {
        Command::Run { pipeline, species } => {
            let selected = select_species(run_config, species)?;
            Ok(Some(pipelines::run(*pipeline, run_config, &selected).await))
        }
        Command::Stage { step, species } => {
            let selected = select_species(run_config, species)?;
            Ok(Some(pipelines::run_step(*step, run_config, &selected).await))
        }
        Command::Compare { species } => {
            select_species(run_config, species)?;
            let stages: Vec<Box<dyn Stage>> = vec![Box::new(ComparisonPlots { groups: vec![species.clone()] })];
            Ok(Some(pipelines::run_stages(&stages, run_config, &[]).await))
        }
        Command::CheckTools => {
            check_tools(run_config).await;
            Ok(None)
        }
    }
}

fn select_species(run_config: &RunConfig, ids: &[String]) -> Result<Vec<Species>, PipelineError> {
    let selected = run_config.store.species().select(ids)?;
    if selected.is_empty() {
        return Err(PipelineError::Config("No species configured".to_string()));
    }
    info!(
        "Selected species: {}",
        selected.iter().map(|s| s.id()).collect::<Vec<_>>().join(", ")
    );
    Ok(selected)
}

async fn check_tools(run_config: &RunConfig) {
    for &tool in ALL_TOOL_TAGS {
        match check_version(&run_config.store, run_config.runner.as_ref(), tool).await {
            Ok(version) => info!("{}: {}", tool, version),
            Err(e) => warn!("{}: {}", tool, e),
        }
    }
}

fn write_report(report: &PipelineReport, run_config: &RunConfig) -> Result<PathBuf, PipelineError> {
    let dir = run_config.layout.project_dir(ProjectDir::Logs)?;
    let path = dir.join(format!(
        "pipeline_run_{}.tsv",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));
    report.write_tsv(&path)?;
    Ok(path)
}
