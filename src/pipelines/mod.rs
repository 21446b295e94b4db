//! Pipeline drivers. Each pipeline is an ordered list of stages run
//! stage-major: a stage finishes for every selected species before the next
//! one starts.

pub mod raw_reads;
pub mod ref_genome;
pub mod post_processing;

use std::sync::Arc;
use std::time::Instant;
use clap::ValueEnum;
use log::info;
use crate::config::defs::{RunConfig, Step};
use crate::config::species::Species;
use crate::stages::{run_for_species, run_stage, PipelineReport, Scope, Stage};


#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Pipeline {
    #[default]
    All,
    RawReads,
    RefGenome,
    PostProcessing,
}

impl Pipeline {
    pub fn stages(&self, comparisons: &[Vec<String>]) -> Vec<Box<dyn Stage>> {
        match self {
            Pipeline::All => {
                let mut stages = raw_reads::stages();
                stages.extend(ref_genome::stages());
                stages.extend(post_processing::stages(comparisons));
                stages
            }
            Pipeline::RawReads => raw_reads::stages(),
            Pipeline::RefGenome => ref_genome::stages(),
            Pipeline::PostProcessing => post_processing::stages(comparisons),
        }
    }
}

/// Every stage that implements `step`, in pipeline order.
pub fn stages_for_step(step: Step, comparisons: &[Vec<String>]) -> Vec<Box<dyn Stage>> {
    Pipeline::All
        .stages(comparisons)
        .into_iter()
        .filter(|s| s.step() == step)
        .collect()
}

/// Runs `stages` in order for the given species. Project-scoped stages run
/// once after the species loop of their position.
pub async fn run_stages(stages: &[Box<dyn Stage>], cfg: &Arc<RunConfig>, species: &[Species]) -> PipelineReport {
    let mut report = PipelineReport::default();
    for stage in stages {
        let start = Instant::now();
        if stage.project_scoped() {
            report.push(run_stage(stage.as_ref(), cfg, Scope::Project).await);
        } else {
            for stage_report in run_for_species(stage.as_ref(), cfg, species).await {
                report.push(stage_report);
            }
        }
        info!("Finished {} in {} milliseconds.", stage.name(), start.elapsed().as_millis());
    }
    report
}

pub async fn run(pipeline: Pipeline, cfg: &Arc<RunConfig>, species: &[Species]) -> PipelineReport {
    let comparisons = cfg.store.comparisons();
    info!("Running pipeline {:?} for {} species", pipeline, species.len());
    run_stages(&pipeline.stages(&comparisons), cfg, species).await
}

/// Stand-alone re-run of one step.
pub async fn run_step(step: Step, cfg: &Arc<RunConfig>, species: &[Species]) -> PipelineReport {
    let comparisons = cfg.store.comparisons();
    info!("Running step {} for {} species", step.key(), species.len());
    run_stages(&stages_for_step(step, &comparisons), cfg, species).await
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_step_has_a_stage() {
        let groups = vec![vec!["Bger".to_string(), "Dsim".to_string()]];
        for step in Step::value_variants() {
            assert!(!stages_for_step(*step, &groups).is_empty(), "no stage for {}", step.key());
        }
    }

    #[test]
    fn test_pipeline_order_follows_groups() {
        let stages = Pipeline::All.stages(&[]);
        let groups: Vec<_> = stages.iter().map(|s| s.step().group()).collect();
        let mut sorted = groups.clone();
        sorted.sort_by_key(|g| *g as u8);
        assert_eq!(groups, sorted);
        assert_eq!(stages.first().map(|s| s.name()), Some("qc_raw"));
    }
}
