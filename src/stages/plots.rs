// src/stages/plots.rs: R plots per species and across species

use std::fs;
use std::path::{Path, PathBuf};
use crate::config::defs::*;
use crate::stages::{discover_genomes, Artifact, Stage, StageContext, WorkItem};
use crate::utils::command::{rscript, ToolInvocation};
use crate::utils::file::{file_name, list_files_with_suffix};
use crate::utils::naming;
use crate::utils::paths::{GenomeDir, PlotKind, ProjectDir, SpeciesDir};


fn create_dir(path: PathBuf) -> Result<PathBuf, PipelineError> {
    fs::create_dir_all(&path)
        .map_err(|e| PipelineError::IOError(format!("Cannot create directory {}: {}", path.display(), e)))?;
    Ok(path)
}

fn rscript_invocation(ctx: &StageContext, item: &WorkItem, script_args: Vec<String>) -> Result<ToolInvocation, PipelineError> {
    Ok(ctx.tool(RSCRIPT_TAG)?.args(rscript::args(item.input(0)?, &script_args)))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}


/// One R script per species table. Each item is `[script, table]` and
/// renders into its own directory.
pub struct SpeciesPlot {
    pub kind: PlotKind,
}

impl SpeciesPlot {
    fn script(&self, ctx: &StageContext) -> PathBuf {
        let (folder, script) = match self.kind {
            PlotKind::ProcessedReads => (FOLDER_RAW_READS_PROCESSING, R_SCRIPT_PLOT_READS_BEFORE_AFTER_PROCESSING),
            PlotKind::ReadLengthDistribution => (FOLDER_RAW_READS_PROCESSING, R_SCRIPT_PLOT_SEQUENCE_LENGTH_DISTRIBUTION),
            PlotKind::Depth => (FOLDER_REF_GENOME_PROCESSING, R_SCRIPT_PLOT_DEPTH),
            PlotKind::Breadth => (FOLDER_REF_GENOME_PROCESSING, R_SCRIPT_PLOT_BREADTH),
            PlotKind::EndogenousReads => (FOLDER_REF_GENOME_PROCESSING, R_SCRIPT_PLOT_ENDOGENOUS_READS),
        };
        ctx.cfg.layout.r_script(folder, script)
    }

    fn species_table(&self, ctx: &StageContext, dir: SpeciesDir, name: String) -> Result<Vec<WorkItem>, PipelineError> {
        let table = ctx.cfg.layout.species_dir(ctx.species()?, dir)?.join(name);
        if !table.exists() {
            return Err(PipelineError::MissingPrerequisite(format!("Input file not found: {}", table.display())));
        }
        Ok(vec![WorkItem::new(file_name(&table), vec![self.script(ctx), table])])
    }
}

impl Stage for SpeciesPlot {
    fn step(&self) -> Step {
        match self.kind {
            PlotKind::ProcessedReads | PlotKind::ReadLengthDistribution => Step::GenerateRawReadsPlots,
            _ => Step::GenerateRefGenomePlots,
        }
    }

    fn name(&self) -> &'static str {
        match self.kind {
            PlotKind::ProcessedReads => "plot_reads_processing_result",
            PlotKind::ReadLengthDistribution => "plot_read_length_distribution",
            PlotKind::Depth => "plot_depth",
            PlotKind::Breadth => "plot_breadth",
            PlotKind::EndogenousReads => "plot_endogenous_reads",
        }
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let species = ctx.species()?;
        match self.kind {
            PlotKind::ProcessedReads => self.species_table(
                ctx,
                SpeciesDir::ProcessedReadsResult,
                naming::reads_processing_result_name(species.id()),
            ),
            PlotKind::ReadLengthDistribution => self.species_table(
                ctx,
                SpeciesDir::ReadLengthDistribution,
                naming::read_length_distribution_name(species.id()),
            ),
            PlotKind::Depth | PlotKind::Breadth => {
                let mut items = Vec::new();
                for genome in discover_genomes(ctx)? {
                    let dir = ctx.cfg.layout.genome_dir(species, &genome.id, GenomeDir::Coverage)?;
                    for analysis in list_files_with_suffix(&dir, FILE_ENDING_ANALYSIS_TSV)? {
                        items.push(WorkItem::new(file_name(&analysis), vec![self.script(ctx), analysis]).with_genome(&genome));
                    }
                }
                Ok(items)
            }
            PlotKind::EndogenousReads => {
                let mut items = Vec::new();
                for genome in discover_genomes(ctx)? {
                    let table = ctx
                        .cfg
                        .layout
                        .genome_dir(species, &genome.id, GenomeDir::EndogenousReads)?
                        .join(naming::endogenous_reads_name(species.id()));
                    if table.exists() {
                        items.push(WorkItem::new(file_name(&table), vec![self.script(ctx), table]).with_genome(&genome));
                    }
                }
                Ok(items)
            }
        }
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        let species = ctx.species()?;
        let dir = match (&item.genome, self.kind) {
            (None, kind) => ctx.cfg.layout.species_dir(species, SpeciesDir::Plots(kind))?,
            (Some(genome), PlotKind::EndogenousReads) => {
                ctx.cfg.layout.genome_dir(species, &genome.id, GenomeDir::Plots(self.kind))?
            }
            (Some(genome), kind) => {
                let sample = naming::strip_suffix(&item.label, FILE_ENDING_ANALYSIS_TSV);
                create_dir(ctx.cfg.layout.genome_dir(species, &genome.id, GenomeDir::Plots(kind))?.join(sample))?
            }
        };
        Ok(Artifact::in_place(dir))
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        let species = ctx.species()?;
        rscript_invocation(
            ctx,
            item,
            vec![species.id().to_string(), path_string(item.input(1)?), path_string(target)],
        )
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonKind {
    ReadsProcessing,
    DepthBreadth,
    EndogenousReads,
}

impl ComparisonKind {
    pub const ALL: [ComparisonKind; 3] = [
        ComparisonKind::ReadsProcessing,
        ComparisonKind::DepthBreadth,
        ComparisonKind::EndogenousReads,
    ];

    fn script(&self) -> &'static str {
        match self {
            ComparisonKind::ReadsProcessing => R_SCRIPT_PLOT_COMPARE_SPECIES_READS_BEFORE_AFTER_PROCESSING,
            ComparisonKind::DepthBreadth => R_SCRIPT_PLOT_COMPARE_SPECIES_DEPTH_BREADTH,
            ComparisonKind::EndogenousReads => R_SCRIPT_PLOT_COMPARE_SPECIES_ENDOGENOUS_READS,
        }
    }

    fn folder(&self) -> &'static str {
        match self {
            ComparisonKind::ReadsProcessing => FOLDER_PROCESSED_READS,
            ComparisonKind::DepthBreadth => FOLDER_DEPTH_BREADTH,
            ComparisonKind::EndogenousReads => FOLDER_ENDOGENOUS_READS,
        }
    }
}

/// Cross-species plots, one output folder per species group and plot kind.
pub struct ComparisonPlots {
    pub groups: Vec<Vec<String>>,
}

impl ComparisonPlots {
    fn group_dir_name(group: &[String]) -> String {
        group.join("_")
    }
}

impl Stage for ComparisonPlots {
    fn step(&self) -> Step {
        Step::GenerateSpeciesComparisonPlots
    }

    fn project_scoped(&self) -> bool {
        true
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let registry = ctx.cfg.store.species();
        let processing_folder = format!("{}/{}", FOLDER_ADDITIONAL_ANALYSIS, FOLDER_SPECIES_COMPARISON);
        let mut items = Vec::new();
        for group in &self.groups {
            if group.len() < 2 {
                return Err(PipelineError::Config(format!(
                    "Species comparison needs at least two species, got [{}]", group.join(",")
                )));
            }
            for id in group {
                registry.lookup(id)?;
            }
            for kind in ComparisonKind::ALL {
                let label = format!("{}/{}", kind.folder(), Self::group_dir_name(group));
                let script = ctx.cfg.layout.r_script(&processing_folder, kind.script());
                items.push(WorkItem::new(label, vec![script]).with_species_ids(group));
            }
        }
        Ok(items)
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        let base = ctx.cfg.layout.project_dir(ProjectDir::SpeciesComparisonPlots)?;
        Ok(Artifact::in_place(create_dir(base.join(&item.label))?))
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        rscript_invocation(
            ctx,
            item,
            vec![path_string(ctx.cfg.layout.root()), item.species_ids.join(","), path_string(target)],
        )
    }
}
