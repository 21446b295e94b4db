// src/stages/reads.rs: fastp adapter removal, quality filtering and deduplication

use std::path::Path;
use crate::config::defs::*;
use crate::stages::{Artifact, Stage, StageContext, WorkItem};
use crate::utils::command::{fastp, ToolInvocation};
use crate::utils::fastx::pair_raw_reads;
use crate::utils::file::{file_name, list_files_with_suffix};
use crate::utils::naming::{fastp_side_name, phase_output_name};
use crate::utils::paths::{ReadPhase, SpeciesDir};


/// Filter thresholds for one step, each overridable per species.
fn filters(ctx: &StageContext, step: Step, phred_default: u32, poly_x_default: Option<u32>) -> fastp::Filters {
    fastp::Filters {
        length_required: ctx.setting(step, SETTING_LENGTH_REQUIRED, DEFAULT_LENGTH_REQUIRED),
        trim_poly_x: ctx.setting(step, SETTING_TRIM_POLY_X, poly_x_default),
        qualified_quality_phred: ctx.setting(step, SETTING_QUALIFIED_QUALITY_PHRED, phred_default),
        unqualified_percent_limit: ctx.setting(step, SETTING_UNQUALIFIED_PERCENT_LIMIT, DEFAULT_UNQUALIFIED_PERCENT_LIMIT),
        n_base_limit: ctx.setting(step, SETTING_N_BASE_LIMIT, DEFAULT_N_BASE_LIMIT),
    }
}

/// Output of `to` for an input of `from`, in the `to` phase folder.
fn phase_output(ctx: &StageContext, item: &WorkItem, from: ReadPhase, to: ReadPhase) -> Result<Artifact, PipelineError> {
    let dir = ctx.cfg.layout.species_dir(ctx.species()?, SpeciesDir::Reads(to))?;
    Ok(Artifact::staged(dir.join(phase_output_name(&item.label, from, to))))
}

/// Sibling of the canonical output, written by fastp next to it.
fn side_path(ctx: &StageContext, item: &WorkItem, phase: ReadPhase, from: ReadPhase, side: &str) -> Result<std::path::PathBuf, PipelineError> {
    let canonical = phase_output(ctx, item, from, phase)?.path;
    Ok(canonical.with_file_name(fastp_side_name(&file_name(&canonical), phase, side)))
}

fn phase_inputs(ctx: &StageContext, phase: ReadPhase) -> Result<Vec<WorkItem>, PipelineError> {
    let dir = ctx.cfg.layout.species_dir(ctx.species()?, SpeciesDir::Reads(phase))?;
    Ok(list_files_with_suffix(&dir, phase.file_ending())?
        .iter()
        .map(|f| WorkItem::for_file(f))
        .collect())
}


/// Paired R1/R2 files are merged, unpaired R1 files trimmed single-end.
pub struct AdapterRemoval;

impl AdapterRemoval {
    fn adapters(&self, ctx: &StageContext) -> Result<(String, String), PipelineError> {
        let r1: Option<String> = ctx.setting(self.step(), SETTING_ADAPTER_R1, None);
        let r2: Option<String> = ctx.setting(self.step(), SETTING_ADAPTER_R2, None);
        match (r1, r2) {
            (Some(r1), Some(r2)) if !r1.is_empty() && !r2.is_empty() => Ok((r1, r2)),
            _ => Err(PipelineError::Config(format!(
                "{} and {} must be set for {}", SETTING_ADAPTER_R1, SETTING_ADAPTER_R2, ctx.scope_name()
            ))),
        }
    }
}

impl Stage for AdapterRemoval {
    fn step(&self) -> Step {
        Step::AdapterRemoveAndMerge
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let dir = ctx.cfg.layout.species_dir(ctx.species()?, SpeciesDir::Reads(ReadPhase::Raw))?;
        let raw = list_files_with_suffix(&dir, FILE_ENDING_FASTQ_GZ)?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        self.adapters(ctx)?;

        let pairing = pair_raw_reads(&raw);
        let mut items: Vec<WorkItem> = pairing
            .pairs
            .into_iter()
            .map(|(r1, r2)| WorkItem::new(file_name(&r1), vec![r1, r2]))
            .collect();
        items.extend(pairing.singles.iter().map(|r1| WorkItem::for_file(r1)));
        items.extend(
            pairing
                .orphans
                .iter()
                .map(|r2| WorkItem::for_file(r2).skipped("R2 file without matching R1")),
        );
        Ok(items)
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        phase_output(ctx, item, ReadPhase::Raw, ReadPhase::AdapterRemoved)
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        let (adapter_r1, adapter_r2) = self.adapters(ctx)?;
        let threads = ctx.threads(self.step());
        let filters = filters(ctx, self.step(), DEFAULT_ADAPTER_QUALIFIED_QUALITY_PHRED, Some(DEFAULT_TRIM_POLY_X));
        let side = |s: &str| side_path(ctx, item, ReadPhase::AdapterRemoved, ReadPhase::Raw, s);
        let json = side("_report.json")?;
        let html = side("_report.html")?;

        let args = if item.inputs.len() == 2 {
            let out1 = side("_merge_failed_passed_r1.fastq.gz")?;
            let out2 = side("_merge_failed_passed_r2.fastq.gz")?;
            let unpaired1 = side("_merge_failed_not_passed_r1.fastq.gz")?;
            let unpaired2 = side("_merge_failed_not_passed_r2.fastq.gz")?;
            let outputs = fastp::PairedSideOutputs {
                out1: &out1,
                out2: &out2,
                unpaired1: &unpaired1,
                unpaired2: &unpaired2,
                json: &json,
                html: &html,
            };
            fastp::merge_paired_args(
                item.input(0)?,
                item.input(1)?,
                target,
                &outputs,
                (&adapter_r1, &adapter_r2),
                threads,
                &filters,
            )
        } else {
            fastp::trim_single_args(item.input(0)?, target, &json, &html, &adapter_r1, threads, &filters)
        };
        Ok(ctx.tool(FASTP_TAG)?.args(args).creates(target))
    }
}


pub struct QualityFilter;

impl Stage for QualityFilter {
    fn step(&self) -> Step {
        Step::QualityFilter
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        phase_inputs(ctx, ReadPhase::AdapterRemoved)
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        phase_output(ctx, item, ReadPhase::AdapterRemoved, ReadPhase::QualityFiltered)
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        let side = |s: &str| side_path(ctx, item, ReadPhase::QualityFiltered, ReadPhase::AdapterRemoved, s);
        let failed = side("_failed.fastq.gz")?;
        let json = side("_report.json")?;
        let html = side("_report.html")?;
        let filters = filters(ctx, self.step(), DEFAULT_FILTER_QUALIFIED_QUALITY_PHRED, None);
        let args = fastp::quality_filter_args(item.input(0)?, target, &failed, &json, &html, ctx.threads(self.step()), &filters);
        Ok(ctx.tool(FASTP_TAG)?.args(args).creates(target))
    }
}


pub struct Deduplication;

impl Stage for Deduplication {
    fn step(&self) -> Step {
        Step::Deduplication
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        phase_inputs(ctx, ReadPhase::QualityFiltered)
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        phase_output(ctx, item, ReadPhase::QualityFiltered, ReadPhase::DuplicatesRemoved)
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        let side = |s: &str| side_path(ctx, item, ReadPhase::DuplicatesRemoved, ReadPhase::QualityFiltered, s);
        let json = side("_report.json")?;
        let html = side("_report.html")?;
        let args = fastp::dedup_args(item.input(0)?, target, &json, &html, ctx.threads(self.step()));
        Ok(ctx.tool(FASTP_TAG)?.args(args).creates(target))
    }
}
