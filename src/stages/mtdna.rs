// src/stages/mtdna.rs: mtDNA marker regions, consensus sequences and region extraction

use std::path::{Path, PathBuf};
use futures::future::BoxFuture;
use log::info;
use crate::config::defs::*;
use crate::stages::{discover_genomes, Artifact, FollowUp, ReferenceGenome, Stage, StageContext, WorkItem};
use crate::utils::command::{angsd, bedtools, samtools, ToolInvocation};
use crate::utils::fastx::first_record_non_n;
use crate::utils::file::{file_name, list_files_with_suffix};
use crate::utils::naming;
use crate::utils::paths::GenomeDir;
use crate::utils::table::write_tsv;


fn genome_files(ctx: &StageContext, genome: &ReferenceGenome, dir: GenomeDir, suffix: &str) -> Result<Vec<PathBuf>, PipelineError> {
    list_files_with_suffix(&ctx.cfg.layout.genome_dir(ctx.species()?, &genome.id, dir)?, suffix)
}

fn bam_items(ctx: &StageContext, dir: GenomeDir) -> Result<Vec<WorkItem>, PipelineError> {
    let mut items = Vec::new();
    for genome in discover_genomes(ctx)? {
        for bam in genome_files(ctx, &genome, dir, FILE_ENDING_SORTED_BAM)? {
            items.push(WorkItem::for_file(&bam).with_genome(&genome));
        }
    }
    Ok(items)
}

fn output_in(ctx: &StageContext, item: &WorkItem, dir: GenomeDir, name: String) -> Result<Artifact, PipelineError> {
    let path = ctx.cfg.layout.genome_dir(ctx.species()?, &item.genome()?.id, dir)?.join(name);
    Ok(Artifact::staged(path))
}


/// BED intervals covered by the mapped marker sequences.
pub struct MtdnaRegions;

impl Stage for MtdnaRegions {
    fn step(&self) -> Step {
        Step::MtdnaDetermineRegions
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        bam_items(ctx, GenomeDir::MtdnaMapped)
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        output_in(ctx, item, GenomeDir::MtdnaRegions, naming::mtdna_region_name(&item.label))
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        Ok(ctx
            .tool(BEDTOOLS_TAG)?
            .args(bedtools::bamtobed_args(item.input(0)?))
            .stdout_to(target)
            .creates(target))
    }
}


/// angsd consensus per mapped sample, indexed for remapping.
pub struct Consensus;

impl Stage for Consensus {
    fn step(&self) -> Step {
        Step::MtdnaCreateAndMapConsensus
    }

    fn name(&self) -> &'static str {
        "mtdna_create_consensus"
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        bam_items(ctx, GenomeDir::Mapped)
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        output_in(ctx, item, GenomeDir::MtdnaConsensus, naming::consensus_name(&item.label))
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        let prefix = target.with_file_name(naming::angsd_prefix(&file_name(target)));
        Ok(ctx
            .tool(ANGSD_TAG)?
            .args(angsd::consensus_args(&prefix, item.input(0)?))
            .creates(target))
    }

    fn follow_ups(&self, ctx: &StageContext, _item: &WorkItem, output: &Path) -> Result<Vec<FollowUp>, PipelineError> {
        let fai = output.with_file_name(naming::fai_name(&file_name(output)));
        Ok(vec![FollowUp::staged(fai, |target| {
            Ok(ctx.tool(SAMTOOLS_TAG)?.args(samtools::faidx_args(output, target)).creates(target))
        })?])
    }
}


/// Reads of each consensus BAM that fall into each marker region.
pub struct ExtractRegions;

impl Stage for ExtractRegions {
    fn step(&self) -> Step {
        Step::MtdnaExtractCoiRegions
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let mut items = Vec::new();
        for genome in discover_genomes(ctx)? {
            let beds = genome_files(ctx, &genome, GenomeDir::MtdnaRegions, FILE_ENDING_BED)?;
            for bam in genome_files(ctx, &genome, GenomeDir::MtdnaConsensusMapped, FILE_ENDING_SORTED_BAM)? {
                for bed in &beds {
                    let label = naming::extracted_region_name(&file_name(&bam), &file_name(bed));
                    items.push(WorkItem::new(label, vec![bam.clone(), bed.clone()]).with_genome(&genome));
                }
            }
        }
        Ok(items)
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        output_in(ctx, item, GenomeDir::MtdnaExtracted, item.label.clone())
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        Ok(ctx
            .tool(SAMTOOLS_TAG)?
            .args(samtools::region_extract_args(item.input(1)?, item.input(0)?))
            .stdout_to(target)
            .creates(target))
    }

    fn follow_ups(&self, ctx: &StageContext, _item: &WorkItem, output: &Path) -> Result<Vec<FollowUp>, PipelineError> {
        let threads = ctx.threads(self.step());
        let bai = output.with_file_name(naming::bai_name(&file_name(output)));
        let fasta = output.with_file_name(naming::extracted_fasta_name(&file_name(output)));
        Ok(vec![
            FollowUp::staged(bai, |target| {
                Ok(ctx.tool(SAMTOOLS_TAG)?.args(samtools::index_args(threads, output, target)).creates(target))
            })?,
            FollowUp::staged(fasta, |target| {
                Ok(ctx.tool(SAMTOOLS_TAG)?.args(samtools::consensus_args(output, target)).creates(target))
            })?,
        ])
    }
}


/// Share of called (non-N) bases in each extracted region.
pub struct CheckExtracted;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Stage for CheckExtracted {
    fn step(&self) -> Step {
        Step::MtdnaCheckExtractedRegions
    }

    fn rebuilds(&self) -> bool {
        true
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let mut items = Vec::new();
        for genome in discover_genomes(ctx)? {
            let fastas = genome_files(ctx, &genome, GenomeDir::MtdnaExtracted, FILE_ENDING_FASTA)?;
            if !fastas.is_empty() {
                items.push(WorkItem::new(genome.id.clone(), fastas).with_genome(&genome));
            }
        }
        Ok(items)
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        let name = naming::extracted_region_analysis_name(ctx.species()?.id());
        output_in(ctx, item, GenomeDir::MtdnaRegions, name)
    }

    fn produce<'a>(&'a self, _ctx: &'a StageContext, item: &'a WorkItem, target: &'a Path) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let mut rows = Vec::with_capacity(item.inputs.len());
            for fasta in &item.inputs {
                let stats = first_record_non_n(fasta)?;
                let percentage = round2(stats.percentage());
                info!(
                    "{}: total length {}, non-N count {}, non-N percentage {:.2}%",
                    file_name(fasta), stats.total_length, stats.non_n_count, percentage
                );
                rows.push(vec![
                    file_name(fasta),
                    stats.total_length.to_string(),
                    stats.non_n_count.to_string(),
                    percentage.to_string(),
                ]);
            }
            write_tsv(target, &["Filename", "Total Length", "Non-N Count", "Non-N Percentage"], rows)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(66.666666), 66.67);
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(100.0), 100.0);
    }
}
