// src/stages/read_summary.rs: Per-species read count and read length tables

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use futures::future::BoxFuture;
use log::{debug, info};
use rayon::prelude::*;
use crate::config::defs::*;
use crate::stages::{Artifact, Stage, StageContext, WorkItem};
use crate::utils::command::seqkit;
use crate::utils::fastx::{pair_raw_reads, read_length_counts};
use crate::utils::file::{file_name, list_files_with_suffix};
use crate::utils::naming;
use crate::utils::paths::{ReadPhase, SpeciesDir};
use crate::utils::stats::parse_seqkit_num_seqs;
use crate::utils::table::{outer_join, write_tsv};


/// A raw sample and the file each read phase derived from it.
#[derive(Debug, Clone)]
struct SampleChain {
    reads_file: String,
    files: Vec<PathBuf>,
}

impl SampleChain {
    fn individual(&self) -> &str {
        naming::individual(&self.reads_file)
    }

    fn protocol(&self) -> &str {
        naming::protocol(&self.reads_file).unwrap_or("")
    }
}

/// R1 and single-end raw files; their mates end up in the same merged file.
fn raw_samples(ctx: &StageContext) -> Result<Vec<PathBuf>, PipelineError> {
    let dir = ctx.cfg.layout.species_dir(ctx.species()?, SpeciesDir::Reads(ReadPhase::Raw))?;
    let pairing = pair_raw_reads(&list_files_with_suffix(&dir, FILE_ENDING_FASTQ_GZ)?);
    let mut samples: Vec<PathBuf> = pairing.pairs.into_iter().map(|(r1, _)| r1).collect();
    samples.extend(pairing.singles);
    samples.sort();
    Ok(samples)
}

fn sample_chain(ctx: &StageContext, raw: &Path) -> Result<SampleChain, PipelineError> {
    let species = ctx.species()?;
    let mut files = vec![raw.to_path_buf()];
    let mut name = file_name(raw);
    for pair in ReadPhase::ALL.windows(2) {
        name = naming::phase_output_name(&name, pair[0], pair[1]);
        files.push(ctx.cfg.layout.species_dir(species, SpeciesDir::Reads(pair[1]))?.join(&name));
    }
    Ok(SampleChain { reads_file: naming::stem(&file_name(raw)).to_string(), files })
}

fn summary_item(label: &str, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
    let samples = raw_samples(ctx)?;
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![WorkItem::new(label, samples)])
}

fn join_error(e: tokio::task::JoinError) -> PipelineError {
    PipelineError::IOError(format!("Worker task failed: {}", e))
}


/// Read counts per phase for every raw sample, from one `seqkit stats` call.
pub struct ReadsProcessingResult;

impl Stage for ReadsProcessingResult {
    fn step(&self) -> Step {
        Step::DetermineReadsProcessingResult
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        summary_item("reads_processing_result", ctx)
    }

    fn resolve_output(&self, ctx: &StageContext, _item: &WorkItem) -> Result<Artifact, PipelineError> {
        let species = ctx.species()?;
        let dir = ctx.cfg.layout.species_dir(species, SpeciesDir::ProcessedReadsResult)?;
        Ok(Artifact::staged(dir.join(naming::reads_processing_result_name(species.id()))))
    }

    fn produce<'a>(&'a self, ctx: &'a StageContext, item: &'a WorkItem, target: &'a Path) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let chains = item
                .inputs
                .iter()
                .map(|raw| sample_chain(ctx, raw))
                .collect::<Result<Vec<_>, _>>()?;

            let existing: Vec<PathBuf> = chains
                .iter()
                .flat_map(|c| c.files.iter())
                .filter(|f| f.exists())
                .cloned()
                .collect();
            let invocation = ctx
                .tool(SEQKIT_TAG)?
                .args(seqkit::stats_args(ctx.threads(self.step()), &existing));
            let output = ctx.run(&invocation).await?;
            let counts = parse_seqkit_num_seqs(&output.stdout)?;
            debug!("seqkit reported counts for {} files", counts.len());

            let rows = chains.iter().map(|chain| {
                let mut row = vec![
                    chain.reads_file.clone(),
                    chain.individual().to_string(),
                    chain.protocol().to_string(),
                ];
                row.extend(chain.files.iter().map(|f| {
                    counts.get(f.to_string_lossy().as_ref()).copied().unwrap_or(0).to_string()
                }));
                row
            });
            write_tsv(
                target,
                &[
                    "reads_file", "individual", "protocol", "raw_count", "adapter_removed_count",
                    "quality_filtered_count", "duplicates_removed_count",
                ],
                rows,
            )
        })
    }
}


/// Read length histogram per raw sample and phase, outer-joined on length.
pub struct ReadLengthDistribution;

impl ReadLengthDistribution {
    fn sample_rows(chain: &SampleChain) -> Result<Vec<Vec<String>>, PipelineError> {
        let histograms = chain
            .files
            .iter()
            .map(|f| if f.exists() { read_length_counts(f) } else { Ok(BTreeMap::new()) })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(outer_join(&histograms)
            .into_iter()
            .map(|(length, counts)| {
                let mut row = vec![
                    chain.reads_file.clone(),
                    chain.individual().to_string(),
                    chain.protocol().to_string(),
                    length.to_string(),
                ];
                row.extend(counts.iter().map(u64::to_string));
                row
            })
            .collect())
    }
}

impl Stage for ReadLengthDistribution {
    fn step(&self) -> Step {
        Step::DetermineReadLengthDistribution
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        summary_item("read_length_distribution", ctx)
    }

    fn resolve_output(&self, ctx: &StageContext, _item: &WorkItem) -> Result<Artifact, PipelineError> {
        let species = ctx.species()?;
        let dir = ctx.cfg.layout.species_dir(species, SpeciesDir::ReadLengthDistribution)?;
        Ok(Artifact::staged(dir.join(naming::read_length_distribution_name(species.id()))))
    }

    fn produce<'a>(&'a self, ctx: &'a StageContext, item: &'a WorkItem, target: &'a Path) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let chains = item
                .inputs
                .iter()
                .map(|raw| sample_chain(ctx, raw))
                .collect::<Result<Vec<_>, _>>()?;
            info!("Counting read lengths for {} samples", chains.len());

            let target = target.to_path_buf();
            tokio::task::spawn_blocking(move || {
                let per_sample = chains
                    .par_iter()
                    .map(Self::sample_rows)
                    .collect::<Result<Vec<_>, _>>()?;
                write_tsv(
                    &target,
                    &[
                        "reads_file", "individual", "protocol", "read_length", "read_count_raw",
                        "read_count_adapter_removed", "read_count_quality_filtered", "read_count_duplicates_removed",
                    ],
                    per_sample.into_iter().flatten(),
                )
            })
            .await
            .map_err(join_error)?
        })
    }
}
