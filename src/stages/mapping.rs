// src/stages/mapping.rs: Read preparation, genome indexing, bwa mapping and SAM to sorted BAM

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use futures::future::BoxFuture;
use log::{info, warn};
use crate::config::defs::*;
use crate::stages::{discover_genomes, Artifact, FollowUp, ReferenceGenome, Stage, StageContext, WorkItem};
use crate::utils::command::{bwa, samtools, ToolInvocation};
use crate::utils::file::{artifact_state, concatenate_files, discard, file_name, list_files_with_suffix, promote, staging_path, ArtifactState};
use crate::utils::naming;
use crate::utils::paths::{GenomeDir, ReadPhase, SpeciesDir};
use crate::utils::sambam::header_is_coordinate_sorted;


/// Concatenates deduplicated reads into one file per species and one per individual.
pub struct PrepareReads;

impl Stage for PrepareReads {
    fn step(&self) -> Step {
        Step::PrepareSpeciesForMapping
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let species = ctx.species()?;
        let phase = ReadPhase::DuplicatesRemoved;
        let dir = ctx.cfg.layout.species_dir(species, SpeciesDir::Reads(phase))?;
        let files = list_files_with_suffix(&dir, phase.file_ending())?;
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_individual: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for f in &files {
            let name = file_name(f);
            by_individual.entry(naming::individual(&name).to_string()).or_default().push(f.clone());
        }

        let mut items = vec![WorkItem::new(naming::combined_reads_name(species.id()), files)];
        items.extend(
            by_individual
                .into_iter()
                .map(|(individual, inputs)| WorkItem::new(naming::individual_reads_name(&individual), inputs)),
        );
        Ok(items)
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        let dir = ctx.cfg.layout.species_dir(ctx.species()?, SpeciesDir::PreparedForMapping)?;
        Ok(Artifact::staged(dir.join(&item.label)))
    }

    fn produce<'a>(&'a self, _ctx: &'a StageContext, item: &'a WorkItem, target: &'a Path) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            info!("Concatenating {} read files into {}", item.inputs.len(), item.label);
            let inputs = item.inputs.clone();
            let target = target.to_path_buf();
            tokio::task::spawn_blocking(move || concatenate_files(&inputs, &target))
                .await
                .map_err(|e| PipelineError::IOError(format!("Concatenation task failed: {}", e)))?
        })
    }
}


/// `bwa index` per reference genome, then a FASTA index beside it.
pub struct PrepareReference;

impl Stage for PrepareReference {
    fn step(&self) -> Step {
        Step::PrepareReferenceGenome
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        Ok(discover_genomes(ctx)?
            .iter()
            .map(|g| WorkItem::for_file(&g.path).with_genome(g))
            .collect())
    }

    fn resolve_output(&self, _ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        let genome = item.input(0)?;
        Ok(Artifact::in_place(genome.with_file_name(naming::bwt_name(&item.label))))
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        Ok(ctx.tool(BWA_TAG)?.args(bwa::index_args(item.input(0)?)).creates(target))
    }

    fn follow_ups(&self, ctx: &StageContext, item: &WorkItem, _output: &Path) -> Result<Vec<FollowUp>, PipelineError> {
        let genome = item.input(0)?;
        let fai = genome.with_file_name(naming::fai_name(&item.label));
        Ok(vec![FollowUp::staged(fai, |target| {
            Ok(ctx.tool(SAMTOOLS_TAG)?.args(samtools::faidx_args(genome, target)).creates(target))
        })?])
    }
}


/// Where a mapping stage takes its reads from and writes its SAM files to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Per species and per individual read files
    Prepared,
    /// mtDNA marker sequences, mapped in strict mode
    MtdnaMarkers,
    /// Consensus sequences built from the marker mappings
    Consensus,
}

impl ReadSource {
    pub fn output_dir(&self) -> GenomeDir {
        match self {
            ReadSource::Prepared => GenomeDir::Mapped,
            ReadSource::MtdnaMarkers => GenomeDir::MtdnaMapped,
            ReadSource::Consensus => GenomeDir::MtdnaConsensusMapped,
        }
    }

    fn reads(&self, ctx: &StageContext, genome: &ReferenceGenome) -> Result<Vec<PathBuf>, PipelineError> {
        let species = ctx.species()?;
        let layout = &ctx.cfg.layout;
        match self {
            ReadSource::Prepared => {
                list_files_with_suffix(&layout.species_dir(species, SpeciesDir::PreparedForMapping)?, FILE_ENDING_FASTQ_GZ)
            }
            ReadSource::MtdnaMarkers => {
                list_files_with_suffix(&layout.species_dir(species, SpeciesDir::RawMtdna)?, FILE_ENDING_FASTA)
            }
            ReadSource::Consensus => list_files_with_suffix(
                &layout.genome_dir(species, &genome.id, GenomeDir::MtdnaConsensus)?,
                FILE_ENDING_CONSENSUS_FA_GZ,
            ),
        }
    }
}

/// `bwa mem` of every read file against every indexed reference genome.
pub struct MapToReference {
    pub step: Step,
    pub source: ReadSource,
}

impl MapToReference {
    fn sam_path(&self, ctx: &StageContext, item: &WorkItem) -> Result<PathBuf, PipelineError> {
        let genome = item.genome()?;
        let dir = ctx.cfg.layout.genome_dir(ctx.species()?, &genome.id, self.source.output_dir())?;
        Ok(dir.join(naming::sam_name(&file_name(item.input(0)?), &genome.id)))
    }
}

impl Stage for MapToReference {
    fn step(&self) -> Step {
        self.step
    }

    fn name(&self) -> &'static str {
        match self.source {
            ReadSource::Prepared => "map_reads_to_reference_genome",
            ReadSource::MtdnaMarkers => "mtdna_map_to_ref_genome",
            ReadSource::Consensus => "mtdna_map_consensus",
        }
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let mut items = Vec::new();
        for genome in discover_genomes(ctx)? {
            let bwt = genome.path.with_file_name(naming::bwt_name(&file_name(&genome.path)));
            for reads in self.source.reads(ctx, &genome)? {
                let label = naming::sam_name(&file_name(&reads), &genome.id);
                items.push(
                    WorkItem::new(label, vec![reads, genome.path.clone(), bwt.clone()]).with_genome(&genome),
                );
            }
        }
        Ok(items)
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        Ok(Artifact::staged(self.sam_path(ctx, item)?))
    }

    fn superseded_by(&self, _ctx: &StageContext, _item: &WorkItem, output: &Path) -> Option<PathBuf> {
        Some(output.with_file_name(naming::sorted_bam_name(&file_name(output))))
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        let min_score = match self.source {
            ReadSource::MtdnaMarkers => Some(ctx.setting(self.step, SETTING_MIN_SCORE, DEFAULT_MTDNA_MIN_SCORE)),
            _ => None,
        };
        let args = bwa::mem_args(ctx.threads(self.step), item.input(1)?, item.input(0)?, min_score);
        Ok(ctx.tool(BWA_TAG)?.args(args).stdout_to(target).creates(target))
    }
}


/// SAM to coordinate-sorted, indexed BAM. Input that is already sorted is
/// converted straight into the sorted BAM.
pub struct SamToBam {
    pub step: Step,
    pub dir: GenomeDir,
}

impl SamToBam {
    async fn is_sorted(&self, ctx: &StageContext, sam: &Path) -> Result<bool, PipelineError> {
        let invocation = ctx.tool(SAMTOOLS_TAG)?.args(samtools::header_args(sam));
        let output = ctx.run(&invocation).await?;
        Ok(header_is_coordinate_sorted(&output.stdout))
    }

    /// Unsorted BAM, guarded by its own presence check.
    async fn ensure_unsorted(&self, ctx: &StageContext, sam: &Path, bam: &Path, threads: usize) -> Result<(), PipelineError> {
        if artifact_state(bam, ctx.cfg.overwrite) == ArtifactState::Present {
            info!("Conversion for {} already exists. Skipping.", file_name(sam));
            return Ok(());
        }
        let staged = staging_path(bam);
        discard(&staged);
        let invocation = ctx
            .tool(SAMTOOLS_TAG)?
            .args(samtools::to_bam_args(threads, sam, &staged))
            .creates(&staged);
        if let Err(e) = ctx.run(&invocation).await {
            discard(&staged);
            return Err(e);
        }
        promote(&staged, bam)
    }
}

impl Stage for SamToBam {
    fn step(&self) -> Step {
        self.step
    }

    fn name(&self) -> &'static str {
        match self.dir {
            GenomeDir::MtdnaMapped => "mtdna_convert_sam_to_bam",
            GenomeDir::MtdnaConsensusMapped => "mtdna_convert_consensus_sam_to_bam",
            _ => "convert_sam_to_bam",
        }
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let species = ctx.species()?;
        let mut items = Vec::new();
        for genome in discover_genomes(ctx)? {
            let dir = ctx.cfg.layout.genome_dir(species, &genome.id, self.dir)?;
            for sam in list_files_with_suffix(&dir, FILE_ENDING_SAM)? {
                items.push(WorkItem::for_file(&sam).with_genome(&genome));
            }
        }
        Ok(items)
    }

    fn resolve_output(&self, _ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        let sam = item.input(0)?;
        Ok(Artifact::staged(sam.with_file_name(naming::sorted_bam_name(&item.label))))
    }

    fn produce<'a>(&'a self, ctx: &'a StageContext, item: &'a WorkItem, target: &'a Path) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let sam = item.input(0)?;
            let threads = ctx.threads(self.step);

            if self.is_sorted(ctx, sam).await? {
                info!("{} is already coordinate-sorted. Skipping sort.", item.label);
                let invocation = ctx
                    .tool(SAMTOOLS_TAG)?
                    .args(samtools::to_bam_args(threads, sam, target))
                    .creates(target);
                return ctx.run(&invocation).await.map(|_| ());
            }

            let bam = sam.with_file_name(naming::unsorted_bam_name(&item.label));
            self.ensure_unsorted(ctx, sam, &bam, threads).await?;
            let invocation = ctx
                .tool(SAMTOOLS_TAG)?
                .args(samtools::sort_args(threads, &bam, target))
                .creates(target);
            ctx.run(&invocation).await.map(|_| ())
        })
    }

    fn follow_ups(&self, ctx: &StageContext, _item: &WorkItem, output: &Path) -> Result<Vec<FollowUp>, PipelineError> {
        let bai = output.with_file_name(naming::bai_name(&file_name(output)));
        let threads = ctx.threads(self.step);
        Ok(vec![FollowUp::staged(bai, |target| {
            Ok(ctx.tool(SAMTOOLS_TAG)?.args(samtools::index_args(threads, output, target)).creates(target))
        })?])
    }

    fn postprocess(&self, ctx: &StageContext, item: &WorkItem, _output: &Path) -> Result<(), PipelineError> {
        let sam = item.input(0)?;
        if ctx.setting(self.step, SETTING_REMOVE_UNSORTED_BAM, true) {
            let bam = sam.with_file_name(naming::unsorted_bam_name(&item.label));
            if bam.exists() {
                info!("Removing unsorted BAM file {}", bam.display());
                discard(&bam);
            }
        }
        if ctx.setting(self.step, SETTING_REMOVE_SAM, false) {
            info!("Removing SAM file {}", sam.display());
            if let Err(e) = std::fs::remove_file(sam) {
                warn!("Failed to remove SAM file {}: {}", sam.display(), e);
            }
        }
        Ok(())
    }
}
