// src/stages/qc.rs: fastqc per read file and multiqc per phase

use std::path::Path;
use crate::config::defs::{PipelineError, Step, FASTQC_TAG, FILE_ENDING_FASTQC_HTML, MULTIQC_REPORT_HTML, MULTIQC_TAG};
use crate::stages::{Artifact, Stage, StageContext, WorkItem};
use crate::utils::command::{fastqc, multiqc, ToolInvocation};
use crate::utils::file::list_files_with_suffix;
use crate::utils::naming::fastqc_report_name;
use crate::utils::paths::{ReadPhase, SpeciesDir};


/// fastqc over every read file of one phase.
pub struct Fastqc {
    pub phase: ReadPhase,
}

impl Stage for Fastqc {
    fn step(&self) -> Step {
        Step::Qc
    }

    fn name(&self) -> &'static str {
        match self.phase {
            ReadPhase::Raw => "qc_raw",
            ReadPhase::AdapterRemoved => "qc_adapter_removed",
            ReadPhase::QualityFiltered => "qc_quality_filtered",
            ReadPhase::DuplicatesRemoved => "qc_duplicates_removed",
        }
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let species = ctx.species()?;
        let dir = ctx.cfg.layout.species_dir(species, SpeciesDir::Reads(self.phase))?;
        Ok(list_files_with_suffix(&dir, self.phase.file_ending())?
            .iter()
            .map(|f| WorkItem::for_file(f))
            .collect())
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        let dir = ctx.cfg.layout.species_dir(ctx.species()?, SpeciesDir::Fastqc(self.phase))?;
        Ok(Artifact::in_place(dir.join(fastqc_report_name(&item.label))))
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        let out_dir = target
            .parent()
            .ok_or_else(|| PipelineError::Config(format!("No parent for {}", target.display())))?;
        Ok(ctx
            .tool(FASTQC_TAG)?
            .args(fastqc::args(ctx.threads(self.step()), out_dir, item.input(0)?))
            .creates(target))
    }
}


/// multiqc over the fastqc reports of one phase.
pub struct Multiqc {
    pub phase: ReadPhase,
}

impl Stage for Multiqc {
    fn step(&self) -> Step {
        Step::GenerateQualityCheckReport
    }

    fn name(&self) -> &'static str {
        match self.phase {
            ReadPhase::Raw => "multiqc_raw",
            ReadPhase::AdapterRemoved => "multiqc_adapter_removed",
            ReadPhase::QualityFiltered => "multiqc_quality_filtered",
            ReadPhase::DuplicatesRemoved => "multiqc_duplicates_removed",
        }
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let species = ctx.species()?;
        let fastqc_dir = ctx.cfg.layout.species_dir(species, SpeciesDir::Fastqc(self.phase))?;
        if list_files_with_suffix(&fastqc_dir, FILE_ENDING_FASTQC_HTML)?.is_empty() {
            return Err(PipelineError::MissingPrerequisite(format!(
                "No fastqc reports in {}", fastqc_dir.display()
            )));
        }
        Ok(vec![WorkItem::new(self.phase.folder(), vec![fastqc_dir])])
    }

    fn resolve_output(&self, ctx: &StageContext, _item: &WorkItem) -> Result<Artifact, PipelineError> {
        let dir = ctx.cfg.layout.species_dir(ctx.species()?, SpeciesDir::Multiqc(self.phase))?;
        Ok(Artifact::in_place(dir.join(MULTIQC_REPORT_HTML)))
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        let out_dir = target
            .parent()
            .ok_or_else(|| PipelineError::Config(format!("No parent for {}", target.display())))?;
        Ok(ctx
            .tool(MULTIQC_TAG)?
            .args(multiqc::args(item.input(0)?, out_dir))
            .creates(target))
    }
}
