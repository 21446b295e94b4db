// src/stages/contamination.rs: Taxonomic screening of deduplicated reads

use std::path::{Path, PathBuf};
use crate::config::defs::*;
use crate::stages::{Artifact, Stage, StageContext, WorkItem};
use crate::utils::command::{centrifuge, kraken2, ToolInvocation};
use crate::utils::file::list_files_with_suffix;
use crate::utils::naming;
use crate::utils::paths::{ReadPhase, SpeciesDir};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    Kraken,
    Centrifuge,
}

impl Classifier {
    fn db_setting(&self) -> &'static str {
        match self {
            Classifier::Kraken => SETTING_KRAKEN_DB,
            Classifier::Centrifuge => SETTING_CENTRIFUGE_DB,
        }
    }

    fn dir(&self) -> SpeciesDir {
        match self {
            Classifier::Kraken => SpeciesDir::Kraken,
            Classifier::Centrifuge => SpeciesDir::Centrifuge,
        }
    }
}

/// One classifier run per deduplicated read file. Library and extraction
/// blanks are reported but not classified.
pub struct ContaminationCheck {
    pub classifier: Classifier,
}

impl ContaminationCheck {
    fn database(&self, ctx: &StageContext) -> Result<String, PipelineError> {
        let db: Option<String> = ctx.setting(self.step(), self.classifier.db_setting(), None);
        match db {
            Some(db) if Path::new(&db).exists() => Ok(db),
            Some(db) => Err(PipelineError::MissingPrerequisite(format!(
                "{} database {} does not exist", self.name(), db
            ))),
            None => Err(PipelineError::MissingPrerequisite(format!(
                "{} is not configured", self.classifier.db_setting()
            ))),
        }
    }

    fn raw_output(&self, report: &Path, reads_name: &str) -> PathBuf {
        let name = match self.classifier {
            Classifier::Kraken => naming::kraken_output_name(reads_name),
            Classifier::Centrifuge => naming::centrifuge_output_name(reads_name),
        };
        report.with_file_name(name)
    }
}

impl Stage for ContaminationCheck {
    fn step(&self) -> Step {
        Step::ContaminationCheck
    }

    fn name(&self) -> &'static str {
        match self.classifier {
            Classifier::Kraken => "contamination_check_kraken",
            Classifier::Centrifuge => "contamination_check_centrifuge",
        }
    }

    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
        let phase = ReadPhase::DuplicatesRemoved;
        let dir = ctx.cfg.layout.species_dir(ctx.species()?, SpeciesDir::Reads(phase))?;
        let files = list_files_with_suffix(&dir, phase.file_ending())?;
        if files.is_empty() {
            return Ok(Vec::new());
        }
        self.database(ctx)?;

        let default_markers: Vec<String> = DEFAULT_BLANK_MARKERS.iter().map(|m| m.to_string()).collect();
        let markers: Vec<String> = ctx.setting(self.step(), SETTING_BLANK_MARKERS, default_markers);
        Ok(files
            .iter()
            .map(|f| {
                let item = WorkItem::for_file(f);
                if naming::is_blank_sample(&item.label, &markers) {
                    item.skipped("blank sample")
                } else {
                    item
                }
            })
            .collect())
    }

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
        let dir = ctx.cfg.layout.species_dir(ctx.species()?, self.classifier.dir())?;
        let name = match self.classifier {
            Classifier::Kraken => naming::kraken_report_name(&item.label),
            Classifier::Centrifuge => naming::centrifuge_report_name(&item.label),
        };
        Ok(Artifact::staged(dir.join(name)))
    }

    fn build_invocation(&self, ctx: &StageContext, item: &WorkItem, target: &Path) -> Result<ToolInvocation, PipelineError> {
        let db = self.database(ctx)?;
        let threads = ctx.threads(self.step());
        let canonical = self.resolve_output(ctx, item)?.path;
        let output = self.raw_output(&canonical, &item.label);
        let reads = item.input(0)?;

        let invocation = match self.classifier {
            Classifier::Kraken => ctx
                .tool(KRAKEN2_TAG)?
                .args(kraken2::args(&db, threads, &output, target, reads)),
            Classifier::Centrifuge => {
                let seed = ctx.setting(self.step(), SETTING_CENTRIFUGE_SEED, DEFAULT_CENTRIFUGE_SEED);
                ctx.tool(CENTRIFUGE_TAG)?
                    .args(centrifuge::args(&db, reads, &output, target, threads, seed))
            }
        };
        Ok(invocation.creates(target))
    }
}
