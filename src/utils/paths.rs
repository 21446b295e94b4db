// src/utils/paths.rs: Canonical locations inside the project tree

use std::fs;
use std::path::{Component, Path, PathBuf};
use crate::config::defs::*;
use crate::config::species::{Species, SpeciesRegistry};

/// Read processing phases, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadPhase {
    Raw,
    AdapterRemoved,
    QualityFiltered,
    DuplicatesRemoved,
}

impl ReadPhase {
    pub const ALL: [ReadPhase; 4] = [
        ReadPhase::Raw,
        ReadPhase::AdapterRemoved,
        ReadPhase::QualityFiltered,
        ReadPhase::DuplicatesRemoved,
    ];

    pub fn folder(&self) -> &'static str {
        match self {
            ReadPhase::Raw => FOLDER_RAW,
            ReadPhase::AdapterRemoved => FOLDER_ADAPTER_REMOVED,
            ReadPhase::QualityFiltered => FOLDER_QUALITY_FILTERED,
            ReadPhase::DuplicatesRemoved => FOLDER_DUPLICATES_REMOVED,
        }
    }

    pub fn file_ending(&self) -> &'static str {
        match self {
            ReadPhase::Raw => FILE_ENDING_FASTQ_GZ,
            ReadPhase::AdapterRemoved => FILE_ENDING_ADAPTER_REMOVED_FASTQ_GZ,
            ReadPhase::QualityFiltered => FILE_ENDING_QUALITY_FILTERED_FASTQ_GZ,
            ReadPhase::DuplicatesRemoved => FILE_ENDING_DUPLICATES_REMOVED_FASTQ_GZ,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotKind {
    ProcessedReads,
    ReadLengthDistribution,
    Depth,
    Breadth,
    EndogenousReads,
}

impl PlotKind {
    fn folder(&self) -> &'static str {
        match self {
            PlotKind::ProcessedReads => FOLDER_PROCESSED_READS,
            PlotKind::ReadLengthDistribution => FOLDER_READ_LENGTH_DISTRIBUTION,
            PlotKind::Depth => FOLDER_DEPTH,
            PlotKind::Breadth => FOLDER_BREADTH,
            PlotKind::EndogenousReads => FOLDER_ENDOGENOUS_READS,
        }
    }
}

/// Species-scoped directory roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeciesDir {
    Root,
    RawRefGenome,
    RawMtdna,
    /// Raw reads for `ReadPhase::Raw`, processed reads otherwise.
    Reads(ReadPhase),
    PreparedForMapping,
    Fastqc(ReadPhase),
    Multiqc(ReadPhase),
    ProcessedReadsResult,
    ReadLengthDistribution,
    Kraken,
    Centrifuge,
    MtdnaExtracted,
    Plots(PlotKind),
    Logs,
    Resources,
}

/// Directory roles namespaced by reference genome id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenomeDir {
    Mapped,
    Coverage,
    ResultsCoverage,
    EndogenousReads,
    Damage,
    MtdnaMapped,
    MtdnaRegions,
    MtdnaConsensus,
    MtdnaConsensusMapped,
    MtdnaExtracted,
    Plots(PlotKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectDir {
    Results,
    Logs,
    SpeciesComparisonPlots,
}


/// Resolves (species, genome, role) to a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
    registry: SpeciesRegistry,
}

impl ProjectLayout {
    pub fn new(root: PathBuf, registry: SpeciesRegistry) -> Self {
        ProjectLayout { root, registry }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &SpeciesRegistry {
        &self.registry
    }

    /// Path for a species-level role.
    ///
    /// # Arguments
    ///
    /// * `species` - configured species
    /// * `role` - directory role
    ///
    /// # Returns
    ///
    /// Result<PathBuf, PipelineError>: existing directory, InvalidSpecies if the
    /// handle does not belong to this project
    pub fn species_dir(&self, species: &Species, role: SpeciesDir) -> Result<PathBuf, PipelineError> {
        let base = self.species_base(species)?;
        let path = match role {
            SpeciesDir::Root => base,
            SpeciesDir::RawRefGenome => base.join(FOLDER_RAW).join(FOLDER_REFERENCE_GENOMES),
            SpeciesDir::RawMtdna => base.join(FOLDER_RAW).join(FOLDER_MTDNA),
            SpeciesDir::Reads(ReadPhase::Raw) => base.join(FOLDER_RAW).join(FOLDER_READS),
            SpeciesDir::Reads(phase) => base.join(FOLDER_PROCESSED).join(phase.folder()),
            SpeciesDir::PreparedForMapping => base.join(FOLDER_PROCESSED).join(FOLDER_PREPARED_FOR_REF_GENOME),
            SpeciesDir::Fastqc(phase) => qc(&base).join(FOLDER_FASTQC).join(phase.folder()),
            SpeciesDir::Multiqc(phase) => qc(&base).join(FOLDER_MULTIQC).join(phase.folder()),
            SpeciesDir::ProcessedReadsResult => qc(&base).join(FOLDER_PROCESSED_READS),
            SpeciesDir::ReadLengthDistribution => qc(&base).join(FOLDER_READ_LENGTH_DISTRIBUTION),
            SpeciesDir::Kraken => qc(&base).join(FOLDER_CONTAMINATION).join(FOLDER_KRAKEN),
            SpeciesDir::Centrifuge => qc(&base).join(FOLDER_CONTAMINATION).join(FOLDER_CENTRIFUGE),
            SpeciesDir::MtdnaExtracted => base.join(FOLDER_PROCESSED).join(FOLDER_MTDNA).join(FOLDER_EXTRACTED_SEQUENCES),
            SpeciesDir::Plots(kind) => base.join(FOLDER_RESULTS).join(FOLDER_PLOTS).join(kind.folder()),
            SpeciesDir::Logs => base.join(FOLDER_LOGS),
            SpeciesDir::Resources => base.join(FOLDER_RESOURCES),
        };
        ensure_dir(path)
    }

    /// Path for a role scoped to one reference genome of a species. Every
    /// genome gets its own subdirectory so results never collide.
    pub fn genome_dir(&self, species: &Species, genome_id: &str, role: GenomeDir) -> Result<PathBuf, PipelineError> {
        validate_component(genome_id)?;
        let base = self.species_base(species)?;
        let processed = base.join(FOLDER_PROCESSED);
        let results = base.join(FOLDER_RESULTS);
        let mtdna = processed.join(FOLDER_MTDNA);
        let path = match role {
            GenomeDir::Mapped => processed.join(FOLDER_MAPPED).join(genome_id),
            GenomeDir::Coverage => processed.join(FOLDER_COVERAGE).join(genome_id),
            GenomeDir::ResultsCoverage => qc(&base).join(FOLDER_DEPTH_BREADTH).join(genome_id),
            GenomeDir::EndogenousReads => results.join(FOLDER_ENDOGENOUS_READS).join(genome_id),
            GenomeDir::Damage => results.join(FOLDER_DAMAGE).join(genome_id),
            GenomeDir::MtdnaMapped => mtdna.join(FOLDER_MAPPED).join(genome_id),
            GenomeDir::MtdnaRegions => results.join(FOLDER_MTDNA).join(FOLDER_REGIONS).join(genome_id),
            GenomeDir::MtdnaConsensus => mtdna.join(FOLDER_CONSENSUS_SEQUENCES).join(genome_id),
            GenomeDir::MtdnaConsensusMapped => mtdna.join(FOLDER_CONSENSUS_SEQUENCES_MAPPED).join(genome_id),
            GenomeDir::MtdnaExtracted => mtdna.join(FOLDER_EXTRACTED_SEQUENCES).join(genome_id),
            GenomeDir::Plots(kind) => results.join(FOLDER_PLOTS).join(kind.folder()).join(genome_id),
        };
        ensure_dir(path)
    }

    /// mapDamage output folder for one individual.
    pub fn damage_dir(&self, species: &Species, genome_id: &str, individual: &str) -> Result<PathBuf, PipelineError> {
        validate_component(individual)?;
        ensure_dir(self.genome_dir(species, genome_id, GenomeDir::Damage)?.join(individual))
    }

    pub fn project_dir(&self, role: ProjectDir) -> Result<PathBuf, PipelineError> {
        let path = match role {
            ProjectDir::Results => self.root.join(FOLDER_RESULTS),
            ProjectDir::Logs => self.root.join(FOLDER_LOGS),
            ProjectDir::SpeciesComparisonPlots => self.root.join(FOLDER_RESULTS).join(FOLDER_PLOTS).join(FOLDER_SPECIES_COMPARISON),
        };
        ensure_dir(path)
    }

    /// R plotting script shipped under `<root>/scripts/<processing>/analysis/plots/`.
    /// The file itself is not created.
    pub fn r_script(&self, processing_folder: &str, script: &str) -> PathBuf {
        self.root
            .join(FOLDER_SCRIPTS)
            .join(processing_folder)
            .join(FOLDER_ANALYSIS)
            .join(FOLDER_PLOTS)
            .join(script)
    }

    fn species_base(&self, species: &Species) -> Result<PathBuf, PipelineError> {
        if !self.registry.contains(species) {
            return Err(PipelineError::InvalidSpecies(species.id().to_string()));
        }
        Ok(self.root.join(species.folder_name()))
    }
}

fn qc(base: &Path) -> PathBuf {
    base.join(FOLDER_RESULTS).join(FOLDER_QUALITYCONTROL)
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, PipelineError> {
    fs::create_dir_all(&path)
        .map_err(|e| PipelineError::IOError(format!("Cannot create directory {}: {}", path.display(), e)))?;
    Ok(path)
}

pub(crate) fn validate_component(name: &str) -> Result<(), PipelineError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(PipelineError::Config(format!("'{}' is not a plain directory name", name))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    fn layout(root: &Path) -> ProjectLayout {
        let registry = SpeciesRegistry::new(vec![
            Species::new("Bger", None, None),
            Species::new("Dsim", None, None),
        ])
        .unwrap();
        ProjectLayout::new(root.to_path_buf(), registry)
    }

    #[test]
    fn test_species_dir_created_and_deterministic() -> Result<()> {
        let tmp = TempDir::new()?;
        let layout = layout(tmp.path());
        let bger = layout.registry().lookup("Bger")?.clone();

        let first = layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::AdapterRemoved))?;
        let second = layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::AdapterRemoved))?;
        assert_eq!(first, second);
        assert!(first.is_dir());
        assert_eq!(first, tmp.path().join("Bger/processed/adapter_removed"));

        let raw = layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::Raw))?;
        assert_eq!(raw, tmp.path().join("Bger/raw/reads"));
        Ok(())
    }

    #[test]
    fn test_unknown_species_rejected() -> Result<()> {
        let tmp = TempDir::new()?;
        let layout = layout(tmp.path());
        let stranger = Species::new("Hsap", None, None);
        let result = layout.species_dir(&stranger, SpeciesDir::Root);
        assert!(matches!(result, Err(PipelineError::InvalidSpecies(_))));
        assert!(!tmp.path().join("Hsap").exists());
        Ok(())
    }

    #[test]
    fn test_genomes_do_not_share_directories() -> Result<()> {
        let tmp = TempDir::new()?;
        let layout = layout(tmp.path());
        let bger = layout.registry().lookup("Bger")?.clone();
        let a = layout.genome_dir(&bger, "GCA_1", GenomeDir::Mapped)?;
        let b = layout.genome_dir(&bger, "GCA_2", GenomeDir::Mapped)?;
        assert_ne!(a, b);
        assert!(a.ends_with("processed/mapped/GCA_1"));
        assert!(layout.genome_dir(&bger, "../escape", GenomeDir::Mapped).is_err());
        Ok(())
    }

    #[test]
    fn test_species_trees_are_disjoint() -> Result<()> {
        let tmp = TempDir::new()?;
        let layout = layout(tmp.path());
        let bger = layout.registry().lookup("Bger")?.clone();
        let dsim = layout.registry().lookup("Dsim")?.clone();
        let roles = [
            SpeciesDir::Reads(ReadPhase::QualityFiltered),
            SpeciesDir::Fastqc(ReadPhase::Raw),
            SpeciesDir::Kraken,
            SpeciesDir::Plots(PlotKind::ProcessedReads),
        ];
        for role in roles {
            let a = layout.species_dir(&bger, role)?;
            let b = layout.species_dir(&dsim, role)?;
            assert!(a.starts_with(tmp.path().join("Bger")));
            assert!(b.starts_with(tmp.path().join("Dsim")));
        }
        Ok(())
    }
}
