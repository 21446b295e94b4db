use std::path::PathBuf;
use std::sync::Arc;
use std::collections::HashMap;
use clap::ValueEnum;
use lazy_static::lazy_static;
use thiserror::Error;
use crate::config::store::ConfigStore;
use crate::utils::command::ToolRunner;
use crate::utils::paths::ProjectLayout;

// External software
pub const FASTP_TAG: &str = "fastp";
pub const FASTQC_TAG: &str = "fastqc";
pub const MULTIQC_TAG: &str = "multiqc";
pub const BWA_TAG: &str = "bwa";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const BEDTOOLS_TAG: &str = "bedtools";
pub const ANGSD_TAG: &str = "angsd";
pub const SEQKIT_TAG: &str = "seqkit";
pub const KRAKEN2_TAG: &str = "kraken";
pub const CENTRIFUGE_TAG: &str = "centrifuge";
pub const MAPDAMAGE_TAG: &str = "mapdamage";
pub const RSCRIPT_TAG: &str = "rscript";

pub const ALL_TOOL_TAGS: &[&str] = &[
    FASTP_TAG, FASTQC_TAG, MULTIQC_TAG, BWA_TAG, SAMTOOLS_TAG, BEDTOOLS_TAG,
    ANGSD_TAG, SEQKIT_TAG, KRAKEN2_TAG, CENTRIFUGE_TAG, MAPDAMAGE_TAG, RSCRIPT_TAG,
];

// Tools that only print their version as part of a usage message and exit non-zero
pub const VERSION_FROM_USAGE_TOOLS: &[&str] = &[BWA_TAG];

lazy_static! {
    // Arguments that make each tool print its version.
    pub static ref TOOL_VERSION_ARGS: HashMap<&'static str, &'static [&'static str]> = {
        let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        m.insert(FASTP_TAG, &["--version"]);
        m.insert(FASTQC_TAG, &["--version"]);
        m.insert(MULTIQC_TAG, &["--version"]);
        m.insert(BWA_TAG, &[]);
        m.insert(SAMTOOLS_TAG, &["--version"]);
        m.insert(BEDTOOLS_TAG, &["--version"]);
        m.insert(ANGSD_TAG, &["--version"]);
        m.insert(SEQKIT_TAG, &["version"]);
        m.insert(KRAKEN2_TAG, &["--version"]);
        m.insert(CENTRIFUGE_TAG, &["--version"]);
        m.insert(MAPDAMAGE_TAG, &["--version"]);
        m.insert(RSCRIPT_TAG, &["--version"]);
        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    View,
    Sort,
    Index,
    Depth,
    Faidx,
    Consensus,
}

impl SamtoolsSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamtoolsSubcommand::View => "view",
            SamtoolsSubcommand::Sort => "sort",
            SamtoolsSubcommand::Index => "index",
            SamtoolsSubcommand::Depth => "depth",
            SamtoolsSubcommand::Faidx => "faidx",
            SamtoolsSubcommand::Consensus => "consensus",
        }
    }
}

// Species tree folders
pub const FOLDER_RAW: &str = "raw";
pub const FOLDER_READS: &str = "reads";
pub const FOLDER_REFERENCE_GENOMES: &str = "ref_genome";
pub const FOLDER_MTDNA: &str = "mtdna";
pub const FOLDER_PROCESSED: &str = "processed";
pub const FOLDER_ADAPTER_REMOVED: &str = "adapter_removed";
pub const FOLDER_QUALITY_FILTERED: &str = "quality_filtered";
pub const FOLDER_DUPLICATES_REMOVED: &str = "duplicates_removed";
pub const FOLDER_PREPARED_FOR_REF_GENOME: &str = "prepared_for_ref_genome";
pub const FOLDER_MAPPED: &str = "mapped";
pub const FOLDER_COVERAGE: &str = "coverage";
pub const FOLDER_CONSENSUS_SEQUENCES: &str = "consensus_sequences";
pub const FOLDER_CONSENSUS_SEQUENCES_MAPPED: &str = "consensus_sequences_mapped";
pub const FOLDER_EXTRACTED_SEQUENCES: &str = "extracted_sequences";
pub const FOLDER_RESULTS: &str = "results";
pub const FOLDER_QUALITYCONTROL: &str = "qualitycontrol";
pub const FOLDER_FASTQC: &str = "fastqc";
pub const FOLDER_MULTIQC: &str = "multiqc";
pub const FOLDER_DEPTH_BREADTH: &str = "coverage_depth_breadth";
pub const FOLDER_PROCESSED_READS: &str = "processed_reads";
pub const FOLDER_READ_LENGTH_DISTRIBUTION: &str = "read_length_distribution";
pub const FOLDER_CONTAMINATION: &str = "contamination";
pub const FOLDER_KRAKEN: &str = "kraken";
pub const FOLDER_CENTRIFUGE: &str = "centrifuge";
pub const FOLDER_ENDOGENOUS_READS: &str = "endogenous_reads";
pub const FOLDER_DAMAGE: &str = "damage";
pub const FOLDER_REGIONS: &str = "regions";
pub const FOLDER_PLOTS: &str = "plots";
pub const FOLDER_DEPTH: &str = "depth";
pub const FOLDER_BREADTH: &str = "breadth";
pub const FOLDER_SPECIES_COMPARISON: &str = "species_comparison";
pub const FOLDER_SCRIPTS: &str = "scripts";
pub const FOLDER_ANALYSIS: &str = "analysis";
pub const FOLDER_RAW_READS_PROCESSING: &str = "raw_reads_processing";
pub const FOLDER_REF_GENOME_PROCESSING: &str = "ref_genome_processing";
pub const FOLDER_ADDITIONAL_ANALYSIS: &str = "additional_analysis";
pub const FOLDER_LOGS: &str = "logs";
pub const FOLDER_RESOURCES: &str = "resources";

// File endings
pub const FILE_ENDING_FASTQ_GZ: &str = ".fastq.gz";
pub const FILE_ENDING_ADAPTER_REMOVED_FASTQ_GZ: &str = "_merged_trimmed.fastq.gz";
pub const FILE_ENDING_QUALITY_FILTERED_FASTQ_GZ: &str = "_quality_filtered.fastq.gz";
pub const FILE_ENDING_DUPLICATES_REMOVED_FASTQ_GZ: &str = "_duplicates_removed.fastq.gz";
pub const FILE_ENDING_FASTQC_HTML: &str = "_fastqc.html";
pub const FILE_ENDING_SAM: &str = ".sam";
pub const FILE_ENDING_BAM: &str = ".bam";
pub const FILE_ENDING_SORTED_BAM: &str = "_sorted.bam";
pub const FILE_ENDING_BAI: &str = ".bai";
pub const FILE_ENDING_FAI: &str = ".fai";
pub const FILE_ENDING_BWT: &str = ".bwt";
pub const FILE_ENDING_FASTA: &str = ".fasta";
pub const FILE_ENDING_FA_GZ: &str = ".fa.gz";
pub const FILE_ENDING_BED: &str = ".bed";
pub const FILE_ENDING_TSV: &str = ".tsv";
pub const FILE_ENDING_SAMTOOLS_DEPTH_TSV: &str = "_samtools_depth.tsv";
pub const FILE_ENDING_ANALYSIS_TSV: &str = "_analysis.tsv";
pub const FILE_ENDING_COMBINED_COVERAGE_ANALYSIS_CSV: &str = "_combined_coverage_analysis.csv";
pub const FILE_ENDING_ENDOGENOUS_READS_CSV: &str = "_endogenous_reads.csv";
pub const FILE_ENDING_KRAKEN_REPORT_TSV: &str = "_kraken_report.tsv";
pub const FILE_ENDING_CENTRIFUGE_REPORT_TSV: &str = "_centrifuge_report.tsv";
pub const FILE_ENDING_MTDNA_REGION_BED: &str = "_mtdna_region.bed";
pub const FILE_ENDING_CONSENSUS_FA_GZ: &str = "_consensus.fa.gz";
pub const REFERENCE_GENOME_EXTS: &[&str] = &[".fna", ".fasta", ".fa"];

// Static filenames
pub const MULTIQC_REPORT_HTML: &str = "multiqc_report.html";
pub const MAPDAMAGE_MARKER: &str = "misincorporation.txt";
pub const STAGING_PREFIX: &str = ".partial.";

// R scripts
pub const R_SCRIPT_PLOT_READS_BEFORE_AFTER_PROCESSING: &str = "plot_comparison_reads_before_after_processing.R";
pub const R_SCRIPT_PLOT_SEQUENCE_LENGTH_DISTRIBUTION: &str = "plot_sequence_length_distribution.R";
pub const R_SCRIPT_PLOT_DEPTH: &str = "plot_coverage_depth.R";
pub const R_SCRIPT_PLOT_BREADTH: &str = "plot_coverage_breadth.R";
pub const R_SCRIPT_PLOT_ENDOGENOUS_READS: &str = "plot_endogenous_reads.R";
pub const R_SCRIPT_PLOT_COMPARE_SPECIES_READS_BEFORE_AFTER_PROCESSING: &str = "plot_compare_species_reads_before_after_processing.R";
pub const R_SCRIPT_PLOT_COMPARE_SPECIES_DEPTH_BREADTH: &str = "plot_compare_species_depth_breadth.R";
pub const R_SCRIPT_PLOT_COMPARE_SPECIES_ENDOGENOUS_READS: &str = "plot_compare_species_endogenous_reads.R";

// Static parameters. Every one of these can be overridden per step in the config.
pub const DEFAULT_THREADS: usize = 4;
pub const DEFAULT_LENGTH_REQUIRED: u32 = 15;
pub const DEFAULT_TRIM_POLY_X: u32 = 5;
pub const DEFAULT_ADAPTER_QUALIFIED_QUALITY_PHRED: u32 = 5;
pub const DEFAULT_FILTER_QUALIFIED_QUALITY_PHRED: u32 = 15;
pub const DEFAULT_UNQUALIFIED_PERCENT_LIMIT: u32 = 40;
pub const DEFAULT_N_BASE_LIMIT: u32 = 5;
pub const DEFAULT_MTDNA_MIN_SCORE: u32 = 50;
pub const DEFAULT_CENTRIFUGE_SEED: u32 = 999;
pub const DEFAULT_BLANK_MARKERS: &[&str] = &["LB", "EB"];

// Setting keys
pub const SETTING_ENABLED: &str = "enabled";
pub const SETTING_THREADS: &str = "threads";
pub const SETTING_ADAPTER_R1: &str = "adapter_sequence_r1";
pub const SETTING_ADAPTER_R2: &str = "adapter_sequence_r2";
pub const SETTING_LENGTH_REQUIRED: &str = "length_required";
pub const SETTING_TRIM_POLY_X: &str = "trim_poly_x";
pub const SETTING_QUALIFIED_QUALITY_PHRED: &str = "qualified_quality_phred";
pub const SETTING_UNQUALIFIED_PERCENT_LIMIT: &str = "unqualified_percent_limit";
pub const SETTING_N_BASE_LIMIT: &str = "n_base_limit";
pub const SETTING_KRAKEN_DB: &str = "kraken_db";
pub const SETTING_CENTRIFUGE_DB: &str = "centrifuge_db";
pub const SETTING_CENTRIFUGE_SEED: &str = "centrifuge_seed";
pub const SETTING_BLANK_MARKERS: &str = "blank_markers";
pub const SETTING_MIN_SCORE: &str = "min_score";
pub const SETTING_REMOVE_UNSORTED_BAM: &str = "remove_unsorted_bam";
pub const SETTING_REMOVE_SAM: &str = "remove_sam";


/// Pipeline groups. Each is also a `processing.<key>` block whose `enabled`
/// flag switches off every step that belongs to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum PipelineGroup {
    RawReadsProcessing,
    ReferenceGenomeProcessing,
    PostProcessing,
}

impl PipelineGroup {
    pub fn key(&self) -> &'static str {
        match self {
            PipelineGroup::RawReadsProcessing => "raw_reads_processing",
            PipelineGroup::ReferenceGenomeProcessing => "reference_genome_processing",
            PipelineGroup::PostProcessing => "post_processing",
        }
    }
}

/// Every configurable processing step, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Step {
    Qc,
    GenerateQualityCheckReport,
    AdapterRemoveAndMerge,
    QualityFilter,
    Deduplication,
    ContaminationCheck,
    DetermineReadsProcessingResult,
    DetermineReadLengthDistribution,
    GenerateRawReadsPlots,
    PrepareSpeciesForMapping,
    PrepareReferenceGenome,
    MapReadsToReferenceGenome,
    ConvertSamToBam,
    DetermineEndogenousReads,
    DetermineCoverageDepthAndBreadth,
    AnalyzeDamage,
    GenerateRefGenomePlots,
    MtdnaMapToRefGenome,
    MtdnaDetermineRegions,
    MtdnaCreateAndMapConsensus,
    MtdnaExtractCoiRegions,
    MtdnaCheckExtractedRegions,
    GenerateSpeciesComparisonPlots,
}

impl Step {
    pub fn key(&self) -> &'static str {
        match self {
            Step::Qc => "qc",
            Step::GenerateQualityCheckReport => "generate_quality_check_report",
            Step::AdapterRemoveAndMerge => "adapter_remove_and_merge",
            Step::QualityFilter => "quality_filter",
            Step::Deduplication => "deduplication",
            Step::ContaminationCheck => "contamination_check",
            Step::DetermineReadsProcessingResult => "determine_reads_processing_result",
            Step::DetermineReadLengthDistribution => "determine_read_length_distribution",
            Step::GenerateRawReadsPlots => "generate_raw_reads_plots",
            Step::PrepareSpeciesForMapping => "prepare_species_for_mapping",
            Step::PrepareReferenceGenome => "prepare_reference_genome",
            Step::MapReadsToReferenceGenome => "map_reads_to_reference_genome",
            Step::ConvertSamToBam => "convert_sam_to_bam",
            Step::DetermineEndogenousReads => "determine_endogenous_reads",
            Step::DetermineCoverageDepthAndBreadth => "determine_coverage_depth_and_breadth",
            Step::AnalyzeDamage => "analyze_damage",
            Step::GenerateRefGenomePlots => "generate_ref_genome_plots",
            Step::MtdnaMapToRefGenome => "mtdna_map_to_ref_genome",
            Step::MtdnaDetermineRegions => "mtdna_determine_regions",
            Step::MtdnaCreateAndMapConsensus => "mtdna_create_and_map_consensus",
            Step::MtdnaExtractCoiRegions => "mtdna_extract_coi_regions",
            Step::MtdnaCheckExtractedRegions => "mtdna_check_extracted_regions",
            Step::GenerateSpeciesComparisonPlots => "generate_species_comparison_plots",
        }
    }

    pub fn group(&self) -> PipelineGroup {
        match self {
            Step::Qc
            | Step::GenerateQualityCheckReport
            | Step::AdapterRemoveAndMerge
            | Step::QualityFilter
            | Step::Deduplication
            | Step::ContaminationCheck
            | Step::DetermineReadsProcessingResult
            | Step::DetermineReadLengthDistribution
            | Step::GenerateRawReadsPlots => PipelineGroup::RawReadsProcessing,
            Step::PrepareSpeciesForMapping
            | Step::PrepareReferenceGenome
            | Step::MapReadsToReferenceGenome
            | Step::ConvertSamToBam
            | Step::DetermineEndogenousReads
            | Step::DetermineCoverageDepthAndBreadth
            | Step::AnalyzeDamage
            | Step::GenerateRefGenomePlots => PipelineGroup::ReferenceGenomeProcessing,
            Step::MtdnaMapToRefGenome
            | Step::MtdnaDetermineRegions
            | Step::MtdnaCreateAndMapConsensus
            | Step::MtdnaExtractCoiRegions
            | Step::MtdnaCheckExtractedRegions
            | Step::GenerateSpeciesComparisonPlots => PipelineGroup::PostProcessing,
        }
    }

    /// Intermediate block between group and step (`processing.mtdna_analysis`).
    pub fn subgroup(&self) -> Option<&'static str> {
        match self {
            Step::MtdnaMapToRefGenome
            | Step::MtdnaDetermineRegions
            | Step::MtdnaCreateAndMapConsensus
            | Step::MtdnaExtractCoiRegions
            | Step::MtdnaCheckExtractedRegions => Some("mtdna_analysis"),
            _ => None,
        }
    }
}


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid species: {0}")]
    InvalidSpecies(String),

    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Input file does not exist: {0}")]
    MissingInput(PathBuf),

    #[error("Tool {tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::IOError(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::IOError(err.to_string())
    }
}


/// Everything a stage needs, built once in main and shared behind an Arc.
pub struct RunConfig {
    pub store: ConfigStore,
    pub layout: ProjectLayout,
    pub runner: Arc<dyn ToolRunner>,
    pub threads: usize,
    pub available_cores: usize,
    pub overwrite: bool,
}

impl RunConfig {
    pub fn new(store: ConfigStore, runner: Arc<dyn ToolRunner>) -> Self {
        let layout = ProjectLayout::new(store.project_root().to_path_buf(), store.species().clone());
        let threads = store.threads_default();
        RunConfig {
            store,
            layout,
            runner,
            threads,
            available_cores: crate::utils::system::available_cores(),
            overwrite: false,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}
