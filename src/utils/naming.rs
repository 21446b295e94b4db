// src/utils/naming.rs: Deterministic artifact file names

use crate::config::defs::*;
use crate::utils::paths::ReadPhase;

const R1_MARKER: &str = "_R1_";
const R2_MARKER: &str = "_R2_";

/// Removes `suffix` if present, otherwise returns the name unchanged.
pub fn strip_suffix<'a>(name: &'a str, suffix: &str) -> &'a str {
    name.strip_suffix(suffix).unwrap_or(name)
}

/// File name without its last extension, treating `.gz` as part of the
/// extension it compresses (`a.fastq.gz` -> `a`, `a.fa.gz` -> `a`, `a.bam` -> `a`).
pub fn stem(name: &str) -> &str {
    let base = strip_suffix(name, ".gz");
    match base.rfind('.') {
        Some(i) if i > 0 => &base[..i],
        _ => base,
    }
}

/// Sample name shared by an R1/R2 pair: the read marker collapses to `_`.
pub fn raw_sample_name(raw_file_name: &str) -> String {
    strip_suffix(raw_file_name, FILE_ENDING_FASTQ_GZ)
        .replace(R1_MARKER, "_")
        .replace(R2_MARKER, "_")
}

/// Name of the file a read phase produces from its predecessor's output.
pub fn phase_output_name(input_name: &str, from: ReadPhase, to: ReadPhase) -> String {
    let sample = match from {
        ReadPhase::Raw => raw_sample_name(input_name),
        _ => strip_suffix(input_name, from.file_ending()).to_string(),
    };
    format!("{}{}", sample, to.file_ending())
}

/// Sibling of a fastp output carrying `side` instead of the phase ending,
/// e.g. `_report.json` or `_failed.fastq.gz`.
pub fn fastp_side_name(output_name: &str, phase: ReadPhase, side: &str) -> String {
    format!("{}{}", strip_suffix(output_name, phase.file_ending()), side)
}

/// fastqc names its report after the input with the FASTQ extension removed.
pub fn fastqc_report_name(reads_name: &str) -> String {
    let base = [".fastq.gz", ".fq.gz", ".fastq", ".fq"]
        .iter()
        .find_map(|ext| reads_name.strip_suffix(ext))
        .unwrap_or(reads_name);
    format!("{}{}", base, FILE_ENDING_FASTQC_HTML)
}

/// Leading `_` token of a read file: the individual.
pub fn individual(name: &str) -> &str {
    name.split('_').next().unwrap_or(name)
}

/// Second `_` token of a read file: the library protocol, if any.
pub fn protocol(name: &str) -> Option<&str> {
    let mut tokens = name.split('_');
    tokens.next()?;
    tokens.next().filter(|t| !t.is_empty() && !t.contains('.'))
}

pub fn is_blank_sample(name: &str, markers: &[String]) -> bool {
    name.split(['_', '.'])
        .any(|token| markers.iter().any(|m| m == token))
}

pub fn combined_reads_name(species_id: &str) -> String {
    format!("{}_combined{}", species_id, FILE_ENDING_FASTQ_GZ)
}

pub fn individual_reads_name(individual: &str) -> String {
    format!("{}{}", individual, FILE_ENDING_FASTQ_GZ)
}

/// `<reads>_<genome>.sam`
pub fn sam_name(reads_name: &str, genome_id: &str) -> String {
    format!("{}_{}{}", stem(reads_name), genome_id, FILE_ENDING_SAM)
}

pub fn unsorted_bam_name(sam_name: &str) -> String {
    format!("{}{}", strip_suffix(sam_name, FILE_ENDING_SAM), FILE_ENDING_BAM)
}

pub fn sorted_bam_name(sam_name: &str) -> String {
    format!("{}{}", strip_suffix(sam_name, FILE_ENDING_SAM), FILE_ENDING_SORTED_BAM)
}

/// Index sits next to the BAM with `.bai` appended.
pub fn bai_name(bam_name: &str) -> String {
    format!("{}{}", bam_name, FILE_ENDING_BAI)
}

pub fn fai_name(fasta_name: &str) -> String {
    format!("{}{}", fasta_name, FILE_ENDING_FAI)
}

pub fn bwt_name(genome_file_name: &str) -> String {
    format!("{}{}", genome_file_name, FILE_ENDING_BWT)
}

pub fn depth_name(sorted_bam_name: &str) -> String {
    format!("{}{}", strip_suffix(sorted_bam_name, FILE_ENDING_SORTED_BAM), FILE_ENDING_SAMTOOLS_DEPTH_TSV)
}

pub fn analysis_name(depth_name: &str) -> String {
    format!("{}{}", strip_suffix(depth_name, FILE_ENDING_SAMTOOLS_DEPTH_TSV), FILE_ENDING_ANALYSIS_TSV)
}

/// Sorted BAM an analysis file was derived from, as reported in the combined table.
pub fn bam_name_for_analysis(analysis_name: &str) -> String {
    format!("{}{}", strip_suffix(analysis_name, FILE_ENDING_ANALYSIS_TSV), FILE_ENDING_SORTED_BAM)
}

pub fn combined_coverage_name(species_id: &str) -> String {
    format!("{}{}", species_id, FILE_ENDING_COMBINED_COVERAGE_ANALYSIS_CSV)
}

pub fn endogenous_reads_name(species_id: &str) -> String {
    format!("{}{}", species_id, FILE_ENDING_ENDOGENOUS_READS_CSV)
}

pub fn reads_processing_result_name(species_id: &str) -> String {
    format!("{}_reads_processing_result{}", species_id, FILE_ENDING_TSV)
}

pub fn read_length_distribution_name(species_id: &str) -> String {
    format!("{}_read_length_distribution{}", species_id, FILE_ENDING_TSV)
}

pub fn extracted_region_analysis_name(species_id: &str) -> String {
    format!("{}_extracted_region_analysis{}", species_id, FILE_ENDING_TSV)
}

pub fn kraken_output_name(reads_name: &str) -> String {
    format!("{}_kraken_output.txt", stem(reads_name))
}

pub fn kraken_report_name(reads_name: &str) -> String {
    format!("{}{}", stem(reads_name), FILE_ENDING_KRAKEN_REPORT_TSV)
}

pub fn centrifuge_output_name(reads_name: &str) -> String {
    format!("{}_centrifuge_output.txt", stem(reads_name))
}

pub fn centrifuge_report_name(reads_name: &str) -> String {
    format!("{}{}", stem(reads_name), FILE_ENDING_CENTRIFUGE_REPORT_TSV)
}

pub fn mtdna_region_name(bam_name: &str) -> String {
    format!("{}{}", stem(bam_name), FILE_ENDING_MTDNA_REGION_BED)
}

/// angsd writes `<prefix>.fa.gz`; this is that file's name.
pub fn consensus_name(bam_name: &str) -> String {
    format!("{}{}", stem(bam_name), FILE_ENDING_CONSENSUS_FA_GZ)
}

/// Prefix handed to angsd `-out` so it produces `output_name`.
pub fn angsd_prefix(output_name: &str) -> &str {
    strip_suffix(output_name, FILE_ENDING_FA_GZ)
}

pub fn extracted_region_name(bam_name: &str, bed_name: &str) -> String {
    format!("{}_{}{}", stem(bam_name), stem(bed_name), FILE_ENDING_BAM)
}

pub fn extracted_fasta_name(extracted_bam_name: &str) -> String {
    format!("{}{}", stem(extracted_bam_name), FILE_ENDING_FASTA)
}
