mod common;

use std::fs;
use std::sync::Arc;
use anyhow::Result;
use tempfile::TempDir;
use adna_pipelines::config::defs::{
    Step, BWA_TAG, CENTRIFUGE_TAG, FASTP_TAG, KRAKEN2_TAG, RSCRIPT_TAG, SAMTOOLS_TAG, SEQKIT_TAG,
};
use adna_pipelines::config::species::Species;
use adna_pipelines::pipelines::{self, Pipeline};
use adna_pipelines::stages::contamination::{Classifier, ContaminationCheck};
use adna_pipelines::stages::mapping::SamToBam;
use adna_pipelines::stages::plots::SpeciesPlot;
use adna_pipelines::stages::read_summary::ReadsProcessingResult;
use adna_pipelines::stages::reads::AdapterRemoval;
use adna_pipelines::stages::{run_for_species, run_stage, Outcome, Scope};
use adna_pipelines::utils::paths::{GenomeDir, PlotKind, ReadPhase, SpeciesDir};
use common::{install_r_scripts, setup, setup_with, touch, RecordingRunner, ADAPTER_R1, ADAPTER_R2};


#[tokio::test]
async fn test_paired_adapter_removal_merges_once() -> Result<()> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    let cfg = setup(&tmp, &["Bger"], runner.clone())?;
    let bger = cfg.store.species().lookup("Bger")?.clone();

    let raw = cfg.layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::Raw))?;
    touch(&raw.join("sample_R1_001.fastq.gz"))?;
    touch(&raw.join("sample_R2_001.fastq.gz"))?;

    let first = run_stage(&AdapterRemoval, &cfg, Scope::Species(bger.clone())).await;
    assert_eq!(first.completed(), 1);
    assert_eq!(runner.count(FASTP_TAG), 1);

    let call = &runner.calls()[0];
    assert!(call.args.iter().any(|a| a == "--merge"));
    assert!(call.args.iter().any(|a| a == ADAPTER_R1));
    assert!(call.args.iter().any(|a| a == ADAPTER_R2));

    let out_dir = cfg.layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::AdapterRemoved))?;
    let merged: Vec<String> = fs::read_dir(&out_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".fastq.gz"))
        .collect();
    assert_eq!(merged, vec!["sample_001_merged_trimmed.fastq.gz".to_string()]);

    let second = run_stage(&AdapterRemoval, &cfg, Scope::Species(bger)).await;
    assert_eq!(second.items[0].outcome, Outcome::Skipped("already exists".to_string()));
    assert_eq!(runner.count(FASTP_TAG), 1);
    Ok(())
}

#[tokio::test]
async fn test_orphan_r2_reported_not_processed() -> Result<()> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    let cfg = setup(&tmp, &["Bger"], runner.clone())?;
    let bger = cfg.store.species().lookup("Bger")?.clone();

    let raw = cfg.layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::Raw))?;
    touch(&raw.join("lonely_R2_001.fastq.gz"))?;
    touch(&raw.join("single.fastq.gz"))?;

    let report = run_stage(&AdapterRemoval, &cfg, Scope::Species(bger)).await;
    assert_eq!(report.completed(), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(runner.count(FASTP_TAG), 1);
    Ok(())
}


async fn convert_one_sam(header: &str) -> Result<Arc<RecordingRunner>> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    runner.respond("view -H", header);
    let cfg = setup(&tmp, &["Bger"], runner.clone())?;
    let bger = cfg.store.species().lookup("Bger")?.clone();

    touch(&cfg.layout.species_dir(&bger, SpeciesDir::RawRefGenome)?.join("g1.fna"))?;
    let mapped = cfg.layout.genome_dir(&bger, "g1", GenomeDir::Mapped)?;
    touch(&mapped.join("Bger_combined_g1.sam"))?;

    let stage = SamToBam { step: Step::ConvertSamToBam, dir: GenomeDir::Mapped };
    let report = run_stage(&stage, &cfg, Scope::Species(bger)).await;
    assert_eq!(report.completed(), 1, "{:?}", report.items);

    assert!(mapped.join("Bger_combined_g1_sorted.bam").exists());
    assert!(mapped.join("Bger_combined_g1_sorted.bam.bai").exists());
    assert!(!mapped.join("Bger_combined_g1.bam").exists(), "unsorted BAM is removed");
    Ok(runner)
}

#[tokio::test]
async fn test_coordinate_sorted_sam_skips_sort() -> Result<()> {
    let runner = convert_one_sam("@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:100\n").await?;
    assert_eq!(runner.count_subcommand(SAMTOOLS_TAG, "sort"), 0);
    assert_eq!(runner.count_subcommand(SAMTOOLS_TAG, "index"), 1);
    Ok(())
}

#[tokio::test]
async fn test_unsorted_sam_is_sorted() -> Result<()> {
    let runner = convert_one_sam("@HD\tVN:1.6\tSO:unsorted\n").await?;
    assert_eq!(runner.count_subcommand(SAMTOOLS_TAG, "sort"), 1);
    assert_eq!(runner.count_subcommand(SAMTOOLS_TAG, "index"), 1);
    Ok(())
}


#[tokio::test]
async fn test_species_without_input_does_not_stop_batch() -> Result<()> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    let cfg = setup(&tmp, &["Bger", "Dsim", "Pmac"], runner.clone())?;
    let species: Vec<Species> = cfg.store.species().iter().cloned().collect();

    for id in ["Bger", "Pmac"] {
        let sp = cfg.store.species().lookup(id)?;
        let raw = cfg.layout.species_dir(sp, SpeciesDir::Reads(ReadPhase::Raw))?;
        touch(&raw.join(format!("{}_R1_001.fastq.gz", id)))?;
        touch(&raw.join(format!("{}_R2_001.fastq.gz", id)))?;
    }

    let reports = run_for_species(&AdapterRemoval, &cfg, &species).await;
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].completed(), 1);
    assert_eq!(reports[1].skipped(), 1);
    assert_eq!(reports[1].failed(), 0);
    assert_eq!(reports[2].completed(), 1);
    assert_eq!(runner.count(FASTP_TAG), 2);
    Ok(())
}

#[tokio::test]
async fn test_failing_tool_is_contained() -> Result<()> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    runner.fail_when("bad_R1_001");
    let cfg = setup(&tmp, &["Bger"], runner.clone())?;
    let bger = cfg.store.species().lookup("Bger")?.clone();

    let raw = cfg.layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::Raw))?;
    for sample in ["bad", "good"] {
        touch(&raw.join(format!("{}_R1_001.fastq.gz", sample)))?;
        touch(&raw.join(format!("{}_R2_001.fastq.gz", sample)))?;
    }

    let report = run_stage(&AdapterRemoval, &cfg, Scope::Species(bger.clone())).await;
    assert_eq!(report.failed(), 1);
    assert_eq!(report.completed(), 1);

    let out_dir = cfg.layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::AdapterRemoved))?;
    assert!(!out_dir.join("bad_001_merged_trimmed.fastq.gz").exists());
    assert!(out_dir.join("good_001_merged_trimmed.fastq.gz").exists());
    Ok(())
}

#[tokio::test]
async fn test_species_runs_stay_in_their_tree() -> Result<()> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    let cfg = setup(&tmp, &["Bger", "Dsim"], runner.clone())?;
    let bger = cfg.store.species().lookup("Bger")?.clone();
    let dsim = cfg.store.species().lookup("Dsim")?.clone();

    let raw = cfg.layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::Raw))?;
    touch(&raw.join("s1_R1_001.fastq.gz"))?;
    touch(&raw.join("s1_R2_001.fastq.gz"))?;

    pipelines::run(Pipeline::RawReads, &cfg, &[bger.clone()]).await;

    let bger_root = cfg.layout.species_dir(&bger, SpeciesDir::Root)?;
    let dsim_root = cfg.layout.species_dir(&dsim, SpeciesDir::Root)?;
    let project = tmp.path().to_string_lossy().into_owned();
    let calls = runner.calls();
    assert!(!calls.is_empty());
    for call in &calls {
        for arg in call.args.iter().filter(|a| a.starts_with(&project)) {
            assert!(arg.starts_with(bger_root.to_string_lossy().as_ref()), "{} outside species tree", arg);
            assert!(!arg.starts_with(dsim_root.to_string_lossy().as_ref()));
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_raw_reads_pipeline_is_idempotent() -> Result<()> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    let cfg = setup(&tmp, &["Bger"], runner.clone())?;
    let bger = cfg.store.species().lookup("Bger")?.clone();

    let raw = cfg.layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::Raw))?;
    touch(&raw.join("s1_R1_001.fastq.gz"))?;
    touch(&raw.join("s1_R2_001.fastq.gz"))?;

    pipelines::run(Pipeline::RawReads, &cfg, &[bger.clone()]).await;
    // adapter removal, quality filter, deduplication
    assert_eq!(runner.count(FASTP_TAG), 3);
    let dedup = cfg.layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::DuplicatesRemoved))?;
    assert!(dedup.join("s1_001_duplicates_removed.fastq.gz").exists());

    let fastqc_after_first = runner.count("fastqc");
    pipelines::run(Pipeline::RawReads, &cfg, &[bger]).await;
    assert_eq!(runner.count(FASTP_TAG), 3);
    assert_eq!(runner.count("fastqc"), fastqc_after_first);
    Ok(())
}

#[tokio::test]
async fn test_mapping_skipped_once_sorted_bam_exists() -> Result<()> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    let cfg = setup(&tmp, &["Bger"], runner.clone())?;
    let bger = cfg.store.species().lookup("Bger")?.clone();

    let genome = cfg.layout.species_dir(&bger, SpeciesDir::RawRefGenome)?.join("g1.fna");
    touch(&genome)?;
    touch(&genome.with_file_name("g1.fna.bwt"))?;
    let prepared = cfg.layout.species_dir(&bger, SpeciesDir::PreparedForMapping)?;
    touch(&prepared.join("Bger_combined.fastq.gz"))?;
    let mapped = cfg.layout.genome_dir(&bger, "g1", GenomeDir::Mapped)?;
    touch(&mapped.join("Bger_combined_g1_sorted.bam"))?;

    let report = pipelines::run_step(Step::MapReadsToReferenceGenome, &cfg, &[bger]).await;
    assert_eq!(runner.count(BWA_TAG), 0);
    assert_eq!(report.stages[0].skipped(), 1);
    assert!(!mapped.join("Bger_combined_g1.sam").exists());
    Ok(())
}


#[tokio::test]
async fn test_reads_processing_result_counts_each_phase() -> Result<()> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    runner.plots_into_last_arg(RSCRIPT_TAG);
    let cfg = setup(&tmp, &["Bger"], runner.clone())?;
    install_r_scripts(&cfg)?;
    let bger = cfg.store.species().lookup("Bger")?.clone();

    let raw = cfg.layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::Raw))?.join("ind1_ss_R1_001.fastq.gz");
    touch(&raw)?;
    touch(&raw.with_file_name("ind1_ss_R2_001.fastq.gz"))?;
    let trimmed = cfg
        .layout
        .species_dir(&bger, SpeciesDir::Reads(ReadPhase::AdapterRemoved))?
        .join("ind1_ss_001_merged_trimmed.fastq.gz");
    touch(&trimmed)?;
    runner.respond(
        "stats -T",
        &format!(
            "file\tformat\ttype\tnum_seqs\tsum_len\n{}\tFASTQ\tDNA\t1,000\t4000\n{}\tFASTQ\tDNA\t800\t3000\n",
            raw.display(),
            trimmed.display()
        ),
    );

    let report = run_stage(&ReadsProcessingResult, &cfg, Scope::Species(bger.clone())).await;
    assert_eq!(report.completed(), 1, "{:?}", report.items);
    let seqkit = &runner.calls()[0];
    assert_eq!(seqkit.tool, SEQKIT_TAG);
    // only phases that exist on disk are counted
    assert_eq!(seqkit.args.len(), 6);

    let table = cfg
        .layout
        .species_dir(&bger, SpeciesDir::ProcessedReadsResult)?
        .join("Bger_reads_processing_result.tsv");
    let text = fs::read_to_string(&table)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("reads_file\tindividual\tprotocol\traw_count"));
    assert_eq!(lines[1], "ind1_ss_R1_001\tind1\tss\t1000\t800\t0\t0");

    let plot = run_stage(&SpeciesPlot { kind: PlotKind::ProcessedReads }, &cfg, Scope::Species(bger.clone())).await;
    assert_eq!(plot.completed(), 1, "{:?}", plot.items);
    let rscript = runner.calls().into_iter().find(|c| c.tool == RSCRIPT_TAG).map(|c| c.args);
    let rscript = rscript.unwrap_or_default();
    assert_eq!(rscript[1], "Bger");
    assert_eq!(rscript[2], table.to_string_lossy());
    let plots = cfg.layout.species_dir(&bger, SpeciesDir::Plots(PlotKind::ProcessedReads))?;
    assert!(plots.join("plot.pdf").exists());
    Ok(())
}

#[tokio::test]
async fn test_species_plot_without_table_is_skipped() -> Result<()> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    let cfg = setup(&tmp, &["Bger"], runner.clone())?;
    install_r_scripts(&cfg)?;
    let bger = cfg.store.species().lookup("Bger")?.clone();

    let report = run_stage(&SpeciesPlot { kind: PlotKind::ReadLengthDistribution }, &cfg, Scope::Species(bger)).await;
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.failed(), 0);
    assert!(runner.calls().is_empty());
    Ok(())
}


#[tokio::test]
async fn test_contamination_check_skips_blanks_and_missing_database() -> Result<()> {
    let tmp = TempDir::new()?;
    let runner = RecordingRunner::new();
    let db = tmp.path().join("kraken_db");
    fs::create_dir_all(&db)?;
    let processing = format!("  contamination_check:\n    kraken_db: {}\n", db.display());
    let cfg = setup_with(&tmp, &["Bger"], &processing, runner.clone())?;
    let bger = cfg.store.species().lookup("Bger")?.clone();

    let dedup = cfg.layout.species_dir(&bger, SpeciesDir::Reads(ReadPhase::DuplicatesRemoved))?;
    touch(&dedup.join("ind1_ss_001_duplicates_removed.fastq.gz"))?;
    touch(&dedup.join("LB_ss_001_duplicates_removed.fastq.gz"))?;

    let kraken = ContaminationCheck { classifier: Classifier::Kraken };
    let report = run_stage(&kraken, &cfg, Scope::Species(bger.clone())).await;
    assert_eq!(report.completed(), 1, "{:?}", report.items);
    assert_eq!(report.skipped(), 1);
    assert!(report.items.iter().any(|i| i.outcome == Outcome::Skipped("blank sample".to_string())));
    assert_eq!(runner.count(KRAKEN2_TAG), 1);
    let call = &runner.calls()[0];
    assert!(call.args.iter().any(|a| a == &db.to_string_lossy()));

    let reports = cfg.layout.species_dir(&bger, SpeciesDir::Kraken)?;
    assert!(reports.join("ind1_ss_001_duplicates_removed_kraken_report.tsv").exists());
    assert!(!reports.join("LB_ss_001_duplicates_removed_kraken_report.tsv").exists());

    let centrifuge = ContaminationCheck { classifier: Classifier::Centrifuge };
    let report = run_stage(&centrifuge, &cfg, Scope::Species(bger)).await;
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(runner.count(CENTRIFUGE_TAG), 0);
    Ok(())
}
