// src/pipelines/raw_reads.rs: Raw read processing from fastqc to read length plots

use crate::stages::contamination::{Classifier, ContaminationCheck};
use crate::stages::plots::SpeciesPlot;
use crate::stages::qc::{Fastqc, Multiqc};
use crate::stages::read_summary::{ReadLengthDistribution, ReadsProcessingResult};
use crate::stages::reads::{AdapterRemoval, Deduplication, QualityFilter};
use crate::stages::Stage;
use crate::utils::paths::{PlotKind, ReadPhase};


fn quality_check(phase: ReadPhase) -> [Box<dyn Stage>; 2] {
    [Box::new(Fastqc { phase }), Box::new(Multiqc { phase })]
}

pub fn stages() -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = Vec::new();
    stages.extend(quality_check(ReadPhase::Raw));
    stages.push(Box::new(AdapterRemoval));
    stages.extend(quality_check(ReadPhase::AdapterRemoved));
    stages.push(Box::new(QualityFilter));
    stages.extend(quality_check(ReadPhase::QualityFiltered));
    stages.push(Box::new(Deduplication));
    stages.extend(quality_check(ReadPhase::DuplicatesRemoved));
    stages.push(Box::new(ContaminationCheck { classifier: Classifier::Kraken }));
    stages.push(Box::new(ContaminationCheck { classifier: Classifier::Centrifuge }));
    stages.push(Box::new(ReadsProcessingResult));
    stages.push(Box::new(ReadLengthDistribution));
    stages.push(Box::new(SpeciesPlot { kind: PlotKind::ProcessedReads }));
    stages.push(Box::new(SpeciesPlot { kind: PlotKind::ReadLengthDistribution }));
    stages
}
