// src/pipelines/post_processing.rs: mtDNA marker analysis and species comparison plots

use crate::config::defs::Step;
use crate::stages::mapping::{MapToReference, ReadSource, SamToBam};
use crate::stages::mtdna::{CheckExtracted, Consensus, ExtractRegions, MtdnaRegions};
use crate::stages::plots::ComparisonPlots;
use crate::stages::Stage;
use crate::utils::paths::GenomeDir;


pub fn stages(comparisons: &[Vec<String>]) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(MapToReference { step: Step::MtdnaMapToRefGenome, source: ReadSource::MtdnaMarkers }),
        Box::new(SamToBam { step: Step::MtdnaMapToRefGenome, dir: GenomeDir::MtdnaMapped }),
        Box::new(MtdnaRegions),
        Box::new(Consensus),
        Box::new(MapToReference { step: Step::MtdnaCreateAndMapConsensus, source: ReadSource::Consensus }),
        Box::new(SamToBam { step: Step::MtdnaCreateAndMapConsensus, dir: GenomeDir::MtdnaConsensusMapped }),
        Box::new(ExtractRegions),
        Box::new(CheckExtracted),
        Box::new(ComparisonPlots { groups: comparisons.to_vec() }),
    ]
}
