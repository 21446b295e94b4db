// src/pipelines/ref_genome.rs: Mapping against every reference genome and the analyses on top

use crate::config::defs::Step;
use crate::stages::alignment::{CoverageAnalysis, CoverageSummary, Damage, EndogenousReads, SamtoolsDepth};
use crate::stages::mapping::{MapToReference, PrepareReads, PrepareReference, ReadSource, SamToBam};
use crate::stages::plots::SpeciesPlot;
use crate::stages::Stage;
use crate::utils::paths::{GenomeDir, PlotKind};


pub fn stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(PrepareReads),
        Box::new(PrepareReference),
        Box::new(MapToReference { step: Step::MapReadsToReferenceGenome, source: ReadSource::Prepared }),
        Box::new(SamToBam { step: Step::ConvertSamToBam, dir: GenomeDir::Mapped }),
        Box::new(EndogenousReads),
        Box::new(SamtoolsDepth),
        Box::new(CoverageAnalysis),
        Box::new(CoverageSummary),
        Box::new(Damage),
        Box::new(SpeciesPlot { kind: PlotKind::Depth }),
        Box::new(SpeciesPlot { kind: PlotKind::Breadth }),
        Box::new(SpeciesPlot { kind: PlotKind::EndogenousReads }),
    ]
}
