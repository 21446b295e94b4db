// src/stages/report.rs: Per-item outcomes and run summaries

use std::fmt;
use std::path::Path;
use log::{info, warn};
use crate::config::defs::PipelineError;
use crate::utils::table::write_tsv;


#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Skipped(_) => "skipped",
            Outcome::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Outcome::Completed => "",
            Outcome::Skipped(r) | Outcome::Failed(r) => r,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::Skipped(r) => write!(f, "skipped ({})", r),
            Outcome::Failed(r) => write!(f, "failed ({})", r),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub item: String,
    pub outcome: Outcome,
}

impl ItemReport {
    pub fn new(item: impl Into<String>, outcome: Outcome) -> Self {
        ItemReport { item: item.into(), outcome }
    }

    pub fn failed(item: impl Into<String>, err: &PipelineError) -> Self {
        Self::new(item, Outcome::Failed(err.to_string()))
    }
}


/// Outcomes of one stage for one scope (a species or the whole project).
/// A stage that never reached its items records a single scope-level entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: &'static str,
    pub scope: String,
    pub items: Vec<ItemReport>,
}

impl StageReport {
    pub fn new(stage: &'static str, scope: impl Into<String>) -> Self {
        StageReport { stage, scope: scope.into(), items: Vec::new() }
    }

    pub fn push(&mut self, item: ItemReport) {
        self.items.push(item);
    }

    pub fn skip_all(&mut self, reason: impl Into<String>) {
        let scope = self.scope.clone();
        self.items.push(ItemReport::new(scope, Outcome::Skipped(reason.into())));
    }

    pub fn fail_all(&mut self, err: &PipelineError) {
        let scope = self.scope.clone();
        self.items.push(ItemReport::failed(scope, err));
    }

    pub fn count(&self, label: &str) -> usize {
        self.items.iter().filter(|i| i.outcome.label() == label).count()
    }

    pub fn completed(&self) -> usize {
        self.count("completed")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }
}


#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn push(&mut self, report: StageReport) {
        self.stages.push(report);
    }

    pub fn extend(&mut self, other: PipelineReport) {
        self.stages.extend(other.stages);
    }

    pub fn failures(&self) -> impl Iterator<Item = (&StageReport, &ItemReport)> {
        self.stages
            .iter()
            .flat_map(|s| s.items.iter().map(move |i| (s, i)))
            .filter(|(_, i)| i.outcome.is_failed())
    }

    pub fn totals(&self) -> (usize, usize, usize) {
        self.stages.iter().fold((0, 0, 0), |(c, s, f), st| {
            (c + st.completed(), s + st.skipped(), f + st.failed())
        })
    }

    pub fn log_summary(&self) {
        let (completed, skipped, failed) = self.totals();
        info!(
            "Run summary: {} stage runs, {} items completed, {} skipped, {} failed",
            self.stages.len(), completed, skipped, failed
        );
        for (stage, item) in self.failures() {
            warn!("Failed: {} [{}] {}: {}", stage.stage, stage.scope, item.item, item.outcome.reason());
        }
    }

    /// One row per item: stage, scope, item, outcome, reason.
    pub fn write_tsv(&self, path: &Path) -> Result<(), PipelineError> {
        let rows = self.stages.iter().flat_map(|s| {
            s.items.iter().map(move |i| {
                vec![
                    s.stage.to_string(),
                    s.scope.clone(),
                    i.item.clone(),
                    i.outcome.label().to_string(),
                    i.outcome.reason().to_string(),
                ]
            })
        });
        write_tsv(path, &["stage", "scope", "item", "outcome", "reason"], rows)
    }
}
