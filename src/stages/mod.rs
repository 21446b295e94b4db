//! Stage abstraction and the runner that gives every stage the same
//! skip-if-present, staged-write and error-containment behaviour.

pub mod report;
pub mod qc;
pub mod reads;
pub mod contamination;
pub mod read_summary;
pub mod mapping;
pub mod alignment;
pub mod mtdna;
pub mod plots;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use crate::config::defs::{PipelineError, RunConfig, Step, REFERENCE_GENOME_EXTS, SETTING_THREADS};
use crate::config::species::Species;
use crate::utils::command::{ToolInvocation, ToolOutput};
use crate::utils::file::{artifact_state, discard, file_name, list_files_matching, promote, staging_path, ArtifactState};
use crate::utils::naming;
use crate::utils::paths::SpeciesDir;
use crate::utils::system::pool_size;
pub use report::{ItemReport, Outcome, PipelineReport, StageReport};


/// What a stage runs for: one species, or the whole project.
#[derive(Debug, Clone)]
pub enum Scope {
    Species(Species),
    Project,
}

/// Shared state handed to every stage call.
#[derive(Clone)]
pub struct StageContext {
    pub cfg: Arc<RunConfig>,
    pub scope: Scope,
}

impl StageContext {
    pub fn new(cfg: Arc<RunConfig>, scope: Scope) -> Self {
        StageContext { cfg, scope }
    }

    pub fn species(&self) -> Result<&Species, PipelineError> {
        match &self.scope {
            Scope::Species(s) => Ok(s),
            Scope::Project => Err(PipelineError::Config("Stage needs a species scope".to_string())),
        }
    }

    fn species_opt(&self) -> Option<&Species> {
        match &self.scope {
            Scope::Species(s) => Some(s),
            Scope::Project => None,
        }
    }

    pub fn scope_name(&self) -> String {
        match &self.scope {
            Scope::Species(s) => s.id().to_string(),
            Scope::Project => "project".to_string(),
        }
    }

    /// Merged step setting for the current scope.
    pub fn setting<T: serde::de::DeserializeOwned>(&self, step: Step, key: &str, default: T) -> T {
        self.cfg.store.setting(step, self.species_opt(), key, default)
    }

    /// Thread count handed to the external tool of `step`.
    pub fn threads(&self, step: Step) -> usize {
        self.setting(step, SETTING_THREADS, self.cfg.threads).max(1)
    }

    pub fn tool(&self, tool: &'static str) -> Result<ToolInvocation, PipelineError> {
        ToolInvocation::for_tool(&self.cfg.store, tool)
    }

    pub async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, PipelineError> {
        self.cfg.runner.run(invocation).await
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceGenome {
    /// File name without extension
    pub id: String,
    pub path: PathBuf,
}

/// Reference genomes in `raw/ref_genome` (`.fna`, `.fasta`, `.fa`).
pub fn discover_genomes(ctx: &StageContext) -> Result<Vec<ReferenceGenome>, PipelineError> {
    let species = ctx.species()?;
    let dir = ctx.cfg.layout.species_dir(species, SpeciesDir::RawRefGenome)?;
    let files = list_files_matching(&dir, |name| REFERENCE_GENOME_EXTS.iter().any(|ext| name.ends_with(ext)))?;
    if files.is_empty() {
        return Err(PipelineError::MissingPrerequisite(format!(
            "No reference genome found for species {} in {}", species, dir.display()
        )));
    }
    Ok(files
        .into_iter()
        .map(|path| ReferenceGenome { id: naming::stem(&file_name(&path)).to_string(), path })
        .collect())
}


/// One unit of work: the files it consumes and, for genome-scoped stages,
/// the reference genome it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub label: String,
    pub inputs: Vec<PathBuf>,
    pub genome: Option<ReferenceGenome>,
    /// Set when the item is known up front not to be processed
    pub skip: Option<String>,
    /// Species ids the item covers, for project-scoped stages
    pub species_ids: Vec<String>,
}

impl WorkItem {
    pub fn new(label: impl Into<String>, inputs: Vec<PathBuf>) -> Self {
        WorkItem { label: label.into(), inputs, genome: None, skip: None, species_ids: Vec::new() }
    }

    /// Item named after its first input file.
    pub fn for_file(path: &Path) -> Self {
        Self::new(file_name(path), vec![path.to_path_buf()])
    }

    pub fn with_genome(mut self, genome: &ReferenceGenome) -> Self {
        self.genome = Some(genome.clone());
        self
    }

    pub fn with_species_ids(mut self, ids: &[String]) -> Self {
        self.species_ids = ids.to_vec();
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(reason.into());
        self
    }

    pub fn input(&self, idx: usize) -> Result<&Path, PipelineError> {
        self.inputs
            .get(idx)
            .map(PathBuf::as_path)
            .ok_or_else(|| PipelineError::Config(format!("Item {} has no input #{}", self.label, idx)))
    }

    pub fn genome(&self) -> Result<&ReferenceGenome, PipelineError> {
        self.genome
            .as_ref()
            .ok_or_else(|| PipelineError::Config(format!("Item {} has no reference genome", self.label)))
    }
}


/// Canonical output of an item.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Produced into a `.partial.` sibling and renamed on success. Tools that
    /// write whole directories or fixed file sets run in place instead.
    pub staged: bool,
}

impl Artifact {
    pub fn staged(path: PathBuf) -> Self {
        Artifact { path, staged: true }
    }

    pub fn in_place(path: PathBuf) -> Self {
        Artifact { path, staged: false }
    }
}


/// Secondary artifact derived from the primary output (an index, a FASTA
/// view). Guarded by its own presence check.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub output: PathBuf,
    pub invocation: ToolInvocation,
    pub staged: bool,
}

impl FollowUp {
    /// `build` receives the path the tool must write to.
    pub fn staged<F>(output: PathBuf, build: F) -> Result<Self, PipelineError>
    where
        F: FnOnce(&Path) -> Result<ToolInvocation, PipelineError>,
    {
        let invocation = build(&staging_path(&output))?;
        Ok(FollowUp { output, invocation, staged: true })
    }
}


/// A processing step. Implementations describe inputs, outputs and the tool
/// call; `run_stage` owns presence checks, staging and error containment.
pub trait Stage: Send + Sync {
    fn step(&self) -> Step;

    fn name(&self) -> &'static str {
        self.step().key()
    }

    /// Run items through a bounded worker pool instead of one at a time.
    fn parallel(&self) -> bool {
        false
    }

    /// Runs once for the project instead of once per species.
    fn project_scoped(&self) -> bool {
        false
    }

    /// In-process aggregate rebuilt on every run, so inputs that appeared
    /// since the last run are picked up.
    fn rebuilds(&self) -> bool {
        false
    }

    /// Work items for the context's scope. `MissingPrerequisite` and an empty
    /// list both mean there is nothing to do here.
    fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError>;

    fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError>;

    /// Downstream artifact whose presence also satisfies this item.
    fn superseded_by(&self, _ctx: &StageContext, _item: &WorkItem, _output: &Path) -> Option<PathBuf> {
        None
    }

    fn build_invocation(&self, _ctx: &StageContext, item: &WorkItem, _target: &Path) -> Result<ToolInvocation, PipelineError> {
        Err(PipelineError::Config(format!("{} has no tool invocation for {}", self.name(), item.label)))
    }

    /// Writes the artifact at `target`. The default runs `build_invocation`.
    fn produce<'a>(&'a self, ctx: &'a StageContext, item: &'a WorkItem, target: &'a Path) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let invocation = self.build_invocation(ctx, item, target)?;
            ctx.run(&invocation).await.map(|_| ())
        })
    }

    fn follow_ups(&self, _ctx: &StageContext, _item: &WorkItem, _output: &Path) -> Result<Vec<FollowUp>, PipelineError> {
        Ok(Vec::new())
    }

    /// Runs after a fresh artifact was promoted.
    fn postprocess(&self, _ctx: &StageContext, _item: &WorkItem, _output: &Path) -> Result<(), PipelineError> {
        Ok(())
    }
}


/// Runs one stage for one scope and reports every item.
///
/// # Arguments
///
/// * `stage` - stage to run
/// * `cfg` - shared run configuration
/// * `scope` - species or project
///
/// # Returns
///
/// StageReport: never an error; failures are recorded per item
pub async fn run_stage(stage: &dyn Stage, cfg: &Arc<RunConfig>, scope: Scope) -> StageReport {
    let ctx = StageContext::new(cfg.clone(), scope);
    let mut report = StageReport::new(stage.name(), ctx.scope_name());

    if !cfg.store.is_enabled(stage.step(), ctx.species_opt()) {
        info!("Stage {} disabled for {}. Skipping.", stage.name(), ctx.scope_name());
        report.skip_all("disabled");
        return report;
    }

    let items = match stage.resolve_inputs(&ctx) {
        Ok(items) if items.is_empty() => {
            warn!("No input files for stage {} in {}. Skipping.", stage.name(), ctx.scope_name());
            report.skip_all("no input files");
            return report;
        }
        Ok(items) => items,
        Err(PipelineError::MissingPrerequisite(msg)) => {
            warn!("{}. Skipping stage {}.", msg, stage.name());
            report.skip_all(msg);
            return report;
        }
        Err(e) => {
            error!("Stage {} could not resolve inputs for {}: {}", stage.name(), ctx.scope_name(), e);
            report.fail_all(&e);
            return report;
        }
    };

    info!("Running {} for {} ({} items)", stage.name(), ctx.scope_name(), items.len());

    if stage.parallel() {
        let workers = pool_size(cfg.threads, cfg.available_cores, items.len());
        debug!("Stage {} using {} workers", stage.name(), workers);
        let results: Vec<ItemReport> = stream::iter(items.iter())
            .map(|item| process_item(stage, &ctx, item))
            .buffer_unordered(workers)
            .collect()
            .await;
        for r in results {
            report.push(r);
        }
    } else {
        for item in &items {
            report.push(process_item(stage, &ctx, item).await);
        }
    }
    report
}

async fn process_item(stage: &dyn Stage, ctx: &StageContext, item: &WorkItem) -> ItemReport {
    if let Some(reason) = &item.skip {
        info!("Skipping {}: {}", item.label, reason);
        return ItemReport::new(&item.label, Outcome::Skipped(reason.clone()));
    }
    match process_item_inner(stage, ctx, item).await {
        Ok(outcome) => ItemReport::new(&item.label, outcome),
        Err(e) => {
            error!("Stage {} failed for {}: {}", stage.name(), item.label, e);
            ItemReport::failed(&item.label, &e)
        }
    }
}

async fn process_item_inner(stage: &dyn Stage, ctx: &StageContext, item: &WorkItem) -> Result<Outcome, PipelineError> {
    if let Some(missing) = item.inputs.iter().find(|p| !p.exists()) {
        return Err(PipelineError::MissingInput(missing.clone()));
    }

    let artifact = stage.resolve_output(ctx, item)?;
    let overwrite = ctx.cfg.overwrite;
    let superseded = stage
        .superseded_by(ctx, item, &artifact.path)
        .filter(|p| artifact_state(p, overwrite) == ArtifactState::Present);

    let mut outcome = if !stage.rebuilds() && artifact_state(&artifact.path, overwrite) == ArtifactState::Present {
        info!("Output file {} already exists! Skipping!", artifact.path.display());
        Outcome::Skipped("already exists".to_string())
    } else if let Some(downstream) = &superseded {
        info!("{} already processed into {}. Skipping!", item.label, downstream.display());
        Outcome::Skipped("superseded by downstream artifact".to_string())
    } else {
        produce_artifact(stage, ctx, item, &artifact).await?;
        stage.postprocess(ctx, item, &artifact.path)?;
        Outcome::Completed
    };

    if superseded.is_none() {
        for follow_up in stage.follow_ups(ctx, item, &artifact.path)? {
            if run_follow_up(ctx, &follow_up).await? {
                outcome = Outcome::Completed;
            }
        }
    }
    Ok(outcome)
}

async fn produce_artifact(stage: &dyn Stage, ctx: &StageContext, item: &WorkItem, artifact: &Artifact) -> Result<(), PipelineError> {
    info!("{}: producing {}", stage.name(), artifact.path.display());
    if !artifact.staged {
        stage.produce(ctx, item, &artifact.path).await?;
        if artifact_state(&artifact.path, false) == ArtifactState::Missing {
            return Err(PipelineError::ToolExecution {
                tool: stage.name().to_string(),
                error: format!("finished without creating {}", artifact.path.display()),
            });
        }
        return Ok(());
    }

    let staged = staging_path(&artifact.path);
    discard(&staged);
    if let Err(e) = stage.produce(ctx, item, &staged).await {
        discard(&staged);
        return Err(e);
    }
    if !staged.exists() {
        return Err(PipelineError::ToolExecution {
            tool: stage.name().to_string(),
            error: format!("finished without creating {}", artifact.path.display()),
        });
    }
    promote(&staged, &artifact.path)
}

/// True when the follow-up actually ran.
async fn run_follow_up(ctx: &StageContext, follow_up: &FollowUp) -> Result<bool, PipelineError> {
    if artifact_state(&follow_up.output, ctx.cfg.overwrite) == ArtifactState::Present {
        info!("Output file {} already exists! Skipping!", follow_up.output.display());
        return Ok(false);
    }
    if !follow_up.staged {
        ctx.run(&follow_up.invocation).await?;
        return Ok(true);
    }
    let staged = staging_path(&follow_up.output);
    discard(&staged);
    if let Err(e) = ctx.run(&follow_up.invocation).await {
        discard(&staged);
        return Err(e);
    }
    if !staged.exists() {
        return Err(PipelineError::ToolExecution {
            tool: follow_up.invocation.tool.to_string(),
            error: format!("finished without creating {}", follow_up.output.display()),
        });
    }
    promote(&staged, &follow_up.output)?;
    Ok(true)
}

/// Runs a stage for each species in order, collecting the reports.
pub async fn run_for_species(stage: &dyn Stage, cfg: &Arc<RunConfig>, species: &[Species]) -> Vec<StageReport> {
    let mut reports = Vec::with_capacity(species.len());
    for sp in species {
        reports.push(run_stage(stage, cfg, Scope::Species(sp.clone())).await);
    }
    reports
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use anyhow::Result;
    use tempfile::TempDir;
    use crate::config::store::ConfigStore;
    use crate::utils::command::ToolRunner;

    struct NoRunner;

    impl ToolRunner for NoRunner {
        fn run<'a>(&'a self, inv: &'a ToolInvocation) -> BoxFuture<'a, Result<ToolOutput, PipelineError>> {
            Box::pin(async move {
                Err(PipelineError::ToolExecution { tool: inv.tool.to_string(), error: "no tools in unit tests".into() })
            })
        }
    }

    /// Copies its single input into the output, counting how often it runs.
    struct CopyStage {
        calls: AtomicUsize,
        fail_on: Option<String>,
    }

    impl Stage for CopyStage {
        fn step(&self) -> Step {
            Step::Deduplication
        }

        fn resolve_inputs(&self, ctx: &StageContext) -> Result<Vec<WorkItem>, PipelineError> {
            let sp = ctx.species()?;
            let dir = ctx.cfg.layout.species_dir(sp, SpeciesDir::Resources)?;
            let files = list_files_matching(&dir, |n| n.ends_with(".in"))?;
            Ok(files.iter().map(|f| WorkItem::for_file(f)).collect())
        }

        fn resolve_output(&self, ctx: &StageContext, item: &WorkItem) -> Result<Artifact, PipelineError> {
            let sp = ctx.species()?;
            let dir = ctx.cfg.layout.species_dir(sp, SpeciesDir::Logs)?;
            Ok(Artifact::staged(dir.join(format!("{}.out", item.label))))
        }

        fn produce<'a>(&'a self, _ctx: &'a StageContext, item: &'a WorkItem, target: &'a Path) -> BoxFuture<'a, Result<(), PipelineError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                fs::write(target, b"partial")?;
                if self.fail_on.as_deref() == Some(item.label.as_str()) {
                    return Err(PipelineError::IOError("boom".into()));
                }
                fs::copy(item.input(0)?, target)?;
                Ok(())
            })
        }
    }

    fn setup(tmp: &TempDir) -> Result<Arc<RunConfig>> {
        let yaml = format!(
            "path_adna_project: {}\nspecies:\n  Bger: {{}}\n  Dsim: {{}}\nprocessing:\n  deduplication:\n    enabled: true\n",
            tmp.path().display()
        );
        let store = ConfigStore::from_yaml_str(&yaml)?;
        Ok(Arc::new(RunConfig::new(store, Arc::new(NoRunner))))
    }

    #[tokio::test]
    async fn test_second_run_skips_existing_output() -> Result<()> {
        let tmp = TempDir::new()?;
        let cfg = setup(&tmp)?;
        let bger = cfg.store.species().lookup("Bger")?.clone();
        let res = cfg.layout.species_dir(&bger, SpeciesDir::Resources)?;
        fs::write(res.join("a.in"), b"data")?;

        let stage = CopyStage { calls: AtomicUsize::new(0), fail_on: None };
        let first = run_stage(&stage, &cfg, Scope::Species(bger.clone())).await;
        assert_eq!(first.completed(), 1);
        let second = run_stage(&stage, &cfg, Scope::Species(bger.clone())).await;
        assert_eq!(second.skipped(), 1);
        assert_eq!(stage.calls.load(Ordering::SeqCst), 1);

        let out = cfg.layout.species_dir(&bger, SpeciesDir::Logs)?.join("a.in.out");
        assert_eq!(fs::read(&out)?, b"data");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_item_leaves_no_artifact_and_batch_continues() -> Result<()> {
        let tmp = TempDir::new()?;
        let cfg = setup(&tmp)?;
        let bger = cfg.store.species().lookup("Bger")?.clone();
        let res = cfg.layout.species_dir(&bger, SpeciesDir::Resources)?;
        fs::write(res.join("a.in"), b"a")?;
        fs::write(res.join("b.in"), b"b")?;

        let stage = CopyStage { calls: AtomicUsize::new(0), fail_on: Some("a.in".to_string()) };
        let report = run_stage(&stage, &cfg, Scope::Species(bger.clone())).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.completed(), 1);

        let logs = cfg.layout.species_dir(&bger, SpeciesDir::Logs)?;
        assert!(!logs.join("a.in.out").exists());
        assert!(!staging_path(&logs.join("a.in.out")).exists());
        assert!(logs.join("b.in.out").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_inputs_is_a_skip_per_species() -> Result<()> {
        let tmp = TempDir::new()?;
        let cfg = setup(&tmp)?;
        let species: Vec<Species> = cfg.store.species().iter().cloned().collect();
        let bger = &species[0];
        fs::write(cfg.layout.species_dir(bger, SpeciesDir::Resources)?.join("a.in"), b"a")?;

        let stage = CopyStage { calls: AtomicUsize::new(0), fail_on: None };
        let reports = run_for_species(&stage, &cfg, &species).await;
        assert_eq!(reports[0].completed(), 1);
        assert_eq!(reports[1].skipped(), 1);
        assert_eq!(reports[1].failed(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_stage_not_run() -> Result<()> {
        let tmp = TempDir::new()?;
        let yaml = format!(
            "path_adna_project: {}\nspecies:\n  Bger: {{}}\nprocessing:\n  deduplication:\n    enabled: false\n",
            tmp.path().display()
        );
        let cfg = Arc::new(RunConfig::new(ConfigStore::from_yaml_str(&yaml)?, Arc::new(NoRunner)));
        let bger = cfg.store.species().lookup("Bger")?.clone();
        fs::write(cfg.layout.species_dir(&bger, SpeciesDir::Resources)?.join("a.in"), b"a")?;

        let stage = CopyStage { calls: AtomicUsize::new(0), fail_on: None };
        let report = run_stage(&stage, &cfg, Scope::Species(bger)).await;
        assert_eq!(report.items[0].outcome, Outcome::Skipped("disabled".to_string()));
        assert_eq!(stage.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
