#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use anyhow::Result;
use futures::future::BoxFuture;
use tempfile::TempDir;
use adna_pipelines::config::defs::*;
use adna_pipelines::config::store::ConfigStore;
use adna_pipelines::utils::command::{ToolInvocation, ToolOutput, ToolRunner};

pub const ADAPTER_R1: &str = "AGATCGGAAGAGCACACGTCTGAACTCCAGTCA";
pub const ADAPTER_R2: &str = "AGATCGGAAGAGCGTCGTGTAGGGAAAGAGTGT";

/// Fake tool runner. Records every call, writes configured stdout into
/// redirected files and touches every file an invocation declares.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<ToolInvocation>>,
    responses: Mutex<Vec<(String, String)>>,
    failing: Mutex<Vec<String>>,
    writes: Mutex<Vec<(String, String)>>,
    plot_tools: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Calls whose command line contains `needle` print `stdout`.
    pub fn respond(&self, needle: &str, stdout: &str) {
        self.responses.lock().unwrap().push((needle.to_string(), stdout.to_string()));
    }

    /// Calls whose command line contains `needle` exit non-zero.
    pub fn fail_when(&self, needle: &str) {
        self.failing.lock().unwrap().push(needle.to_string());
    }

    /// Calls whose command line contains `needle` fill the files they
    /// declare with `content` instead of a stub.
    pub fn writes(&self, needle: &str, content: &str) {
        self.writes.lock().unwrap().push((needle.to_string(), content.to_string()));
    }

    /// Calls of `tool` drop a plot into the directory given as their last argument.
    pub fn plots_into_last_arg(&self, tool: &str) {
        self.plot_tools.lock().unwrap().push(tool.to_string());
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, tool: &str) -> usize {
        self.calls().iter().filter(|c| c.tool == tool).count()
    }

    /// Calls of `tool` whose first argument is `subcommand`.
    pub fn count_subcommand(&self, tool: &str, subcommand: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.tool == tool && c.args.first().map(String::as_str) == Some(subcommand))
            .count()
    }

    fn touch(path: &Path, content: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }
}

impl ToolRunner for RecordingRunner {
    fn run<'a>(&'a self, inv: &'a ToolInvocation) -> BoxFuture<'a, Result<ToolOutput, PipelineError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(inv.clone());
            let line = inv.command_line();

            if self.failing.lock().unwrap().iter().any(|n| line.contains(n.as_str())) {
                return Err(PipelineError::ToolExecution { tool: inv.tool.to_string(), error: "exited with 1".into() });
            }

            let stdout = self
                .responses
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _)| line.contains(n.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_default();

            let mut output = ToolOutput { stdout, stderr: String::new() };
            if let Some(path) = &inv.stdout_to {
                Self::touch(path, output.stdout.as_bytes())?;
                output.stdout.clear();
            }
            let content = self
                .writes
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _)| line.contains(n.as_str()))
                .map(|(_, c)| c.clone().into_bytes())
                .unwrap_or_else(|| b"stub".to_vec());
            for path in &inv.creates {
                if !path.exists() {
                    Self::touch(path, &content)?;
                }
            }
            if self.plot_tools.lock().unwrap().iter().any(|t| t == inv.tool) {
                if let Some(dir) = inv.args.last() {
                    Self::touch(&Path::new(dir).join("plot.pdf"), b"%PDF")?;
                }
            }
            Ok(output)
        })
    }
}

pub fn yaml(root: &Path, species: &[&str]) -> String {
    let mut text = format!(
        "path_adna_project: {}\nthreads_default: 2\ntools:\n",
        root.display()
    );
    for tool in ALL_TOOL_TAGS {
        text.push_str(&format!("  {}: /usr/bin/{}\n", tool, tool));
    }
    text.push_str("species:\n");
    for id in species {
        text.push_str(&format!("  {}:\n    name: {} species\n", id, id));
    }
    text.push_str(&format!(
        "processing:\n  adapter_remove_and_merge:\n    adapter_sequence_r1: {}\n    adapter_sequence_r2: {}\n",
        ADAPTER_R1, ADAPTER_R2
    ));
    text
}

pub fn setup(tmp: &TempDir, species: &[&str], runner: Arc<RecordingRunner>) -> Result<Arc<RunConfig>> {
    setup_with(tmp, species, "", runner)
}

/// Like `setup`, with `processing` text appended to the processing block.
pub fn setup_with(tmp: &TempDir, species: &[&str], processing: &str, runner: Arc<RecordingRunner>) -> Result<Arc<RunConfig>> {
    let text = format!("{}{}", yaml(tmp.path(), species), processing);
    let store = ConfigStore::from_yaml_str(&text)?;
    Ok(Arc::new(RunConfig::new(store, runner)))
}

/// Empty R scripts where the plot stages look for them.
pub fn install_r_scripts(cfg: &RunConfig) -> Result<()> {
    let per_species = [
        (FOLDER_RAW_READS_PROCESSING, R_SCRIPT_PLOT_READS_BEFORE_AFTER_PROCESSING),
        (FOLDER_RAW_READS_PROCESSING, R_SCRIPT_PLOT_SEQUENCE_LENGTH_DISTRIBUTION),
        (FOLDER_REF_GENOME_PROCESSING, R_SCRIPT_PLOT_DEPTH),
        (FOLDER_REF_GENOME_PROCESSING, R_SCRIPT_PLOT_BREADTH),
        (FOLDER_REF_GENOME_PROCESSING, R_SCRIPT_PLOT_ENDOGENOUS_READS),
    ];
    for (folder, script) in per_species {
        fs_touch(&cfg.layout.r_script(folder, script), b"")?;
    }
    let comparison = format!("{}/{}", FOLDER_ADDITIONAL_ANALYSIS, FOLDER_SPECIES_COMPARISON);
    for script in [
        R_SCRIPT_PLOT_COMPARE_SPECIES_READS_BEFORE_AFTER_PROCESSING,
        R_SCRIPT_PLOT_COMPARE_SPECIES_DEPTH_BREADTH,
        R_SCRIPT_PLOT_COMPARE_SPECIES_ENDOGENOUS_READS,
    ] {
        fs_touch(&cfg.layout.r_script(&comparison, script), b"")?;
    }
    Ok(())
}

fn fs_touch(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn touch(path: &Path) -> Result<()> {
    fs_touch(path, b"@r1\nACGT\n+\nIIII\n")
}
