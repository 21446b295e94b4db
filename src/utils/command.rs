/// Functions and structs for building and running external tool command lines

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use futures::future::BoxFuture;
use log::{debug, error};
use tokio::process::Command;
use crate::config::defs::{PipelineError, TOOL_VERSION_ARGS, VERSION_FROM_USAGE_TOOLS};
use crate::config::store::ConfigStore;


/// One fully specified external tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Logical tool tag, e.g. `samtools`
    pub tool: &'static str,
    /// Executable as configured
    pub program: String,
    pub args: Vec<String>,
    /// Redirect the tool's stdout into this file instead of capturing it
    pub stdout_to: Option<PathBuf>,
    /// Files the tool is expected to create
    pub creates: Vec<PathBuf>,
    /// A non-zero exit still returns the captured output
    pub tolerate_failure: bool,
}

impl ToolInvocation {
    pub fn new(tool: &'static str, program: impl Into<String>) -> Self {
        ToolInvocation {
            tool,
            program: program.into(),
            args: Vec::new(),
            stdout_to: None,
            creates: Vec::new(),
            tolerate_failure: false,
        }
    }

    /// Looks the executable up in the configuration.
    pub fn for_tool(store: &ConfigStore, tool: &'static str) -> Result<Self, PipelineError> {
        Ok(Self::new(tool, store.tool_path(tool)?))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout_to = Some(path.to_path_buf());
        self
    }

    pub fn tolerate_failure(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }

    pub fn creates(mut self, path: &Path) -> Self {
        self.creates.push(path.to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(out) = &self.stdout_to {
            line.push_str(&format!(" > {}", out.display()));
        }
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Seam between stages and the operating system. Stages only ever talk to
/// a `ToolRunner`, so tests can substitute a recording fake.
pub trait ToolRunner: Send + Sync {
    fn run<'a>(&'a self, invocation: &'a ToolInvocation) -> BoxFuture<'a, Result<ToolOutput, PipelineError>>;
}


/// Runs tools as child processes and waits for them to exit.
#[derive(Debug, Default, Clone)]
pub struct CommandRunner;

impl CommandRunner {
    async fn execute(&self, inv: &ToolInvocation) -> Result<ToolOutput, PipelineError> {
        debug!("Executing command: {}", inv.command_line());

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args).stdin(Stdio::null()).stderr(Stdio::piped());
        match &inv.stdout_to {
            Some(path) => {
                let file = File::create(path).map_err(|e| PipelineError::ToolExecution {
                    tool: inv.tool.to_string(),
                    error: format!("Cannot create {}: {}", path.display(), e),
                })?;
                cmd.stdout(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::piped());
            }
        }

        let child = cmd.spawn().map_err(|e| PipelineError::ToolExecution {
            tool: inv.tool.to_string(),
            error: format!("Failed to spawn {}: {}. Is it installed?", inv.program, e),
        })?;
        // stdout stays wherever it was pointed; only piped streams are collected
        let output = child.wait_with_output().await.map_err(|e| PipelineError::ToolExecution {
            tool: inv.tool.to_string(),
            error: format!("Failed waiting for {}: {}", inv.program, e),
        })?;

        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() && inv.tolerate_failure {
            debug!("{} exited with {}; output kept", inv.tool, output.status);
        } else if !output.status.success() {
            error!(
                "Command failed ({}): {}\nstdout: {}\nstderr: {}",
                output.status,
                inv.command_line(),
                result.stdout.trim_end(),
                result.stderr.trim_end()
            );
            return Err(PipelineError::ToolExecution {
                tool: inv.tool.to_string(),
                error: format!("exited with {}", output.status),
            });
        }
        Ok(result)
    }
}

impl ToolRunner for CommandRunner {
    fn run<'a>(&'a self, invocation: &'a ToolInvocation) -> BoxFuture<'a, Result<ToolOutput, PipelineError>> {
        Box::pin(self.execute(invocation))
    }
}


fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub mod fastp {
    use std::path::Path;
    use super::path_arg;

    /// Read filters shared by every fastp job.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Filters {
        pub length_required: u32,
        pub trim_poly_x: Option<u32>,
        pub qualified_quality_phred: u32,
        pub unqualified_percent_limit: u32,
        pub n_base_limit: u32,
    }

    impl Filters {
        fn push(&self, args_vec: &mut Vec<String>) {
            args_vec.push("--length_required".to_string());
            args_vec.push(self.length_required.to_string());
            if let Some(poly) = self.trim_poly_x {
                args_vec.push("--trim_poly_x".to_string());
                args_vec.push(poly.to_string());
            }
            args_vec.push("--qualified_quality_phred".to_string());
            args_vec.push(self.qualified_quality_phred.to_string());
            args_vec.push("--unqualified_percent_limit".to_string());
            args_vec.push(self.unqualified_percent_limit.to_string());
            args_vec.push("--n_base_limit".to_string());
            args_vec.push(self.n_base_limit.to_string());
        }
    }

    /// Files fastp writes besides the merged reads.
    pub struct PairedSideOutputs<'a> {
        pub out1: &'a Path,
        pub out2: &'a Path,
        pub unpaired1: &'a Path,
        pub unpaired2: &'a Path,
        pub json: &'a Path,
        pub html: &'a Path,
    }

    pub fn merge_paired_args(
        r1: &Path,
        r2: &Path,
        merged_out: &Path,
        side: &PairedSideOutputs,
        adapters: (&str, &str),
        threads: usize,
        filters: &Filters,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = vec![
            "--adapter_sequence".to_string(), adapters.0.to_string(),
            "--adapter_sequence_r2".to_string(), adapters.1.to_string(),
            "--out1".to_string(), path_arg(side.out1),
            "--out2".to_string(), path_arg(side.out2),
            "--unpaired1".to_string(), path_arg(side.unpaired1),
            "--unpaired2".to_string(), path_arg(side.unpaired2),
            "--merged_out".to_string(), path_arg(merged_out),
            "--in1".to_string(), path_arg(r1),
            "--in2".to_string(), path_arg(r2),
            "--json".to_string(), path_arg(side.json),
            "--html".to_string(), path_arg(side.html),
            "--merge".to_string(),
            "--thread".to_string(), threads.to_string(),
        ];
        filters.push(&mut args_vec);
        args_vec
    }

    pub fn trim_single_args(
        input: &Path,
        output: &Path,
        json: &Path,
        html: &Path,
        adapter: &str,
        threads: usize,
        filters: &Filters,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = vec![
            "--adapter_sequence".to_string(), adapter.to_string(),
            "-i".to_string(), path_arg(input),
            "-o".to_string(), path_arg(output),
            "--json".to_string(), path_arg(json),
            "--html".to_string(), path_arg(html),
            "--thread".to_string(), threads.to_string(),
        ];
        filters.push(&mut args_vec);
        args_vec
    }

    pub fn quality_filter_args(
        input: &Path,
        output: &Path,
        failed_out: &Path,
        json: &Path,
        html: &Path,
        threads: usize,
        filters: &Filters,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = vec![
            "--disable_adapter_trimming".to_string(),
            "--in1".to_string(), path_arg(input),
            "--out1".to_string(), path_arg(output),
            "--failed_out".to_string(), path_arg(failed_out),
            "--json".to_string(), path_arg(json),
            "--html".to_string(), path_arg(html),
            "--thread".to_string(), threads.to_string(),
        ];
        filters.push(&mut args_vec);
        args_vec
    }

    pub fn dedup_args(input: &Path, output: &Path, json: &Path, html: &Path, threads: usize) -> Vec<String> {
        vec![
            "--dedup".to_string(),
            "--disable_adapter_trimming".to_string(),
            "--disable_length_filtering".to_string(),
            "--disable_quality_filtering".to_string(),
            "--in1".to_string(), path_arg(input),
            "--out1".to_string(), path_arg(output),
            "--json".to_string(), path_arg(json),
            "--html".to_string(), path_arg(html),
            "--thread".to_string(), threads.to_string(),
        ]
    }
}

pub mod bwa {
    use std::path::Path;
    use super::path_arg;

    pub fn index_args(genome: &Path) -> Vec<String> {
        vec!["index".to_string(), path_arg(genome)]
    }

    /// `bwa mem`; `min_score` adds the strict mode used for marker sequences.
    pub fn mem_args(threads: usize, genome: &Path, reads: &Path, min_score: Option<u32>) -> Vec<String> {
        let mut args_vec: Vec<String> = vec!["mem".to_string()];
        if let Some(score) = min_score {
            args_vec.extend(["-M".to_string(), "-Y".to_string(), "-T".to_string(), score.to_string()]);
        }
        args_vec.push("-t".to_string());
        args_vec.push(threads.to_string());
        args_vec.push(path_arg(genome));
        args_vec.push(path_arg(reads));
        args_vec
    }
}

pub mod samtools {
    use std::path::Path;
    use crate::config::defs::SamtoolsSubcommand;
    use super::path_arg;

    fn sub(cmd: SamtoolsSubcommand) -> String {
        cmd.as_str().to_string()
    }

    pub fn header_args(alignment: &Path) -> Vec<String> {
        vec![sub(SamtoolsSubcommand::View), "-H".to_string(), path_arg(alignment)]
    }

    pub fn to_bam_args(threads: usize, sam: &Path, bam: &Path) -> Vec<String> {
        vec![
            sub(SamtoolsSubcommand::View), "-@".to_string(), threads.to_string(),
            "-bS".to_string(), path_arg(sam), "-o".to_string(), path_arg(bam),
        ]
    }

    pub fn sort_args(threads: usize, bam: &Path, sorted: &Path) -> Vec<String> {
        vec![
            sub(SamtoolsSubcommand::Sort), "-@".to_string(), threads.to_string(),
            "-O".to_string(), "bam".to_string(),
            path_arg(bam), "-o".to_string(), path_arg(sorted),
        ]
    }

    pub fn index_args(threads: usize, bam: &Path, bai: &Path) -> Vec<String> {
        vec![
            sub(SamtoolsSubcommand::Index), "-@".to_string(), threads.to_string(),
            path_arg(bam), path_arg(bai),
        ]
    }

    /// Read count, mapped reads only when `mapped_only`.
    pub fn count_args(bam: &Path, mapped_only: bool) -> Vec<String> {
        let mut args_vec = vec![sub(SamtoolsSubcommand::View), "-c".to_string()];
        if mapped_only {
            args_vec.push("-F".to_string());
            args_vec.push("4".to_string());
        }
        args_vec.push(path_arg(bam));
        args_vec
    }

    pub fn depth_args(bam: &Path) -> Vec<String> {
        vec![sub(SamtoolsSubcommand::Depth), "-a".to_string(), path_arg(bam)]
    }

    pub fn faidx_args(fasta: &Path, fai: &Path) -> Vec<String> {
        vec![sub(SamtoolsSubcommand::Faidx), path_arg(fasta), "--fai-idx".to_string(), path_arg(fai)]
    }

    pub fn region_extract_args(bed: &Path, bam: &Path) -> Vec<String> {
        vec![
            sub(SamtoolsSubcommand::View), "-b".to_string(),
            "--region-file".to_string(), path_arg(bed), path_arg(bam),
        ]
    }

    pub fn consensus_args(bam: &Path, fasta: &Path) -> Vec<String> {
        vec![
            sub(SamtoolsSubcommand::Consensus), "-f".to_string(), "fasta".to_string(),
            path_arg(bam), "-o".to_string(), path_arg(fasta),
        ]
    }
}

pub mod bedtools {
    use std::path::Path;
    use super::path_arg;

    pub fn bamtobed_args(bam: &Path) -> Vec<String> {
        vec!["bamtobed".to_string(), "-i".to_string(), path_arg(bam)]
    }
}

pub mod angsd {
    use std::path::Path;
    use super::path_arg;

    pub fn consensus_args(prefix: &Path, bam: &Path) -> Vec<String> {
        vec![
            "-out".to_string(), path_arg(prefix),
            "-i".to_string(), path_arg(bam),
            "-doFasta".to_string(), "2".to_string(),
            "-doCounts".to_string(), "1".to_string(),
        ]
    }
}

pub mod seqkit {
    use std::path::PathBuf;
    use super::path_arg;

    /// Tabular `seqkit stats` over several files.
    pub fn stats_args(threads: usize, files: &[PathBuf]) -> Vec<String> {
        let mut args_vec = vec!["stats".to_string(), "-T".to_string(), "-j".to_string(), threads.to_string()];
        args_vec.extend(files.iter().map(|f| path_arg(f)));
        args_vec
    }
}

pub mod fastqc {
    use std::path::Path;
    use super::path_arg;

    pub fn args(threads: usize, out_dir: &Path, reads: &Path) -> Vec<String> {
        vec![
            "-t".to_string(), threads.to_string(),
            "-o".to_string(), path_arg(out_dir),
            path_arg(reads),
        ]
    }
}

pub mod multiqc {
    use std::path::Path;
    use super::path_arg;

    pub fn args(input_dir: &Path, out_dir: &Path) -> Vec<String> {
        vec![path_arg(input_dir), "-o".to_string(), path_arg(out_dir)]
    }
}

pub mod kraken2 {
    use std::path::Path;
    use super::path_arg;

    pub fn args(db: &str, threads: usize, output: &Path, report: &Path, reads: &Path) -> Vec<String> {
        vec![
            "--db".to_string(), db.to_string(),
            "--threads".to_string(), threads.to_string(),
            "--gzip-compressed".to_string(),
            "--output".to_string(), path_arg(output),
            "--report".to_string(), path_arg(report),
            path_arg(reads),
        ]
    }
}

pub mod centrifuge {
    use std::path::Path;
    use super::path_arg;

    pub fn args(db: &str, reads: &Path, output: &Path, report: &Path, threads: usize, seed: u32) -> Vec<String> {
        vec![
            "-x".to_string(), db.to_string(),
            "-U".to_string(), path_arg(reads),
            "-S".to_string(), path_arg(output),
            "--report-file".to_string(), path_arg(report),
            "-p".to_string(), threads.to_string(),
            "--verbose".to_string(),
            "--seed".to_string(), seed.to_string(),
        ]
    }
}

pub mod mapdamage {
    use std::path::Path;
    use super::path_arg;

    pub fn args(bam: &Path, reference: &Path, out_dir: &Path) -> Vec<String> {
        vec![
            "-i".to_string(), path_arg(bam),
            "-r".to_string(), path_arg(reference),
            "--folder".to_string(), path_arg(out_dir),
            "--merge-reference-sequences".to_string(),
        ]
    }
}

pub mod rscript {
    use std::path::Path;
    use super::path_arg;

    /// `Rscript <script> <args...>`
    pub fn args(script: &Path, script_args: &[String]) -> Vec<String> {
        let mut args_vec = vec![path_arg(script)];
        args_vec.extend(script_args.iter().cloned());
        args_vec
    }
}


/// Asks a configured tool for its version. A `Version:` line wins, otherwise
/// the first non-empty line of stdout (stderr for tools that print there).
pub async fn check_version(store: &ConfigStore, runner: &dyn ToolRunner, tool: &'static str) -> Result<String, PipelineError> {
    let version_args = TOOL_VERSION_ARGS
        .get(tool)
        .ok_or_else(|| PipelineError::Config(format!("Unknown tool: {}", tool)))?;
    let mut inv = ToolInvocation::for_tool(store, tool)?.args(version_args.iter().copied());
    if VERSION_FROM_USAGE_TOOLS.contains(&tool) {
        inv = inv.tolerate_failure();
    }
    let output = runner.run(&inv).await?;
    let lines: Vec<&str> = output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines
        .iter()
        .find_map(|l| l.strip_prefix("Version:"))
        .map(str::trim)
        .or_else(|| lines.first().copied())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: "No version output".to_string(),
        })
}
