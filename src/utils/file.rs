use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use crate::config::defs::{PipelineError, STAGING_PREFIX};


/// Whether an artifact already sits at its canonical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Missing,
    Present,
}

/// Files count as Present when they exist, directories when they hold at
/// least one entry. `overwrite` reports everything as Missing.
pub fn artifact_state(path: &Path, overwrite: bool) -> ArtifactState {
    if overwrite {
        return ArtifactState::Missing;
    }
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => match fs::read_dir(path).map(|mut entries| entries.next().is_some()) {
            Ok(true) => ArtifactState::Present,
            _ => ArtifactState::Missing,
        },
        Ok(_) => ArtifactState::Present,
        Err(_) => ArtifactState::Missing,
    }
}

/// Hidden sibling a producer writes into before the result is promoted.
/// The original file name is kept as the suffix so extensions survive.
pub fn staging_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{}{}", STAGING_PREFIX, name))
}

/// Atomically moves a staged file onto its canonical path.
pub fn promote(staged: &Path, output: &Path) -> Result<(), PipelineError> {
    fs::rename(staged, output).map_err(|e| {
        PipelineError::IOError(format!("Cannot move {} to {}: {}", staged.display(), output.display(), e))
    })
}

/// Removes leftovers from an interrupted producer. Missing files are fine.
pub fn discard(path: &Path) {
    if path.is_dir() {
        let _ = fs::remove_dir_all(path);
    } else {
        let _ = fs::remove_file(path);
    }
}

fn is_hidden_or_staged(name: &str) -> bool {
    name.starts_with('.') || name.starts_with(STAGING_PREFIX)
}

/// Regular files in `dir` whose names end with `suffix`, sorted by name.
/// Hidden and staging files are never returned. A missing directory yields
/// an empty list.
pub fn list_files_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, PipelineError> {
    list_files_matching(dir, |name| name.ends_with(suffix))
}

pub fn list_files_matching<F>(dir: &Path, predicate: F) -> Result<Vec<PathBuf>, PipelineError>
where
    F: Fn(&str) -> bool,
{
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden_or_staged(&name) || !predicate(&name) {
            continue;
        }
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// File name as an owned string, empty for paths without one.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Byte-wise concatenation. Concatenated gzip members are still a valid gzip
/// stream, so this is how per-sample FASTQ.GZ files are combined.
pub fn concatenate_files(inputs: &[PathBuf], output: &Path) -> Result<(), PipelineError> {
    let mut out = File::create(output)?;
    for input in inputs {
        let mut reader = File::open(input)
            .map_err(|e| PipelineError::IOError(format!("Cannot open {}: {}", input.display(), e)))?;
        io::copy(&mut reader, &mut out)?;
    }
    out.sync_all()?;
    Ok(())
}
