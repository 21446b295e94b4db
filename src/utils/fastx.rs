use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use flate2::read::MultiGzDecoder;
use seq_io::fasta::{Reader as FastaReader, Record as FastaRecord};
use seq_io::fastq::{Reader as FastqReader, Record as FastqRecord};
use crate::utils::file::{file_name, is_gzipped};

const FASTA_EXTS: &[&str] = &["fasta", "fa", "fna", "faa", "ffn", "frn"];
const FASTQ_EXTS: &[&str] = &["fastq", "fq"];

const R1_MARKER: &str = "_R1_";
const R2_MARKER: &str = "_R2_";


/// Plain or gzip-compressed file, detected from the magic bytes.
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(MultiGzDecoder<File>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

pub enum SequenceReader {
    Fasta(FastaReader<FileReader>),
    Fastq(FastqReader<FileReader>),
}

fn fastx_extension(path: &Path) -> Option<String> {
    let name = file_name(path).to_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    name.rsplit('.').next().map(str::to_string)
}

/// Opens a FASTA or FASTQ file, gzipped or not.
///
/// # Arguments
///
/// * `path` - FASTA/FASTQ file, type taken from the extension
///
/// # Returns
/// io::Result<SequenceReader>
pub fn sequence_reader(path: &Path) -> io::Result<SequenceReader> {
    let file = File::open(path)?;
    let reader = if is_gzipped(path)? {
        FileReader::Gzipped(MultiGzDecoder::new(file))
    } else {
        FileReader::Uncompressed(BufReader::new(file))
    };

    match fastx_extension(path) {
        Some(ext) if FASTA_EXTS.contains(&ext.as_str()) => Ok(SequenceReader::Fasta(FastaReader::new(reader))),
        Some(ext) if FASTQ_EXTS.contains(&ext.as_str()) => Ok(SequenceReader::Fastq(FastqReader::new(reader))),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported file type for path: {:?}", path),
        )),
    }
}

fn invalid<E: std::fmt::Display>(path: &Path, e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", path.display(), e))
}

/// Number of reads per read length.
pub fn read_length_counts(path: &Path) -> io::Result<BTreeMap<usize, u64>> {
    let mut counts: BTreeMap<usize, u64> = BTreeMap::new();
    match sequence_reader(path)? {
        SequenceReader::Fastq(mut reader) => {
            while let Some(record) = reader.next() {
                let record = record.map_err(|e| invalid(path, e))?;
                *counts.entry(record.seq().len()).or_insert(0) += 1;
            }
        }
        SequenceReader::Fasta(mut reader) => {
            while let Some(record) = reader.next() {
                let record = record.map_err(|e| invalid(path, e))?;
                *counts.entry(record.full_seq().len()).or_insert(0) += 1;
            }
        }
    }
    Ok(counts)
}


#[derive(Debug, Clone, PartialEq)]
pub struct NonNStats {
    pub total_length: usize,
    pub non_n_count: usize,
}

impl NonNStats {
    pub fn percentage(&self) -> f64 {
        if self.total_length == 0 {
            0.0
        } else {
            self.non_n_count as f64 / self.total_length as f64 * 100.0
        }
    }
}

/// Content of the first record of an extracted-region FASTA.
pub fn first_record_non_n(path: &Path) -> io::Result<NonNStats> {
    let mut reader = match sequence_reader(path)? {
        SequenceReader::Fasta(reader) => reader,
        SequenceReader::Fastq(_) => return Err(invalid(path, "expected FASTA")),
    };
    let record = reader
        .next()
        .ok_or_else(|| invalid(path, "no records"))?
        .map_err(|e| invalid(path, e))?;
    let seq = record.full_seq();
    let non_n_count = seq.iter().filter(|b| !b.eq_ignore_ascii_case(&b'N')).count();
    Ok(NonNStats { total_length: seq.len(), non_n_count })
}


/// Raw read files grouped by the R1/R2 naming convention.
#[derive(Debug, Default, PartialEq)]
pub struct ReadPairing {
    pub pairs: Vec<(PathBuf, PathBuf)>,
    /// R1 files without a mate, processed single-end
    pub singles: Vec<PathBuf>,
    /// R2 files without an R1, never processed
    pub orphans: Vec<PathBuf>,
}

/// Pairs `*_R1_*` with the `*_R2_*` file that differs only in that marker.
/// Files carrying neither marker are treated as single-end.
pub fn pair_raw_reads(files: &[PathBuf]) -> ReadPairing {
    let mut pairing = ReadPairing::default();
    let mut used_r2: Vec<&PathBuf> = Vec::new();

    for file in files {
        let name = file_name(file);
        if name.contains(R2_MARKER) {
            continue;
        }
        if name.contains(R1_MARKER) {
            let mate_name = name.replacen(R1_MARKER, R2_MARKER, 1);
            if let Some(mate) = files.iter().find(|f| file_name(f) == mate_name) {
                pairing.pairs.push((file.clone(), mate.clone()));
                used_r2.push(mate);
                continue;
            }
        }
        pairing.singles.push(file.clone());
    }

    pairing.orphans = files
        .iter()
        .filter(|f| file_name(f).contains(R2_MARKER) && !used_r2.contains(f))
        .cloned()
        .collect();
    pairing
}
