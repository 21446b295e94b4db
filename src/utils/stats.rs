/// Tabular analysis of tool outputs (depth tables, read counts)
use std::collections::HashMap;
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::config::defs::PipelineError;


/// Per-scaffold summary of a `samtools depth -a` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaffoldCoverage {
    pub scaffold: String,
    pub avg_depth: f64,
    pub max_depth: u64,
    pub covered_bases: u64,
    pub total_bases: u64,
    pub percent_covered: f64,
}

#[derive(Default)]
struct Accumulator {
    depth_sum: u64,
    max_depth: u64,
    covered: u64,
    total: u64,
}

/// Groups per-position depth by scaffold.
///
/// # Arguments
///
/// * `depth_tsv` - headerless `scaffold  position  depth` rows
///
/// # Returns
///
/// Scaffolds in order of first appearance; empty for an empty table.
pub fn summarize_depth(depth_tsv: &Path) -> Result<Vec<ScaffoldCoverage>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(depth_tsv)?;

    let mut order: Vec<String> = Vec::new();
    let mut acc: HashMap<String, Accumulator> = HashMap::new();

    for record in reader.records() {
        let record = record?;
        let scaffold = record
            .get(0)
            .ok_or_else(|| PipelineError::Parse(format!("Empty row in {}", depth_tsv.display())))?;
        let depth: u64 = record
            .get(2)
            .and_then(|d| d.trim().parse().ok())
            .ok_or_else(|| PipelineError::Parse(format!("Bad depth value in {}: {:?}", depth_tsv.display(), record)))?;

        if !acc.contains_key(scaffold) {
            order.push(scaffold.to_string());
        }
        let entry = acc.entry(scaffold.to_string()).or_default();
        entry.depth_sum += depth;
        entry.max_depth = entry.max_depth.max(depth);
        entry.total += 1;
        if depth > 0 {
            entry.covered += 1;
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|scaffold| {
            let a = acc.remove(&scaffold)?;
            Some(ScaffoldCoverage {
                avg_depth: a.depth_sum as f64 / a.total as f64,
                max_depth: a.max_depth,
                covered_bases: a.covered,
                total_bases: a.total,
                percent_covered: a.covered as f64 / a.total as f64 * 100.0,
                scaffold,
            })
        })
        .collect())
}

pub fn write_scaffold_analysis(path: &Path, rows: &[ScaffoldCoverage]) -> Result<(), PipelineError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_scaffold_analysis(path: &Path) -> Result<Vec<ScaffoldCoverage>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    reader
        .deserialize()
        .map(|row| row.map_err(|e| PipelineError::Parse(format!("{}: {}", path.display(), e))))
        .collect()
}


/// Whole-BAM coverage, one row of the combined coverage table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileCoverage {
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "OverallAvgDepth")]
    pub avg_depth: f64,
    #[serde(rename = "OverallMaxDepth")]
    pub max_depth: u64,
    #[serde(rename = "OverallCoveredBases")]
    pub covered_bases: u64,
    #[serde(rename = "OverallTotalBases")]
    pub total_bases: u64,
    #[serde(rename = "OverallPercentCovered")]
    pub percent_covered: f64,
}

/// Length-weighted average depth; max, covered and total summed or maxed
/// across scaffolds. None when there are no scaffolds.
pub fn combine_scaffolds(filename: &str, scaffolds: &[ScaffoldCoverage]) -> Option<FileCoverage> {
    if scaffolds.is_empty() {
        return None;
    }
    let total_bases: u64 = scaffolds.iter().map(|s| s.total_bases).sum();
    let covered_bases: u64 = scaffolds.iter().map(|s| s.covered_bases).sum();
    let weighted: f64 = scaffolds.iter().map(|s| s.avg_depth * s.total_bases as f64).sum();
    let ratio = |num: f64| if total_bases > 0 { num / total_bases as f64 } else { 0.0 };

    Some(FileCoverage {
        filename: filename.to_string(),
        avg_depth: ratio(weighted),
        max_depth: scaffolds.iter().map(|s| s.max_depth).max().unwrap_or(0),
        covered_bases,
        total_bases,
        percent_covered: ratio(covered_bases as f64) * 100.0,
    })
}

pub fn write_file_coverage(path: &Path, rows: &[FileCoverage]) -> Result<(), PipelineError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}


/// Sequence counts from `seqkit stats -T`, keyed by the file column.
pub fn parse_seqkit_num_seqs(stdout: &str) -> Result<HashMap<String, u64>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(stdout.as_bytes());
    let headers = reader.headers()?.clone();
    let col = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PipelineError::Parse(format!("seqkit stats output lacks column '{}'", name)))
    };
    let file_col = col("file")?;
    let count_col = col("num_seqs")?;

    let mut counts = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let file = record.get(file_col).unwrap_or_default().to_string();
        let count = record
            .get(count_col)
            .map(|c| c.replace(',', ""))
            .and_then(|c| c.parse::<u64>().ok())
            .ok_or_else(|| PipelineError::Parse(format!("Bad num_seqs for {}", file)))?;
        counts.insert(file, count);
    }
    Ok(counts)
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    fn depth_table(dir: &Path) -> Result<std::path::PathBuf> {
        let path = dir.join("x_samtools_depth.tsv");
        let mut text = String::new();
        for pos in 1..=4 {
            text.push_str(&format!("s1\t{}\t10\n", pos));
        }
        for (pos, depth) in [0, 0, 5, 5].iter().enumerate() {
            text.push_str(&format!("s2\t{}\t{}\n", pos + 1, depth));
        }
        std::fs::write(&path, text)?;
        Ok(path)
    }

    #[test]
    fn test_summarize_depth_two_scaffolds() -> Result<()> {
        let tmp = TempDir::new()?;
        let summary = summarize_depth(&depth_table(tmp.path())?)?;
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].scaffold, "s1");
        assert_eq!(summary[0].percent_covered, 100.0);
        assert_eq!(summary[0].avg_depth, 10.0);
        assert_eq!(summary[1].scaffold, "s2");
        assert_eq!(summary[1].percent_covered, 50.0);
        assert_eq!(summary[1].avg_depth, 2.5);
        assert_eq!(summary[1].max_depth, 5);
        assert_eq!(summary[1].covered_bases, 2);
        Ok(())
    }

    #[test]
    fn test_analysis_round_trip_and_combine() -> Result<()> {
        let tmp = TempDir::new()?;
        let summary = summarize_depth(&depth_table(tmp.path())?)?;
        let analysis = tmp.path().join("x_analysis.tsv");
        write_scaffold_analysis(&analysis, &summary)?;
        let back = read_scaffold_analysis(&analysis)?;
        assert_eq!(back, summary);

        let combined = combine_scaffolds("x_sorted.bam", &back).unwrap();
        assert_eq!(combined.total_bases, 8);
        assert_eq!(combined.covered_bases, 6);
        assert_eq!(combined.max_depth, 10);
        assert_eq!(combined.avg_depth, 6.25);
        assert_eq!(combined.percent_covered, 75.0);
        assert!(combine_scaffolds("empty", &[]).is_none());
        Ok(())
    }

    #[test]
    fn test_empty_depth_table() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("empty.tsv");
        std::fs::write(&path, "")?;
        assert!(summarize_depth(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_seqkit_stats() -> Result<()> {
        let out = "file\tformat\ttype\tnum_seqs\tsum_len\tmin_len\tavg_len\tmax_len\n\
                   a.fastq.gz\tFASTQ\tDNA\t1,204\t50000\t15\t41.5\t150\n\
                   b.fastq.gz\tFASTQ\tDNA\t7\t300\t30\t42.8\t60\n";
        let counts = parse_seqkit_num_seqs(out)?;
        assert_eq!(counts["a.fastq.gz"], 1204);
        assert_eq!(counts["b.fastq.gz"], 7);
        assert!(parse_seqkit_num_seqs("x\ty\n1\t2\n").is_err());
        Ok(())
    }
}
