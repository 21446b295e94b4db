use crate::config::defs::PipelineError;


/// True when the `@HD` line of a SAM/BAM header declares coordinate order.
pub fn header_is_coordinate_sorted(header: &str) -> bool {
    header
        .lines()
        .filter(|line| line.starts_with("@HD"))
        .any(|line| line.split('\t').any(|field| field == "SO:coordinate"))
}

/// Parses the single integer `samtools view -c` prints.
pub fn parse_count(stdout: &str) -> Result<u64, PipelineError> {
    let trimmed = stdout.trim();
    trimmed
        .parse::<u64>()
        .map_err(|e| PipelineError::Parse(format!("Expected a read count, got '{}': {}", trimmed, e)))
}

/// Mapped reads as a fraction of all reads, 0 when there are none.
pub fn endogenous_proportion(mapped: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        mapped as f64 / total as f64
    }
}



#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_sorted_header_detected() {
        let header = "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:ERCC-00002\tLN:1061\n";
        assert!(header_is_coordinate_sorted(header));
    }

    #[test]
    fn test_unsorted_header() {
        let header = "@HD\tVN:1.6\tSO:unsorted\n@SQ\tSN:ERCC-00002\tLN:1061\n@PG\tID:bwa\tCL:SO:coordinate\n";
        assert!(!header_is_coordinate_sorted(header), "Only the @HD line decides sort order");
        assert!(!header_is_coordinate_sorted("@SQ\tSN:chr1\tLN:10\n"));
        assert!(!header_is_coordinate_sorted(""));
    }

    #[test]
    fn test_parse_count() -> Result<()> {
        assert_eq!(parse_count("1234\n")?, 1234);
        assert!(parse_count("not a number").is_err());
        assert!(parse_count("").is_err());
        Ok(())
    }

    #[test]
    fn test_endogenous_proportion() {
        assert_eq!(endogenous_proportion(25, 100), 0.25);
        assert_eq!(endogenous_proportion(0, 0), 0.0);
    }
}
