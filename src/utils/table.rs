// src/utils/table.rs: Key-joined tables

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use crate::config::defs::PipelineError;


/// Outer join of several keyed count columns. The result holds every key
/// found in any input, with one value per input in input order; a key
/// missing from an input contributes `0`.
pub fn outer_join<K: Ord + Clone>(columns: &[BTreeMap<K, u64>]) -> BTreeMap<K, Vec<u64>> {
    let keys: BTreeSet<&K> = columns.iter().flat_map(|c| c.keys()).collect();
    keys.into_iter()
        .map(|key| {
            let row = columns.iter().map(|c| c.get(key).copied().unwrap_or(0)).collect();
            (key.clone(), row)
        })
        .collect()
}

/// Writes a tab separated table with a header row.
pub fn write_tsv<R, I>(path: &Path, header: &[&str], rows: I) -> Result<(), PipelineError>
where
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
    I: IntoIterator<Item = R>,
{
    write_delimited(path, b'\t', header, rows)
}

pub fn write_csv<R, I>(path: &Path, header: &[&str], rows: I) -> Result<(), PipelineError>
where
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
    I: IntoIterator<Item = R>,
{
    write_delimited(path, b',', header, rows)
}

fn write_delimited<R, I>(path: &Path, delimiter: u8, header: &[&str], rows: I) -> Result<(), PipelineError>
where
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
    I: IntoIterator<Item = R>,
{
    let mut writer = csv::WriterBuilder::new().delimiter(delimiter).from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    #[test]
    fn test_outer_join_keeps_union_and_zero_fills() {
        let raw: BTreeMap<usize, u64> = [(30, 5), (150, 2)].into_iter().collect();
        let filtered: BTreeMap<usize, u64> = [(30, 4), (45, 1)].into_iter().collect();
        let joined = outer_join(&[raw, filtered]);

        assert_eq!(joined.keys().copied().collect::<Vec<_>>(), vec![30, 45, 150]);
        assert_eq!(joined[&30], vec![5, 4]);
        assert_eq!(joined[&45], vec![0, 1]);
        assert_eq!(joined[&150], vec![2, 0], "length only present before filtering keeps a zero");
    }

    #[test]
    fn test_outer_join_empty_inputs() {
        let empty: Vec<BTreeMap<String, u64>> = vec![BTreeMap::new(), BTreeMap::new()];
        assert!(outer_join(&empty).is_empty());
    }

    #[test]
    fn test_write_tsv() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("t.tsv");
        write_tsv(&path, &["a", "b"], vec![vec!["1".to_string(), "2".to_string()]])?;
        assert_eq!(std::fs::read_to_string(&path)?, "a\tb\n1\t2\n");
        Ok(())
    }
}
