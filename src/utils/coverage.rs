use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{anyhow, Result};

/// Per-base depth across the reference, ordered by coordinate. Positions
/// missing from the depth table (possible when the reporter skips
/// zero-coverage tails) hold depth 0, so breadth is always computed over
/// the full reference length.
pub struct CoverageProfile {
    pub chrom: String,
    depths: Vec<u32>,
}

impl CoverageProfile {
    /// Parses `samtools depth` output (`chrom<TAB>pos<TAB>depth`, 1-based
    /// positions) into a profile over a reference of known length.
    ///
    /// # Arguments
    ///
    /// * `path` - Depth table path.
    /// * `chrom` - Reference sequence name; rows for other sequences are an error.
    /// * `ref_len` - Reference length in bases.
    ///
    /// # Returns
    ///
    /// CoverageProfile with one depth per reference position.
    pub fn from_depth_table(path: &Path, chrom: &str, ref_len: usize) -> Result<Self> {
        let mut depths = vec![0u32; ref_len];
        let reader = BufReader::new(File::open(path)?);

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let (row_chrom, pos, depth) = match (fields.next(), fields.next(), fields.next()) {
                (Some(c), Some(p), Some(d)) => (c, p, d),
                _ => {
                    return Err(anyhow!(
                        "Malformed depth row at line {}: '{}'",
                        line_no + 1,
                        line
                    ))
                }
            };
            if row_chrom != chrom {
                return Err(anyhow!(
                    "Unexpected sequence '{}' in depth table (reference is '{}')",
                    row_chrom,
                    chrom
                ));
            }
            let pos: usize = pos
                .parse()
                .map_err(|_| anyhow!("Invalid position at line {}: '{}'", line_no + 1, pos))?;
            if pos == 0 || pos > ref_len {
                return Err(anyhow!(
                    "Position {} outside reference of length {}",
                    pos,
                    ref_len
                ));
            }
            depths[pos - 1] = depth
                .parse()
                .map_err(|_| anyhow!("Invalid depth at line {}: '{}'", line_no + 1, depth))?;
        }

        Ok(CoverageProfile {
            chrom: chrom.to_string(),
            depths,
        })
    }

    pub fn from_depths(chrom: &str, depths: Vec<u32>) -> Self {
        CoverageProfile {
            chrom: chrom.to_string(),
            depths,
        }
    }

    pub fn len(&self) -> usize {
        self.depths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    pub fn mean_depth(&self) -> f64 {
        if self.depths.is_empty() {
            return 0.0;
        }
        let total: u64 = self.depths.iter().map(|&d| d as u64).sum();
        total as f64 / self.depths.len() as f64
    }

    /// Fraction of reference positions at or above `min_depth`.
    pub fn breadth(&self, min_depth: u32) -> f64 {
        if self.depths.is_empty() {
            return 0.0;
        }
        let covered = self.depths.iter().filter(|&&d| d >= min_depth).count();
        covered as f64 / self.depths.len() as f64
    }

    /// Maximal runs of positions below `min_depth`, as zero-based half-open
    /// intervals ready for BED output.
    pub fn low_depth_intervals(&self, min_depth: u32) -> Vec<(usize, usize)> {
        let mut intervals = Vec::new();
        let mut run_start: Option<usize> = None;

        for (i, &depth) in self.depths.iter().enumerate() {
            if depth < min_depth {
                if run_start.is_none() {
                    run_start = Some(i);
                }
            } else if let Some(start) = run_start.take() {
                intervals.push((start, i));
            }
        }
        if let Some(start) = run_start {
            intervals.push((start, self.depths.len()));
        }
        intervals
    }

    /// Writes the low-depth intervals as a three-column BED file.
    pub fn write_mask_bed(&self, min_depth: u32, path: &Path) -> Result<usize> {
        let intervals = self.low_depth_intervals(min_depth);
        let mut file = File::create(path)?;
        for (start, end) in &intervals {
            writeln!(file, "{}\t{}\t{}", self.chrom, start, end)?;
        }
        Ok(intervals.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as IoWrite;

    fn profile(depths: &[u32]) -> CoverageProfile {
        CoverageProfile::from_depths("MT", depths.to_vec())
    }

    #[test]
    fn test_mean_depth() {
        let p = profile(&[10, 20, 30, 40]);
        assert!((p.mean_depth() - 25.0).abs() < 1e-9);
        assert_eq!(profile(&[]).mean_depth(), 0.0);
    }

    #[test]
    fn test_breadth() {
        let p = profile(&[0, 5, 10, 15]);
        assert!((p.breadth(10) - 0.5).abs() < 1e-9);
        assert!((p.breadth(1) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_breadth_monotone_in_threshold() {
        let p = profile(&[0, 3, 7, 12, 12, 40, 2, 9, 100, 1]);
        let mut last = f64::INFINITY;
        for min_depth in 0..50 {
            let b = p.breadth(min_depth);
            assert!(
                b <= last,
                "breadth increased from {} to {} at threshold {}",
                last,
                b,
                min_depth
            );
            last = b;
        }
    }

    #[test]
    fn test_low_depth_intervals_merge_runs() {
        let p = profile(&[0, 0, 10, 10, 2, 10, 0]);
        assert_eq!(p.low_depth_intervals(5), vec![(0, 2), (4, 5), (6, 7)]);
    }

    #[test]
    fn test_low_depth_intervals_full_and_none() {
        let p = profile(&[1, 1, 1]);
        assert_eq!(p.low_depth_intervals(5), vec![(0, 3)]);
        assert!(p.low_depth_intervals(1).is_empty());
    }

    #[test]
    fn test_from_depth_table_fills_missing_with_zero() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = dir.path().join("depth.tsv");
        let mut f = File::create(&table)?;
        writeln!(f, "MT\t1\t12")?;
        writeln!(f, "MT\t3\t7")?;
        drop(f);

        let p = CoverageProfile::from_depth_table(&table, "MT", 4)?;
        assert_eq!(p.len(), 4);
        assert!((p.mean_depth() - (12.0 + 0.0 + 7.0 + 0.0) / 4.0).abs() < 1e-9);
        assert!((p.breadth(1) - 0.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_from_depth_table_rejects_foreign_chrom() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = dir.path().join("depth.tsv");
        std::fs::write(&table, "chr1\t1\t10\n")?;
        assert!(CoverageProfile::from_depth_table(&table, "MT", 10).is_err());
        Ok(())
    }

    #[test]
    fn test_write_mask_bed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bed = dir.path().join("mask.bed");
        let p = profile(&[0, 0, 10, 10, 0]);
        let n = p.write_mask_bed(5, &bed)?;
        assert_eq!(n, 2);
        let body = std::fs::read_to_string(&bed)?;
        assert_eq!(body, "MT\t0\t2\nMT\t4\t5\n");
        Ok(())
    }
}
