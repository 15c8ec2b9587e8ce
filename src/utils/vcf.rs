use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::anyhow;
use flate2::read::MultiGzDecoder;

use crate::config::defs::SITE_QUAL_MIN;
use crate::utils::file::is_gzipped;

/// Conjunctive retention predicate for haploid-called sites. Kept as typed
/// comparisons in the core; `expression()` renders the bcftools `-i` syntax
/// at the tool boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantFilter {
    pub min_site_qual: f64,
    pub min_depth: usize,
    pub min_alt_fraction: f64,
}

/// One called site as annotated by the pileup stage: site quality, total
/// depth, and per-strand allele depths for the reference and first
/// alternate allele.
#[derive(Debug, Clone, Copy)]
pub struct SiteObservation {
    pub qual: f64,
    pub depth: usize,
    pub ref_fwd: u32,
    pub ref_rev: u32,
    pub alt_fwd: u32,
    pub alt_rev: u32,
}

impl VariantFilter {
    pub fn new(min_depth: usize, min_alt_fraction: f64) -> Self {
        VariantFilter {
            min_site_qual: SITE_QUAL_MIN,
            min_depth,
            min_alt_fraction,
        }
    }

    /// Whether a site survives filtering: quality, depth, alternate allele
    /// fraction, and alternate support on both strands. A zero-depth site is
    /// rejected by the depth term before the fraction is ever formed.
    pub fn passes(&self, site: &SiteObservation) -> bool {
        if site.qual < self.min_site_qual {
            return false;
        }
        if site.depth < self.min_depth {
            return false;
        }
        let ref_depth = site.ref_fwd + site.ref_rev;
        let alt_depth = site.alt_fwd + site.alt_rev;
        if ref_depth + alt_depth == 0 {
            return false;
        }
        let alt_fraction = alt_depth as f64 / (ref_depth + alt_depth) as f64;
        if alt_fraction < self.min_alt_fraction {
            return false;
        }
        site.alt_fwd > 0 && site.alt_rev > 0
    }

    /// bcftools `view -i` rendering of the predicate.
    pub fn expression(&self) -> String {
        format!(
            "QUAL>={} && FORMAT/DP>={} && (AD[0:1])/(AD[0:0]+AD[0:1])>={} && ADF[0:1]>0 && ADR[0:1]>0",
            self.min_site_qual, self.min_depth, self.min_alt_fraction
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VariantCounts {
    pub snps: u64,
    pub mnps: u64,
    pub indels: u64,
}

impl VariantCounts {
    pub fn total(&self) -> u64 {
        self.snps + self.mnps + self.indels
    }
}

fn vcf_reader(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    let file = File::open(path)?;
    if is_gzipped(path).unwrap_or(false) {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Classifies the records of a VCF (plain or bgzipped) into SNP, MNP, and
/// indel counts.
///
/// # Arguments
///
/// * `path` - VCF file; header lines and blanks are skipped.
///
/// # Returns
///
/// VariantCounts for the file.
pub fn count_variant_classes(path: &Path) -> anyhow::Result<VariantCounts> {
    let mut counts = VariantCounts::default();
    let reader = BufReader::new(vcf_reader(path)?);

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() < 5 {
            return Err(anyhow!(
                "Invalid VCF line format: expected at least 5 fields, found {} in line: '{}'",
                fields.len(),
                trimmed
            ));
        }
        let ref_allele = fields[3];
        let alt_alleles = fields[4].split(',');
        let allele_lens: HashSet<usize> = [ref_allele.len()]
            .iter()
            .copied()
            .chain(alt_alleles.map(|a| a.len()))
            .collect();
        if allele_lens.len() > 1 {
            counts.indels += 1;
        } else {
            let l = allele_lens.into_iter().next().unwrap();
            if l == 1 {
                counts.snps += 1;
            } else {
                counts.mnps += 1;
            }
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn site(qual: f64, depth: usize, alt_fwd: u32, alt_rev: u32, ref_total: u32) -> SiteObservation {
        SiteObservation {
            qual,
            depth,
            ref_fwd: ref_total / 2,
            ref_rev: ref_total - ref_total / 2,
            alt_fwd,
            alt_rev,
        }
    }

    #[test]
    fn test_filter_retains_good_site() {
        // qual 35, depth 12, alt fraction 11/12 ~ 0.92, both strands
        let filter = VariantFilter::new(10, 0.90);
        let s = site(35.0, 12, 6, 5, 1);
        assert!(filter.passes(&s));
    }

    #[test]
    fn test_filter_rejects_low_alt_fraction() {
        // identical site but alt fraction 0.85 < 0.90
        let filter = VariantFilter::new(10, 0.90);
        let s = SiteObservation {
            qual: 35.0,
            depth: 20,
            ref_fwd: 2,
            ref_rev: 1,
            alt_fwd: 9,
            alt_rev: 8,
        };
        assert!(!filter.passes(&s));
    }

    #[test]
    fn test_filter_rejects_single_strand_support() {
        let filter = VariantFilter::new(10, 0.90);
        let s = site(50.0, 20, 19, 0, 1);
        assert!(!filter.passes(&s));
    }

    #[test]
    fn test_filter_rejects_low_qual_and_low_depth() {
        let filter = VariantFilter::new(10, 0.90);
        assert!(!filter.passes(&site(29.9, 20, 10, 9, 1)));
        assert!(!filter.passes(&site(35.0, 9, 5, 4, 0)));
    }

    #[test]
    fn test_filter_zero_depth_is_not_a_division_error() {
        let filter = VariantFilter::new(0, 0.90);
        let s = SiteObservation {
            qual: 40.0,
            depth: 0,
            ref_fwd: 0,
            ref_rev: 0,
            alt_fwd: 0,
            alt_rev: 0,
        };
        assert!(!filter.passes(&s));
    }

    #[test]
    fn test_expression_rendering() {
        let filter = VariantFilter::new(10, 0.9);
        let expr = filter.expression();
        assert!(expr.contains("QUAL>=30"));
        assert!(expr.contains("FORMAT/DP>=10"));
        assert!(expr.contains("(AD[0:1])/(AD[0:0]+AD[0:1])>=0.9"));
        assert!(expr.contains("ADF[0:1]>0"));
        assert!(expr.contains("ADR[0:1]>0"));
    }

    #[test]
    fn test_count_variant_classes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let vcf = dir.path().join("calls.vcf");
        let mut f = File::create(&vcf)?;
        writeln!(f, "##fileformat=VCFv4.2")?;
        writeln!(f, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO")?;
        writeln!(f, "MT\t100\t.\tA\tG\t60\t.\t.")?; // snp
        writeln!(f, "MT\t200\t.\tAT\tGC\t60\t.\t.")?; // mnp
        writeln!(f, "MT\t300\t.\tA\tAT\t60\t.\t.")?; // indel
        writeln!(f, "MT\t400\t.\tC\tT,G\t60\t.\t.")?; // multi-allelic snp
        drop(f);

        let counts = count_variant_classes(&vcf)?;
        assert_eq!(
            counts,
            VariantCounts {
                snps: 2,
                mnps: 1,
                indels: 1
            }
        );
        assert_eq!(counts.total(), 4);
        Ok(())
    }

    #[test]
    fn test_count_variant_classes_rejects_short_rows() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let vcf = dir.path().join("bad.vcf");
        std::fs::write(&vcf, "MT\t100\t.\tA\n")?;
        assert!(count_variant_classes(&vcf).is_err());
        Ok(())
    }
}
