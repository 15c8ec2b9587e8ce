use anyhow::Result;
use std::fs::File;
use std::io::Write;

use mitoseq_pipelines::pipelines::batch::{parse_manifest, ManifestEntry};
use mitoseq_pipelines::utils::coverage::CoverageProfile;
use mitoseq_pipelines::utils::fasta::assembly_stats;
use mitoseq_pipelines::utils::report::{
    coverage_gates, n_content_gate, overall_status, scrape_report, size_gate, GateStatus,
    RunSummary,
};
use mitoseq_pipelines::utils::vcf::{count_variant_classes, SiteObservation, VariantFilter};

/// A consensus identical to the reference, with adequate coverage, passes
/// every gate and retains zero variants.
#[test]
fn reference_identical_consensus_passes_all_gates() -> Result<()> {
    let reference: Vec<u8> = b"ACGT".iter().cycle().take(16_500).copied().collect();
    let depths = vec![50u32; reference.len()];
    let profile = CoverageProfile::from_depths("MT", depths);

    let stats = assembly_stats(&reference);
    assert_eq!(stats.length, reference.len());
    assert_eq!(stats.n_count, 0);

    let mut gates = coverage_gates(profile.mean_depth(), profile.breadth(10), 10.0, 0.95);
    gates.push(size_gate(stats.length, 15_000, 18_000));
    gates.push(n_content_gate(stats.n_percent, 10.0));
    assert_eq!(overall_status(&gates), GateStatus::Pass);
    for gate in &gates {
        assert!(gate.status.passed(), "gate {} unexpectedly warned", gate.name);
    }

    // An empty filtered call set is zero retained variants, not an error.
    let dir = tempfile::tempdir()?;
    let vcf = dir.path().join("filtered.vcf");
    std::fs::write(&vcf, "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n")?;
    assert_eq!(count_variant_classes(&vcf)?.total(), 0);
    Ok(())
}

#[test]
fn breadth_is_monotone_nonincreasing_in_depth_threshold() {
    let depths: Vec<u32> = (0..10_000).map(|i| (i * 7919 % 199) as u32).collect();
    let profile = CoverageProfile::from_depths("MT", depths);
    let mut previous = 1.0f64;
    for threshold in 0..200u32 {
        let breadth = profile.breadth(threshold);
        assert!(breadth <= previous + 1e-12);
        previous = breadth;
    }
}

#[test]
fn gate_boundaries_are_inclusive() {
    // Size gate: exactly min and exactly max pass; one base out fails.
    assert!(size_gate(15_000, 15_000, 18_000).status.passed());
    assert!(size_gate(18_000, 15_000, 18_000).status.passed());
    assert!(!size_gate(14_999, 15_000, 18_000).status.passed());
    assert!(!size_gate(18_001, 15_000, 18_000).status.passed());

    // N gate: exactly max-n-percent passes, any excess warns.
    assert!(n_content_gate(10.0, 10.0).status.passed());
    assert!(!n_content_gate(10.01, 10.0).status.passed());
}

#[test]
fn filter_predicate_matches_specified_retention() {
    let filter = VariantFilter::new(10, 0.90);

    // quality 35, depth 12, alt fraction 11/12 = 0.92, both strands: kept
    let kept = SiteObservation {
        qual: 35.0,
        depth: 12,
        ref_fwd: 1,
        ref_rev: 0,
        alt_fwd: 6,
        alt_rev: 5,
    };
    assert!(filter.passes(&kept));

    // alt fraction 17/20 = 0.85 < 0.90: excluded
    let excluded = SiteObservation {
        qual: 35.0,
        depth: 20,
        ref_fwd: 2,
        ref_rev: 1,
        alt_fwd: 9,
        alt_rev: 8,
    };
    assert!(!filter.passes(&excluded));
}

#[test]
fn manifest_with_three_rows_yields_two_valid_and_one_flagged() -> Result<()> {
    let dir = tempfile::tempdir()?;

    // Rows 1 and 3 have real read files; row 2 points at a missing R1.
    for name in ["s1_R1.fq", "s1_R2.fq", "s2_R2.fq", "s3_R1.fq", "s3_R2.fq"] {
        std::fs::write(dir.path().join(name), "@r\nACGT\n+\nIIII\n")?;
    }
    let reference = dir.path().join("mito.fa");
    std::fs::write(&reference, ">MT\nACGT\n")?;

    let manifest = dir.path().join("samples.tsv");
    let mut f = File::create(&manifest)?;
    writeln!(f, "# sample\tr1\tr2\tref")?;
    for sample in ["s1", "s2", "s3"] {
        writeln!(
            f,
            "{}\t{}\t{}\tmito.fa",
            sample,
            dir.path().join(format!("{}_R1.fq", sample)).display(),
            dir.path().join(format!("{}_R2.fq", sample)).display()
        )?;
    }
    drop(f);

    let entries = parse_manifest(&manifest)?;
    assert_eq!(entries.len(), 3);

    let mut missing_r1 = 0;
    let mut runnable = 0;
    for entry in entries {
        let ManifestEntry::Row(row) = entry else {
            panic!("no malformed rows expected");
        };
        if row.r1.exists() && row.r2.exists() {
            runnable += 1;
        } else {
            assert_eq!(row.sample, "s2");
            assert!(!row.r1.exists());
            missing_r1 += 1;
        }
    }
    assert_eq!(runnable, 2);
    assert_eq!(missing_r1, 1);
    Ok(())
}

#[test]
fn summary_record_preferred_over_report_scrape() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let summary = RunSummary {
        sample: "s1".into(),
        length: 16_569,
        n_count: 3,
        n_percent: 0.02,
        gc_percent: 44.4,
        at_percent: 55.6,
        mean_coverage: 118.2,
        breadth: 0.997,
        variants_called: 25,
        variants_retained: 19,
        qc_pass: true,
    };
    let summary_path = dir.path().join("s1.summary.json");
    summary.write(&summary_path)?;
    let restored = RunSummary::read(&summary_path)?;
    assert_eq!(restored, summary);

    // The text report remains scrapeable as the degraded path.
    let report_path = dir.path().join("s1.qc_report.txt");
    std::fs::write(
        &report_path,
        "[Summary]\nLength: 16569\nAT content: 55.60%\nAverage depth: 118.2x\nCompleteness: 99.70%\n",
    )?;
    let scraped = scrape_report(&report_path);
    assert_eq!(scraped.length.as_deref(), Some("16569"));
    assert_eq!(scraped.completeness.as_deref(), Some("99.70%"));
    Ok(())
}

/// Consensus shorter than the expected range with heavy masking trips both
/// assembly gates independently while coverage gates still pass.
#[test]
fn gates_report_independently() {
    let profile = CoverageProfile::from_depths("MT", vec![40; 12_000]);
    let masked: Vec<u8> = b"ACGT"
        .iter()
        .cycle()
        .take(9_000)
        .copied()
        .chain(std::iter::repeat(b'N').take(3_000))
        .collect();
    let stats = assembly_stats(&masked);

    let mut gates = coverage_gates(profile.mean_depth(), profile.breadth(10), 10.0, 0.95);
    gates.push(size_gate(stats.length, 15_000, 18_000));
    gates.push(n_content_gate(stats.n_percent, 10.0));

    assert!(gates[0].status.passed());
    assert!(gates[1].status.passed());
    assert!(!gates[2].status.passed(), "size gate should warn");
    assert!(!gates[3].status.passed(), "N gate should warn");
    assert_eq!(overall_status(&gates), GateStatus::Warn);
}
