use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::config::defs::{
    PipelineError, RunConfig, SamtoolsSubcommand, BCFTOOLS_TAG, BEDTOOLS_TAG, BOWTIE2_BUILD_TAG,
    BOWTIE2_TAG, FASTA_EXTS, SAMTOOLS_TAG, SEQKIT_TAG,
};
use crate::utils::command::{bcftools, bedtools, bowtie2, bowtie2_build, samtools, seqkit};
use crate::utils::coverage::CoverageProfile;
use crate::utils::fasta::{assembly_stats, read_first_record, rewrite_header};
use crate::utils::file::prefixed_path;
use crate::utils::process::{run_tool, run_tool_to_file};
use crate::utils::report::{
    coverage_gates, n_content_gate, overall_status, size_gate, write_stats_table, GateResult,
    QcReport, RunSummary,
};
use crate::utils::vcf::{count_variant_classes, VariantFilter};

/// Artifact paths for one sample, all under the run's output directory.
struct SamplePaths {
    sam: PathBuf,
    sorted_bam: PathBuf,
    coverage: PathBuf,
    pileup_bcf: PathBuf,
    calls_vcf: PathBuf,
    filtered_vcf: PathBuf,
    raw_consensus: PathBuf,
    masked_consensus: PathBuf,
    consensus: PathBuf,
    mask_bed: PathBuf,
    report: PathBuf,
    stats: PathBuf,
    summary: PathBuf,
    log: PathBuf,
}

impl SamplePaths {
    fn new(out_dir: &Path, prefix: &str) -> Self {
        SamplePaths {
            sam: prefixed_path(out_dir, prefix, "sam"),
            sorted_bam: prefixed_path(out_dir, prefix, "sorted.bam"),
            coverage: prefixed_path(out_dir, prefix, "coverage.tsv"),
            pileup_bcf: prefixed_path(out_dir, prefix, "pileup.bcf"),
            calls_vcf: prefixed_path(out_dir, prefix, "calls.vcf.gz"),
            filtered_vcf: prefixed_path(out_dir, prefix, "filtered.vcf.gz"),
            raw_consensus: prefixed_path(out_dir, prefix, "consensus.raw.fa"),
            masked_consensus: prefixed_path(out_dir, prefix, "consensus.masked.fa"),
            consensus: prefixed_path(out_dir, prefix, "consensus.fa"),
            mask_bed: prefixed_path(out_dir, prefix, "lowdepth.bed"),
            report: prefixed_path(out_dir, prefix, "qc_report.txt"),
            stats: prefixed_path(out_dir, prefix, "assembly_stats.tsv"),
            summary: prefixed_path(out_dir, prefix, "summary.json"),
            log: prefixed_path(out_dir, prefix, "log"),
        }
    }
}

/// Timestamped per-run log file, mirroring the stage messages that also go
/// to the logger.
struct RunLog {
    file: File,
}

impl RunLog {
    fn create(path: &Path) -> Result<Self, PipelineError> {
        Ok(RunLog {
            file: File::create(path)?,
        })
    }

    fn stage(&mut self, msg: &str) {
        info!("{}", msg);
        let _ = writeln!(
            self.file,
            "[{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            msg
        );
    }
}

fn required_arg(value: &Option<String>, flag: &str) -> Result<String, PipelineError> {
    value
        .clone()
        .ok_or_else(|| PipelineError::InvalidConfig(format!("{} is required for consensus_genome", flag)))
}

fn file_size_mb(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len() / 1_048_576).unwrap_or(0)
}

pub async fn run(run_config: Arc<RunConfig>) -> Result<(), PipelineError> {
    println!("\n-------------\n Consensus Genome\n-------------\n");
    let args = &run_config.args;

    args.validate_thresholds()
        .map_err(PipelineError::InvalidConfig)?;

    let r1 = run_config.cwd.join(required_arg(&args.r1, "--r1")?);
    let r2 = run_config.cwd.join(required_arg(&args.r2, "--r2")?);
    let reference = run_config.cwd.join(required_arg(&args.reference, "--ref")?);
    let prefix = required_arg(&args.prefix, "--prefix")?;

    for input in [&r1, &r2, &reference] {
        if !input.exists() {
            return Err(PipelineError::InputNotFound(input.clone()));
        }
    }
    let ref_ext = reference
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !FASTA_EXTS.contains(&ref_ext.as_str()) {
        warn!(
            "Reference {} does not carry a FASTA extension",
            reference.display()
        );
    }

    crate::utils::command::require_tools().await?;

    let paths = SamplePaths::new(&run_config.out_dir, &prefix);
    let mut runlog = RunLog::create(&paths.log)?;
    let mut report = QcReport::new(&prefix);

    report.add_section("Input");
    report.add_line(format!("R1: {} ({} MB)", r1.display(), file_size_mb(&r1)));
    report.add_line(format!("R2: {} ({} MB)", r2.display(), file_size_mb(&r2)));
    report.add_line(format!("Reference: {}", reference.display()));
    report.add_line(format!(
        "Sensitivity: {}",
        args.sensitivity.as_flag().trim_start_matches("--")
    ));

    // Reference index is keyed to the reference path; rebuilding it for an
    // already-indexed reference is skipped.
    if bowtie2_build::index_exists(&reference) {
        runlog.stage("Reference index present, skipping bowtie2-build");
    } else {
        runlog.stage("Building reference index");
        run_tool(BOWTIE2_BUILD_TAG, &bowtie2_build::arg_generator(&reference)).await?;
    }

    runlog.stage("Aligning paired reads");
    let align_cli = bowtie2::arg_generator(
        args,
        run_config.threads,
        &reference,
        &r1,
        &r2,
        &paths.sam,
    );
    let align_out = run_tool(BOWTIE2_TAG, &align_cli).await?;

    // bowtie2 reports reads processed and concordant/discordant rates on
    // stderr; keep the block verbatim.
    report.add_section("Alignment");
    for line in align_out.stderr.lines() {
        report.add_line(line.to_string());
    }

    runlog.stage("Sorting and indexing alignment");
    run_tool(
        SAMTOOLS_TAG,
        &samtools::arg_generator(
            SamtoolsSubcommand::Sort,
            run_config.threads,
            &paths.sam,
            Some(&paths.sorted_bam),
        ),
    )
    .await?;
    run_tool(
        SAMTOOLS_TAG,
        &samtools::arg_generator(SamtoolsSubcommand::Index, run_config.threads, &paths.sorted_bam, None),
    )
    .await?;

    runlog.stage("Computing per-base depth");
    run_tool_to_file(
        SAMTOOLS_TAG,
        &samtools::arg_generator(SamtoolsSubcommand::Depth, run_config.threads, &paths.sorted_bam, None),
        &paths.coverage,
    )
    .await?;

    let (ref_id, ref_seq) = read_first_record(&reference).map_err(PipelineError::Other)?;
    let profile = CoverageProfile::from_depth_table(&paths.coverage, &ref_id, ref_seq.len())
        .map_err(PipelineError::Other)?;

    let mean_depth = profile.mean_depth();
    let breadth = profile.breadth(args.min_depth as u32);
    let mut gates: Vec<GateResult> =
        coverage_gates(mean_depth, breadth, args.min_coverage, args.min_breadth);
    for gate in &gates {
        if !gate.status.passed() {
            warn!("QC gate miss: {}", gate.report_line());
        }
    }
    report.add_section("Coverage");
    report.add_line(format!("Reference length: {} bp", ref_seq.len()));
    report.add_line(format!("Average depth: {:.1}x", mean_depth));
    report.add_line(format!(
        "Breadth at {}x: {:.2}%",
        args.min_depth,
        breadth * 100.0
    ));

    runlog.stage("Calling variants at ploidy 1");
    run_tool(
        BCFTOOLS_TAG,
        &bcftools::mpileup_args(
            &reference,
            args.min_mapq,
            args.min_baseq,
            &paths.sorted_bam,
            &paths.pileup_bcf,
        ),
    )
    .await?;
    run_tool(BCFTOOLS_TAG, &bcftools::call_args(&paths.pileup_bcf, &paths.calls_vcf)).await?;
    run_tool(BCFTOOLS_TAG, &bcftools::index_args(&paths.calls_vcf)).await?;

    runlog.stage("Filtering variants");
    let filter = VariantFilter::new(args.min_depth, args.min_af);
    run_tool(
        BCFTOOLS_TAG,
        &bcftools::view_filter_args(&filter, &paths.calls_vcf, &paths.filtered_vcf),
    )
    .await?;
    run_tool(BCFTOOLS_TAG, &bcftools::index_args(&paths.filtered_vcf)).await?;

    let called = count_variant_classes(&paths.calls_vcf).map_err(PipelineError::Other)?;
    let retained = count_variant_classes(&paths.filtered_vcf).map_err(PipelineError::Other)?;
    report.add_section("Variants");
    report.add_line(format!(
        "Called: {} ({} SNP, {} MNP, {} indel)",
        called.total(),
        called.snps,
        called.mnps,
        called.indels
    ));
    report.add_line(format!("Retained after filtering: {}", retained.total()));
    report.add_line(format!("Filter: {}", filter.expression()));

    runlog.stage("Generating consensus");
    run_tool(
        BCFTOOLS_TAG,
        &bcftools::consensus_args(&reference, &paths.filtered_vcf, args.iupac, &paths.raw_consensus),
    )
    .await?;

    // Masking is requested behavior but bedtools is an optional capability;
    // without it the unmasked consensus proceeds and the report says so.
    let mut mask_note: Option<String> = None;
    let headered_input = if args.mask_low_depth {
        if run_config.capabilities.masking {
            let n_intervals = profile
                .write_mask_bed(args.min_depth as u32, &paths.mask_bed)
                .map_err(PipelineError::Other)?;
            if n_intervals > 0 {
                runlog.stage(&format!(
                    "Masking {} low-depth interval(s) below {}x",
                    n_intervals, args.min_depth
                ));
                run_tool(
                    BEDTOOLS_TAG,
                    &bedtools::maskfasta_args(&paths.raw_consensus, &paths.mask_bed, &paths.masked_consensus),
                )
                .await?;
                paths.masked_consensus.clone()
            } else {
                runlog.stage("No positions below the depth threshold; nothing to mask");
                paths.raw_consensus.clone()
            }
        } else {
            let note = "WARNING: masking requested but bedtools is unavailable; consensus is UNMASKED".to_string();
            warn!("{}", note);
            mask_note = Some(note);
            paths.raw_consensus.clone()
        }
    } else {
        paths.raw_consensus.clone()
    };

    runlog.stage("Normalizing consensus header");
    rewrite_header(&headered_input, &prefix, &paths.consensus).map_err(PipelineError::Other)?;

    let (_, consensus_seq) = read_first_record(&paths.consensus).map_err(PipelineError::Other)?;
    let stats = assembly_stats(&consensus_seq);

    gates.push(size_gate(stats.length, args.size_min, args.size_max));
    gates.push(n_content_gate(stats.n_percent, args.max_n_percent));
    for gate in &gates[2..] {
        if !gate.status.passed() {
            warn!("QC gate miss: {}", gate.report_line());
        }
    }

    report.add_section("Assembly Validation");
    for gate in &gates {
        report.add_line(gate.report_line());
    }
    if let Some(note) = &mask_note {
        report.add_line(note.clone());
    }

    report.add_section("Contamination Screen");
    if run_config.capabilities.contamination_screen {
        report.add_line("kraken2 available; screening not configured for this run".to_string());
    } else {
        report.add_line("kraken2 not found; screening skipped".to_string());
    }

    runlog.stage("Writing statistics and report");
    write_stats_table(&paths.stats, &prefix, &stats).map_err(PipelineError::Other)?;

    if run_config.capabilities.enhanced_stats {
        match run_tool(SEQKIT_TAG, &seqkit::stats_args(&paths.consensus)).await {
            Ok(out) => {
                report.add_section("Enhanced Statistics");
                for line in out.stdout.lines() {
                    report.add_line(line.to_string());
                }
            }
            Err(e) => warn!("seqkit stats failed; continuing without enhanced statistics: {}", e),
        }
    }

    let overall = overall_status(&gates);
    report.add_section("Summary");
    report.add_line(format!("Length: {}", stats.length));
    report.add_line(format!("N count: {}", stats.n_count));
    report.add_line(format!("N content: {:.2}%", stats.n_percent));
    report.add_line(format!("GC content: {:.2}%", stats.gc_percent));
    report.add_line(format!("AT content: {:.2}%", stats.at_percent));
    report.add_line(format!("Average depth: {:.1}x", mean_depth));
    report.add_line(format!("Completeness: {:.2}%", breadth * 100.0));
    report.add_line(format!("Variants called: {}", called.total()));
    report.add_line(format!("Variants retained: {}", retained.total()));
    report.add_line(format!("Overall QC: {}", overall.as_str()));

    report.add_section("Output Files");
    for artifact in [
        &paths.consensus,
        &paths.sorted_bam,
        &paths.coverage,
        &paths.filtered_vcf,
        &paths.stats,
        &paths.summary,
        &paths.log,
    ] {
        report.add_line(artifact.display().to_string());
    }

    report.write(&paths.report).map_err(PipelineError::Other)?;

    let summary = RunSummary {
        sample: prefix.clone(),
        length: stats.length,
        n_count: stats.n_count,
        n_percent: stats.n_percent,
        gc_percent: stats.gc_percent,
        at_percent: stats.at_percent,
        mean_coverage: mean_depth,
        breadth,
        variants_called: called.total(),
        variants_retained: retained.total(),
        qc_pass: overall.passed(),
    };
    summary.write(&paths.summary).map_err(PipelineError::Other)?;

    runlog.stage("Cleaning up intermediates");
    for intermediate in [&paths.sam, &paths.pileup_bcf, &paths.raw_consensus, &paths.masked_consensus] {
        if intermediate.exists() {
            if let Err(e) = fs::remove_file(intermediate) {
                warn!("Failed to remove {}: {}", intermediate.display(), e);
            }
        }
    }

    runlog.stage(&format!(
        "Consensus genome complete for {} (QC: {})",
        prefix,
        overall.as_str()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_paths_layout() {
        let paths = SamplePaths::new(Path::new("/out"), "s1");
        assert_eq!(paths.consensus, PathBuf::from("/out/s1.consensus.fa"));
        assert_eq!(paths.sorted_bam, PathBuf::from("/out/s1.sorted.bam"));
        assert_eq!(paths.report, PathBuf::from("/out/s1.qc_report.txt"));
        assert_eq!(paths.summary, PathBuf::from("/out/s1.summary.json"));
    }

    #[test]
    fn test_required_arg() {
        assert!(required_arg(&None, "--r1").is_err());
        assert_eq!(
            required_arg(&Some("a.fq".to_string()), "--r1").unwrap(),
            "a.fq"
        );
    }
}
