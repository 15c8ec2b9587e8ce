use std::fs;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use log::{info, warn};
use tokio::sync::{mpsc, Semaphore};

use crate::config::defs::{PipelineError, RunConfig};
use crate::utils::fasta::{consensus_length, fasta_reader};
use crate::utils::file::write_fasta_record;
use crate::utils::report::{scrape_report, RunSummary};

const UNKNOWN: &str = "Unknown";

/// One manifest row: sample name, paired read files, and a reference file
/// name resolved against --ref-dir.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRow {
    pub sample: String,
    pub r1: PathBuf,
    pub r2: PathBuf,
    pub ref_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManifestEntry {
    Row(ManifestRow),
    Malformed { line_no: usize, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    MissingR1,
    MissingR2,
    MissingRef,
    MalformedRow,
    AssemblyError,
    NoOutput,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::MissingR1 => "Missing_R1",
            FailureReason::MissingR2 => "Missing_R2",
            FailureReason::MissingRef => "Missing_Ref",
            FailureReason::MalformedRow => "Malformed_Row",
            FailureReason::AssemblyError => "Assembly_Error",
            FailureReason::NoOutput => "No_Output",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowStatus {
    Success {
        length: String,
        at_percent: String,
        coverage: String,
        completeness: String,
    },
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub sample: String,
    pub status: RowStatus,
}

/// Parses the tab-separated sample manifest. Blank lines and lines starting
/// with '#' are skipped; rows without exactly four fields are kept as
/// malformed entries so they surface in the batch summary rather than
/// aborting the batch.
pub fn parse_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let reader = BufReader::new(
        File::open(path).map_err(|e| anyhow!("Cannot open manifest {}: {}", path.display(), e))?,
    );
    let mut entries = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() != 4 || fields.iter().any(|f| f.is_empty()) {
            entries.push(ManifestEntry::Malformed {
                line_no: idx + 1,
                text: trimmed.to_string(),
            });
            continue;
        }
        entries.push(ManifestEntry::Row(ManifestRow {
            sample: fields[0].to_string(),
            r1: PathBuf::from(fields[1]),
            r2: PathBuf::from(fields[2]),
            ref_name: fields[3].to_string(),
        }));
    }
    Ok(entries)
}

/// The per-sample flags broadcast uniformly from the batch configuration to
/// every child invocation.
fn broadcast_args(config: &RunConfig, row: &ManifestRow, ref_path: &Path, sample_dir: &Path) -> Vec<String> {
    let args = &config.args;
    let mut cli: Vec<String> = vec![
        "--module".into(),
        "consensus_genome".into(),
        "--r1".into(),
        row.r1.to_string_lossy().into_owned(),
        "--r2".into(),
        row.r2.to_string_lossy().into_owned(),
        "--ref".into(),
        ref_path.to_string_lossy().into_owned(),
        "--prefix".into(),
        row.sample.clone(),
        "--out".into(),
        sample_dir.to_string_lossy().into_owned(),
        "--threads".into(),
        config.threads.to_string(),
        "--sensitivity".into(),
        args.sensitivity.as_flag().trim_start_matches("--").into(),
        "--min-mapq".into(),
        args.min_mapq.to_string(),
        "--min-baseq".into(),
        args.min_baseq.to_string(),
        "--min-depth".into(),
        args.min_depth.to_string(),
        "--min-af".into(),
        args.min_af.to_string(),
        "--mask-low-depth".into(),
        args.mask_low_depth.to_string(),
        "--min-coverage".into(),
        args.min_coverage.to_string(),
        "--min-breadth".into(),
        args.min_breadth.to_string(),
        "--max-n-percent".into(),
        args.max_n_percent.to_string(),
        "--size-min".into(),
        args.size_min.to_string(),
        "--size-max".into(),
        args.size_max.to_string(),
    ];
    if args.iupac {
        cli.push("--iupac".into());
    }
    if args.verbose {
        cli.push("--verbose".into());
    }
    cli
}

fn append_to_batch_log(log: &Mutex<File>, sample: &str, body: &str) {
    let banner = format!(
        "\n===== {} ({}) =====\n",
        sample,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    if let Ok(mut file) = log.lock() {
        let _ = file.write_all(banner.as_bytes());
        let _ = file.write_all(body.as_bytes());
    }
}

/// Runs one manifest row to completion: path validation, child pipeline
/// invocation, and result extraction. Never panics the batch; every exit is
/// a BatchResult.
async fn process_row(
    config: Arc<RunConfig>,
    row: ManifestRow,
    batch_log: Arc<Mutex<File>>,
) -> BatchResult {
    let sample_dir = config.out_dir.join(&row.sample);
    if let Err(e) = fs::create_dir_all(&sample_dir) {
        warn!("Cannot create {}: {}", sample_dir.display(), e);
        return BatchResult {
            sample: row.sample,
            status: RowStatus::Failed(FailureReason::AssemblyError),
        };
    }

    let ref_path = match &config.args.ref_dir {
        Some(dir) => Path::new(dir).join(&row.ref_name),
        None => PathBuf::from(&row.ref_name),
    };
    if !row.r1.exists() {
        return BatchResult {
            sample: row.sample,
            status: RowStatus::Failed(FailureReason::MissingR1),
        };
    }
    if !row.r2.exists() {
        return BatchResult {
            sample: row.sample,
            status: RowStatus::Failed(FailureReason::MissingR2),
        };
    }
    if !ref_path.exists() {
        return BatchResult {
            sample: row.sample,
            status: RowStatus::Failed(FailureReason::MissingRef),
        };
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            warn!("Cannot resolve own executable: {}", e);
            return BatchResult {
                sample: row.sample,
                status: RowStatus::Failed(FailureReason::AssemblyError),
            };
        }
    };

    info!("Starting sample {}", row.sample);
    let child_args = broadcast_args(&config, &row, &ref_path, &sample_dir);
    let output = tokio::process::Command::new(&exe)
        .args(&child_args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            warn!("Failed to spawn pipeline for {}: {}", row.sample, e);
            return BatchResult {
                sample: row.sample,
                status: RowStatus::Failed(FailureReason::AssemblyError),
            };
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    append_to_batch_log(&batch_log, &row.sample, &combined);

    if !output.status.success() {
        return BatchResult {
            sample: row.sample,
            status: RowStatus::Failed(FailureReason::AssemblyError),
        };
    }

    let consensus = sample_dir.join(format!("{}.consensus.fa", row.sample));
    if !consensus.exists() {
        return BatchResult {
            sample: row.sample,
            status: RowStatus::Failed(FailureReason::NoOutput),
        };
    }

    let status = match RunSummary::read(&sample_dir.join(format!("{}.summary.json", row.sample))) {
        Ok(summary) => RowStatus::Success {
            length: summary.length.to_string(),
            at_percent: format!("{:.2}%", summary.at_percent),
            coverage: format!("{:.1}x", summary.mean_coverage),
            completeness: format!("{:.2}%", summary.breadth * 100.0),
        },
        Err(_) => {
            // Older runs carry only the text report; take the length from
            // the consensus body and scrape the rest.
            let scraped = scrape_report(&sample_dir.join(format!("{}.qc_report.txt", row.sample)));
            let length = consensus_length(&consensus)
                .map(|l| l.to_string())
                .unwrap_or_else(|_| UNKNOWN.to_string());
            RowStatus::Success {
                length,
                at_percent: scraped.at_percent.unwrap_or_else(|| UNKNOWN.to_string()),
                coverage: scraped.coverage.unwrap_or_else(|| UNKNOWN.to_string()),
                completeness: scraped.completeness.unwrap_or_else(|| UNKNOWN.to_string()),
            }
        }
    };

    BatchResult {
        sample: row.sample,
        status,
    }
}

fn write_summary_files(out_dir: &Path, results: &[BatchResult]) -> Result<()> {
    let mut summary = File::create(out_dir.join("batch_summary.tsv"))?;
    writeln!(summary, "sample\tstatus\tlength\tat_percent\tcoverage\tcompleteness")?;
    let mut failed = File::create(out_dir.join("failed_samples.txt"))?;

    for result in results {
        match &result.status {
            RowStatus::Success {
                length,
                at_percent,
                coverage,
                completeness,
            } => {
                writeln!(
                    summary,
                    "{}\tSUCCESS\t{}\t{}\t{}\t{}",
                    result.sample, length, at_percent, coverage, completeness
                )?;
            }
            RowStatus::Failed(reason) => {
                writeln!(summary, "{}\tFAILED\tNA\tNA\tNA\tNA", result.sample)?;
                writeln!(failed, "{}\t{}", result.sample, reason.as_str())?;
            }
        }
    }
    Ok(())
}

/// Concatenates every successful sample's consensus into one FASTA, skipping
/// samples whose consensus never materialized.
fn write_combined_fasta(out_dir: &Path, results: &[BatchResult]) -> Result<usize> {
    let mut combined = File::create(out_dir.join("combined_consensus.fasta"))?;
    let mut written = 0usize;

    for result in results {
        if !matches!(result.status, RowStatus::Success { .. }) {
            continue;
        }
        let consensus = out_dir
            .join(&result.sample)
            .join(format!("{}.consensus.fa", result.sample));
        if !consensus.exists() {
            continue;
        }
        let mut reader = fasta_reader(&consensus)?;
        for record in reader.records() {
            let record = record.map_err(|e| anyhow!("Bad consensus {}: {}", consensus.display(), e))?;
            let header = String::from_utf8_lossy(&record.head).into_owned();
            write_fasta_record(&mut combined, &header, None, &record.seq)?;
            written += 1;
        }
    }
    Ok(written)
}

pub async fn run(run_config: Arc<RunConfig>) -> Result<(), PipelineError> {
    println!("\n-------------\n Batch Assembly\n-------------\n");
    let args = &run_config.args;

    args.validate_thresholds()
        .map_err(PipelineError::InvalidConfig)?;

    let manifest_path = args
        .sample_list
        .clone()
        .ok_or_else(|| PipelineError::InvalidConfig("--sample-list is required for batch".into()))?;
    let manifest_path = run_config.cwd.join(manifest_path);
    if !manifest_path.exists() {
        return Err(PipelineError::InputNotFound(manifest_path));
    }
    let ref_dir = args
        .ref_dir
        .clone()
        .ok_or_else(|| PipelineError::InvalidConfig("--ref-dir is required for batch".into()))?;
    if !Path::new(&ref_dir).exists() {
        return Err(PipelineError::InputNotFound(PathBuf::from(ref_dir)));
    }

    let entries = parse_manifest(&manifest_path).map_err(PipelineError::Other)?;
    if entries.is_empty() {
        return Err(PipelineError::InvalidConfig(format!(
            "Manifest {} contains no sample rows",
            manifest_path.display()
        )));
    }
    info!("Manifest rows: {}", entries.len());

    let batch_log = Arc::new(Mutex::new(
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_config.out_dir.join("batch.log"))?,
    ));

    let mut results: Vec<BatchResult> = Vec::with_capacity(entries.len());

    if args.jobs == 1 {
        // Sequential mode: strict manifest order.
        for entry in entries {
            match entry {
                ManifestEntry::Row(row) => {
                    results.push(process_row(run_config.clone(), row, batch_log.clone()).await);
                }
                ManifestEntry::Malformed { line_no, text } => {
                    warn!("Skipping malformed manifest line {}: {}", line_no, text);
                    results.push(BatchResult {
                        sample: format!("line_{}", line_no),
                        status: RowStatus::Failed(FailureReason::MalformedRow),
                    });
                }
            }
        }
    } else {
        let semaphore = Arc::new(Semaphore::new(args.jobs));
        let (tx, mut rx) = mpsc::channel::<BatchResult>(entries.len());

        for entry in entries {
            match entry {
                ManifestEntry::Row(row) => {
                    let permit_pool = semaphore.clone();
                    let config = run_config.clone();
                    let log = batch_log.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let Ok(_permit) = permit_pool.acquire_owned().await else {
                            return;
                        };
                        let result = process_row(config, row, log).await;
                        let _ = tx.send(result).await;
                    });
                }
                ManifestEntry::Malformed { line_no, text } => {
                    warn!("Skipping malformed manifest line {}: {}", line_no, text);
                    results.push(BatchResult {
                        sample: format!("line_{}", line_no),
                        status: RowStatus::Failed(FailureReason::MalformedRow),
                    });
                }
            }
        }
        drop(tx);

        while let Some(result) = rx.recv().await {
            match &result.status {
                RowStatus::Success { .. } => info!("{}: SUCCESS", result.sample),
                RowStatus::Failed(reason) => warn!("{}: FAILED ({})", result.sample, reason.as_str()),
            }
            results.push(result);
        }
    }

    write_summary_files(&run_config.out_dir, &results).map_err(PipelineError::Other)?;
    let combined = write_combined_fasta(&run_config.out_dir, &results).map_err(PipelineError::Other)?;

    let succeeded = results
        .iter()
        .filter(|r| matches!(r.status, RowStatus::Success { .. }))
        .count();
    let failed = results.len() - succeeded;
    info!(
        "Batch complete: {} succeeded, {} failed, {} consensus sequence(s) combined",
        succeeded, failed, combined
    );

    if failed > 0 {
        return Err(PipelineError::Other(anyhow!(
            "{} of {} samples failed; see failed_samples.txt",
            failed,
            results.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as IoWrite;

    #[test]
    fn test_parse_manifest_skips_comments_and_blanks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manifest = dir.path().join("samples.tsv");
        let mut f = File::create(&manifest)?;
        writeln!(f, "# sample\tr1\tr2\tref")?;
        writeln!(f)?;
        writeln!(f, "s1\t/data/s1_R1.fq.gz\t/data/s1_R2.fq.gz\tmito.fa")?;
        writeln!(f, "s2\t/data/s2_R1.fq.gz\t/data/s2_R2.fq.gz\tmito.fa")?;
        drop(f);

        let entries = parse_manifest(&manifest)?;
        assert_eq!(entries.len(), 2);
        match &entries[0] {
            ManifestEntry::Row(row) => {
                assert_eq!(row.sample, "s1");
                assert_eq!(row.ref_name, "mito.fa");
            }
            other => panic!("expected row, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_parse_manifest_flags_malformed_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manifest = dir.path().join("samples.tsv");
        std::fs::write(&manifest, "s1\tonly_two_fields\n")?;
        let entries = parse_manifest(&manifest)?;
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0], ManifestEntry::Malformed { line_no: 1, .. }));
        Ok(())
    }

    #[test]
    fn test_failure_reason_tags() {
        assert_eq!(FailureReason::MissingR1.as_str(), "Missing_R1");
        assert_eq!(FailureReason::MissingR2.as_str(), "Missing_R2");
        assert_eq!(FailureReason::MissingRef.as_str(), "Missing_Ref");
        assert_eq!(FailureReason::AssemblyError.as_str(), "Assembly_Error");
        assert_eq!(FailureReason::NoOutput.as_str(), "No_Output");
    }

    #[test]
    fn test_write_summary_and_failed_list() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let results = vec![
            BatchResult {
                sample: "s1".into(),
                status: RowStatus::Success {
                    length: "16569".into(),
                    at_percent: "55.60%".into(),
                    coverage: "120.5x".into(),
                    completeness: "99.80%".into(),
                },
            },
            BatchResult {
                sample: "s2".into(),
                status: RowStatus::Failed(FailureReason::MissingR1),
            },
        ];
        write_summary_files(dir.path(), &results)?;

        let summary = std::fs::read_to_string(dir.path().join("batch_summary.tsv"))?;
        assert!(summary.contains("s1\tSUCCESS\t16569\t55.60%\t120.5x\t99.80%"));
        assert!(summary.contains("s2\tFAILED\tNA\tNA\tNA\tNA"));

        let failed = std::fs::read_to_string(dir.path().join("failed_samples.txt"))?;
        assert_eq!(failed, "s2\tMissing_R1\n");
        Ok(())
    }

    #[test]
    fn test_write_combined_fasta_skips_failures() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let s1_dir = dir.path().join("s1");
        fs::create_dir_all(&s1_dir)?;
        std::fs::write(s1_dir.join("s1.consensus.fa"), ">s1\nACGTACGT\n")?;

        let results = vec![
            BatchResult {
                sample: "s1".into(),
                status: RowStatus::Success {
                    length: "8".into(),
                    at_percent: UNKNOWN.into(),
                    coverage: UNKNOWN.into(),
                    completeness: UNKNOWN.into(),
                },
            },
            BatchResult {
                sample: "s2".into(),
                status: RowStatus::Failed(FailureReason::AssemblyError),
            },
        ];
        let written = write_combined_fasta(dir.path(), &results)?;
        assert_eq!(written, 1);
        let combined = std::fs::read_to_string(dir.path().join("combined_consensus.fasta"))?;
        assert_eq!(combined, ">s1\nACGTACGT\n");
        Ok(())
    }
}
