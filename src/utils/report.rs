use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::utils::fasta::AssemblyStats;

/// QC gate outcome. A WARN never fails the run; the exit code reflects
/// operational errors only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    Pass,
    Warn,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Pass => "PASS",
            GateStatus::Warn => "WARN",
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, GateStatus::Pass)
    }
}

#[derive(Debug, Clone)]
pub struct GateResult {
    pub name: &'static str,
    pub detail: String,
    pub status: GateStatus,
}

impl GateResult {
    fn new(name: &'static str, passed: bool, detail: String) -> Self {
        GateResult {
            name,
            detail,
            status: if passed { GateStatus::Pass } else { GateStatus::Warn },
        }
    }

    pub fn report_line(&self) -> String {
        format!("{}  {}: {}", self.status.as_str(), self.name, self.detail)
    }
}

/// Average-depth and breadth sub-checks, reported independently.
pub fn coverage_gates(
    mean_depth: f64,
    breadth: f64,
    min_coverage: f64,
    min_breadth: f64,
) -> Vec<GateResult> {
    vec![
        GateResult::new(
            "Coverage",
            mean_depth >= min_coverage,
            format!("average depth {:.1}x (minimum {:.1}x)", mean_depth, min_coverage),
        ),
        GateResult::new(
            "Breadth",
            breadth >= min_breadth,
            format!(
                "{:.2}% of positions covered (minimum {:.2}%)",
                breadth * 100.0,
                min_breadth * 100.0
            ),
        ),
    ]
}

/// Assembly length must fall inside the expected size range, bounds
/// inclusive.
pub fn size_gate(length: usize, size_min: usize, size_max: usize) -> GateResult {
    GateResult::new(
        "Size",
        length >= size_min && length <= size_max,
        format!("{} bp (expected {}-{} bp)", length, size_min, size_max),
    )
}

/// N content must not exceed the configured maximum; exactly at the
/// threshold passes.
pub fn n_content_gate(n_percent: f64, max_n_percent: f64) -> GateResult {
    GateResult::new(
        "N content",
        n_percent <= max_n_percent,
        format!("{:.2}% N (maximum {:.2}%)", n_percent, max_n_percent),
    )
}

pub fn overall_status(gates: &[GateResult]) -> GateStatus {
    if gates.iter().all(|g| g.status.passed()) {
        GateStatus::Pass
    } else {
        GateStatus::Warn
    }
}

/// Plain-text QC report, built section by section as the stages run and
/// written once at the end. The report is the authoritative quality
/// artifact; it is always produced once validation passes.
pub struct QcReport {
    sample: String,
    sections: Vec<(String, Vec<String>)>,
}

impl QcReport {
    pub fn new(sample: &str) -> Self {
        QcReport {
            sample: sample.to_string(),
            sections: Vec::new(),
        }
    }

    pub fn add_section(&mut self, title: &str) {
        self.sections.push((title.to_string(), Vec::new()));
    }

    pub fn add_line(&mut self, line: impl Into<String>) {
        if self.sections.is_empty() {
            self.add_section("General");
        }
        self.sections.last_mut().unwrap().1.push(line.into());
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("==========================================\n");
        out.push_str(" Mitochondrial Consensus QC Report\n");
        out.push_str(&format!(" Sample: {}\n", self.sample));
        out.push_str(&format!(
            " Generated: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str("==========================================\n");
        for (title, lines) in &self.sections {
            out.push_str(&format!("\n[{}]\n", title));
            for line in lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(self.render().as_bytes())?;
        Ok(())
    }
}

/// Machine-readable per-sample result record. The batch layer reads this
/// instead of scraping the text report; the scraper below remains as the
/// fallback for runs that predate the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub sample: String,
    pub length: usize,
    pub n_count: usize,
    pub n_percent: f64,
    pub gc_percent: f64,
    pub at_percent: f64,
    pub mean_coverage: f64,
    pub breadth: f64,
    pub variants_called: u64,
    pub variants_retained: u64,
    pub qc_pass: bool,
}

impl RunSummary {
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<RunSummary> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

/// Writes the assembly-statistics table: one header row, one data row.
pub fn write_stats_table(path: &Path, sample: &str, stats: &AssemblyStats) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(
        file,
        "sample\tlength\tn_count\tn_percent\tgc_percent\tat_percent"
    )?;
    writeln!(
        file,
        "{}\t{}\t{}\t{:.2}\t{:.2}\t{:.2}",
        sample, stats.length, stats.n_count, stats.n_percent, stats.gc_percent, stats.at_percent
    )?;
    Ok(())
}

/// Best-effort extraction of the headline statistics from a QC report.
/// Fields that cannot be found stay None; the caller substitutes its
/// sentinel.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScrapedStats {
    pub length: Option<String>,
    pub at_percent: Option<String>,
    pub coverage: Option<String>,
    pub completeness: Option<String>,
}

pub fn scrape_report(path: &Path) -> ScrapedStats {
    let mut scraped = ScrapedStats::default();
    let Ok(file) = File::open(path) else {
        return scraped;
    };
    for line in BufReader::new(file).lines().map_while(|l| l.ok()) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "Length" => scraped.length = Some(value),
            "AT content" => scraped.at_percent = Some(value),
            "Average depth" => scraped.coverage = Some(value),
            "Completeness" => scraped.completeness = Some(value),
            _ => {}
        }
    }
    scraped
}
