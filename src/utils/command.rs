/// Functions and structs for working with creating command-line arguments

use anyhow::{anyhow, Result};
use log::{info, warn};

use crate::config::defs::{
    Capabilities, PipelineError, BCFTOOLS_TAG, BEDTOOLS_TAG, BOWTIE2_BUILD_TAG, BOWTIE2_TAG,
    KRAKEN2_TAG, SAMTOOLS_TAG, SEQKIT_TAG, TOOL_VERSIONS,
};

pub mod bowtie2 {
    use std::path::Path;
    use anyhow::{anyhow, Result};
    use crate::cli::Arguments;
    use crate::config::defs::BOWTIE2_TAG;
    use crate::utils::process::run_tool;

    pub async fn presence_check() -> Result<String> {
        let args = vec!["--version".to_string()];
        let out = run_tool(BOWTIE2_TAG, &args)
            .await
            .map_err(|e| anyhow!("{}. Is bowtie2 installed?", e))?;
        let first_line = out
            .stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("No output from bowtie2 --version"))?;
        let version = first_line
            .split_whitespace()
            .last()
            .ok_or_else(|| anyhow!("Invalid bowtie2 --version output: {}", first_line))?
            .to_string();
        if version.is_empty() {
            return Err(anyhow!("Empty version number in bowtie2 --version output: {}", first_line));
        }
        Ok(version)
    }

    /// Paired-end alignment against a pre-built index. Unaligned pairs are
    /// discarded; the alignment summary arrives on stderr.
    pub fn arg_generator(
        args: &Arguments,
        threads: usize,
        index_prefix: &Path,
        r1: &Path,
        r2: &Path,
        sam_out: &Path,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-p".to_string());
        args_vec.push(threads.to_string());
        args_vec.push(args.sensitivity.as_flag().to_string());
        args_vec.push("-x".to_string());
        args_vec.push(index_prefix.to_string_lossy().to_string());
        args_vec.push("-1".to_string());
        args_vec.push(r1.to_string_lossy().to_string());
        args_vec.push("-2".to_string());
        args_vec.push(r2.to_string_lossy().to_string());
        args_vec.push("--no-unal".to_string());
        args_vec.push("-S".to_string());
        args_vec.push(sam_out.to_string_lossy().to_string());
        args_vec
    }
}

pub mod bowtie2_build {
    use std::path::Path;

    /// The index prefix is the reference path itself, so `<ref>.1.bt2`
    /// sitting next to the FASTA marks an already-indexed reference.
    pub fn arg_generator(reference: &Path) -> Vec<String> {
        vec![
            reference.to_string_lossy().to_string(),
            reference.to_string_lossy().to_string(),
        ]
    }

    pub fn index_exists(reference: &Path) -> bool {
        let mut marker = reference.as_os_str().to_owned();
        marker.push(".1.bt2");
        Path::new(&marker).exists()
    }
}

pub mod samtools {
    use std::path::Path;
    use anyhow::{anyhow, Result};
    use crate::config::defs::{SamtoolsSubcommand, SAMTOOLS_TAG};
    use crate::utils::process::run_tool;

    pub async fn presence_check() -> Result<String> {
        let args = vec!["--version".to_string()];
        let out = run_tool(SAMTOOLS_TAG, &args)
            .await
            .map_err(|e| anyhow!("{}. Is samtools installed?", e))?;
        let first_line = out
            .stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("No output from samtools --version"))?;
        let version = first_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("Invalid samtools --version output: {}", first_line))?
            .to_string();
        Ok(version)
    }

    pub fn arg_generator(
        subcommand: SamtoolsSubcommand,
        threads: usize,
        input: &Path,
        output: Option<&Path>,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        match subcommand {
            SamtoolsSubcommand::Sort => {
                args_vec.push("sort".to_string());
                args_vec.push("-@".to_string());
                args_vec.push(threads.to_string());
                if let Some(out) = output {
                    args_vec.push("-o".to_string());
                    args_vec.push(out.to_string_lossy().to_string());
                }
                args_vec.push(input.to_string_lossy().to_string());
            }
            SamtoolsSubcommand::Index => {
                args_vec.push("index".to_string());
                args_vec.push(input.to_string_lossy().to_string());
            }
            SamtoolsSubcommand::Depth => {
                // -a reports zero-depth positions, -d 0 removes the depth cap
                args_vec.push("depth".to_string());
                args_vec.push("-a".to_string());
                args_vec.push("-d".to_string());
                args_vec.push("0".to_string());
                args_vec.push(input.to_string_lossy().to_string());
            }
        }
        args_vec
    }
}

pub mod bcftools {
    use std::path::Path;
    use anyhow::{anyhow, Result};
    use crate::config::defs::{BcftoolsSubcommand, BCFTOOLS_TAG};
    use crate::utils::process::run_tool;
    use crate::utils::vcf::VariantFilter;

    pub async fn presence_check() -> Result<String> {
        let args = vec!["--version".to_string()];
        let out = run_tool(BCFTOOLS_TAG, &args)
            .await
            .map_err(|e| anyhow!("{}. Is bcftools installed?", e))?;
        let first_line = out
            .stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("No output from bcftools --version"))?;
        let version = first_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("Invalid bcftools --version output: {}", first_line))?
            .to_string();
        Ok(version)
    }

    pub fn mpileup_args(
        reference: &Path,
        min_mapq: u8,
        min_baseq: u8,
        bam: &Path,
        out_bcf: &Path,
    ) -> Vec<String> {
        vec![
            subcommand_tag(BcftoolsSubcommand::Mpileup).to_string(),
            "-f".to_string(),
            reference.to_string_lossy().to_string(),
            "-q".to_string(),
            min_mapq.to_string(),
            "-Q".to_string(),
            min_baseq.to_string(),
            "-a".to_string(),
            "FORMAT/AD,FORMAT/ADF,FORMAT/ADR".to_string(),
            "-Ob".to_string(),
            "-o".to_string(),
            out_bcf.to_string_lossy().to_string(),
            bam.to_string_lossy().to_string(),
        ]
    }

    pub fn call_args(pileup_bcf: &Path, out_vcf_gz: &Path) -> Vec<String> {
        vec![
            subcommand_tag(BcftoolsSubcommand::Call).to_string(),
            "--ploidy".to_string(),
            "1".to_string(),
            "-m".to_string(),
            "-v".to_string(),
            "-Oz".to_string(),
            "-o".to_string(),
            out_vcf_gz.to_string_lossy().to_string(),
            pileup_bcf.to_string_lossy().to_string(),
        ]
    }

    /// The typed predicate is rendered to bcftools expression syntax here,
    /// at the tool boundary, and nowhere else.
    pub fn view_filter_args(
        filter: &VariantFilter,
        calls_vcf_gz: &Path,
        out_vcf_gz: &Path,
    ) -> Vec<String> {
        vec![
            subcommand_tag(BcftoolsSubcommand::View).to_string(),
            "-i".to_string(),
            filter.expression(),
            "-Oz".to_string(),
            "-o".to_string(),
            out_vcf_gz.to_string_lossy().to_string(),
            calls_vcf_gz.to_string_lossy().to_string(),
        ]
    }

    pub fn index_args(vcf_gz: &Path) -> Vec<String> {
        vec![
            subcommand_tag(BcftoolsSubcommand::Index).to_string(),
            "-f".to_string(),
            vcf_gz.to_string_lossy().to_string(),
        ]
    }

    pub fn consensus_args(
        reference: &Path,
        filtered_vcf_gz: &Path,
        iupac: bool,
        out_fasta: &Path,
    ) -> Vec<String> {
        let mut args_vec = vec![
            subcommand_tag(BcftoolsSubcommand::Consensus).to_string(),
            "-f".to_string(),
            reference.to_string_lossy().to_string(),
        ];
        if iupac {
            args_vec.push("-I".to_string());
        }
        args_vec.push("-o".to_string());
        args_vec.push(out_fasta.to_string_lossy().to_string());
        args_vec.push(filtered_vcf_gz.to_string_lossy().to_string());
        args_vec
    }

    pub fn subcommand_tag(subcommand: BcftoolsSubcommand) -> &'static str {
        match subcommand {
            BcftoolsSubcommand::Mpileup => "mpileup",
            BcftoolsSubcommand::Call => "call",
            BcftoolsSubcommand::View => "view",
            BcftoolsSubcommand::Index => "index",
            BcftoolsSubcommand::Consensus => "consensus",
        }
    }
}

pub mod bedtools {
    use std::path::Path;
    use anyhow::{anyhow, Result};
    use crate::config::defs::BEDTOOLS_TAG;
    use crate::utils::process::run_tool;

    pub async fn presence_check() -> Result<String> {
        let args = vec!["--version".to_string()];
        let out = run_tool(BEDTOOLS_TAG, &args)
            .await
            .map_err(|e| anyhow!("{}. Is bedtools installed?", e))?;
        let first_line = out
            .stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("No output from bedtools --version"))?;
        let version = first_line
            .split_whitespace()
            .nth(1)
            .map(|v| v.trim_start_matches('v').to_string())
            .ok_or_else(|| anyhow!("Invalid bedtools --version output: {}", first_line))?;
        Ok(version)
    }

    pub fn maskfasta_args(fasta_in: &Path, bed: &Path, fasta_out: &Path) -> Vec<String> {
        vec![
            "maskfasta".to_string(),
            "-fi".to_string(),
            fasta_in.to_string_lossy().to_string(),
            "-bed".to_string(),
            bed.to_string_lossy().to_string(),
            "-fo".to_string(),
            fasta_out.to_string_lossy().to_string(),
        ]
    }
}

pub mod seqkit {
    use std::path::Path;
    use anyhow::{anyhow, Result};
    use crate::config::defs::SEQKIT_TAG;
    use crate::utils::process::run_tool;

    pub async fn presence_check() -> Result<String> {
        let args = vec!["version".to_string()];
        let out = run_tool(SEQKIT_TAG, &args)
            .await
            .map_err(|e| anyhow!("{}. Is seqkit installed?", e))?;
        let first_line = out
            .stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("No output from seqkit version"))?;
        let version = first_line
            .split_whitespace()
            .nth(1)
            .map(|v| v.trim_start_matches('v').to_string())
            .ok_or_else(|| anyhow!("Invalid seqkit version output: {}", first_line))?;
        Ok(version)
    }

    pub fn stats_args(fasta: &Path) -> Vec<String> {
        vec![
            "stats".to_string(),
            "-a".to_string(),
            "-T".to_string(),
            fasta.to_string_lossy().to_string(),
        ]
    }
}

mod kraken2 {
    use anyhow::{anyhow, Result};
    use crate::config::defs::KRAKEN2_TAG;
    use crate::utils::process::run_tool;

    pub async fn presence_check() -> Result<String> {
        let args = vec!["--version".to_string()];
        let out = run_tool(KRAKEN2_TAG, &args)
            .await
            .map_err(|e| anyhow!("{}. Is kraken2 installed?", e))?;
        let first_line = out
            .stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("No output from kraken2 --version"))?;
        let version = first_line
            .split_whitespace()
            .last()
            .ok_or_else(|| anyhow!("Invalid kraken2 --version output: {}", first_line))?
            .to_string();
        Ok(version)
    }
}

pub async fn check_version(tool: &str) -> Result<String> {
    let version = match tool {
        BOWTIE2_TAG => bowtie2::presence_check().await,
        SAMTOOLS_TAG => samtools::presence_check().await,
        BCFTOOLS_TAG => bcftools::presence_check().await,
        BEDTOOLS_TAG => bedtools::presence_check().await,
        SEQKIT_TAG => seqkit::presence_check().await,
        KRAKEN2_TAG => kraken2::presence_check().await,
        _ => return Err(anyhow!("Unknown tool: {}", tool)),
    };
    version
}

/// Leading major.minor of a version string, for comparison against the
/// static minimum table.
fn version_major_minor(version: &str) -> Option<f32> {
    let mut parts = version.split('.');
    let major = parts.next()?.trim().parse::<u32>().ok()?;
    let minor: String = parts
        .next()
        .unwrap_or("0")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    format!("{}.{}", major, minor).parse::<f32>().ok()
}

/// Probes the required toolchain once at startup. Any missing required tool
/// aborts the run before the first stage; versions below the minimum table
/// are logged as warnings only.
pub async fn require_tools() -> Result<(), PipelineError> {
    for tool in [BOWTIE2_TAG, SAMTOOLS_TAG, BCFTOOLS_TAG] {
        match check_version(tool).await {
            Ok(version) => {
                info!("Found {} {}", tool, version);
                if let (Some(found), Some(min)) =
                    (version_major_minor(&version), TOOL_VERSIONS.get(tool))
                {
                    if found < *min {
                        warn!("{} {} is older than the tested minimum {}", tool, version, min);
                    }
                }
            }
            Err(_) => return Err(PipelineError::ToolMissing(tool.to_string())),
        }
    }
    // bowtie2-build ships with bowtie2 but can be packaged separately
    let build_probe = vec!["--version".to_string()];
    crate::utils::process::run_tool(BOWTIE2_BUILD_TAG, &build_probe).await?;
    Ok(())
}

/// Probes the optional tools and records what was found. Absence is not an
/// error; the affected stages degrade per their documented fallback.
pub async fn probe_capabilities() -> Capabilities {
    let masking = check_version(BEDTOOLS_TAG).await.is_ok();
    let enhanced_stats = check_version(SEQKIT_TAG).await.is_ok();
    let contamination_screen = check_version(KRAKEN2_TAG).await.is_ok();

    if !masking {
        info!("bedtools not found; low-depth masking unavailable");
    }
    if !enhanced_stats {
        info!("seqkit not found; enhanced assembly statistics unavailable");
    }
    if !contamination_screen {
        info!("kraken2 not found; contamination screening unavailable");
    }

    Capabilities {
        enhanced_stats,
        masking,
        contamination_screen,
    }
}
