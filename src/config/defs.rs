use std::path::PathBuf;
use crate::cli::Arguments;
use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

// External software
pub const BOWTIE2_TAG: &str = "bowtie2";
pub const BOWTIE2_BUILD_TAG: &str = "bowtie2-build";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const BCFTOOLS_TAG: &str = "bcftools";
pub const BEDTOOLS_TAG: &str = "bedtools";
pub const SEQKIT_TAG: &str = "seqkit";
pub const KRAKEN2_TAG: &str = "kraken2";

lazy_static! {
    pub static ref TOOL_VERSIONS: HashMap<&'static str, f32> = {
        let mut m = HashMap::new();
        m.insert(BOWTIE2_TAG, 2.4);
        m.insert(SAMTOOLS_TAG, 1.20);
        m.insert(BCFTOOLS_TAG, 1.20);
        m.insert(BEDTOOLS_TAG, 2.30);
        m.insert(SEQKIT_TAG, 2.10);
        m.insert(KRAKEN2_TAG, 2.1);

        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    Sort,
    Index,
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BcftoolsSubcommand {
    Mpileup,
    Call,
    View,
    Index,
    Consensus,
}

// Static Parameters

/// Site quality floor applied to every called variant before the
/// configurable depth/allele-fraction terms.
pub const SITE_QUAL_MIN: f64 = 30.0;

pub const FASTA_EXTS: &[&'static str] = &["fasta", "fa", "fna"];

/// Optional external tools discovered at startup. Absence degrades the
/// affected stage rather than failing the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub enhanced_stats: bool,
    pub masking: bool,
    pub contamination_screen: bool,
}

pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub threads: usize,
    pub capabilities: Capabilities,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Required tool missing: {0}")]
    ToolMissing(String),

    #[error("{tool} exited with status {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
