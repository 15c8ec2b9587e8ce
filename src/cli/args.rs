use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, ValueEnum, Default, PartialEq)]
pub enum Sensitivity {
    Fast,
    Sensitive,
    VerySensitive,
    #[default]
    VerySensitiveLocal,
}

impl Sensitivity {
    /// The bowtie2 preset flag for this sensitivity level.
    pub fn as_flag(&self) -> &'static str {
        match self {
            Sensitivity::Fast => "--fast",
            Sensitivity::Sensitive => "--sensitive",
            Sensitivity::VerySensitive => "--very-sensitive",
            Sensitivity::VerySensitiveLocal => "--very-sensitive-local",
        }
    }
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "mitoseq-pipelines", version)]
pub struct Arguments {
    #[arg(short, long, help = "Pipeline module to run: consensus_genome or batch")]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(long = "r1", help = "Forward (R1) reads, FASTQ or FASTQ.gz")]
    pub r1: Option<String>,

    #[arg(long = "r2", help = "Reverse (R2) reads, FASTQ or FASTQ.gz")]
    pub r2: Option<String>,

    #[arg(short = 'r', long = "ref", help = "Reference mitochondrial genome, FASTA")]
    pub reference: Option<String>,

    #[arg(short = 'p', long = "prefix", help = "Sample identifier; becomes the consensus FASTA header and output file prefix")]
    pub prefix: Option<String>,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files. If not specified, a directory named '<prefix>_YYYYMMDD' will be created in the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(short = 't', long, default_value_t = 4)]
    pub threads: usize,

    #[arg(long = "sensitivity", default_value = "very-sensitive-local", value_enum)]
    pub sensitivity: Sensitivity,

    #[arg(long, default_value_t = 30, help = "Minimum mapping quality for pileup")]
    pub min_mapq: u8,

    #[arg(long, default_value_t = 20, help = "Minimum base quality for pileup")]
    pub min_baseq: u8,

    #[arg(long, default_value_t = 10, help = "Minimum depth for variant retention and low-depth masking")]
    pub min_depth: usize,

    #[arg(long, default_value_t = 0.9, help = "Minimum alternate allele fraction for variant retention")]
    pub min_af: f64,

    #[arg(long, default_value_t = false, help = "Render heterozygous-style calls as IUPAC ambiguity codes instead of the first allele")]
    pub iupac: bool,

    #[arg(long, default_value_t = true, help = "Mask consensus positions below --min-depth with N", action = clap::ArgAction::Set)]
    pub mask_low_depth: bool,

    #[arg(long, default_value_t = 10.0, help = "Minimum average depth for the coverage gate")]
    pub min_coverage: f64,

    #[arg(long, default_value_t = 0.95, help = "Minimum fraction of reference positions at >= --min-depth for the breadth gate")]
    pub min_breadth: f64,

    #[arg(long, default_value_t = 10.0, help = "Maximum percent of ambiguous (N) bases in the consensus")]
    pub max_n_percent: f64,

    #[arg(long, default_value_t = 15000, help = "Minimum expected assembly length (bp)")]
    pub size_min: usize,

    #[arg(long, default_value_t = 18000, help = "Maximum expected assembly length (bp)")]
    pub size_max: usize,

    // Batch module
    #[arg(long = "sample-list", help = "Tab-separated manifest: sample, R1, R2, reference file name")]
    pub sample_list: Option<String>,

    #[arg(long = "ref-dir", help = "Directory holding the reference FASTA files named in the manifest")]
    pub ref_dir: Option<String>,

    #[arg(short = 'j', long, default_value_t = 4, help = "Parallel sample slots for the batch module")]
    pub jobs: usize,
}

impl Arguments {
    /// Eager well-formedness check of the threshold set. The gates never
    /// catch a malformed configuration on their own, so reject it up front.
    pub fn validate_thresholds(&self) -> Result<(), String> {
        if self.size_min > self.size_max {
            return Err(format!(
                "--size-min ({}) must not exceed --size-max ({})",
                self.size_min, self.size_max
            ));
        }
        if !(0.0..=1.0).contains(&self.min_af) {
            return Err(format!("--min-af must be in [0, 1], got {}", self.min_af));
        }
        if !(0.0..=1.0).contains(&self.min_breadth) {
            return Err(format!("--min-breadth must be in [0, 1], got {}", self.min_breadth));
        }
        if !(0.0..=100.0).contains(&self.max_n_percent) {
            return Err(format!("--max-n-percent must be in [0, 100], got {}", self.max_n_percent));
        }
        if self.min_coverage < 0.0 {
            return Err(format!("--min-coverage must be >= 0, got {}", self.min_coverage));
        }
        if self.jobs == 0 {
            return Err("--jobs must be >= 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitivity_flags() {
        assert_eq!(Sensitivity::Fast.as_flag(), "--fast");
        assert_eq!(Sensitivity::VerySensitiveLocal.as_flag(), "--very-sensitive-local");
    }

    #[test]
    fn test_threshold_validation() {
        let mut args = Arguments::default();
        args.jobs = 1;
        args.size_min = 15000;
        args.size_max = 18000;
        args.min_af = 0.9;
        args.min_breadth = 0.95;
        args.max_n_percent = 10.0;
        args.min_coverage = 10.0;
        assert!(args.validate_thresholds().is_ok());

        args.size_min = 20000;
        assert!(args.validate_thresholds().is_err());
        args.size_min = 15000;

        args.min_af = 1.2;
        assert!(args.validate_thresholds().is_err());
        args.min_af = 0.9;

        args.min_breadth = -0.1;
        assert!(args.validate_thresholds().is_err());
        args.min_breadth = 0.95;

        args.max_n_percent = 101.0;
        assert!(args.validate_thresholds().is_err());
    }
}
