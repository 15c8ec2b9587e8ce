mod pipelines;
mod utils;
mod config;
mod cli;

use std::time::Instant;
use std::{env, fs};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::{error, info, LevelFilter};
use env_logger::Builder;

use crate::cli::parse;
use crate::config::defs::{PipelineError, RunConfig};
use crate::utils::command::probe_capabilities;
use crate::utils::system::detect_cores;
use pipelines::batch;
use pipelines::consensus_genome;

#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n MitoSeq\n-------------\n");

    let cwd = env::current_dir()?;
    info!("The current directory is {:?}", cwd);

    let threads = detect_cores(args.threads);
    info!("Thread hint for external tools: {}", threads);

    let capabilities = probe_capabilities().await;

    let out_dir = setup_output_dir(&args, &cwd)?;
    info!("Output directory: {}", out_dir.display());

    let module = args.module.clone();
    let run_config = Arc::new(RunConfig {
        cwd,
        out_dir,
        args,
        threads,
        capabilities,
    });

    if let Err(e) = match module.as_str() {
        "consensus_genome" => consensus_genome_run(run_config).await,
        "batch" => batch_run(run_config).await,
        _ => Err(PipelineError::InvalidConfig(format!(
            "Invalid module: {}",
            module
        ))),
    } {
        error!(
            "Pipeline failed: {} at {} milliseconds.",
            e,
            run_start.elapsed().as_millis()
        );
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}

async fn consensus_genome_run(run_config: Arc<RunConfig>) -> Result<(), PipelineError> {
    consensus_genome::run(run_config).await
}

async fn batch_run(run_config: Arc<RunConfig>) -> Result<(), PipelineError> {
    batch::run(run_config).await
}

/// Sets up the output directory.
/// If `out_dir` is specified from args, uses it; otherwise creates a
/// directory named `<prefix>_YYYYMMDD` (or `batch_YYYYMMDD` for the batch
/// module) in the current working directory. Ensures the directory exists
/// and is writable.
fn setup_output_dir(args: &cli::args::Arguments, cwd: &PathBuf) -> Result<PathBuf> {
    let out_dir = match &args.out_dir {
        Some(out) => {
            let path = PathBuf::from(out);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        }
        None => {
            let dir_base = match args.module.as_str() {
                "batch" => "batch".to_string(),
                _ => args.prefix.clone().unwrap_or_else(|| "sample".to_string()),
            };
            let timestamp = chrono::Local::now().format("%Y%m%d").to_string();
            cwd.join(format!("{}_{}", dir_base, timestamp))
        }
    };
    fs::create_dir_all(&out_dir)?;
    Ok(out_dir)
}
