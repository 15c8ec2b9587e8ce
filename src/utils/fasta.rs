use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{anyhow, Result};
use flate2::read::MultiGzDecoder;
use seq_io::fasta::{Reader as FastaReader, Record};

use crate::utils::file::is_gzipped;

/// Opens a FASTA file, transparently decompressing gzip.
pub fn fasta_reader(path: &Path) -> Result<FastaReader<Box<dyn Read>>> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Cannot open FASTA {}: {}", path.display(), e))?;
    let reader: Box<dyn Read> = if is_gzipped(path).unwrap_or(false) {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(FastaReader::new(reader))
}

/// Reads the first record of a FASTA file.
///
/// # Arguments
///
/// * `path` - FASTA path, plain or gzipped.
///
/// # Returns
///
/// (id, sequence) of the first record.
pub fn read_first_record(path: &Path) -> Result<(String, Vec<u8>)> {
    let mut reader = fasta_reader(path)?;
    let record = reader
        .records()
        .next()
        .ok_or_else(|| anyhow!("No FASTA records in {}", path.display()))?
        .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))?;
    let id = record
        .id()
        .map_err(|e| anyhow!("Invalid FASTA header in {}: {}", path.display(), e))?
        .to_string();
    Ok((id, record.seq))
}

/// Aggregate composition of a consensus sequence. GC percent is computed
/// against the unambiguous length (total minus N) so masked regions do not
/// drag the value down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblyStats {
    pub length: usize,
    pub n_count: usize,
    pub n_percent: f64,
    pub gc_percent: f64,
    pub at_percent: f64,
}

pub fn assembly_stats(seq: &[u8]) -> AssemblyStats {
    let mut length = 0usize;
    let mut n_count = 0usize;
    let mut gc = 0usize;
    let mut at = 0usize;

    for &base in seq {
        match base {
            b'-' => continue, // gap characters do not count toward length
            b'N' | b'n' => {
                length += 1;
                n_count += 1;
            }
            b'G' | b'g' | b'C' | b'c' => {
                length += 1;
                gc += 1;
            }
            b'A' | b'a' | b'T' | b't' => {
                length += 1;
                at += 1;
            }
            _ => length += 1, // IUPAC ambiguity codes other than N
        }
    }

    let n_percent = if length > 0 {
        n_count as f64 / length as f64 * 100.0
    } else {
        0.0
    };
    let unambiguous = length - n_count;
    let (gc_percent, at_percent) = if unambiguous > 0 {
        (
            gc as f64 / unambiguous as f64 * 100.0,
            at as f64 / unambiguous as f64 * 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    AssemblyStats {
        length,
        n_count,
        n_percent,
        gc_percent,
        at_percent,
    }
}

/// Rewrites the first header line of a FASTA file to `>{sample}`,
/// preserving everything else byte for byte.
pub fn rewrite_header(input: &Path, sample: &str, output: &Path) -> Result<()> {
    let reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);

    let mut rewritten = false;
    for line in reader.lines() {
        let line = line?;
        if !rewritten && line.starts_with('>') {
            writeln!(writer, ">{}", sample)?;
            rewritten = true;
        } else {
            writeln!(writer, "{}", line)?;
        }
    }
    if !rewritten {
        return Err(anyhow!("No FASTA header found in {}", input.display()));
    }
    writer.flush()?;
    Ok(())
}

/// Length of the sequence body of a FASTA file (non-header bytes, line
/// terminators excluded).
pub fn consensus_length(path: &Path) -> Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut length = 0usize;
    for line in reader.lines() {
        let line = line?;
        if !line.starts_with('>') {
            length += line.trim_end().len();
        }
    }
    Ok(length)
}
