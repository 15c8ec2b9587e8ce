use std::fs::File;
use std::io;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    file.read_exact(&mut buffer)?;
    Ok(buffer == [0x1F, 0x8B]) // Gzip magic bytes
}

/// Builds `<out_dir>/<prefix>.<suffix>` for the per-sample artifact files.
pub fn prefixed_path(out_dir: &Path, prefix: &str, suffix: &str) -> PathBuf {
    out_dir.join(format!("{}.{}", prefix, suffix))
}

pub fn write_fasta_record(
    file: &mut File,
    id: &str,
    desc: Option<&str>,
    seq: &[u8],
) -> io::Result<()> {
    if let Some(desc) = desc {
        writeln!(file, ">{} {}", id, desc)?;
    } else {
        writeln!(file, ">{}", id)?;
    }
    file.write_all(seq)?;
    writeln!(file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_path() {
        let p = prefixed_path(Path::new("/tmp/out"), "sampleA", "sorted.bam");
        assert_eq!(p, PathBuf::from("/tmp/out/sampleA.sorted.bam"));
    }

    #[test]
    fn test_is_gzipped() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let gz = dir.path().join("x.gz");
        std::fs::write(&gz, [0x1F, 0x8B, 0x08, 0x00])?;
        assert!(is_gzipped(&gz)?);

        let plain = dir.path().join("x.fa");
        std::fs::write(&plain, b">ref\nACGT\n")?;
        assert!(!is_gzipped(&plain)?);
        Ok(())
    }
}
