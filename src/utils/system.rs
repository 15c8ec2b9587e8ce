// src/utils/system.rs: System functions

use sysinfo::System;

/// Determines the number of cores to hand to the external tools as their
/// thread hint. The orchestration layer itself stays single-threaded per
/// sample; this only caps what bowtie2/samtools are told to use.
///
/// # Arguments
///
/// * `args_threads` - Requested thread count from the command line.
///
/// # Returns
///
/// usize: requested threads capped at the physical core count.
pub fn detect_cores(args_threads: usize) -> usize {
    let physical_cores = System::physical_core_count().unwrap_or_else(num_cpus::get);
    physical_cores.min(args_threads).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_cores_bounds() {
        let cores = detect_cores(100_000);
        assert!(cores >= 1);
        assert!(cores <= 100_000);
    }

    #[test]
    fn test_detect_cores_floor() {
        assert_eq!(detect_cores(0), 1);
    }
}
