// Machine-readable run report, the JSON counterpart of the run log.

use super::allocation::AllocationRecord;
use super::file_tools::open_file;
use anyhow::Result;
use chrono::Local;
use log::info;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started: String,
    pub finished: String,
    pub rng_seed: Option<String>,
    pub total_read_budget: u64,
    pub allocated_reads: u64,
    pub n_genomes: usize,
    pub n_amplicons: usize,
    pub output_mate1: String,
    pub output_mate2: String,
}

impl RunReport {
    pub fn new(
        started: String,
        rng_seed: Option<String>,
        total_read_budget: u64,
        records: &[AllocationRecord],
        output_mate1: &Path,
        output_mate2: &Path,
    ) -> Self {
        let genomes: HashSet<&str> = records
            .iter()
            .map(|r| r.amplicon.genome.as_str())
            .collect();
        RunReport {
            started,
            finished: now_stamp(),
            rng_seed,
            total_read_budget,
            allocated_reads: records.iter().map(|r| r.n_reads).sum(),
            n_genomes: genomes.len(),
            n_amplicons: records.len(),
            output_mate1: output_mate1.display().to_string(),
            output_mate2: output_mate2.display().to_string(),
        }
    }
}

pub fn now_stamp() -> String {
    Local::now().to_rfc3339()
}

pub fn write_run_report(report: &RunReport, overwrite_output: bool, path: &Path) -> Result<()> {
    info!("Writing run report: {}", path.display());
    let outfile = open_file(path, overwrite_output)?;
    serde_json::to_writer_pretty(outfile, report)?;
    Ok(())
}
