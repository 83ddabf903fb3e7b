// Orchestration of the external paired-end read generator
// (art_illumina). Each amplicon gets one invocation with its own
// pre-drawn seed and its own unique output prefix inside the temp
// workspace, so invocations are independent and can run on a bounded
// worker pool without sharing any state.

use super::config::SeqSystem;
use super::errors::SimError;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use rand::Rng;
use rayon::prelude::*;
use std::path::PathBuf;
use std::process::Command;

// art_illumina is run with fixed quality bounds; the merge stage
// depends on '&' never appearing in quality strings, which minQ 30
// guarantees.
const MIN_QUALITY: &str = "30";
const MAX_QUALITY: &str = "30";

// The one stderr notice art always emits under --noALN. Matched as a
// case-insensitive fragment rather than byte-exact text.
const BENIGN_STDERR_FRAGMENT: &str = "not output any aln or sam";

/// One generator invocation: an amplicon template and its allocated
/// read count.
#[derive(Debug, Clone)]
pub struct SimJob {
    pub genome: String,
    pub amplicon_number: u32,
    pub short_name: String,
    pub template: PathBuf,
    pub n_reads: u64,
    pub out_prefix: PathBuf,
}

/// Captured output of one finished invocation, logged after the
/// parallel section so messages come out in job order.
#[derive(Debug)]
struct SimDiagnostics {
    short_name: String,
    stdout_tail: Vec<String>,
    unexpected_stderr: Option<String>,
}

pub struct ReadSimulator {
    pub executable: String,
    pub seq_sys: SeqSystem,
    pub read_len: usize,
    pub verbose: bool,
    pub max_parallel: usize,
}

/// Draws one 63-bit generator seed from the process RNG.
pub fn draw_seed<R: Rng>(rng: &mut R) -> u64 {
    rng.random_range(0..(1u64 << 63))
}

/// Splits stderr into benign noise and content worth surfacing.
fn classify_stderr(stderr: &str) -> Option<String> {
    let unexpected: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.to_ascii_lowercase().contains(BENIGN_STDERR_FRAGMENT))
        .collect();
    if unexpected.is_empty() {
        None
    } else {
        Some(unexpected.join("; "))
    }
}

/// The last two non-empty stdout lines, which is where art puts its
/// per-run read counts.
fn stdout_tail(stdout: &str) -> Vec<String> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines
        .iter()
        .rev()
        .take(2)
        .rev()
        .map(|l| l.to_string())
        .collect()
}

impl ReadSimulator {
    /// Runs the generator once per job with a read count above zero.
    /// Seeds are drawn sequentially before dispatch, so the seed
    /// stream does not depend on worker scheduling.
    pub fn run<R: Rng>(&self, jobs: &[SimJob], rng: &mut R) -> Result<()> {
        let mut active: Vec<(&SimJob, u64)> = Vec::new();
        for job in jobs {
            if job.n_reads == 0 {
                debug!(
                    "Skipping {} (genome {}): zero reads allocated",
                    job.short_name, job.genome
                );
                continue;
            }
            active.push((job, draw_seed(rng)));
        }
        info!(
            "Generating reads with {} for {} amplicons ({} workers)",
            self.executable,
            active.len(),
            self.max_parallel
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_parallel)
            .build()?;
        let diagnostics: Vec<SimDiagnostics> = pool.install(|| {
            active
                .par_iter()
                .map(|(job, seed)| self.run_once(job, *seed))
                .collect::<Result<Vec<_>>>()
        })?;

        for diag in diagnostics {
            if self.verbose {
                for line in &diag.stdout_tail {
                    info!("{}: {}", self.executable, line);
                }
            }
            if let Some(stderr) = diag.unexpected_stderr {
                warn!("{} ({}): {}", self.executable, diag.short_name, stderr);
            }
        }
        Ok(())
    }

    fn run_once(&self, job: &SimJob, seed: u64) -> Result<SimDiagnostics> {
        if self.verbose {
            info!(
                "Starting on {} with {} reads (seed {})",
                job.short_name, job.n_reads, seed
            );
        }
        let output = Command::new(&self.executable)
            .arg("--amplicon")
            .arg("--paired")
            .arg("--rndSeed")
            .arg(seed.to_string())
            .arg("--noALN")
            .arg("--maskN")
            .arg("0")
            .arg("--seqSys")
            .arg(self.seq_sys.to_string())
            .arg("--in")
            .arg(&job.template)
            .arg("--len")
            .arg(self.read_len.to_string())
            .arg("--rcount")
            .arg(job.n_reads.to_string())
            .arg("--out")
            .arg(&job.out_prefix)
            .arg("--minQ")
            .arg(MIN_QUALITY)
            .arg("--maxQ")
            .arg(MAX_QUALITY)
            .output()
            .with_context(|| format!("Could not launch {}", self.executable))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(SimError::ReadGenerationFailed {
                genome: job.genome.clone(),
                amplicon: job.amplicon_number,
                command: self.executable.clone(),
                stderr: stderr.trim().to_string(),
            }
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(SimDiagnostics {
            short_name: job.short_name.clone(),
            stdout_tail: stdout_tail(&stdout),
            unexpected_stderr: classify_stderr(&stderr),
        })
    }
}
