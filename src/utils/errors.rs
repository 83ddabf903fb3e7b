// Typed failure classes for the simulation pipeline. Everything is
// still threaded through anyhow, but callers (and tests) can downcast
// to these variants to tell a bad abundance table apart from a broken
// external tool.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    /// The abundance table summed to zero or less, so there is no way
    /// to normalize it.
    #[error("total genome abundance is {0}, which is impossible")]
    InvalidAbundance(f64),

    /// The amplicon manifest contained no amplicons for any genome.
    #[error("no genome contributed any amplicons, nothing to simulate")]
    EmptyGenomeSet,

    /// The external read generator exited nonzero. A missing
    /// amplicon's reads would silently corrupt the final totals, so
    /// this aborts the run.
    #[error("read generation failed for genome {genome}, amplicon {amplicon} ({command}): {stderr}")]
    ReadGenerationFailed {
        genome: String,
        amplicon: u32,
        command: String,
        stderr: String,
    },

    /// The shuffle stage failed. Whatever it wrote must not be
    /// promoted to the final output names.
    #[error("shuffle failed for {input} ({engine}): {detail}")]
    ShuffleFailed {
        input: PathBuf,
        engine: String,
        detail: String,
    },
}
