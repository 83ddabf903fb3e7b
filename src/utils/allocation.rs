// The hierarchical read allocator. Reads are assigned in two levels:
// each genome takes a Multinomial share of the total budget weighted
// by its abundance, then each genome's share is split across its
// amplicons by a Dirichlet-Multinomial draw. All genome-level draws
// are computed once and memoized by genome name before any amplicon
// record is assembled; re-sampling per amplicon would break the
// "amplicon counts sum to the genome count" invariant.

use super::amplicon::{Amplicon, group_by_genome};
use super::distributions::{Dirichlet, Multinomial};
use super::errors::SimError;
use super::file_tools::{open_file, read_lines};
use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use rand::Rng;
use rand_distr::Distribution;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// Per-amplicon Dirichlet concentration weights.
#[derive(Debug, Clone)]
pub enum AmpliconWeights {
    /// Every amplicon gets the same concentration (the DIRICHLET_1
    /// mode): alpha = pseudocount.
    Uniform,
    /// Concentrations scaled by a per-amplicon-number weight table:
    /// alpha = pseudocount * weight. Amplicon numbers absent from the
    /// table default to weight 1.0; alt amplicons share their
    /// number's weight.
    Table(HashMap<u32, f64>),
}

impl AmpliconWeights {
    /// Loads a weight table from a tab-separated file
    /// (`amplicon_number<TAB>weight`, no header).
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut weights = HashMap::new();
        for (line_number, line) in read_lines(path)
            .with_context(|| format!("Could not open distribution file {}", path.display()))?
            .enumerate()
        {
            let l = line?;
            if l.trim().is_empty() {
                continue;
            }
            let (number, weight) = l.split_once('\t').ok_or_else(|| {
                anyhow!(
                    "Line {} of {} is not tab-separated",
                    line_number + 1,
                    path.display()
                )
            })?;
            let number: u32 = number.trim().parse()?;
            let weight: f64 = weight.trim().parse()?;
            if !weight.is_finite() || weight <= 0.0 {
                return Err(anyhow!(
                    "Weight for amplicon {} must be positive, got {}",
                    number,
                    weight
                ));
            }
            weights.insert(number, weight);
        }
        Ok(AmpliconWeights::Table(weights))
    }

    /// The Dirichlet concentration for one amplicon. A pure function
    /// of the static inputs.
    pub fn hyperparameter(&self, pseudocount: f64, amplicon_number: u32) -> f64 {
        match self {
            AmpliconWeights::Uniform => pseudocount,
            AmpliconWeights::Table(weights) => {
                pseudocount * weights.get(&amplicon_number).copied().unwrap_or(1.0)
            }
        }
    }
}

/// One fully sampled allocation row, assembled after all four stages
/// have run for the amplicon's genome.
#[derive(Debug, Clone)]
pub struct AllocationRecord {
    pub amplicon: Amplicon,
    pub total_n_reads: u64,
    pub abundance: f64,
    pub genome_n_reads: u64,
    pub hyperparameter: f64,
    pub amplicon_prob: f64,
    pub n_reads: u64,
}

/// Runs the four sampling stages and returns one record per amplicon,
/// ordered by the genome order and by (amplicon number, alt flag)
/// within each genome.
pub fn allocate<R: Rng>(
    amplicons: &[Amplicon],
    abundances: &HashMap<String, f64>,
    genome_order: &[String],
    weights: &AmpliconWeights,
    pseudocount: f64,
    total_reads: u64,
    rng: &mut R,
) -> Result<Vec<AllocationRecord>> {
    let by_genome = group_by_genome(amplicons);
    if by_genome.values().all(|g| g.is_empty()) || amplicons.is_empty() {
        return Err(SimError::EmptyGenomeSet.into());
    }
    for genome in by_genome.keys() {
        if !abundances.contains_key(genome) {
            return Err(anyhow!(
                "Genome {:?} appears in the manifest but not in the abundance table",
                genome
            ));
        }
    }

    // Stage 2: one multinomial draw across all genomes, memoized by
    // genome name. Genomes without amplicons stay in the draw and
    // forfeit their share below, so the realized total can undershoot
    // the budget but never exceed it.
    let genome_probs: Vec<f64> = genome_order.iter().map(|g| abundances[g]).collect();
    let genome_draw = Multinomial::new(total_reads, genome_probs)?.sample(rng);
    let mut genome_reads: HashMap<String, u64> = HashMap::new();
    for (genome, &count) in genome_order.iter().zip(genome_draw.iter()) {
        genome_reads.insert(genome.clone(), count);
    }

    // Stages 1, 3 and 4, per genome, memoized before any record is
    // assembled.
    let mut hyperparameters: HashMap<String, Vec<f64>> = HashMap::new();
    let mut amplicon_probs: HashMap<String, Vec<f64>> = HashMap::new();
    let mut amplicon_reads: HashMap<String, Vec<u64>> = HashMap::new();

    for genome in genome_order {
        let group = match by_genome.get(genome) {
            Some(group) if !group.is_empty() => group,
            _ => {
                let forfeited = genome_reads.get(genome).copied().unwrap_or(0);
                warn!(
                    "Genome {:?} has no amplicons; forfeiting its {} reads",
                    genome, forfeited
                );
                continue;
            }
        };

        // Stage 1: hyperparameters, pure and memo-free.
        let alphas: Vec<f64> = group
            .iter()
            .map(|a| weights.hyperparameter(pseudocount, a.number))
            .collect();

        // Stage 3: one Dirichlet draw per genome over its amplicons.
        let probs = Dirichlet::new(alphas.clone())?.sample(rng);

        // Stage 4: one multinomial split of the genome's share.
        let counts = Multinomial::new(genome_reads[genome], probs.clone())?.sample(rng);

        hyperparameters.insert(genome.clone(), alphas);
        amplicon_probs.insert(genome.clone(), probs);
        amplicon_reads.insert(genome.clone(), counts);
    }

    // Broadcast the memoized draws to per-amplicon records.
    let mut records = Vec::with_capacity(amplicons.len());
    for genome in genome_order {
        let Some(group) = by_genome.get(genome) else {
            continue;
        };
        let Some(alphas) = hyperparameters.get(genome) else {
            continue;
        };
        for (i, amplicon) in group.iter().enumerate() {
            records.push(AllocationRecord {
                amplicon: amplicon.clone(),
                total_n_reads: total_reads,
                abundance: abundances[genome],
                genome_n_reads: genome_reads[genome],
                hyperparameter: alphas[i],
                amplicon_prob: amplicon_probs[genome][i],
                n_reads: amplicon_reads[genome][i],
            });
        }
    }

    let realized: u64 = records.iter().map(|r| r.n_reads).sum();
    info!(
        "Total number of reads was {}, when {} was expected.",
        realized, total_reads
    );
    Ok(records)
}

/// Writes the per-amplicon allocation summary table.
pub fn write_summary(
    records: &[AllocationRecord],
    overwrite_output: bool,
    path: &Path,
) -> Result<()> {
    info!("Writing allocation summary: {}", path.display());
    let mut outfile = open_file(path, overwrite_output)?;
    writeln!(
        outfile,
        "ref\tamplicon_number\tis_alt\ttotal_n_reads\tabundance\tgenome_n_reads\thyperparameter\tamplicon_prob\tn_reads"
    )?;
    for record in records {
        writeln!(
            outfile,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            record.amplicon.genome,
            record.amplicon.number,
            record.amplicon.is_alt,
            record.total_n_reads,
            record.abundance,
            record.genome_n_reads,
            record.hyperparameter,
            record.amplicon_prob,
            record.n_reads,
        )?;
    }
    Ok(())
}
