use super::abundance::read_abundances;
use super::allocation::{AmpliconWeights, allocate, write_summary};
use super::amplicon::{read_manifest, validate_templates};
use super::config::{DistributionMode, RunConfiguration, ShuffleEngine};
use super::generator::{ReadSimulator, SimJob};
use super::report::{RunReport, now_stamp, write_run_report};
use super::shuffle::{CoreutilsShuffler, InProcessShuffler, Shuffler, merge_and_shuffle};
use super::workspace::ScopedTempWorkspace;
use anyhow::{Result, anyhow};
use log::info;
use rand::Rng;
use std::collections::HashSet;

/// The main function that runs the simulation. Normalizes the
/// mixture, allocates the read budget across amplicons, drives the
/// external generator, and merges everything into one shuffled
/// paired-end fastq pair.
///
/// # Arguments
///
/// * `config` - The configuration for the run
/// * `rng` - The random number generator to use
///
/// # Returns
///
/// * `Result<()>` - A result that will be Ok(()) if the run was
///   successful
pub fn run_simulation<R: Rng>(config: RunConfiguration, rng: &mut R) -> Result<()> {
    let started = now_stamp();
    let (out_mate1, out_mate2) = config.final_mate_paths();
    if !config.overwrite_output && (out_mate1.exists() || out_mate2.exists()) {
        return Err(anyhow!(
            "Output files already exist (use overwrite_output): {}",
            out_mate1.display()
        ));
    }

    // Read and normalize the genome abundance table.
    info!(
        "Reading genome abundances: {}",
        config.genome_abundances.display()
    );
    let (abundances, genome_order) = read_abundances(&config.genome_abundances)?;

    // Load the amplicon manifest and make sure every template is a
    // usable fasta before spending any time on generation.
    let amplicons = read_manifest(&config.amplicons_manifest)?;
    info!(
        "Loaded {} amplicons across {} genomes",
        amplicons.len(),
        genome_order.len()
    );
    validate_templates(&amplicons)?;

    let mut short_names: HashSet<String> = HashSet::new();
    for amplicon in &amplicons {
        if !short_names.insert(amplicon.short_name()) {
            return Err(anyhow!(
                "Template name {:?} is not unique, generator outputs would collide",
                amplicon.short_name()
            ));
        }
    }

    let weights = match config.amplicon_distribution {
        DistributionMode::Dirichlet1 => AmpliconWeights::Uniform,
        DistributionMode::File => {
            let path = config
                .amplicon_distribution_file
                .as_ref()
                .ok_or_else(|| anyhow!("Distribution mode FILE needs a distribution file"))?;
            AmpliconWeights::from_file(path)?
        }
    };

    // Pick total numbers of reads for each amplicon.
    info!("Allocating {} reads across the mixture", config.n_reads);
    let records = allocate(
        &amplicons,
        &abundances,
        &genome_order,
        &weights,
        config.amplicon_pseudocounts,
        config.n_reads,
        rng,
    )?;
    write_summary(&records, config.overwrite_output, &config.summary_path())?;

    // Generate reads, cycling through all genomes and amplicons. The
    // workspace owns every temp file from here on and removes them on
    // all exit paths.
    let workspace = ScopedTempWorkspace::new(&config.temp_dir, config.keep_temp)?;
    let jobs: Vec<SimJob> = records
        .iter()
        .map(|record| SimJob {
            genome: record.amplicon.genome.clone(),
            amplicon_number: record.amplicon.number,
            short_name: record.amplicon.short_name(),
            template: record.amplicon.path.clone(),
            n_reads: record.n_reads,
            out_prefix: workspace.amplicon_prefix(&record.amplicon.short_name()),
        })
        .collect();
    let simulator = ReadSimulator {
        executable: config.art_executable.clone(),
        seq_sys: config.seq_sys,
        read_len: config.read_len,
        verbose: config.verbose,
        max_parallel: config.max_parallel_sims,
    };
    simulator.run(&jobs, rng)?;

    // Merge the per-amplicon outputs and shuffle both mates with the
    // same key.
    let shuffler: Box<dyn Shuffler> = match config.shuffle_engine {
        ShuffleEngine::Coreutils => Box::new(CoreutilsShuffler),
        ShuffleEngine::InProcess => Box::new(InProcessShuffler),
    };
    merge_and_shuffle(
        &workspace,
        shuffler.as_ref(),
        config.n_reads,
        config.gzip_output,
        &out_mate1,
        &out_mate2,
        rng,
    )?;

    let report = RunReport::new(
        started,
        config.rng_seed.clone(),
        config.n_reads,
        &records,
        &out_mate1,
        &out_mate2,
    );
    write_run_report(&report, config.overwrite_output, &config.run_info_path())?;
    info!("Processing complete");
    Ok(())
}
