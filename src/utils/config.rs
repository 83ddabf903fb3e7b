// This is the run configuration for this particular run, which holds
// the parameters needed by the pipeline stages. It is built with a
// ConfigBuilder, which layers defaults, an optional yaml config file,
// and command line arguments into one immutable configuration that is
// passed into the runner.

use super::file_tools::check_create_dir;
use anyhow::{Result, anyhow};
use clap::Parser;
use log::{LevelFilter, info, warn};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{env, fs};
use strum_macros::{Display, EnumString};

/// Sequencing-system profiles understood by art_illumina.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum SeqSystem {
    GA1,
    GA2,
    HS10,
    HS20,
    HS25,
    HSXn,
    HSXt,
    MinS,
    MSv1,
    MSv3,
    NS50,
}

/// How per-amplicon Dirichlet concentrations are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum DistributionMode {
    #[strum(serialize = "DIRICHLET_1")]
    Dirichlet1,
    #[strum(serialize = "FILE")]
    File,
}

/// Which shuffle implementation reorders the merged output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum ShuffleEngine {
    #[strum(serialize = "coreutils")]
    Coreutils,
    #[strum(serialize = "in-process")]
    InProcess,
}

/// Command line arguments. Everything here is optional; unset values
/// fall through to the yaml config file (if given) and then to the
/// built-in defaults.
#[derive(Parser, Debug)]
#[command(
    name = "amplimix",
    about = "Simulates paired-end sequencing of a tiled-amplicon viral mixture",
    version
)]
pub struct Args {
    /// Yaml configuration file; command line options override it
    #[arg(long, short = 'f')]
    pub config_file: Option<PathBuf>,

    /// TSV of genome abundances (genome<TAB>weight, no header)
    #[arg(long, short = 'a')]
    pub genome_abundances: Option<PathBuf>,

    /// TSV manifest of amplicon templates
    /// (genome<TAB>number<TAB>is_alt<TAB>path, no header)
    #[arg(long, short = 'm')]
    pub amplicons_manifest: Option<PathBuf>,

    /// Folder where the output fastq files will be stored
    #[arg(long, short = 'o')]
    pub output_dir: Option<PathBuf>,

    /// Name prefix of the output files
    #[arg(long, short = 'x')]
    pub output_prefix: Option<String>,

    /// Approximate number of reads in the output (subject to sampling
    /// stochasticity)
    #[arg(long, short = 'n')]
    pub n_reads: Option<u64>,

    /// Length of reads taken from the sequencing machine
    #[arg(long, short = 'l')]
    pub read_length: Option<usize>,

    /// Name of the sequencing system, as understood by art_illumina
    #[arg(long)]
    pub seq_sys: Option<String>,

    /// Pseudocount strength for the amplicon Dirichlet draw
    #[arg(long, short = 'c')]
    pub amplicon_pseudocounts: Option<f64>,

    /// Amplicon distribution mode: DIRICHLET_1 or FILE
    #[arg(long)]
    pub amplicon_distribution: Option<String>,

    /// TSV of per-amplicon-number weights, required in FILE mode
    #[arg(long)]
    pub amplicon_distribution_file: Option<PathBuf>,

    /// Shuffle implementation: coreutils or in-process
    #[arg(long)]
    pub shuffle_engine: Option<String>,

    /// Read generator executable to invoke
    #[arg(long)]
    pub art_executable: Option<String>,

    /// Worker pool bound for generator invocations
    #[arg(long)]
    pub max_parallel_sims: Option<usize>,

    /// Directory for temporary files (defaults to the output folder)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Keep temporary files after the run instead of removing them
    #[arg(long)]
    pub keep_temp: bool,

    /// Gzip the final fastq pair
    #[arg(long)]
    pub gzip_output: bool,

    /// Overwrite existing output files instead of failing
    #[arg(long)]
    pub overwrite_output: bool,

    /// Seed string; reuse it to regenerate the exact same run
    #[arg(long, short = 's')]
    pub rng_seed: Option<String>,

    /// Suppress per-amplicon progress output
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Log level for terminal and file logging
    #[arg(long, default_value = "Info")]
    pub log_level: LevelFilter,

    /// Also write the log to this file
    #[arg(long)]
    pub log_dest: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            config_file: None,
            genome_abundances: None,
            amplicons_manifest: None,
            output_dir: None,
            output_prefix: None,
            n_reads: None,
            read_length: None,
            seq_sys: None,
            amplicon_pseudocounts: None,
            amplicon_distribution: None,
            amplicon_distribution_file: None,
            shuffle_engine: None,
            art_executable: None,
            max_parallel_sims: None,
            temp_dir: None,
            keep_temp: false,
            gzip_output: false,
            overwrite_output: false,
            rng_seed: None,
            quiet: false,
            log_level: LevelFilter::Info,
            log_dest: None,
        }
    }
}

#[derive(Debug)]
pub struct RunConfiguration {
    pub genome_abundances: PathBuf,
    pub amplicons_manifest: PathBuf,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    pub n_reads: u64,
    pub read_len: usize,
    pub seq_sys: SeqSystem,
    pub amplicon_pseudocounts: f64,
    pub amplicon_distribution: DistributionMode,
    pub amplicon_distribution_file: Option<PathBuf>,
    pub shuffle_engine: ShuffleEngine,
    pub art_executable: String,
    pub max_parallel_sims: usize,
    pub temp_dir: PathBuf,
    pub keep_temp: bool,
    pub gzip_output: bool,
    pub overwrite_output: bool,
    pub verbose: bool,
    pub rng_seed: Option<String>,
}

impl RunConfiguration {
    fn file_prefix(&self) -> String {
        format!("{}/{}", self.output_dir.display(), self.output_prefix)
    }

    /// Final fastq pair, gz-suffixed when compression is on.
    pub fn final_mate_paths(&self) -> (PathBuf, PathBuf) {
        let ext = if self.gzip_output { ".fastq.gz" } else { ".fastq" };
        (
            PathBuf::from(format!("{}_R1{}", self.file_prefix(), ext)),
            PathBuf::from(format!("{}_R2{}", self.file_prefix(), ext)),
        )
    }

    pub fn summary_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "{}_amplicon_abundances_summary.tsv",
            self.file_prefix()
        ))
    }

    pub fn run_info_path(&self) -> PathBuf {
        PathBuf::from(format!("{}_run_info.json", self.file_prefix()))
    }
}

// The config builder allows us to construct a config in multiple
// different ways, depending on the input.
pub struct ConfigBuilder {
    genome_abundances: Option<PathBuf>,
    amplicons_manifest: Option<PathBuf>,
    output_dir: PathBuf,
    output_prefix: String,
    n_reads: u64,
    read_len: usize,
    seq_sys: SeqSystem,
    amplicon_pseudocounts: f64,
    amplicon_distribution: DistributionMode,
    amplicon_distribution_file: Option<PathBuf>,
    shuffle_engine: ShuffleEngine,
    art_executable: String,
    max_parallel_sims: usize,
    temp_dir: Option<PathBuf>,
    keep_temp: bool,
    gzip_output: bool,
    overwrite_output: bool,
    verbose: bool,
    rng_seed: Option<String>,
}

fn generate_error(key: &str, key_type: &str, value: &Value) -> String {
    format!(
        "Input {} could not be converted to {}: {:?}",
        key, key_type, value
    )
}

fn yaml_str(key: &str, value: &Value) -> Result<String> {
    Ok(value
        .as_str()
        .ok_or_else(|| anyhow!(generate_error(key, "string", value)))?
        .to_string())
}

impl ConfigBuilder {
    pub fn new() -> Result<Self> {
        let cb = ConfigBuilder {
            // Setting default values
            genome_abundances: None,
            amplicons_manifest: None,
            output_dir: env::current_dir()?,
            output_prefix: String::from("amplimix_out"),
            n_reads: 100_000,
            read_len: 250,
            seq_sys: SeqSystem::MSv3,
            amplicon_pseudocounts: 10_000.0,
            amplicon_distribution: DistributionMode::Dirichlet1,
            amplicon_distribution_file: None,
            shuffle_engine: ShuffleEngine::Coreutils,
            art_executable: String::from("art_illumina"),
            max_parallel_sims: 4,
            temp_dir: None,
            keep_temp: false,
            gzip_output: false,
            overwrite_output: false,
            verbose: true,
            rng_seed: None,
        };
        Ok(cb)
    }

    /// Reads an input configuration file from yaml using the serde
    /// package, then sets the parameters based on the inputs. A "."
    /// value means to use the default value.
    pub fn apply_yaml(&mut self, yaml: &Path) -> Result<()> {
        let file = fs::File::open(yaml)?;
        let scrape_config: HashMap<String, Value> = serde_yaml::from_reader(file)?;
        for (key, value) in scrape_config {
            if value == "." {
                continue;
            }
            match key.as_str() {
                "genome_abundances" => {
                    self.genome_abundances = Some(PathBuf::from(yaml_str(&key, &value)?))
                }
                "amplicons_manifest" => {
                    self.amplicons_manifest = Some(PathBuf::from(yaml_str(&key, &value)?))
                }
                "output_dir" => self.output_dir = PathBuf::from(yaml_str(&key, &value)?),
                "output_prefix" => self.output_prefix = yaml_str(&key, &value)?,
                "n_reads" => {
                    self.n_reads = value
                        .as_u64()
                        .ok_or_else(|| anyhow!(generate_error(&key, "integer", &value)))?
                }
                "read_length" => {
                    self.read_len = value
                        .as_u64()
                        .ok_or_else(|| anyhow!(generate_error(&key, "integer", &value)))?
                        as usize
                }
                "seq_sys" => self.seq_sys = yaml_str(&key, &value)?.parse()?,
                "amplicon_pseudocounts" => {
                    self.amplicon_pseudocounts = value
                        .as_f64()
                        .ok_or_else(|| anyhow!(generate_error(&key, "float", &value)))?
                }
                "amplicon_distribution" => {
                    self.amplicon_distribution = yaml_str(&key, &value)?.parse()?
                }
                "amplicon_distribution_file" => {
                    self.amplicon_distribution_file = Some(PathBuf::from(yaml_str(&key, &value)?))
                }
                "shuffle_engine" => self.shuffle_engine = yaml_str(&key, &value)?.parse()?,
                "art_executable" => self.art_executable = yaml_str(&key, &value)?,
                "max_parallel_sims" => {
                    self.max_parallel_sims = value
                        .as_u64()
                        .ok_or_else(|| anyhow!(generate_error(&key, "integer", &value)))?
                        as usize
                }
                "temp_dir" => self.temp_dir = Some(PathBuf::from(yaml_str(&key, &value)?)),
                "keep_temp" => {
                    self.keep_temp = value
                        .as_bool()
                        .ok_or_else(|| anyhow!(generate_error(&key, "boolean", &value)))?
                }
                "gzip_output" => {
                    self.gzip_output = value
                        .as_bool()
                        .ok_or_else(|| anyhow!(generate_error(&key, "boolean", &value)))?
                }
                "overwrite_output" => {
                    self.overwrite_output = value
                        .as_bool()
                        .ok_or_else(|| anyhow!(generate_error(&key, "boolean", &value)))?
                }
                "rng_seed" => self.rng_seed = value.as_str().map(String::from),
                _ => continue,
            }
        }
        Ok(())
    }

    /// Overrides any values the user set on the command line.
    pub fn apply_args(&mut self, args: &Args) -> Result<()> {
        if let Some(path) = &args.genome_abundances {
            self.genome_abundances = Some(path.clone());
        }
        if let Some(path) = &args.amplicons_manifest {
            self.amplicons_manifest = Some(path.clone());
        }
        if let Some(dir) = &args.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(prefix) = &args.output_prefix {
            self.output_prefix = prefix.clone();
        }
        if let Some(n) = args.n_reads {
            self.n_reads = n;
        }
        if let Some(len) = args.read_length {
            self.read_len = len;
        }
        if let Some(seq_sys) = &args.seq_sys {
            self.seq_sys = seq_sys.parse()?;
        }
        if let Some(pseudocounts) = args.amplicon_pseudocounts {
            self.amplicon_pseudocounts = pseudocounts;
        }
        if let Some(mode) = &args.amplicon_distribution {
            self.amplicon_distribution = mode.parse()?;
        }
        if let Some(path) = &args.amplicon_distribution_file {
            self.amplicon_distribution_file = Some(path.clone());
        }
        if let Some(engine) = &args.shuffle_engine {
            self.shuffle_engine = engine.parse()?;
        }
        if let Some(executable) = &args.art_executable {
            self.art_executable = executable.clone();
        }
        if let Some(workers) = args.max_parallel_sims {
            self.max_parallel_sims = workers;
        }
        if let Some(dir) = &args.temp_dir {
            self.temp_dir = Some(dir.clone());
        }
        if args.keep_temp {
            self.keep_temp = true;
        }
        if args.gzip_output {
            self.gzip_output = true;
        }
        if args.overwrite_output {
            self.overwrite_output = true;
        }
        if let Some(seed) = &args.rng_seed {
            self.rng_seed = Some(seed.clone());
        }
        if args.quiet {
            self.verbose = false;
        }
        Ok(())
    }

    /// This does a final check of the configuration for valid items.
    /// It will print info messages of the items, to work as a record
    /// and to assist in debugging any issues that come up.
    pub fn check_and_print_config(&self) -> Result<()> {
        let abundances = self
            .genome_abundances
            .as_ref()
            .ok_or_else(|| anyhow!("No genome abundance file was specified."))?;
        if !abundances.is_file() {
            return Err(anyhow!(
                "Genome abundance file not found: {}",
                abundances.display()
            ));
        }
        let manifest = self
            .amplicons_manifest
            .as_ref()
            .ok_or_else(|| anyhow!("No amplicon manifest was specified."))?;
        if !manifest.is_file() {
            return Err(anyhow!(
                "Amplicon manifest not found: {}",
                manifest.display()
            ));
        }
        if self.n_reads == 0 {
            return Err(anyhow!("n_reads must be greater than zero"));
        }
        if !self.amplicon_pseudocounts.is_finite() || self.amplicon_pseudocounts <= 0.0 {
            return Err(anyhow!(
                "Pseudocount strength must be positive, got {}",
                self.amplicon_pseudocounts
            ));
        }
        if self.read_len == 0 {
            return Err(anyhow!("read_length must be greater than zero"));
        }
        if self.max_parallel_sims == 0 {
            return Err(anyhow!("max_parallel_sims must be at least 1"));
        }
        if self.amplicon_distribution == DistributionMode::File {
            let file = self.amplicon_distribution_file.as_ref().ok_or_else(|| {
                anyhow!("Distribution mode FILE needs an amplicon distribution file")
            })?;
            if !file.is_file() {
                return Err(anyhow!(
                    "Amplicon distribution file not found: {}",
                    file.display()
                ));
            }
        }

        info!(
            "Running amplimix on mixture {} with...",
            abundances.display()
        );
        info!("  >amplicon manifest: {}", manifest.display());
        info!("  >number of reads: {}", self.n_reads);
        info!("  >read length: {}", self.read_len);
        info!("  >sequencing system: {}", self.seq_sys);
        info!(
            "  >amplicon pseudocounts/ i.e. quality parameter: {}",
            self.amplicon_pseudocounts
        );
        info!("  >amplicon distribution: {}", self.amplicon_distribution);
        info!("  >shuffle engine: {}", self.shuffle_engine);
        if self.overwrite_output {
            warn!("Overwriting any existing files.")
        }
        check_create_dir(&self.output_dir)?;
        if let Some(rng_seed) = self.rng_seed.as_ref() {
            info!("Using rng seed: {}", rng_seed);
        }
        Ok(())
    }

    // Function to build the actual configuration.
    pub fn build(self) -> Result<RunConfiguration> {
        let output_dir = self.output_dir;
        let rc = RunConfiguration {
            genome_abundances: self
                .genome_abundances
                .ok_or_else(|| anyhow!("Missing genome abundance file"))?,
            amplicons_manifest: self
                .amplicons_manifest
                .ok_or_else(|| anyhow!("Missing amplicon manifest"))?,
            temp_dir: self.temp_dir.unwrap_or_else(|| output_dir.clone()),
            output_dir,
            output_prefix: self.output_prefix,
            n_reads: self.n_reads,
            read_len: self.read_len,
            seq_sys: self.seq_sys,
            amplicon_pseudocounts: self.amplicon_pseudocounts,
            amplicon_distribution: self.amplicon_distribution,
            amplicon_distribution_file: self.amplicon_distribution_file,
            shuffle_engine: self.shuffle_engine,
            art_executable: self.art_executable,
            max_parallel_sims: self.max_parallel_sims,
            keep_temp: self.keep_temp,
            gzip_output: self.gzip_output,
            overwrite_output: self.overwrite_output,
            verbose: self.verbose,
            rng_seed: self.rng_seed,
        };
        Ok(rc)
    }
}

/// Layers defaults, the optional yaml file and the command line into
/// the final configuration.
pub fn build_config(args: &Args) -> Result<RunConfiguration> {
    let mut builder = ConfigBuilder::new()?;
    if let Some(file) = &args.config_file {
        info!("Reading configuration from file: {}", file.display());
        builder.apply_yaml(file)?;
    }
    builder.apply_args(args)?;
    builder.check_and_print_config()?;
    builder.build()
}
