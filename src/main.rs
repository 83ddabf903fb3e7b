mod utils;

use anyhow::Result;
use clap::Parser;
use log::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use simplelog::*;
use std::fs::File;
use std::hash::Hash;
use std::hash::{DefaultHasher, Hasher};
use utils::config::{self, Args};
use utils::runner::run_simulation;

/// Create a random number generator from a seed string. If no seed is provided
/// we generate a random seed.
pub fn create_rng(seed: Option<&str>) -> StdRng {
    let seed = seed
        .map(|s| {
            let mut hasher = DefaultHasher::new();
            s.hash(&mut hasher);
            hasher.finish()
        })
        .unwrap_or_else(rand::random);

    StdRng::seed_from_u64(seed)
}

/// Main function for the program. This function parses the command
/// line arguments, sets up logging, and then runs the main script for
/// simulating the mixture.
fn main() -> Result<()> {
    let args = Args::parse();

    let _loggers;
    let term_log = TermLogger::new(
        args.log_level,
        Config::default(),
        TerminalMode::Stdout,
        ColorChoice::Always,
    );
    if let Some(log_path) = &args.log_dest {
        let flog = WriteLogger::new(args.log_level, Config::default(), File::create(log_path)?);
        _loggers = CombinedLogger::init(vec![term_log, flog])?;
    } else {
        _loggers = CombinedLogger::init(vec![term_log])?;
    }

    info!("Begin processing");

    let config = config::build_config(&args)?;

    // Generate the RNG used for this run
    let seed = config.rng_seed.clone();
    let mut rng = create_rng(seed.as_deref());
    if let Some(sd) = seed {
        info!("Seed string to regenerate these exact results: {}", sd);
    }

    // Run the main script
    run_simulation(config, &mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rng_is_deterministic_for_seed_strings() {
        use rand::Rng;
        let mut rng1 = create_rng(Some("Hello Cruel World"));
        let mut rng2 = create_rng(Some("Hello Cruel World"));
        let draws1: Vec<u64> = (0..10).map(|_| rng1.random()).collect();
        let draws2: Vec<u64> = (0..10).map(|_| rng2.random()).collect();
        assert_eq!(draws1, draws2);

        let mut rng3 = create_rng(Some("a different seed"));
        let draws3: Vec<u64> = (0..10).map(|_| rng3.random()).collect();
        assert_ne!(draws1, draws3);
    }
}
