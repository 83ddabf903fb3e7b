// Parsing and normalization of the genome abundance table.

use super::errors::SimError;
use super::file_tools::read_lines;
use anyhow::{Context, Result, anyhow};
use log::info;
use std::collections::HashMap;
use std::path::Path;

/// How far from 1.0 the abundance total may drift before we rescale.
pub const ABUNDANCE_TOLERANCE: f64 = 1e-9;

/// Reads a tab-separated abundance file (`genome<TAB>weight`, no
/// header) and returns the normalized weights plus the genome order as
/// it appeared in the file. The order is what keeps downstream
/// sampling reproducible, since the map iteration order is not.
pub fn read_abundances(path: &Path) -> Result<(HashMap<String, f64>, Vec<String>)> {
    let mut abundances: HashMap<String, f64> = HashMap::new();
    let mut genome_order: Vec<String> = Vec::new();

    for (line_number, line) in read_lines(path)
        .with_context(|| format!("Could not open abundance file {}", path.display()))?
        .enumerate()
    {
        let l = line?;
        if l.trim().is_empty() {
            continue;
        }
        let (name, weight) = l
            .split_once('\t')
            .ok_or_else(|| anyhow!("Line {} of {} is not tab-separated", line_number + 1, path.display()))?;
        let weight: f64 = weight.trim().parse().with_context(|| {
            format!(
                "Bad abundance for genome {:?} on line {} of {}",
                name,
                line_number + 1,
                path.display()
            )
        })?;
        if abundances.insert(name.to_string(), weight).is_some() {
            return Err(anyhow!("Genome {:?} listed twice in {}", name, path.display()));
        }
        genome_order.push(name.to_string());
    }

    if abundances.is_empty() {
        return Err(anyhow!("Abundance file {} is empty", path.display()));
    }

    normalize_abundances(&mut abundances)?;
    Ok((abundances, genome_order))
}

/// Rescales the weights to sum to 1. A non-positive total is
/// unrecoverable and fails with `InvalidAbundance` before any sampling
/// starts.
pub fn normalize_abundances(abundances: &mut HashMap<String, f64>) -> Result<()> {
    let total: f64 = abundances.values().sum();
    if (total - 1.0).abs() > ABUNDANCE_TOLERANCE {
        if total <= 0.0 {
            return Err(SimError::InvalidAbundance(total).into());
        }
        info!("Total of relative abundance values is {}, not 1.", total);
        info!("Continuing, normalising total of genome abundances to 1.");
        for weight in abundances.values_mut() {
            *weight /= total;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_reads_and_keeps_order() -> Result<()> {
        let tmp = assert_fs::TempDir::new()?;
        let file = tmp.child("abundances.tsv");
        file.write_str("B.1.1.7\t0.5\nB.1.351\t0.3\nP.1\t0.2\n")?;
        let (abundances, order) = read_abundances(file.path())?;
        assert_eq!(order, vec!["B.1.1.7", "B.1.351", "P.1"]);
        assert!((abundances["B.1.1.7"] - 0.5).abs() < ABUNDANCE_TOLERANCE);
        assert!((abundances.values().sum::<f64>() - 1.0).abs() < ABUNDANCE_TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_rescales_unnormalized_weights() -> Result<()> {
        let mut abundances = HashMap::from([("A".to_string(), 2.0), ("B".to_string(), 2.0)]);
        normalize_abundances(&mut abundances)?;
        assert!((abundances["A"] - 0.5).abs() < ABUNDANCE_TOLERANCE);
        assert!((abundances["B"] - 0.5).abs() < ABUNDANCE_TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_negative_total_is_invalid_abundance() {
        let mut abundances = HashMap::from([("A".to_string(), -1.0)]);
        let err = normalize_abundances(&mut abundances).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SimError>(),
            Some(SimError::InvalidAbundance(_))
        ));
    }

    #[test]
    fn test_zero_total_is_invalid_abundance() {
        let mut abundances = HashMap::from([("A".to_string(), 0.0), ("B".to_string(), 0.0)]);
        let err = normalize_abundances(&mut abundances).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SimError>(),
            Some(SimError::InvalidAbundance(_))
        ));
    }

    #[test]
    fn test_already_normalized_left_alone() -> Result<()> {
        let mut abundances = HashMap::from([("A".to_string(), 0.25), ("B".to_string(), 0.75)]);
        normalize_abundances(&mut abundances)?;
        assert_eq!(abundances["A"], 0.25);
        assert_eq!(abundances["B"], 0.75);
        Ok(())
    }

    #[test]
    fn test_duplicate_genome_rejected() -> Result<()> {
        let tmp = assert_fs::TempDir::new()?;
        let file = tmp.child("abundances.tsv");
        file.write_str("A\t0.5\nA\t0.5\n")?;
        assert!(read_abundances(file.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_malformed_line_rejected() -> Result<()> {
        let tmp = assert_fs::TempDir::new()?;
        let file = tmp.child("abundances.tsv");
        file.write_str("A 0.5\n")?;
        assert!(read_abundances(file.path()).is_err());
        Ok(())
    }
}
