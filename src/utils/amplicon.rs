// The amplicon manifest is the narrow interface between this pipeline
// and the primer-alignment step that extracts amplicon templates (or
// the PCR-error stage that rewrites them). One row per template:
// genome<TAB>amplicon_number<TAB>is_alt<TAB>path, no header.

use super::fasta_tools::read_single_fasta;
use super::file_tools::read_lines;
use anyhow::{Context, Result, anyhow};
use itertools::Itertools;
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct Amplicon {
    pub genome: String,
    pub number: u32,
    pub is_alt: bool,
    pub path: PathBuf,
}

impl Amplicon {
    /// The template filename without its final extension; used to
    /// derive unique temp-output prefixes for the read generator.
    pub fn short_name(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}_{}", self.genome, self.number))
    }
}

fn parse_flag(field: &str) -> Result<bool> {
    match field.trim().to_ascii_lowercase().as_str() {
        "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        other => Err(anyhow!("Bad is_alt flag: {:?}", other)),
    }
}

/// Reads the amplicon manifest, preserving file order.
pub fn read_manifest(path: &Path) -> Result<Vec<Amplicon>> {
    let mut amplicons = Vec::new();
    for (line_number, line) in read_lines(path)
        .with_context(|| format!("Could not open amplicon manifest {}", path.display()))?
        .enumerate()
    {
        let l = line?;
        if l.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = l.split('\t').collect();
        if fields.len() != 4 {
            return Err(anyhow!(
                "Line {} of {} has {} fields, expected 4",
                line_number + 1,
                path.display(),
                fields.len()
            ));
        }
        let number: u32 = fields[1].trim().parse().with_context(|| {
            format!(
                "Bad amplicon number on line {} of {}",
                line_number + 1,
                path.display()
            )
        })?;
        amplicons.push(Amplicon {
            genome: fields[0].to_string(),
            number,
            is_alt: parse_flag(fields[2])?,
            path: PathBuf::from(fields[3]),
        });
    }
    Ok(amplicons)
}

/// Groups amplicons by genome, sorted by (amplicon number, alt flag)
/// within each genome so every stage sees them in the same order.
pub fn group_by_genome(amplicons: &[Amplicon]) -> HashMap<String, Vec<Amplicon>> {
    let mut by_genome: HashMap<String, Vec<Amplicon>> = amplicons
        .iter()
        .map(|a| (a.genome.clone(), a.clone()))
        .into_group_map();
    for group in by_genome.values_mut() {
        group.sort_by_key(|a| (a.number, a.is_alt));
    }
    by_genome
}

/// Checks that every template parses as a single-record fasta with a
/// non-empty sequence, so the run fails before any reads are generated
/// rather than partway through.
pub fn validate_templates(amplicons: &[Amplicon]) -> Result<()> {
    for amplicon in amplicons {
        let (_, sequence) = read_single_fasta(&amplicon.path).with_context(|| {
            format!(
                "Bad template for genome {}, amplicon {}",
                amplicon.genome, amplicon.number
            )
        })?;
        debug!(
            "Template {} ({} bases) ok",
            amplicon.short_name(),
            sequence.len()
        );
    }
    Ok(())
}
