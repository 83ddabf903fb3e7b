// Minimal fasta handling for amplicon template files. Templates are
// produced upstream by the primer-alignment step, one record per file,
// so this reader is deliberately strict about that shape.

use super::file_tools::{open_file, read_lines};
use super::nucleotides::{Nuc, base_to_nuc, nuc_to_base};
use anyhow::{Result, anyhow};
use std::io::Write;
use std::path::Path;

/// Reads a single-record fasta file and returns the record
/// description and its sequence.
///
/// Errors if the file holds no record, more than one record, or an
/// empty sequence.
pub fn read_single_fasta(fasta_path: &Path) -> Result<(String, Vec<Nuc>)> {
    let mut description = String::new();
    let mut sequence: Vec<Nuc> = Vec::new();
    let mut records = 0;

    let lines = read_lines(fasta_path)?;
    for line in lines {
        let l = line?;
        if l.starts_with('>') {
            records += 1;
            if records > 1 {
                return Err(anyhow!(
                    "Expected a single record in {}, found more",
                    fasta_path.display()
                ));
            }
            description = l
                .strip_prefix('>')
                .ok_or_else(|| anyhow!("prefix not found"))?
                .to_string();
        } else if !l.is_empty() {
            if records == 0 {
                return Err(anyhow!(
                    "Sequence data before header in {}",
                    fasta_path.display()
                ));
            }
            sequence.extend(l.chars().map(base_to_nuc).collect::<Result<Vec<_>>>()?);
        }
    }

    if records == 0 {
        return Err(anyhow!("No fasta record in {}", fasta_path.display()));
    }
    if sequence.is_empty() {
        return Err(anyhow!(
            "Empty sequence for record {:?} in {}",
            description,
            fasta_path.display()
        ));
    }
    Ok((description, sequence))
}

/// Writes a single sequence to a fasta file, wrapped at 70 bases.
pub fn write_single_fasta(
    description: &str,
    sequence: &[Nuc],
    overwrite_output: bool,
    fasta_path: &Path,
) -> Result<()> {
    let mut outfile = open_file(fasta_path, overwrite_output)?;
    writeln!(outfile, ">{}", description)?;
    for chunk in sequence.chunks(70) {
        let line: String = chunk.iter().map(|&b| nuc_to_base(b)).collect();
        writeln!(outfile, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_rng;
    use crate::utils::nucleotides::random_seq;
    use tempdir::TempDir;

    #[test]
    fn test_fasta_round_trip() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let path = tmp_dir.path().join("amp.fasta");
        let mut rng = create_rng(Some("Hello Cruel World"));
        let seq = random_seq(&mut rng, 200);
        write_single_fasta("MN908947.3_amplicon_1", &seq, false, &path)?;
        let (description, read_back) = read_single_fasta(&path)?;
        assert_eq!(description, "MN908947.3_amplicon_1");
        assert_eq!(read_back, seq);
        Ok(())
    }

    #[test]
    fn test_rejects_missing_file() {
        assert!(read_single_fasta(Path::new("no/such/file.fasta")).is_err());
    }

    #[test]
    fn test_rejects_multi_record() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let path = tmp_dir.path().join("two.fasta");
        std::fs::write(&path, ">one\nACGT\n>two\nACGT\n")?;
        assert!(read_single_fasta(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_rejects_empty_sequence() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let path = tmp_dir.path().join("empty.fasta");
        std::fs::write(&path, ">lonely\n")?;
        assert!(read_single_fasta(&path).is_err());
        Ok(())
    }
}
