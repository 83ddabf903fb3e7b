// Merge and reorder stage. Per-amplicon generator outputs are
// concatenated per mate direction, then both combined streams get the
// same random permutation. Pairing survives because both mates are
// shuffled with the identical random key: record i of mate 1 and
// record i of mate 2 land at the same permuted position.

use super::errors::SimError;
use super::fastq_tools::{FastqRecord, read_fastq_records, write_fastq_record};
use super::file_tools::{concat_files, promote_file, read_bytes, read_lines};
use super::workspace::ScopedTempWorkspace;
use anyhow::{Result, anyhow};
use flate2::Compression;
use flate2::write::GzEncoder;
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::hash::{DefaultHasher, Hasher};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

/// Minimum size of the shared shuffle key, matching what coreutils
/// shuf needs as a random source for large inputs.
const MIN_KEY_BYTES: usize = 5_000_000;

/// A pairing-preserving record shuffler. Implementations must produce
/// the same permutation for the same key and record count, since the
/// two mate files are shuffled by independent calls.
pub trait Shuffler {
    fn name(&self) -> &'static str;
    fn shuffle(&self, input: &Path, output: &Path, key: &Path) -> Result<()>;
}

/// The classic external pipeline: paste each 4-line record onto one
/// tab-joined line, shuf against the shared random source, then tr the
/// tabs back to newlines. The same tr pass also restores the '&'
/// characters that the upstream extraction step substituted for '/'
/// in genome names; quality strings cannot contain '&' at the fixed
/// minimum quality of 30.
pub struct CoreutilsShuffler;

impl Shuffler for CoreutilsShuffler {
    fn name(&self) -> &'static str {
        "coreutils"
    }

    fn shuffle(&self, input: &Path, output: &Path, key: &Path) -> Result<()> {
        let pipeline = format!(
            "paste -s -d '\t\t\t\n' '{}' | shuf --random-source='{}' | tr '\t&' '\n/' > '{}'",
            input.display(),
            key.display(),
            output.display()
        );
        let result = std::process::Command::new("sh")
            .arg("-c")
            .arg(&pipeline)
            .output()
            .map_err(|e| SimError::ShuffleFailed {
                input: input.to_path_buf(),
                engine: self.name().to_string(),
                detail: e.to_string(),
            })?;
        if !result.status.success() {
            return Err(SimError::ShuffleFailed {
                input: input.to_path_buf(),
                engine: self.name().to_string(),
                detail: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            }
            .into());
        }
        // A failed shuf in the middle of the pipeline still exits the
        // shell with status 0, so verify the output line count.
        let (n_in, n_out) = (count_lines(input)?, count_lines(output)?);
        if n_in != n_out {
            return Err(SimError::ShuffleFailed {
                input: input.to_path_buf(),
                engine: self.name().to_string(),
                detail: format!("output has {} lines, expected {}", n_out, n_in),
            }
            .into());
        }
        Ok(())
    }
}

/// In-process parity implementation of the same contract: a
/// Fisher-Yates permutation seeded by hashing the key bytes, applied
/// record-wise, with the same '&' to '/' restoration.
pub struct InProcessShuffler;

impl Shuffler for InProcessShuffler {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn shuffle(&self, input: &Path, output: &Path, key: &Path) -> Result<()> {
        let inner = || -> Result<()> {
            let records = read_fastq_records(input)?;
            let key_bytes = read_bytes(key)?;
            let mut hasher = DefaultHasher::new();
            hasher.write(&key_bytes);
            let mut rng = StdRng::seed_from_u64(hasher.finish());

            let mut order: Vec<usize> = (0..records.len()).collect();
            order.shuffle(&mut rng);

            let mut writer = BufWriter::new(File::create(output)?);
            for &i in &order {
                let restored = FastqRecord {
                    lines: records[i].lines.clone().map(|line| line.replace('&', "/")),
                };
                write_fastq_record(&mut writer, &restored)?;
            }
            writer.flush()?;
            Ok(())
        };
        inner().map_err(|e| {
            SimError::ShuffleFailed {
                input: input.to_path_buf(),
                engine: self.name().to_string(),
                detail: format!("{:#}", e),
            }
            .into()
        })
    }
}

fn count_lines(path: &Path) -> Result<usize> {
    let mut n = 0;
    for line in read_lines(path)? {
        line?;
        n += 1;
    }
    Ok(n)
}

fn first_record(path: &Path) -> Result<Option<FastqRecord>> {
    let mut lines = Vec::with_capacity(4);
    for line in read_lines(path)?.take(4) {
        lines.push(line?);
    }
    if lines.len() < 4 {
        return Ok(None);
    }
    Ok(Some(FastqRecord {
        lines: lines
            .try_into()
            .map_err(|_| anyhow!("record assembly failed"))?,
    }))
}

/// Writes the shared random key: lowercase ASCII, sized to the read
/// budget, generated once per run from the process RNG.
pub fn write_shuffle_key<R: Rng>(path: &Path, total_reads: u64, rng: &mut R) -> Result<()> {
    let size = MIN_KEY_BYTES.max((2.5 * total_reads as f64) as usize);
    let bytes: Vec<u8> = (0..size).map(|_| b'a' + rng.random_range(0..26u8)).collect();
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

fn gzip_file(input: &Path, output: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(input)?);
    let mut encoder = GzEncoder::new(
        BufWriter::new(File::create(output)?),
        Compression::default(),
    );
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Concatenates all per-amplicon outputs, shuffles both mates with one
/// shared key, and promotes the results to the final output paths.
/// Everything up to the promotion happens inside the temp workspace,
/// so a failure never leaves partial files under the final names.
pub fn merge_and_shuffle<R: Rng>(
    workspace: &ScopedTempWorkspace,
    shuffler: &dyn Shuffler,
    total_reads: u64,
    gzip_output: bool,
    out_mate1: &Path,
    out_mate2: &Path,
    rng: &mut R,
) -> Result<()> {
    let mate1_files = workspace.matching_files("1.fq")?;
    let mate2_files = workspace.matching_files("2.fq")?;
    if mate1_files.is_empty() {
        return Err(anyhow!("No generator output files found to merge"));
    }
    if mate1_files.len() != mate2_files.len() {
        return Err(anyhow!(
            "Mate file counts differ: {} vs {}",
            mate1_files.len(),
            mate2_files.len()
        ));
    }

    let combined1 = workspace.file("all_files_unshuffled1.fastq");
    let combined2 = workspace.file("all_files_unshuffled2.fastq");
    concat_files(&mate1_files, &combined1)?;
    concat_files(&mate2_files, &combined2)?;

    // Generator asymmetry would silently break pairing, catch it
    // before shuffling.
    if count_lines(&combined1)? != count_lines(&combined2)? {
        return Err(anyhow!(
            "Combined mate files have different record counts, pairing is broken"
        ));
    }

    info!("Creating random data for shuffle.");
    let key = workspace.file("random_data");
    write_shuffle_key(&key, total_reads, rng)?;

    let shuffled1 = workspace.file("shuffled_R1.fastq");
    let shuffled2 = workspace.file("shuffled_R2.fastq");
    info!("Shuffling {}", out_mate1.display());
    shuffler.shuffle(&combined1, &shuffled1, &key)?;
    info!("Shuffling {}", out_mate2.display());
    shuffler.shuffle(&combined2, &shuffled2, &key)?;

    // Both mates were permuted with the same key; spot-check that the
    // leading records still pair up before promoting anything.
    if let (Some(r1), Some(r2)) = (first_record(&shuffled1)?, first_record(&shuffled2)?)
        && r1.read_id() != r2.read_id()
    {
        return Err(SimError::ShuffleFailed {
            input: shuffled1,
            engine: shuffler.name().to_string(),
            detail: format!(
                "mates out of step after shuffle: {:?} vs {:?}",
                r1.read_id(),
                r2.read_id()
            ),
        }
        .into());
    }

    if gzip_output {
        let gz1 = workspace.file("final_R1.fastq.gz");
        let gz2 = workspace.file("final_R2.fastq.gz");
        gzip_file(&shuffled1, &gz1)?;
        gzip_file(&shuffled2, &gz2)?;
        promote_file(&gz1, out_mate1)?;
        promote_file(&gz2, out_mate2)?;
    } else {
        promote_file(&shuffled1, out_mate1)?;
        promote_file(&shuffled2, out_mate2)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_rng;
    use crate::utils::fastq_tools::FastqRecord;
    use flate2::read::GzDecoder;
    use std::fs;
    use std::io::Read;
    use tempdir::TempDir;

    fn record(id: &str, mate: u8, seq: &str) -> String {
        format!("@{}/{}\n{}\n+\n{}\n", id, mate, seq, "I".repeat(seq.len()))
    }

    fn write_pair(dir: &Path, stem: &str, ids: &[&str]) -> Result<()> {
        let mut r1 = String::new();
        let mut r2 = String::new();
        for id in ids {
            r1.push_str(&record(id, 1, "ACGTACGT"));
            r2.push_str(&record(id, 2, "TTGGCCAA"));
        }
        fs::write(dir.join(format!("{}1.fq", stem)), r1)?;
        fs::write(dir.join(format!("{}2.fq", stem)), r2)?;
        Ok(())
    }

    fn sorted_records(path: &Path) -> Result<Vec<FastqRecord>> {
        let mut records = read_fastq_records(path)?;
        records.sort_by(|a, b| a.lines[0].cmp(&b.lines[0]));
        Ok(records)
    }

    fn assert_paired(path1: &Path, path2: &Path) -> Result<()> {
        let r1 = read_fastq_records(path1)?;
        let r2 = read_fastq_records(path2)?;
        assert_eq!(r1.len(), r2.len());
        for (a, b) in r1.iter().zip(r2.iter()) {
            assert_eq!(a.read_id(), b.read_id());
        }
        Ok(())
    }

    #[test]
    fn test_in_process_shuffle_is_a_paired_bijection() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let dir = tmp_dir.path();
        let ids: Vec<String> = (0..40).map(|i| format!("read-{:03}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        write_pair(dir, "in.", &id_refs)?;
        let key = dir.join("key");
        let mut rng = create_rng(Some("Hello Cruel World"));
        write_shuffle_key(&key, 10, &mut rng)?;

        let shuffler = InProcessShuffler;
        let out1 = dir.join("out1.fastq");
        let out2 = dir.join("out2.fastq");
        shuffler.shuffle(&dir.join("in.1.fq"), &out1, &key)?;
        shuffler.shuffle(&dir.join("in.2.fq"), &out2, &key)?;

        // bijection per mate
        assert_eq!(sorted_records(&dir.join("in.1.fq"))?, sorted_records(&out1)?);
        assert_eq!(sorted_records(&dir.join("in.2.fq"))?, sorted_records(&out2)?);
        // pairing preserved across mates
        assert_paired(&out1, &out2)?;
        // order actually changed (40 records, astronomically unlikely
        // to be identity)
        assert_ne!(
            read_fastq_records(&dir.join("in.1.fq"))?,
            read_fastq_records(&out1)?
        );
        Ok(())
    }

    #[test]
    fn test_in_process_shuffle_restores_escaped_separators() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let dir = tmp_dir.path();
        write_pair(dir, "esc.", &["hCoV-19&England&2020-1"])?;
        let key = dir.join("key");
        fs::write(&key, "abcdefgh")?;
        let out = dir.join("out.fastq");
        InProcessShuffler.shuffle(&dir.join("esc.1.fq"), &out, &key)?;
        let records = read_fastq_records(&out)?;
        assert_eq!(records[0].lines[0], "@hCoV-19/England/2020-1/1");
        Ok(())
    }

    #[test]
    fn test_same_key_same_permutation() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let dir = tmp_dir.path();
        let ids: Vec<String> = (0..25).map(|i| format!("r{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        write_pair(dir, "a.", &id_refs)?;
        let key = dir.join("key");
        fs::write(&key, "same key bytes every time")?;
        let out_a = dir.join("a.out");
        let out_b = dir.join("b.out");
        InProcessShuffler.shuffle(&dir.join("a.1.fq"), &out_a, &key)?;
        InProcessShuffler.shuffle(&dir.join("a.1.fq"), &out_b, &key)?;
        assert_eq!(fs::read_to_string(&out_a)?, fs::read_to_string(&out_b)?);
        Ok(())
    }

    #[test]
    fn test_coreutils_shuffle_is_a_paired_bijection() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let dir = tmp_dir.path();
        let ids: Vec<String> = (0..30).map(|i| format!("read&{:02}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        write_pair(dir, "cu.", &id_refs)?;
        let key = dir.join("key");
        let mut rng = create_rng(Some("Hello Cruel World"));
        write_shuffle_key(&key, 10, &mut rng)?;

        let shuffler = CoreutilsShuffler;
        let out1 = dir.join("out1.fastq");
        let out2 = dir.join("out2.fastq");
        shuffler.shuffle(&dir.join("cu.1.fq"), &out1, &key)?;
        shuffler.shuffle(&dir.join("cu.2.fq"), &out2, &key)?;

        assert_eq!(
            read_fastq_records(&out1)?.len(),
            read_fastq_records(&out2)?.len()
        );
        assert_paired(&out1, &out2)?;
        // tr restored the escaped separators
        assert!(fs::read_to_string(&out1)?.contains("@read/00/1"));
        Ok(())
    }

    #[test]
    fn test_coreutils_missing_key_is_shuffle_failed() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let dir = tmp_dir.path();
        write_pair(dir, "k.", &["r1", "r2"])?;
        let out = dir.join("out.fastq");
        let err = CoreutilsShuffler
            .shuffle(&dir.join("k.1.fq"), &out, &dir.join("missing_key"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SimError>(),
            Some(SimError::ShuffleFailed { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_merge_and_shuffle_end_to_end() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let workspace = ScopedTempWorkspace::new(tmp_dir.path(), false)?;
        // two amplicons worth of generator output
        for (short, ids) in [("amp_a", vec!["a1", "a2", "a3"]), ("amp_b", vec!["b1", "b2"])] {
            let prefix = workspace.amplicon_prefix(short);
            let name = prefix.file_name().unwrap().to_string_lossy().into_owned();
            write_pair(prefix.parent().unwrap(), &name, &ids)?;
        }
        let out1 = tmp_dir.path().join("final_R1.fastq");
        let out2 = tmp_dir.path().join("final_R2.fastq");
        let mut rng = create_rng(Some("Hello Cruel World"));
        merge_and_shuffle(
            &workspace,
            &InProcessShuffler,
            5,
            false,
            &out1,
            &out2,
            &mut rng,
        )?;
        let r1 = read_fastq_records(&out1)?;
        assert_eq!(r1.len(), 5);
        assert_paired(&out1, &out2)?;
        Ok(())
    }

    #[test]
    fn test_merge_and_shuffle_gzip_output() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let workspace = ScopedTempWorkspace::new(tmp_dir.path(), false)?;
        let prefix = workspace.amplicon_prefix("amp_a");
        write_pair(
            prefix.parent().unwrap(),
            &prefix.file_name().unwrap().to_string_lossy(),
            &["a1", "a2"],
        )?;
        let out1 = tmp_dir.path().join("final_R1.fastq.gz");
        let out2 = tmp_dir.path().join("final_R2.fastq.gz");
        let mut rng = create_rng(Some("Hello Cruel World"));
        merge_and_shuffle(
            &workspace,
            &InProcessShuffler,
            2,
            true,
            &out1,
            &out2,
            &mut rng,
        )?;
        let mut text = String::new();
        GzDecoder::new(File::open(&out1)?).read_to_string(&mut text)?;
        assert_eq!(text.lines().count(), 8);
        Ok(())
    }

    #[test]
    fn test_merge_with_no_input_errors() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let workspace = ScopedTempWorkspace::new(tmp_dir.path(), false)?;
        let mut rng = create_rng(Some("Hello Cruel World"));
        let out1 = tmp_dir.path().join("r1.fastq");
        let out2 = tmp_dir.path().join("r2.fastq");
        assert!(
            merge_and_shuffle(
                &workspace,
                &InProcessShuffler,
                5,
                false,
                &out1,
                &out2,
                &mut rng
            )
            .is_err()
        );
        assert!(!out1.exists());
        Ok(())
    }
}
