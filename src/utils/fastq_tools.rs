// Record-oriented fastq plumbing. The shuffle stage treats each
// 4-line record as an atomic unit, so this module reads and writes
// whole records rather than individual lines.

use super::file_tools::read_lines;
use anyhow::{Result, anyhow};
use std::io::Write;
use std::path::Path;

/// One 4-line fastq record: header, sequence, separator, qualities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    pub lines: [String; 4],
}

impl FastqRecord {
    /// The read identifier: header line without the leading '@' and
    /// without the trailing /1 or /2 mate suffix.
    pub fn read_id(&self) -> &str {
        let header = self.lines[0].trim_start_matches('@');
        header
            .strip_suffix("/1")
            .or_else(|| header.strip_suffix("/2"))
            .unwrap_or(header)
    }
}

/// Reads a fastq file into records. Errors if the line count is not a
/// multiple of four, which would mean a truncated or corrupt file.
pub fn read_fastq_records(path: &Path) -> Result<Vec<FastqRecord>> {
    let mut records = Vec::new();
    let mut pending: Vec<String> = Vec::with_capacity(4);
    for line in read_lines(path)? {
        pending.push(line?);
        if pending.len() == 4 {
            let lines: [String; 4] = pending
                .drain(..)
                .collect::<Vec<_>>()
                .try_into()
                .map_err(|_| anyhow!("record assembly failed"))?;
            records.push(FastqRecord { lines });
        }
    }
    if !pending.is_empty() {
        return Err(anyhow!(
            "{} has {} trailing lines, not a whole fastq record",
            path.display(),
            pending.len()
        ));
    }
    Ok(records)
}

/// Writes one record to the given writer.
pub fn write_fastq_record<W: Write>(outfile: &mut W, record: &FastqRecord) -> Result<()> {
    for line in &record.lines {
        writeln!(outfile, "{}", line)?;
    }
    Ok(())
}
