// Various file tools needed throughout the code.

use anyhow::Result;
use log::warn;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Error, Read, Write};
use std::path::Path;
use std::fs;

pub fn read_lines(filename: &Path) -> io::Result<io::Lines<BufReader<File>>> {
    // This creates a buffer to read lines
    let file = File::open(filename)?;
    Ok(BufReader::new(file).lines())
}

pub fn open_file(filename: &Path, overwrite_file: bool) -> Result<File, Error> {
    if overwrite_file && filename.exists() {
        File::options().truncate(true).write(true).open(filename)
    } else {
        File::options().create_new(true).append(true).open(filename)
    }
}

pub fn check_create_dir(path_to_check: &Path) -> Result<()> {
    if !path_to_check.is_dir() {
        warn!("Directory not found, creating: {:?}", path_to_check);
        fs::create_dir_all(path_to_check)?
    }
    Ok(())
}

/// Concatenates the given files, in order, into a single output file.
pub fn concat_files(inputs: &[impl AsRef<Path>], output: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(output)?);
    for input in inputs {
        let mut reader = BufReader::new(File::open(input.as_ref())?);
        io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Moves a finished temp file to its final name. Rename is atomic on
/// the same filesystem; fall back to copy + remove when the temp dir
/// lives on a different mount.
pub fn promote_file(temp: &Path, fin: &Path) -> Result<()> {
    if fs::rename(temp, fin).is_err() {
        fs::copy(temp, fin)?;
        fs::remove_file(temp)?;
    }
    Ok(())
}

/// Reads a whole file into a byte vector.
pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    Ok(bytes)
}
