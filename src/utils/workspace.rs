// Scoped ownership of the run's temporary files. Every intermediate
// artifact (per-amplicon generator output, concatenated streams, the
// shuffle key) lives under a run-specific prefix in one directory, so
// cleanup is a prefix sweep that runs on every exit path via Drop.

use super::file_tools::check_create_dir;
use anyhow::Result;
use chrono::Local;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

pub struct ScopedTempWorkspace {
    dir: PathBuf,
    prefix: String,
    keep: bool,
}

impl ScopedTempWorkspace {
    pub fn new(dir: &Path, keep: bool) -> Result<Self> {
        check_create_dir(dir)?;
        // Timestamp plus a random token so concurrent runs sharing a
        // temp directory never collide. The token comes from the
        // global entropy source, not the seeded run RNG, so workspace
        // naming does not perturb reproducible sampling.
        let prefix = format!(
            "tmp.amx.{}.{:04x}.",
            Local::now().format("%Y%m%dT%H%M%S"),
            rand::random::<u16>()
        );
        info!("Temp workspace prefix: {}{}", dir.display(), &prefix);
        Ok(ScopedTempWorkspace {
            dir: dir.to_path_buf(),
            prefix,
            keep,
        })
    }

    /// Path for a run-level artifact under the workspace prefix.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, name))
    }

    /// Output prefix for one amplicon's generator invocation. The
    /// generator appends "1.fq" / "2.fq" to this.
    pub fn amplicon_prefix(&self, short_name: &str) -> PathBuf {
        self.file(&format!("{}.", short_name))
    }

    /// All workspace files whose names end with `suffix`, in
    /// lexicographic order.
    pub fn matching_files(&self, suffix: &str) -> Result<Vec<PathBuf>> {
        let mut matches = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&self.prefix) && name.ends_with(suffix) {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches)
    }

    fn remove_all(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(&self.prefix)
            {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl Drop for ScopedTempWorkspace {
    fn drop(&mut self) {
        if self.keep {
            info!(
                "Keeping temporary files under {}{}*",
                self.dir.display(),
                self.prefix
            );
            return;
        }
        match self.remove_all() {
            Ok(removed) => info!("Removed {} temporary files", removed),
            Err(e) => warn!("Could not clean up temp workspace: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_cleanup_removes_only_own_prefix() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let unrelated = tmp_dir.path().join("keep_me.txt");
        fs::write(&unrelated, "precious")?;

        let owned;
        {
            let workspace = ScopedTempWorkspace::new(tmp_dir.path(), false)?;
            owned = workspace.file("scratch.fq");
            fs::write(&owned, "@r/1\nA\n+\nI\n")?;
            assert!(owned.exists());
        }
        assert!(!owned.exists());
        assert!(unrelated.exists());
        Ok(())
    }

    #[test]
    fn test_cleanup_runs_on_error_paths() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let workspace = ScopedTempWorkspace::new(tmp_dir.path(), false)?;
        let owned = workspace.file("doomed");
        fs::write(&owned, "x")?;
        let result: Result<()> = (move || {
            let _workspace = workspace;
            anyhow::bail!("simulated pipeline failure")
        })();
        assert!(result.is_err());
        assert!(!owned.exists());
        Ok(())
    }

    #[test]
    fn test_keep_disarms_cleanup() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let owned;
        {
            let workspace = ScopedTempWorkspace::new(tmp_dir.path(), true)?;
            owned = workspace.file("survivor");
            fs::write(&owned, "x")?;
        }
        assert!(owned.exists());
        Ok(())
    }

    #[test]
    fn test_matching_files_sorted() -> Result<()> {
        let tmp_dir = TempDir::new("amplimix")?;
        let workspace = ScopedTempWorkspace::new(tmp_dir.path(), false)?;
        for name in ["zeta.1.fq", "alpha.1.fq", "alpha.2.fq"] {
            fs::write(workspace.file(name), "x")?;
        }
        let mate1 = workspace.matching_files("1.fq")?;
        assert_eq!(mate1.len(), 2);
        assert!(mate1[0].to_string_lossy().contains("alpha"));
        assert!(mate1[1].to_string_lossy().contains("zeta"));
        Ok(())
    }
}
