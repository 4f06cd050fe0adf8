//! `ChangeDetector` variants: decide which already-reviewed files form
//! the replay `base` and which new files are the `feat` set under analysis.

use crate::directory::{Directory, File};
use crate::error::{CoreError, CoreResult};

/// Splits a file list into a replayable `base` and a `feat` set to analyze.
pub trait ChangeDetector: Send + Sync {
    fn detect(&self, files: &[File]) -> CoreResult<(Vec<File>, Vec<File>)>;
}

/// Treats the last `n` files as the feature set; `n < 0` means "everything
/// is new" (an empty base).
pub struct LatestN {
    pub n: i64,
}

impl ChangeDetector for LatestN {
    fn detect(&self, files: &[File]) -> CoreResult<(Vec<File>, Vec<File>)> {
        if self.n < 0 {
            return Ok((Vec::new(), files.to_vec()));
        }
        let n = (self.n as usize).min(files.len());
        let split = files.len() - n;
        Ok((files[..split].to_vec(), files[split..].to_vec()))
    }
}

/// Compares checksums against another directory (e.g. the deployed
/// production directory); the matching leading run is `base`, the
/// remainder is `feat`.
pub struct DirectoryDiff<'a> {
    pub other: &'a dyn Directory,
}

impl<'a> ChangeDetector for DirectoryDiff<'a> {
    fn detect(&self, files: &[File]) -> CoreResult<(Vec<File>, Vec<File>)> {
        let other_files = self.other.list()?;
        let mut common = 0;
        while common < files.len()
            && common < other_files.len()
            && files[common].name == other_files[common].name
            && files[common].bytes == other_files[common].bytes
        {
            common += 1;
        }
        Ok((files[..common].to_vec(), files[common..].to_vec()))
    }
}

/// Invokes the configured source-control tool to list files added between
/// `base_branch` and `HEAD`; everything from the first added file onward is
/// `feat` (linear history is assumed).
pub struct VcsDiff {
    pub tool: String,
    pub base_branch: String,
}

impl ChangeDetector for VcsDiff {
    fn detect(&self, files: &[File]) -> CoreResult<(Vec<File>, Vec<File>)> {
        let output = std::process::Command::new(&self.tool)
            .args([
                "diff",
                "--name-only",
                "--diff-filter=A",
                &format!("{}..HEAD", self.base_branch),
            ])
            .output()
            .map_err(|e| CoreError::Other(format!("failed to invoke {}: {e}", self.tool)))?;

        if !output.status.success() {
            return Err(CoreError::Other(format!(
                "{} diff failed: {}",
                self.tool,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let added: std::collections::HashSet<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        match files.iter().position(|f| added.contains(&f.name)) {
            Some(idx) => Ok((files[..idx].to_vec(), files[idx..].to_vec())),
            None => Ok((files.to_vec(), Vec::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::MemoryDirectory;

    fn file(name: &str) -> File {
        File::new(name.to_string(), b"CREATE TABLE t (id int);".to_vec()).unwrap()
    }

    #[test]
    fn latest_n_splits_from_the_end() {
        let files = vec![file("1.sql"), file("2.sql"), file("3.sql")];
        let (base, feat) = LatestN { n: 1 }.detect(&files).unwrap();
        assert_eq!(base.len(), 2);
        assert_eq!(feat.len(), 1);
        assert_eq!(feat[0].name, "3.sql");
    }

    #[test]
    fn negative_n_treats_everything_as_new() {
        let files = vec![file("1.sql"), file("2.sql")];
        let (base, feat) = LatestN { n: -1 }.detect(&files).unwrap();
        assert!(base.is_empty());
        assert_eq!(feat.len(), 2);
    }

    #[test]
    fn directory_diff_finds_common_prefix() {
        let other = MemoryDirectory::new();
        other.write("1.sql", b"CREATE TABLE t (id int);").unwrap();

        let files = vec![file("1.sql"), file("2.sql")];
        let (base, feat) = DirectoryDiff { other: &other }.detect(&files).unwrap();
        assert_eq!(base.len(), 1);
        assert_eq!(feat.len(), 1);
        assert_eq!(feat[0].name, "2.sql");
    }
}
