//! Migration directory store: an append-only, content-hashed
//! collection of SQL files with integrity verification, checkpoint support,
//! and multiple on-disk layout dialects.

pub mod archive;
pub mod dialects;
pub mod local;
pub mod memory;

use crate::error::{ChecksumDivergence, CoreError, CoreResult};
use crate::hash::{hash_file, hash_total, H1};
use crate::lexer::{self, Statement};
use dialects::NameDialect;

/// The reserved name of the integrity sidecar.
pub const SUM_FILE_NAME: &str = "atlas.sum";

/// An immutable migration file: name, raw bytes, and its parsed statements.
/// `version`/`description` are derived from the name by whichever
/// [`NameDialect`] the owning [`Directory`] was configured with.
#[derive(Debug, Clone)]
pub struct File {
    pub name: String,
    pub bytes: Vec<u8>,
    pub statements: Vec<Statement>,
}

impl File {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> CoreResult<Self> {
        let name = name.into();
        let text = String::from_utf8(bytes.clone()).map_err(|e| CoreError::Utf8 {
            name: name.clone(),
            source: e,
        })?;
        let statements = lexer::lex(&text)
            .map_err(|e| CoreError::file(name.clone(), None, CoreError::Other(e.to_string())))?;
        Ok(File {
            name,
            bytes,
            statements,
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// A file is a checkpoint when every statement is preceded, at the file
    /// level, by a directive declaring it so — exposed as a capability
    /// query rather than inferred from the name.
    pub fn is_checkpoint(&self) -> bool {
        self.file_directives()
            .iter()
            .any(|d| matches!(d, lexer::Directive::NoLint { classes } if classes.iter().any(|c| c == "checkpoint-marker")))
            || self.leading_marker_checkpoint()
    }

    fn leading_marker_checkpoint(&self) -> bool {
        self.text()
            .lines()
            .next()
            .map(|l| l.trim() == "-- SYSTEM:checkpoint" || l.trim() == "--SYSTEM:checkpoint")
            .unwrap_or(false)
    }

    /// Directives attached to the file as a whole (its first statement's
    /// leading comment group).
    pub fn file_directives(&self) -> Vec<lexer::Directive> {
        self.statements
            .first()
            .map(|s| {
                s.comments
                    .iter()
                    .filter_map(|c| lexer::parse_directive(c))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The integrity sidecar's parsed contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashFile {
    pub total: H1,
    pub entries: Vec<(String, H1)>,
}

impl HashFile {
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.total);
        for (name, h) in &self.entries {
            out.push_str(&format!("{name}  {h}\n"));
        }
        out
    }

    pub fn parse(text: &str) -> CoreResult<Self> {
        let mut lines = text.lines();
        let total_line = lines.next().ok_or(CoreError::MissingSumFile)?;
        let total = parse_h1(total_line).ok_or(CoreError::MissingSumFile)?;
        let mut entries = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, "  ");
            let name = parts
                .next()
                .ok_or_else(|| CoreError::Other("malformed sum file line".into()))?
                .to_string();
            let hash_part = parts
                .next()
                .ok_or_else(|| CoreError::Other("malformed sum file line".into()))?;
            let h = parse_h1(hash_part)
                .ok_or_else(|| CoreError::Other("malformed sum file hash".into()))?;
            entries.push((name, h));
        }
        Ok(HashFile { total, entries })
    }
}

fn parse_h1(s: &str) -> Option<H1> {
    let s = s.trim();
    let rest = s.strip_prefix("h1:")?;
    Some(H1::from_encoded(rest.to_string()))
}

/// Compute the current [`HashFile`] for a set of `(name, bytes)` pairs,
/// sorted by name, excluding the sum file itself.
pub fn compute_hash_file(files: &[(String, Vec<u8>)]) -> HashFile {
    let mut sorted: Vec<_> = files
        .iter()
        .filter(|(n, _)| n != SUM_FILE_NAME)
        .cloned()
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let entries: Vec<(String, H1)> = sorted
        .iter()
        .map(|(name, bytes)| (name.clone(), hash_file(name, bytes)))
        .collect();
    let total = hash_total(&entries);
    HashFile { total, entries }
}

/// Compare a recorded [`HashFile`] against the directory's live contents and
/// localize the first divergence.
pub fn diagnose_mismatch(recorded: &HashFile, live: &HashFile) -> Option<CoreError> {
    if recorded.total == live.total {
        return None;
    }
    let mut live_by_name: std::collections::HashMap<&str, &H1> =
        live.entries.iter().map(|(n, h)| (n.as_str(), h)).collect();

    for (idx, (name, recorded_hash)) in recorded.entries.iter().enumerate() {
        match live_by_name.remove(name.as_str()) {
            None => {
                return Some(CoreError::Checksum {
                    kind: ChecksumDivergence::Removed,
                    name: name.clone(),
                    line: idx + 2,
                })
            }
            Some(live_hash) if live_hash != recorded_hash => {
                return Some(CoreError::Checksum {
                    kind: ChecksumDivergence::Edited,
                    name: name.clone(),
                    line: idx + 2,
                })
            }
            Some(_) => continue,
        }
    }

    if let Some((name, _)) = live
        .entries
        .iter()
        .find(|(n, _)| live_by_name.contains_key(n.as_str()))
    {
        return Some(CoreError::Checksum {
            kind: ChecksumDivergence::Added,
            name: name.clone(),
            line: recorded.entries.len() + 2,
        });
    }

    // Totals differed but no per-entry divergence was detectable (e.g. a
    // reordering); report it against the last line as a best-effort.
    Some(CoreError::Checksum {
        kind: ChecksumDivergence::Edited,
        name: recorded
            .entries
            .last()
            .map(|(n, _)| n.clone())
            .unwrap_or_default(),
        line: recorded.entries.len() + 1,
    })
}

/// Storage-agnostic contract every directory backend (local filesystem,
/// archive, in-memory) implements.
pub trait Directory: Send + Sync {
    /// Files sorted by name, integrity sidecar excluded.
    fn list(&self) -> CoreResult<Vec<File>>;
    fn open(&self, name: &str) -> CoreResult<Vec<u8>>;
    fn write(&self, name: &str, bytes: &[u8]) -> CoreResult<()>;
    fn sum(&self) -> CoreResult<HashFile> {
        let files: Vec<(String, Vec<u8>)> = self
            .list()?
            .into_iter()
            .map(|f| (f.name, f.bytes))
            .collect();
        Ok(compute_hash_file(&files))
    }
    fn write_sum(&self, hash_file: &HashFile) -> CoreResult<()> {
        self.write(SUM_FILE_NAME, hash_file.render().as_bytes())
    }
    fn validate(&self) -> CoreResult<()> {
        let raw = match self.open(SUM_FILE_NAME) {
            Ok(bytes) => bytes,
            Err(CoreError::NotFound(_)) => return Err(CoreError::MissingSumFile),
            Err(e) => return Err(e),
        };
        let text = String::from_utf8(raw).map_err(|e| CoreError::Utf8 {
            name: SUM_FILE_NAME.to_string(),
            source: e,
        })?;
        let recorded = HashFile::parse(&text)?;
        let live = self.sum()?;
        if let Some(err) = diagnose_mismatch(&recorded, &live) {
            return Err(err);
        }
        Ok(())
    }

    fn name_dialect(&self) -> &dyn NameDialect;
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryDirectory;
    use super::*;

    #[test]
    fn integrity_round_trip() {
        let dir = MemoryDirectory::new();
        dir.write("20240101000000_init.sql", b"CREATE TABLE t (id int);")
            .unwrap();
        let sum = dir.sum().unwrap();
        dir.write_sum(&sum).unwrap();
        assert!(dir.validate().is_ok());
    }

    #[test]
    fn integrity_detects_edit() {
        let dir = MemoryDirectory::new();
        dir.write("1_init.sql", b"CREATE TABLE t (id int);").unwrap();
        let sum = dir.sum().unwrap();
        dir.write_sum(&sum).unwrap();
        dir.write("1_init.sql", b"CREATE TABLE t (id int, v text);")
            .unwrap();
        let err = dir.validate().unwrap_err();
        match err {
            CoreError::Checksum { kind, name, .. } => {
                assert_eq!(kind, ChecksumDivergence::Edited);
                assert_eq!(name, "1_init.sql");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn integrity_detects_added_file() {
        let dir = MemoryDirectory::new();
        dir.write("1_init.sql", b"CREATE TABLE t (id int);").unwrap();
        let sum = dir.sum().unwrap();
        dir.write_sum(&sum).unwrap();
        dir.write("2_more.sql", b"CREATE TABLE u (id int);").unwrap();
        let err = dir.validate().unwrap_err();
        assert!(matches!(
            err,
            CoreError::Checksum {
                kind: ChecksumDivergence::Added,
                ..
            }
        ));
    }

    #[test]
    fn integrity_detects_removed_file() {
        let dir = MemoryDirectory::new();
        dir.write("1_init.sql", b"CREATE TABLE t (id int);").unwrap();
        dir.write("2_more.sql", b"CREATE TABLE u (id int);").unwrap();
        let sum = dir.sum().unwrap();
        dir.write_sum(&sum).unwrap();
        dir.remove("2_more.sql");
        let err = dir.validate().unwrap_err();
        assert!(matches!(
            err,
            CoreError::Checksum {
                kind: ChecksumDivergence::Removed,
                ..
            }
        ));
    }

    #[test]
    fn missing_sum_file_is_distinct_sentinel() {
        let dir = MemoryDirectory::new();
        dir.write("1_init.sql", b"CREATE TABLE t (id int);").unwrap();
        assert!(matches!(dir.validate(), Err(CoreError::MissingSumFile)));
    }
}
