//! In-memory directory backend: for tests and ephemeral planning.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::dialects::{DefaultDialect, NameDialect};
use super::{Directory, File, SUM_FILE_NAME};
use crate::error::{CoreError, CoreResult};

/// A directory backed by a plain in-process map, sorted by name.
pub struct MemoryDirectory {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    dialect: Box<dyn NameDialect>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        MemoryDirectory {
            files: RwLock::new(BTreeMap::new()),
            dialect: Box::new(DefaultDialect),
        }
    }

    pub fn with_dialect(dialect: Box<dyn NameDialect>) -> Self {
        MemoryDirectory {
            files: RwLock::new(BTreeMap::new()),
            dialect,
        }
    }

    /// Test helper: drop a file entirely (not exposed via the public
    /// `Directory` contract, which is append-only by convention).
    pub fn remove(&self, name: &str) {
        self.files.write().unwrap().remove(name);
    }
}

impl Directory for MemoryDirectory {
    fn list(&self) -> CoreResult<Vec<File>> {
        let files = self.files.read().unwrap();
        files
            .iter()
            .filter(|(name, _)| name.as_str() != SUM_FILE_NAME)
            .map(|(name, bytes)| File::new(name.clone(), bytes.clone()))
            .collect()
    }

    fn open(&self, name: &str) -> CoreResult<Vec<u8>> {
        self.files
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(name.to_string()))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> CoreResult<()> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CoreError::Utf8 {
            name: name.to_string(),
            source: e,
        })?;
        self.files
            .write()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn name_dialect(&self) -> &dyn NameDialect {
        self.dialect.as_ref()
    }
}
