//! Filesystem-backed directory: files live as plain `.sql` files under a
//! base path, listed flat (one level, matching the default dialect).

use std::fs;
use std::path::{Path, PathBuf};

use super::dialects::{DefaultDialect, NameDialect};
use super::{Directory, File, SUM_FILE_NAME};
use crate::error::{CoreError, CoreResult};

pub struct LocalDirectory {
    root: PathBuf,
    dialect: Box<dyn NameDialect>,
}

impl LocalDirectory {
    pub fn open(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(LocalDirectory {
            root,
            dialect: Box::new(DefaultDialect),
        })
    }

    pub fn with_dialect(root: impl Into<PathBuf>, dialect: Box<dyn NameDialect>) -> CoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(LocalDirectory { root, dialect })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Directory for LocalDirectory {
    fn list(&self) -> CoreResult<Vec<File>> {
        let mut names: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n != SUM_FILE_NAME)
            .collect();
        names.sort();

        names
            .into_iter()
            .map(|name| {
                let bytes = fs::read(self.path_for(&name))?;
                File::new(name, bytes)
            })
            .collect()
    }

    fn open(&self, name: &str) -> CoreResult<Vec<u8>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(CoreError::NotFound(name.to_string()));
        }
        Ok(fs::read(path)?)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> CoreResult<()> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CoreError::Utf8 {
            name: name.to_string(),
            source: e,
        })?;
        let path = self.path_for(name);
        let tmp = path.with_extension("tmp-write");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn name_dialect(&self) -> &dyn NameDialect {
        self.dialect.as_ref()
    }
}

pub fn default_root() -> &'static Path {
    Path::new("migrations")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_list_then_open_round_trips() {
        let dir = tempdir().unwrap();
        let store = LocalDirectory::open(dir.path()).unwrap();
        store
            .write("1_init.sql", b"CREATE TABLE t (id int);")
            .unwrap();
        let files = store.list().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "1_init.sql");
        let bytes = store.open("1_init.sql").unwrap();
        assert_eq!(bytes, b"CREATE TABLE t (id int);");
    }

    #[test]
    fn sum_file_excluded_from_listing() {
        let dir = tempdir().unwrap();
        let store = LocalDirectory::open(dir.path()).unwrap();
        store.write("1_init.sql", b"CREATE TABLE t (id int);").unwrap();
        let sum = store.sum().unwrap();
        store.write_sum(&sum).unwrap();
        let files = store.list().unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn open_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let store = LocalDirectory::open(dir.path()).unwrap();
        assert!(matches!(store.open("nope.sql"), Err(CoreError::NotFound(_))));
    }
}
