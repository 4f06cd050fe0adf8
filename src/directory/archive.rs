//! Archive-backed directory: a directory serialized as a single
//! gzip-compressed tarball, for shipping a migration set over the wire.
//! Round-trips bytes and names exactly via `tar::Archive` entries.

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, Header};

use super::dialects::{DefaultDialect, NameDialect};
use super::memory::MemoryDirectory;
use super::{Directory, File};
use crate::error::{CoreError, CoreResult};

/// Wraps a [`MemoryDirectory`] for in-process reads/writes, and exposes
/// `to_bytes`/`from_bytes` to move the whole directory as a `.tar.gz` blob.
pub struct ArchiveDirectory {
    inner: MemoryDirectory,
}

impl Default for ArchiveDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveDirectory {
    pub fn new() -> Self {
        ArchiveDirectory {
            inner: MemoryDirectory::new(),
        }
    }

    pub fn from_bytes(gz_tar: &[u8]) -> CoreResult<Self> {
        let decoder = GzDecoder::new(Cursor::new(gz_tar));
        let mut archive = Archive::new(decoder);
        let dir = ArchiveDirectory::new();

        for entry in archive
            .entries()
            .map_err(|e| CoreError::Other(format!("reading archive: {e}")))?
        {
            let mut entry = entry.map_err(|e| CoreError::Other(format!("reading entry: {e}")))?;
            let path = entry
                .path()
                .map_err(|e| CoreError::Other(format!("entry path: {e}")))?
                .to_path_buf();
            let name = path
                .to_str()
                .ok_or_else(|| CoreError::Other("non-utf8 archive entry name".to_string()))?
                .to_string();
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| CoreError::Other(format!("reading entry bytes: {e}")))?;
            dir.inner.write(&name, &bytes)?;
        }
        Ok(dir)
    }

    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = Builder::new(encoder);

        // Include the sum file too, if present, so the round trip is exact.
        let mut all: Vec<(String, Vec<u8>)> = self
            .inner
            .list()?
            .into_iter()
            .map(|f| (f.name, f.bytes))
            .collect();
        if let Ok(sum_bytes) = self.inner.open(super::SUM_FILE_NAME) {
            all.push((super::SUM_FILE_NAME.to_string(), sum_bytes));
        }
        all.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, bytes) in all {
            let mut header = Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, &name, Cursor::new(bytes))
                .map_err(|e| CoreError::Other(format!("writing entry: {e}")))?;
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| CoreError::Other(format!("finishing archive: {e}")))?;
        encoder
            .finish()
            .map_err(|e| CoreError::Other(format!("finishing gzip: {e}")))
    }
}

impl Directory for ArchiveDirectory {
    fn list(&self) -> CoreResult<Vec<File>> {
        self.inner.list()
    }

    fn open(&self, name: &str) -> CoreResult<Vec<u8>> {
        self.inner.open(name)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> CoreResult<()> {
        self.inner.write(name, bytes)
    }

    fn name_dialect(&self) -> &dyn NameDialect {
        &DEFAULT
    }
}

static DEFAULT: DefaultDialect = DefaultDialect;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes_and_names() {
        let dir = ArchiveDirectory::new();
        dir.write("1_init.sql", b"CREATE TABLE t (id int);").unwrap();
        dir.write("2_more.sql", b"CREATE TABLE u (id int);").unwrap();
        let sum = dir.sum().unwrap();
        dir.write_sum(&sum).unwrap();

        let bytes = dir.to_bytes().unwrap();
        let restored = ArchiveDirectory::from_bytes(&bytes).unwrap();

        let mut original_names: Vec<String> =
            dir.list().unwrap().into_iter().map(|f| f.name).collect();
        let mut restored_names: Vec<String> = restored
            .list()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        original_names.sort();
        restored_names.sort();
        assert_eq!(original_names, restored_names);
        assert_eq!(
            restored.open("1_init.sql").unwrap(),
            b"CREATE TABLE t (id int);"
        );
        assert!(restored.validate().is_ok());
    }
}
