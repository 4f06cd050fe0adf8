//! Content hashing for the directory's integrity sidecar.
//!
//! Per-file hash is `H(filename‖len(filename)‖contents‖len(contents))`; the
//! total hash is `H(concat(all per-file entries))`. Both use SHA-256,
//! rendered as `h1:<base64>` the way the integrity file format requires.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

/// A single `h1:<base64>` hash value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H1(String);

impl H1 {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reconstruct an already-encoded base64 digest, e.g. when parsing a sum
    /// file line. Bypasses hashing.
    pub fn from_encoded(raw: impl Into<String>) -> Self {
        H1(raw.into())
    }
}

impl std::fmt::Display for H1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h1:{}", self.0)
    }
}

fn digest_to_h1(bytes: &[u8]) -> H1 {
    let digest = Sha256::digest(bytes);
    H1(STANDARD.encode(digest))
}

/// Per-file hash: `H(name‖len(name)‖contents‖len(contents))`.
pub fn hash_file(name: &str, contents: &[u8]) -> H1 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update((name.len() as u64).to_be_bytes());
    hasher.update(contents);
    hasher.update((contents.len() as u64).to_be_bytes());
    H1(STANDARD.encode(hasher.finalize()))
}

/// Total hash over the concatenation of every file's per-file hash entry,
/// in the order the entries are listed (sorted by name).
pub fn hash_total(entries: &[(String, H1)]) -> H1 {
    let mut concat = Vec::new();
    for (name, h) in entries {
        concat.extend_from_slice(name.as_bytes());
        concat.extend_from_slice(h.as_str().as_bytes());
    }
    digest_to_h1(&concat)
}

/// Hash a migration file's contents the way a revision row stamps it:
/// name-qualified so renaming without editing still changes the hash.
pub fn hash_for_revision(name: &str, contents: &[u8]) -> String {
    hash_file(name, contents).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = hash_file("1_init.sql", b"CREATE TABLE t (id int);");
        let b = hash_file("1_init.sql", b"CREATE TABLE t (id int);");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_sensitive_to_name_and_contents() {
        let a = hash_file("1_init.sql", b"CREATE TABLE t (id int);");
        let b = hash_file("1_init_renamed.sql", b"CREATE TABLE t (id int);");
        let c = hash_file("1_init.sql", b"CREATE TABLE t (id int, v text);");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn total_hash_depends_on_order() {
        let e1 = (
            "a.sql".to_string(),
            hash_file("a.sql", b"x"),
        );
        let e2 = (
            "b.sql".to_string(),
            hash_file("b.sql", b"y"),
        );
        let ordered = hash_total(&[e1.clone(), e2.clone()]);
        let reordered = hash_total(&[e2, e1]);
        assert_ne!(ordered, reordered);
    }
}
