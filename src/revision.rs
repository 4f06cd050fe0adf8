//! Revision log: a durable per-version execution record, persisted in the
//! target database via `sqlx::AnyPool` and abstracted behind a read/write
//! trait so dry-run and replay callers can swap in a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};

use crate::error::{CoreError, CoreResult};

/// Default name of the revision table.
pub const DEFAULT_REVISION_TABLE: &str = "atlas_schema_revisions";

/// Tiny inline bitflags implementation, avoiding the `bitflags` crate for a
/// four-bit mask while keeping the same call shape (`contains`, `bits`,
/// `from_bits_truncate`) its macro would generate.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($ty);

        impl $name {
            $(pub const $flag: $name = $name($value);)*

            pub fn bits(&self) -> $ty {
                self.0
            }

            pub fn from_bits_truncate(bits: $ty) -> Self {
                let mask = 0 $(| Self::$flag.0)*;
                $name(bits & mask)
            }

            pub fn contains(&self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

bitflags_like! {
    /// Composable execution-kind flags.
    pub struct RevisionType: u8 {
        const BASELINE = 0b0001;
        const EXECUTE = 0b0010;
        const RESOLVED = 0b0100;
        const CHECKPOINT = 0b1000;
    }
}

/// A durable record of one file's execution against a target.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub version: String,
    pub description: String,
    pub kind: RevisionType,
    pub applied: u32,
    pub total: u32,
    pub executed_at: DateTime<Utc>,
    pub execution_time: std::time::Duration,
    pub error: Option<String>,
    pub error_stmt: Option<String>,
    pub hash: String,
    pub partial_hashes: Vec<String>,
    pub operator_version: String,
}

impl Revision {
    /// A file is the resume point when it was partially applied and never
    /// marked `resolved`.
    pub fn is_resume_point(&self) -> bool {
        self.applied < self.total && !self.kind.contains(RevisionType::RESOLVED)
    }
}

/// Persist, read, and update per-version execution records.
#[async_trait]
pub trait RevisionReadWriter: Send + Sync {
    async fn read_revisions(&self) -> CoreResult<Vec<Revision>>;
    async fn write_revision(&self, revision: &Revision) -> CoreResult<()>;
    async fn delete_revision(&self, version: &str) -> CoreResult<()>;
    /// Idempotently ensure the backing table exists.
    async fn migrate(&self) -> CoreResult<()>;
}

/// For dry-run/replay modes: every call succeeds and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopRevisionReadWriter;

#[async_trait]
impl RevisionReadWriter for NopRevisionReadWriter {
    async fn read_revisions(&self) -> CoreResult<Vec<Revision>> {
        Ok(Vec::new())
    }

    async fn write_revision(&self, _revision: &Revision) -> CoreResult<()> {
        Ok(())
    }

    async fn delete_revision(&self, _version: &str) -> CoreResult<()> {
        Ok(())
    }

    async fn migrate(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Concrete revision log backed by `sqlx::AnyPool`. Schema location is a
/// first-class parameter: when `schema` is `Some`, the table is qualified
/// with it; otherwise it lives in the default schema.
pub struct SqlRevisionReadWriter {
    pool: AnyPool,
    table: String,
    schema: Option<String>,
}

impl SqlRevisionReadWriter {
    pub fn new(pool: AnyPool, schema: Option<String>) -> Self {
        SqlRevisionReadWriter {
            pool,
            table: DEFAULT_REVISION_TABLE.to_string(),
            schema,
        }
    }

    fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table),
            None => self.table.clone(),
        }
    }
}

#[async_trait]
impl RevisionReadWriter for SqlRevisionReadWriter {
    async fn read_revisions(&self) -> CoreResult<Vec<Revision>> {
        let table = self.qualified_table();
        let rows = sqlx::query(&format!(
            "SELECT version, description, type, applied, total, executed_at, \
             execution_time, error, error_stmt, hash, partial_hashes, operator_version \
             FROM {table} ORDER BY version ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Driver(e.to_string()))?;

        rows.into_iter().map(row_to_revision).collect()
    }

    async fn write_revision(&self, revision: &Revision) -> CoreResult<()> {
        let table = self.qualified_table();
        let partial_hashes = serde_json::to_string(&revision.partial_hashes)
            .map_err(|e| CoreError::Other(e.to_string()))?;
        sqlx::query(&format!(
            "INSERT INTO {table} (version, description, type, applied, total, executed_at, \
             execution_time, error, error_stmt, hash, partial_hashes, operator_version) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12) \
             ON CONFLICT (version) DO UPDATE SET \
             description = excluded.description, type = excluded.type, \
             applied = excluded.applied, total = excluded.total, \
             executed_at = excluded.executed_at, execution_time = excluded.execution_time, \
             error = excluded.error, error_stmt = excluded.error_stmt, hash = excluded.hash, \
             partial_hashes = excluded.partial_hashes, operator_version = excluded.operator_version"
        ))
        .bind(&revision.version)
        .bind(&revision.description)
        .bind(revision.kind.bits() as i32)
        .bind(revision.applied as i64)
        .bind(revision.total as i64)
        .bind(revision.executed_at)
        .bind(revision.execution_time.as_nanos() as i64)
        .bind(&revision.error)
        .bind(&revision.error_stmt)
        .bind(&revision.hash)
        .bind(partial_hashes)
        .bind(&revision.operator_version)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Driver(e.to_string()))?;
        Ok(())
    }

    async fn delete_revision(&self, version: &str) -> CoreResult<()> {
        let table = self.qualified_table();
        sqlx::query(&format!("DELETE FROM {table} WHERE version = $1"))
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Driver(e.to_string()))?;
        Ok(())
    }

    async fn migrate(&self) -> CoreResult<()> {
        let table = self.qualified_table();
        if let Some(schema) = &self.schema {
            let _ = sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
                .execute(&self.pool)
                .await;
        }
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             version TEXT PRIMARY KEY, \
             description TEXT NOT NULL, \
             type INTEGER NOT NULL, \
             applied INTEGER NOT NULL, \
             total INTEGER NOT NULL, \
             executed_at TIMESTAMP NOT NULL, \
             execution_time INTEGER NOT NULL, \
             error TEXT, \
             error_stmt TEXT, \
             hash TEXT NOT NULL, \
             partial_hashes TEXT, \
             operator_version TEXT NOT NULL\
             )"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Driver(e.to_string()))?;
        Ok(())
    }
}

fn row_to_revision(row: sqlx::any::AnyRow) -> CoreResult<Revision> {
    let partial_hashes_raw: Option<String> = row
        .try_get("partial_hashes")
        .map_err(|e| CoreError::Driver(e.to_string()))?;
    let partial_hashes = partial_hashes_raw
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    let exec_nanos: i64 = row
        .try_get("execution_time")
        .map_err(|e| CoreError::Driver(e.to_string()))?;

    Ok(Revision {
        version: row.try_get("version").map_err(|e| CoreError::Driver(e.to_string()))?,
        description: row
            .try_get("description")
            .map_err(|e| CoreError::Driver(e.to_string()))?,
        kind: RevisionType::from_bits_truncate(
            row.try_get::<i32, _>("type")
                .map_err(|e| CoreError::Driver(e.to_string()))? as u8,
        ),
        applied: row.try_get::<i64, _>("applied").map_err(|e| CoreError::Driver(e.to_string()))? as u32,
        total: row.try_get::<i64, _>("total").map_err(|e| CoreError::Driver(e.to_string()))? as u32,
        executed_at: row
            .try_get("executed_at")
            .map_err(|e| CoreError::Driver(e.to_string()))?,
        execution_time: std::time::Duration::from_nanos(exec_nanos.max(0) as u64),
        error: row.try_get("error").map_err(|e| CoreError::Driver(e.to_string()))?,
        error_stmt: row
            .try_get("error_stmt")
            .map_err(|e| CoreError::Driver(e.to_string()))?,
        hash: row.try_get("hash").map_err(|e| CoreError::Driver(e.to_string()))?,
        partial_hashes,
        operator_version: row
            .try_get("operator_version")
            .map_err(|e| CoreError::Driver(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_type_composes_and_checks_flags() {
        let kind = RevisionType::EXECUTE | RevisionType::RESOLVED;
        assert!(kind.contains(RevisionType::EXECUTE));
        assert!(kind.contains(RevisionType::RESOLVED));
        assert!(!kind.contains(RevisionType::BASELINE));
    }

    #[test]
    fn partial_apply_without_resolved_is_resume_point() {
        let rev = Revision {
            version: "1".into(),
            description: "init".into(),
            kind: RevisionType::EXECUTE,
            applied: 1,
            total: 2,
            executed_at: Utc::now(),
            execution_time: std::time::Duration::from_secs(0),
            error: Some("boom".into()),
            error_stmt: Some("ERROR SYNTAX;".into()),
            hash: "h1:x".into(),
            partial_hashes: vec![],
            operator_version: "0.1.0".into(),
        };
        assert!(rev.is_resume_point());
    }

    #[test]
    fn resolved_partial_apply_is_not_a_resume_point() {
        let rev = Revision {
            version: "1".into(),
            description: "init".into(),
            kind: RevisionType::EXECUTE | RevisionType::RESOLVED,
            applied: 1,
            total: 2,
            executed_at: Utc::now(),
            execution_time: std::time::Duration::from_secs(0),
            error: None,
            error_stmt: None,
            hash: "h1:x".into(),
            partial_hashes: vec![],
            operator_version: "0.1.0".into(),
        };
        assert!(!rev.is_resume_point());
    }
}
