//! External interfaces the core consumes but never implements.
//!
//! Dialect-specific SQL generation and live-schema inspection are the
//! out-of-scope "external collaborators"; this module only defines the
//! shapes the core is written against. `crate::drivers::memory` ships one
//! reference implementation sufficient to exercise every core code path.

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::realm::{Change, Plan, Realm, Schema};

/// Options threaded through diff/plan/apply calls that a real driver would
/// interpret (dialect quirks, "if not exists", etc). Opaque to the core.
pub type DriverOpts = std::collections::HashMap<String, String>;

/// The result of an `exec`/`query` round-trip.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Row {
    pub columns: Vec<(String, String)>,
}

/// The capability set a dialect-specific database adapter provides.
/// Implemented once per target DBMS outside this crate's scope; the core is
/// written entirely against this trait.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn exec(&self, sql: &str, args: &[String]) -> CoreResult<ExecResult>;
    async fn query(&self, sql: &str, args: &[String]) -> CoreResult<Vec<Row>>;

    async fn inspect_realm(&self, opts: &DriverOpts) -> CoreResult<Realm>;
    async fn inspect_schema(&self, name: &str, opts: &DriverOpts) -> CoreResult<Schema>;

    async fn realm_diff(&self, from: &Realm, to: &Realm) -> CoreResult<Vec<Change>>;
    async fn schema_diff(&self, from: &Schema, to: &Schema) -> CoreResult<Vec<Change>>;
    async fn table_diff(
        &self,
        from: Option<&crate::realm::Table>,
        to: Option<&crate::realm::Table>,
    ) -> CoreResult<Vec<Change>>;

    async fn plan_changes(
        &self,
        name: &str,
        changes: &[Change],
        opts: &DriverOpts,
    ) -> CoreResult<Plan>;
    async fn apply_changes(&self, changes: &[Change], opts: &DriverOpts) -> CoreResult<()>;

    /// Transaction scoping hooks the executor drives per `TxMode`.
    /// Default to no-ops for drivers without real transaction boundaries
    /// (e.g. `MemoryDriver`, which mutates its realm immediately).
    async fn begin(&self) -> CoreResult<()> {
        Ok(())
    }
    async fn commit(&self) -> CoreResult<()> {
        Ok(())
    }
    async fn rollback(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Downcast hooks for the optional capabilities below. A driver that
    /// doesn't implement one simply returns `None`.
    fn as_locker(&self) -> Option<&dyn Locker> {
        None
    }
    fn as_snapshoter(&self) -> Option<&dyn Snapshoter> {
        None
    }
    fn as_clean_checker(&self) -> Option<&dyn CleanChecker> {
        None
    }
    fn as_normalizer(&self) -> Option<&dyn Normalizer> {
        None
    }
}

/// A held advisory lock; releasing it is the caller's responsibility via
/// `unlock`, with release guaranteed on all exit paths.
#[async_trait]
pub trait LockGuard: Send + Sync {
    async fn unlock(&self) -> CoreResult<()>;
}

#[async_trait]
pub trait Locker: Send + Sync {
    /// `timeout` of `Duration::ZERO` means a non-blocking attempt.
    async fn lock(
        &self,
        name: &str,
        timeout: std::time::Duration,
    ) -> CoreResult<Box<dyn LockGuard>>;
}

#[async_trait]
pub trait RestoreGuard: Send + Sync {
    async fn restore(&self) -> CoreResult<()>;
}

#[async_trait]
pub trait Snapshoter: Send + Sync {
    async fn snapshot(&self) -> CoreResult<Box<dyn RestoreGuard>>;
}

#[async_trait]
pub trait CleanChecker: Send + Sync {
    async fn check_clean(&self, revision_table: &str) -> CoreResult<()>;
}

#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize_realm(&self, realm: &Realm) -> CoreResult<Realm>;
    async fn normalize_schema(&self, schema: &Schema) -> CoreResult<Schema>;
}

/// Supplies the "desired" side of a diff. The core never parses a
/// declarative configuration language itself; it consumes whatever realm a
/// `StateReader` hands back.
#[async_trait]
pub trait StateReader: Send + Sync {
    async fn read_state(&self) -> CoreResult<Realm>;
}
