//! Dry-run wrapper: intercepts every mutating call as a no-op while
//! leaving inspection, diffing, and statement extraction untouched, so the
//! executor's ordering and logging behave identically to a real run.

use std::time::Duration;

use async_trait::async_trait;

use crate::driver::{
    CleanChecker, Driver, DriverOpts, ExecResult, LockGuard, Locker, Normalizer, RestoreGuard,
    Row, Snapshoter,
};
use crate::error::CoreResult;
use crate::realm::{Change, Plan, Realm, Schema, Table};

pub struct DryRunDriver<'a> {
    inner: &'a dyn Driver,
}

impl<'a> DryRunDriver<'a> {
    pub fn new(inner: &'a dyn Driver) -> Self {
        DryRunDriver { inner }
    }
}

struct NoopLockGuard;

#[async_trait]
impl LockGuard for NoopLockGuard {
    async fn unlock(&self) -> CoreResult<()> {
        Ok(())
    }
}

struct NoopRestoreGuard;

#[async_trait]
impl RestoreGuard for NoopRestoreGuard {
    async fn restore(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<'a> Driver for DryRunDriver<'a> {
    async fn exec(&self, _sql: &str, _args: &[String]) -> CoreResult<ExecResult> {
        Ok(ExecResult::default())
    }

    async fn query(&self, sql: &str, args: &[String]) -> CoreResult<Vec<Row>> {
        self.inner.query(sql, args).await
    }

    async fn inspect_realm(&self, opts: &DriverOpts) -> CoreResult<Realm> {
        self.inner.inspect_realm(opts).await
    }

    async fn inspect_schema(&self, name: &str, opts: &DriverOpts) -> CoreResult<Schema> {
        self.inner.inspect_schema(name, opts).await
    }

    async fn realm_diff(&self, from: &Realm, to: &Realm) -> CoreResult<Vec<Change>> {
        self.inner.realm_diff(from, to).await
    }

    async fn schema_diff(&self, from: &Schema, to: &Schema) -> CoreResult<Vec<Change>> {
        self.inner.schema_diff(from, to).await
    }

    async fn table_diff(&self, from: Option<&Table>, to: Option<&Table>) -> CoreResult<Vec<Change>> {
        self.inner.table_diff(from, to).await
    }

    async fn plan_changes(&self, name: &str, changes: &[Change], opts: &DriverOpts) -> CoreResult<Plan> {
        self.inner.plan_changes(name, changes, opts).await
    }

    async fn apply_changes(&self, _changes: &[Change], _opts: &DriverOpts) -> CoreResult<()> {
        Ok(())
    }

    async fn begin(&self) -> CoreResult<()> {
        Ok(())
    }
    async fn commit(&self) -> CoreResult<()> {
        Ok(())
    }
    async fn rollback(&self) -> CoreResult<()> {
        Ok(())
    }

    fn as_locker(&self) -> Option<&dyn Locker> {
        Some(self)
    }

    fn as_snapshoter(&self) -> Option<&dyn Snapshoter> {
        Some(self)
    }

    fn as_clean_checker(&self) -> Option<&dyn CleanChecker> {
        Some(self)
    }

    fn as_normalizer(&self) -> Option<&dyn Normalizer> {
        self.inner.as_normalizer()
    }
}

#[async_trait]
impl<'a> Locker for DryRunDriver<'a> {
    async fn lock(&self, _name: &str, _timeout: Duration) -> CoreResult<Box<dyn LockGuard>> {
        Ok(Box::new(NoopLockGuard))
    }
}

#[async_trait]
impl<'a> Snapshoter for DryRunDriver<'a> {
    async fn snapshot(&self) -> CoreResult<Box<dyn RestoreGuard>> {
        Ok(Box::new(NoopRestoreGuard))
    }
}

#[async_trait]
impl<'a> CleanChecker for DryRunDriver<'a> {
    async fn check_clean(&self, _revision_table: &str) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryDriver;

    #[tokio::test]
    async fn exec_and_apply_changes_are_no_ops() {
        let inner = MemoryDriver::new();
        let dry = DryRunDriver::new(&inner);
        dry.exec("CREATE TABLE anything (id int);", &[]).await.unwrap();
        let realm = dry.inspect_realm(&DriverOpts::new()).await.unwrap();
        assert!(realm.schemas.is_empty());
    }

    #[tokio::test]
    async fn lock_and_snapshot_always_succeed() {
        let inner = MemoryDriver::new();
        let dry = DryRunDriver::new(&inner);
        let guard = dry.as_locker().unwrap().lock("x", Duration::ZERO).await.unwrap();
        guard.unlock().await.unwrap();
        let restore = dry.as_snapshoter().unwrap().snapshot().await.unwrap();
        restore.restore().await.unwrap();
    }
}
