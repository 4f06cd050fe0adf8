//! `MemoryDriver`: the one reference [`Driver`] this crate ships, backed
//! by an in-process [`Realm`] instead of a real DBMS. It understands a small
//! subset of SQL (`CREATE`/`DROP SCHEMA`, `CREATE`/`DROP TABLE`, `ALTER TABLE
//! ADD/DROP COLUMN`) — enough to exercise the planner, executor, and replay
//! pipeline end to end in tests and to back the CLI's scratch-less demo mode.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::driver::{
    CleanChecker, Driver, DriverOpts, ExecResult, LockGuard, Locker, Normalizer, RestoreGuard,
    Row, Snapshoter,
};
use crate::error::{CoreError, CoreResult};
use crate::realm::{Change, ChangeKind, Column, Plan, Realm, Schema, Table};

static CREATE_SCHEMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^create schema (?:if not exists )?(\w+)").unwrap());
static DROP_SCHEMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^drop schema (?:if exists )?(\w+)").unwrap());
static CREATE_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^create table (?:if not exists )?(?:(\w+)\.)?(\w+)\s*\((.*)\)").unwrap());
static DROP_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^drop table (?:if exists )?(?:(\w+)\.)?(\w+)").unwrap());
static ADD_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^alter table (?:(\w+)\.)?(\w+) add column (?:if not exists )?(\w+)\s+(\S+)").unwrap()
});
static DROP_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^alter table (?:(\w+)\.)?(\w+) drop column (?:if exists )?(\w+)").unwrap()
});

const DEFAULT_SCHEMA: &str = "public";

pub struct MemoryDriver {
    realm: RwLock<Realm>,
    locks: Mutex<HashSet<String>>,
    snapshots: Mutex<Vec<Realm>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        MemoryDriver {
            realm: RwLock::new(Realm::empty()),
            locks: Mutex::new(HashSet::new()),
            snapshots: Mutex::new(Vec::new()),
        }
    }

    pub fn seeded(realm: Realm) -> Self {
        MemoryDriver {
            realm: RwLock::new(realm),
            locks: Mutex::new(HashSet::new()),
            snapshots: Mutex::new(Vec::new()),
        }
    }

    fn apply_statement(&self, sql: &str) -> CoreResult<()> {
        let sql = sql.trim();
        let mut realm = self.realm.write().expect("realm lock poisoned");

        if let Some(caps) = CREATE_SCHEMA_RE.captures(sql) {
            realm.upsert_schema(Schema::new(caps[1].to_string()));
            return Ok(());
        }
        if let Some(caps) = DROP_SCHEMA_RE.captures(sql) {
            realm.schemas.retain(|s| s.name != caps[1]);
            return Ok(());
        }
        if let Some(caps) = CREATE_TABLE_RE.captures(sql) {
            let schema_name = caps.get(1).map(|m| m.as_str()).unwrap_or(DEFAULT_SCHEMA);
            let table_name = caps[2].to_string();
            let columns = parse_columns(&caps[3]);
            let mut table = Table::new(table_name);
            table.columns = columns;
            let schema = find_or_insert_schema(&mut realm, schema_name);
            schema.tables.retain(|t| t.name != table.name);
            schema.tables.push(table);
            return Ok(());
        }
        if let Some(caps) = DROP_TABLE_RE.captures(sql) {
            let schema_name = caps.get(1).map(|m| m.as_str()).unwrap_or(DEFAULT_SCHEMA);
            let table_name = &caps[2];
            if let Some(schema) = realm.schemas.iter_mut().find(|s| s.name == schema_name) {
                schema.tables.retain(|t| t.name != table_name);
            }
            return Ok(());
        }
        if let Some(caps) = ADD_COLUMN_RE.captures(sql) {
            let schema_name = caps.get(1).map(|m| m.as_str()).unwrap_or(DEFAULT_SCHEMA);
            let table_name = &caps[2];
            let column = Column { name: caps[3].to_string(), ty: caps[4].to_string(), attrs: vec![] };
            if let Some(schema) = realm.schemas.iter_mut().find(|s| s.name == schema_name) {
                if let Some(table) = schema.tables.iter_mut().find(|t| t.name == table_name) {
                    table.columns.retain(|c| c.name != column.name);
                    table.columns.push(column);
                }
            }
            return Ok(());
        }
        if let Some(caps) = DROP_COLUMN_RE.captures(sql) {
            let schema_name = caps.get(1).map(|m| m.as_str()).unwrap_or(DEFAULT_SCHEMA);
            let table_name = &caps[2];
            let column_name = &caps[3];
            if let Some(schema) = realm.schemas.iter_mut().find(|s| s.name == schema_name) {
                if let Some(table) = schema.tables.iter_mut().find(|t| t.name == table_name) {
                    table.columns.retain(|c| c.name != *column_name);
                }
            }
            return Ok(());
        }

        Err(CoreError::Driver(format!("memory driver cannot interpret statement: {sql}")))
    }
}

fn find_or_insert_schema<'r>(realm: &'r mut Realm, name: &str) -> &'r mut Schema {
    if !realm.schemas.iter().any(|s| s.name == name) {
        realm.schemas.push(Schema::new(name.to_string()));
    }
    realm.schemas.iter_mut().find(|s| s.name == name).expect("schema just inserted")
}

fn parse_columns(body: &str) -> Vec<Column> {
    split_top_level_commas(body)
        .into_iter()
        .filter_map(|field| {
            let field = field.trim();
            if field.is_empty() {
                return None;
            }
            let upper = field.to_uppercase();
            if upper.starts_with("PRIMARY KEY")
                || upper.starts_with("CONSTRAINT")
                || upper.starts_with("FOREIGN KEY")
                || upper.starts_with("UNIQUE")
                || upper.starts_with("CHECK")
            {
                return None;
            }
            let mut parts = field.splitn(2, char::is_whitespace);
            let name = parts.next()?.to_string();
            let ty = parts.next().unwrap_or("text").trim().to_string();
            Some(Column { name, ty, attrs: vec![] })
        })
        .collect()
}

fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                out.push(s[start..i].to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(s[start..].to_string());
    out
}

fn render_create_table(schema: &str, table: &Table) -> String {
    let cols = if table.columns.is_empty() {
        "id int".to_string()
    } else {
        table
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.ty))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("CREATE TABLE {schema}.{} ({cols});", table.name)
}

fn render_drop_table(schema: &str, name: &str) -> String {
    format!("DROP TABLE {schema}.{name};")
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn exec(&self, sql: &str, _args: &[String]) -> CoreResult<ExecResult> {
        self.apply_statement(sql)?;
        Ok(ExecResult { rows_affected: 1 })
    }

    async fn query(&self, _sql: &str, _args: &[String]) -> CoreResult<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn inspect_realm(&self, _opts: &DriverOpts) -> CoreResult<Realm> {
        Ok(self.realm.read().expect("realm lock poisoned").clone())
    }

    async fn inspect_schema(&self, name: &str, _opts: &DriverOpts) -> CoreResult<Schema> {
        self.realm
            .read()
            .expect("realm lock poisoned")
            .schema(name)
            .cloned()
            .ok_or_else(|| CoreError::Other(format!("schema {name:?} not found")))
    }

    async fn realm_diff(&self, from: &Realm, to: &Realm) -> CoreResult<Vec<Change>> {
        let mut changes = Vec::new();
        for schema in &to.schemas {
            match from.schema(&schema.name) {
                None => {
                    changes.push(Change::new(
                        ChangeKind::AddSchema { name: schema.name.clone() },
                        format!("CREATE SCHEMA {};", schema.name),
                    ));
                    for table in &schema.tables {
                        changes.push(Change::new(
                            ChangeKind::AddTable { table: table.clone(), schema: schema.name.clone() },
                            render_create_table(&schema.name, table),
                        ));
                    }
                }
                Some(existing) => changes.extend(self.schema_diff(existing, schema).await?),
            }
        }
        for schema in &from.schemas {
            if to.schema(&schema.name).is_none() {
                for table in &schema.tables {
                    changes.push(
                        Change::new(
                            ChangeKind::DropTable { name: table.name.clone(), schema: schema.name.clone() },
                            render_drop_table(&schema.name, &table.name),
                        )
                        .with_reverse(render_create_table(&schema.name, table)),
                    );
                }
                changes.push(Change::new(
                    ChangeKind::DropSchema { name: schema.name.clone() },
                    format!("DROP SCHEMA {};", schema.name),
                ));
            }
        }
        Ok(changes)
    }

    async fn schema_diff(&self, from: &Schema, to: &Schema) -> CoreResult<Vec<Change>> {
        let mut changes = Vec::new();
        for table in &to.tables {
            match from.table(&table.name) {
                None => changes.push(Change::new(
                    ChangeKind::AddTable { table: table.clone(), schema: to.name.clone() },
                    render_create_table(&to.name, table),
                )),
                Some(existing) if existing != table => {
                    changes.extend(self.table_diff(Some(existing), Some(table)).await?);
                }
                Some(_) => {}
            }
        }
        for table in &from.tables {
            if to.table(&table.name).is_none() {
                changes.push(
                    Change::new(
                        ChangeKind::DropTable { name: table.name.clone(), schema: from.name.clone() },
                        render_drop_table(&from.name, &table.name),
                    )
                    .with_reverse(render_create_table(&from.name, table)),
                );
            }
        }
        Ok(changes)
    }

    async fn table_diff(&self, from: Option<&Table>, to: Option<&Table>) -> CoreResult<Vec<Change>> {
        let (from, to) = match (from, to) {
            (Some(f), Some(t)) => (f, t),
            _ => return Ok(Vec::new()),
        };
        let schema = DEFAULT_SCHEMA.to_string();
        let mut changes = Vec::new();
        for column in &to.columns {
            if !from.columns.iter().any(|c| c.name == column.name) {
                changes.push(
                    Change::new(
                        ChangeKind::AddColumn {
                            schema: schema.clone(),
                            table: to.name.clone(),
                            column: column.clone(),
                        },
                        format!(
                            "ALTER TABLE {schema}.{} ADD COLUMN {} {};",
                            to.name, column.name, column.ty
                        ),
                    )
                    .with_reverse(format!(
                        "ALTER TABLE {schema}.{} DROP COLUMN {};",
                        to.name, column.name
                    )),
                );
            }
        }
        for column in &from.columns {
            if !to.columns.iter().any(|c| c.name == column.name) {
                changes.push(Change::new(
                    ChangeKind::DropColumn {
                        schema: schema.clone(),
                        table: from.name.clone(),
                        column: column.name.clone(),
                    },
                    format!("ALTER TABLE {schema}.{} DROP COLUMN {};", from.name, column.name),
                ));
            }
        }
        Ok(changes)
    }

    async fn plan_changes(&self, name: &str, changes: &[Change], _opts: &DriverOpts) -> CoreResult<Plan> {
        let mut sorted = changes.to_vec();
        sorted.sort_by_key(|c| c.order_rank());
        Ok(Plan::new(name, sorted))
    }

    async fn apply_changes(&self, changes: &[Change], _opts: &DriverOpts) -> CoreResult<()> {
        for change in changes {
            self.apply_statement(&change.cmd)?;
        }
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
        Some(self)
    }
}

struct MemoryLockGuard<'a> {
    driver: &'a MemoryDriver,
    name: String,
}

#[async_trait]
impl<'a> LockGuard for MemoryLockGuard<'a> {
    async fn unlock(&self) -> CoreResult<()> {
        self.driver.locks.lock().expect("lock set poisoned").remove(&self.name);
        Ok(())
    }
}

#[async_trait]
impl Locker for MemoryDriver {
    async fn lock(&self, name: &str, timeout: Duration) -> CoreResult<Box<dyn LockGuard>> {
        let mut locks = self.locks.lock().expect("lock set poisoned");
        if locks.contains(name) {
            if timeout.is_zero() {
                return Err(CoreError::LockUnavailable { name: name.to_string() });
            }
            return Err(CoreError::LockUnavailable { name: name.to_string() });
        }
        locks.insert(name.to_string());
        drop(locks);
        Ok(Box::new(MemoryLockGuard { driver: self, name: name.to_string() }))
    }
}

struct MemoryRestoreGuard<'a> {
    driver: &'a MemoryDriver,
}

#[async_trait]
impl<'a> RestoreGuard for MemoryRestoreGuard<'a> {
    /// Restores to the snapshot taken by `snapshot()` without consuming it,
    /// so a caller (e.g. the replay pipeline's per-checkpoint reset) can call
    /// this more than once against the same snapshot point.
    async fn restore(&self) -> CoreResult<()> {
        let snapshots = self.driver.snapshots.lock().expect("snapshot stack poisoned");
        if let Some(restored) = snapshots.last() {
            *self.driver.realm.write().expect("realm lock poisoned") = restored.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl Snapshoter for MemoryDriver {
    async fn snapshot(&self) -> CoreResult<Box<dyn RestoreGuard>> {
        let current = self.realm.read().expect("realm lock poisoned").clone();
        self.snapshots.lock().expect("snapshot stack poisoned").push(current);
        Ok(Box::new(MemoryRestoreGuard { driver: self }))
    }
}

#[async_trait]
impl CleanChecker for MemoryDriver {
    async fn check_clean(&self, _revision_table: &str) -> CoreResult<()> {
        let realm = self.realm.read().expect("realm lock poisoned");
        if realm.schemas.iter().any(|s| !s.tables.is_empty()) {
            return Err(CoreError::NotClean {
                reason: "target realm already contains tables".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Normalizer for MemoryDriver {
    async fn normalize_realm(&self, realm: &Realm) -> CoreResult<Realm> {
        Ok(realm.clone())
    }

    async fn normalize_schema(&self, schema: &Schema) -> CoreResult<Schema> {
        Ok(schema.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_create_and_drop_table_mutate_realm() {
        let driver = MemoryDriver::new();
        driver.exec("CREATE SCHEMA public;", &[]).await.unwrap();
        driver
            .exec("CREATE TABLE public.users (id int, name text);", &[])
            .await
            .unwrap();
        let realm = driver.inspect_realm(&DriverOpts::new()).await.unwrap();
        assert!(realm.table_by_qualified_name("public.users").is_some());

        driver.exec("DROP TABLE public.users;", &[]).await.unwrap();
        let realm = driver.inspect_realm(&DriverOpts::new()).await.unwrap();
        assert!(realm.table_by_qualified_name("public.users").is_none());
    }

    #[tokio::test]
    async fn realm_diff_detects_new_table() {
        let driver = MemoryDriver::new();
        let from = Realm::empty();
        let mut to = Realm::empty();
        let mut schema = Schema::new("public");
        schema.tables.push(Table::new("users"));
        to.upsert_schema(schema);

        let changes = driver.realm_diff(&from, &to).await.unwrap();
        assert!(changes
            .iter()
            .any(|c| matches!(&c.kind, ChangeKind::AddSchema { name } if name == "public")));
        assert!(changes
            .iter()
            .any(|c| matches!(&c.kind, ChangeKind::AddTable { schema, .. } if schema == "public")));
    }

    #[tokio::test]
    async fn lock_is_mutually_exclusive() {
        let driver = MemoryDriver::new();
        let locker = driver.as_locker().unwrap();
        let guard = locker.lock("atlas_migrate_execute", Duration::ZERO).await.unwrap();
        let second = locker.lock("atlas_migrate_execute", Duration::ZERO).await;
        assert!(matches!(second, Err(CoreError::LockUnavailable { .. })));
        guard.unlock().await.unwrap();
        assert!(locker.lock("atlas_migrate_execute", Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn snapshot_restore_round_trips_state() {
        let driver = MemoryDriver::new();
        driver.exec("CREATE SCHEMA public;", &[]).await.unwrap();
        let snapshoter = driver.as_snapshoter().unwrap();
        let restore = snapshoter.snapshot().await.unwrap();
        driver
            .exec("CREATE TABLE public.users (id int);", &[])
            .await
            .unwrap();
        restore.restore().await.unwrap();
        let realm = driver.inspect_realm(&DriverOpts::new()).await.unwrap();
        assert!(realm.table_by_qualified_name("public.users").is_none());
    }

    #[tokio::test]
    async fn check_clean_rejects_populated_realm() {
        let driver = MemoryDriver::new();
        driver.exec("CREATE SCHEMA public;", &[]).await.unwrap();
        driver
            .exec("CREATE TABLE public.users (id int);", &[])
            .await
            .unwrap();
        let checker = driver.as_clean_checker().unwrap();
        assert!(checker.check_clean("atlas_schema_revisions").await.is_err());
    }
}
