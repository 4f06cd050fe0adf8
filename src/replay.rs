//! Replay: brings a scratch database to a known `base` state and
//! diffs a candidate `feat` file set against it, one statement at a time.
//! Shared by the planner (to compute "current" before a new plan) and the
//! lint pipeline (to analyze a change set in isolation).

use std::time::Duration;

use crate::directory::File;
use crate::driver::{Driver, DriverOpts, RestoreGuard};
use crate::error::{CoreError, CoreResult};
use crate::realm::{Change, Realm};

/// Per-file changes observed while replaying `feat`.
#[derive(Debug, Clone)]
pub struct FileChanges {
    pub name: String,
    pub changes: Vec<Change>,
}

/// The outcome of a `DevLoader::load_changes` run.
#[derive(Debug, Clone)]
pub struct Changes {
    pub from: Realm,
    pub to: Realm,
    pub files: Vec<FileChanges>,
}

/// Dialect-specific diff upgrade hook: recognizing e.g. `RENAME
/// COLUMN` as a single `RenameColumn` rather than `DropColumn`+`AddColumn`.
/// The dialect parser that would drive this is an out-of-scope external
/// collaborator, so this is a pass-through.
fn maybe_fix(changes: Vec<Change>) -> Vec<Change> {
    changes
}

/// Brings a scratch database to `base`, then replays `feat` against it
/// statement by statement, under the `atlas_lint[_<schema>]` advisory lock.
pub struct DevLoader<'a> {
    driver: &'a dyn Driver,
    schema: Option<String>,
}

impl<'a> DevLoader<'a> {
    pub fn new(driver: &'a dyn Driver, schema: Option<String>) -> Self {
        DevLoader { driver, schema }
    }

    fn lock_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("atlas_lint_{schema}"),
            None => "atlas_lint".to_string(),
        }
    }

    pub async fn load_changes(&self, base: &[File], feat: &[File]) -> CoreResult<Changes> {
        let locker = self.driver.as_locker().ok_or(CoreError::LockUnsupported)?;
        let guard = locker.lock(&self.lock_name(), Duration::ZERO).await?;

        let snapshoter = self.driver.as_snapshoter().ok_or(CoreError::SnapshotUnsupported)?;
        let restore = snapshoter.snapshot().await?;

        let result = self.load_changes_locked(base, feat, &*restore).await;

        // Both cleanup steps are attempted regardless of outcome; any error
        // from them is folded into the primary result rather than dropped.
        let restore_err = restore.restore().await.err();
        let unlock_err = guard.unlock().await.err();

        match result {
            Ok(changes) => match restore_err.or(unlock_err) {
                Some(e) => Err(e),
                None => Ok(changes),
            },
            Err(e) => match restore_err {
                Some(re) => Err(CoreError::Other(format!(
                    "{e}; additionally, scratch restore failed: {re}"
                ))),
                None => Err(e),
            },
        }
    }

    async fn load_changes_locked(
        &self,
        base: &[File],
        feat: &[File],
        restore: &dyn RestoreGuard,
    ) -> CoreResult<Changes> {
        for file in base_tail(base) {
            self.replay_file_whole(file).await?;
        }

        let from = self.driver.inspect_realm(&DriverOpts::new()).await?;
        let mut current = from.clone();
        let mut files_out = Vec::new();
        let mut is_first_non_checkpoint = true;

        for file in feat.iter().filter(|f| !f.is_checkpoint()) {
            let start_of_file = current.clone();
            let mut stmt_changes = Vec::new();

            if base.is_empty() && is_first_non_checkpoint {
                // Fast path for large bootstrap files.
                self.replay_file_whole(file).await?;
                current = self.driver.inspect_realm(&DriverOpts::new()).await?;
            } else {
                for stmt in &file.statements {
                    self.driver
                        .exec(&stmt.text, &[])
                        .await
                        .map_err(|e| CoreError::file(file.name.clone(), Some(stmt.pos), e))?;
                    let next = self.driver.inspect_realm(&DriverOpts::new()).await?;
                    let diff = self.driver.realm_diff(&current, &next).await?;
                    stmt_changes.extend(maybe_fix(diff));
                    current = next;
                }
            }
            is_first_non_checkpoint = false;

            let summary = self.driver.realm_diff(&start_of_file, &current).await?;
            let changes = if stmt_changes.is_empty() { summary } else { stmt_changes };
            files_out.push(FileChanges { name: file.name.clone(), changes });
        }

        let to = current.clone();

        for file in feat.iter().filter(|f| f.is_checkpoint()) {
            restore.restore().await?;
            let start_of_file = self.driver.inspect_realm(&DriverOpts::new()).await?;

            let mut stmt_changes = Vec::new();
            let mut checkpoint_current = start_of_file.clone();
            for stmt in &file.statements {
                self.driver
                    .exec(&stmt.text, &[])
                    .await
                    .map_err(|e| CoreError::file(file.name.clone(), Some(stmt.pos), e))?;
                let next = self.driver.inspect_realm(&DriverOpts::new()).await?;
                let diff = self.driver.realm_diff(&checkpoint_current, &next).await?;
                stmt_changes.extend(maybe_fix(diff));
                checkpoint_current = next;
            }
            files_out.push(FileChanges { name: file.name.clone(), changes: stmt_changes });
        }

        Ok(Changes { from, to, files: files_out })
    }

    async fn replay_file_whole(&self, file: &File) -> CoreResult<()> {
        for stmt in &file.statements {
            self.driver
                .exec(&stmt.text, &[])
                .await
                .map_err(|e| CoreError::file(file.name.clone(), Some(stmt.pos), e))?;
        }
        Ok(())
    }
}

/// `base` files from (and including) the last checkpoint onward; history
/// before a checkpoint is assumed un-replayable.
fn base_tail(base: &[File]) -> &[File] {
    match base.iter().rposition(|f| f.is_checkpoint()) {
        Some(idx) => &base[idx..],
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryDriver;
    use crate::realm::ChangeKind;

    fn file(name: &str, sql: &str) -> File {
        File::new(name.to_string(), sql.as_bytes().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn load_changes_diffs_feat_against_empty_base() {
        let driver = MemoryDriver::new();
        let loader = DevLoader::new(&driver, None);
        let feat = vec![file("1.sql", "CREATE SCHEMA public; CREATE TABLE public.t1 (id int);")];

        let changes = loader.load_changes(&[], &feat).await.unwrap();
        assert!(changes.from.schemas.is_empty());
        assert!(changes.to.schema("public").is_some());
        assert_eq!(changes.files.len(), 1);
        assert_eq!(changes.files[0].name, "1.sql");

        // The scratch db is restored afterward: a second run starts clean again.
        let changes_again = loader.load_changes(&[], &feat).await.unwrap();
        assert!(changes_again.from.schemas.is_empty());
    }

    #[tokio::test]
    async fn load_changes_replays_base_then_diffs_feat_statement_by_statement() {
        let driver = MemoryDriver::new();
        let loader = DevLoader::new(&driver, None);
        let base = vec![file("1.sql", "CREATE SCHEMA public; CREATE TABLE public.t1 (id int);")];
        let feat = vec![file("2.sql", "CREATE TABLE public.t2 (id int);")];

        let changes = loader.load_changes(&base, &feat).await.unwrap();
        assert!(changes.from.schema("public").is_some());
        assert_eq!(changes.files.len(), 1);
        assert!(changes.files[0]
            .changes
            .iter()
            .any(|c| matches!(&c.kind, ChangeKind::AddTable { table, .. } if table.name == "t2")));
    }

    #[tokio::test]
    async fn load_changes_skips_base_files_before_last_checkpoint() {
        let driver = MemoryDriver::new();
        let loader = DevLoader::new(&driver, None);
        // "0.sql" would fail if replayed (unsupported statement); it must be
        // skipped because "1_checkpoint.sql" supersedes it.
        let base = vec![
            file("0.sql", "THIS WOULD FAIL IF REPLAYED;"),
            file(
                "1_checkpoint.sql",
                "-- SYSTEM:checkpoint\nCREATE SCHEMA public; CREATE TABLE public.t1 (id int);",
            ),
        ];
        let feat = vec![file("2.sql", "CREATE TABLE public.t2 (id int);")];

        let changes = loader.load_changes(&base, &feat).await.unwrap();
        assert!(changes.from.schema("public").is_some());
    }
}
