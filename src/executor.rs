//! Executor: applies pending migration files against a target
//! database with configurable transaction scoping, advisory locking,
//! baseline/allow-dirty safeguards, and incremental revision writes.

use crate::directory::{Directory, File};
use crate::driver::{Driver, DriverOpts};
use crate::error::{CoreError, CoreResult};
use crate::hash::hash_for_revision;
use crate::logger::{Event, Logger};
use crate::revision::{Revision, RevisionReadWriter, RevisionType, DEFAULT_REVISION_TABLE};

/// Transaction scoping an apply run uses. A mode change between
/// separate invocations is fine; within one call the mode is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// No transaction wrapping at all.
    None,
    /// One transaction per file, committed on success.
    File,
    /// One transaction spanning the entire run.
    All,
}

/// The advisory lock name mutating operations serialize on.
pub const EXECUTE_LOCK_NAME: &str = "atlas_migrate_execute";

#[derive(Debug, Clone)]
pub struct Options {
    pub allow_dirty: bool,
    pub from_version: Option<String>,
    pub baseline_version: Option<String>,
    pub operator_version: String,
    pub tx_mode: TxMode,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            allow_dirty: false,
            from_version: None,
            baseline_version: None,
            operator_version: env!("CARGO_PKG_VERSION").to_string(),
            tx_mode: TxMode::File,
        }
    }
}

/// One pending file plus the statement index to resume from.
struct PendingFile {
    file: File,
    version: String,
    skip: u32,
}

pub struct Executor<'a> {
    pub driver: &'a dyn Driver,
    pub directory: &'a dyn Directory,
    pub revisions: &'a dyn RevisionReadWriter,
    pub logger: &'a dyn Logger,
}

impl<'a> Executor<'a> {
    pub fn new(
        driver: &'a dyn Driver,
        directory: &'a dyn Directory,
        revisions: &'a dyn RevisionReadWriter,
        logger: &'a dyn Logger,
    ) -> Self {
        Executor { driver, directory, revisions, logger }
    }

    fn file_version(&self, file: &File) -> String {
        self.directory
            .name_dialect()
            .parse(&file.name)
            .0
            .unwrap_or_else(|| file.name.clone())
    }

    /// Runs the full apply state machine: locking, pending-file detection,
    /// per-statement execution, and revision bookkeeping.
    pub async fn apply(&self, opts: &Options) -> CoreResult<()> {
        self.revisions.migrate().await?;

        let locker = self.driver.as_locker();
        let guard = match locker {
            Some(locker) => Some(locker.lock(EXECUTE_LOCK_NAME, std::time::Duration::ZERO).await?),
            None => return Err(CoreError::LockUnsupported),
        };

        let result = self.apply_locked(opts).await;

        if let Some(guard) = guard {
            if let Err(e) = guard.unlock().await {
                log::warn!("failed to release advisory lock: {e}");
            }
        }

        result
    }

    async fn apply_locked(&self, opts: &Options) -> CoreResult<()> {
        self.directory.validate()?;

        let revisions = self.revisions.read_revisions().await?;

        // Only a first-ever deployment needs the clean check: once a
        // revision exists, pending-ness is judged against the log instead.
        if revisions.is_empty() && !opts.allow_dirty && opts.baseline_version.is_none() {
            match self.driver.as_clean_checker() {
                Some(checker) => checker.check_clean(DEFAULT_REVISION_TABLE).await?,
                None => return Err(CoreError::CleanCheckUnsupported),
            }
        }

        let files = self.directory.list()?;
        let pending = self.determine_pending(&files, &revisions, opts).await?;

        if pending.is_empty() {
            return Err(CoreError::NoPendingFiles);
        }

        self.logger.log(Event::Execution {
            from: revisions.last().map(|r| r.version.clone()),
            to: pending.last().map(|p| p.version.clone()),
            files: pending.iter().map(|p| p.file.name.clone()).collect(),
        });

        if opts.tx_mode == TxMode::All {
            self.driver.begin().await?;
        }

        for pending_file in &pending {
            if let Err(e) = self.apply_one_file(pending_file, opts, &revisions).await {
                if opts.tx_mode != TxMode::None {
                    let _ = self.driver.rollback().await;
                }
                return Err(e);
            }
        }

        if opts.tx_mode == TxMode::All {
            self.driver.commit().await?;
        }

        self.logger.log(Event::Done);
        Ok(())
    }

    async fn determine_pending(
        &self,
        files: &[File],
        revisions: &[Revision],
        opts: &Options,
    ) -> CoreResult<Vec<PendingFile>> {
        if let Some(from) = &opts.from_version {
            return Ok(files
                .iter()
                .filter(|f| &self.file_version(f) >= from)
                .map(|f| PendingFile { file: f.clone(), version: self.file_version(f), skip: 0 })
                .collect());
        }

        if let Some(baseline) = &opts.baseline_version {
            if revisions.is_empty() {
                let now = chrono::Utc::now();
                self.revisions
                    .write_revision(&Revision {
                        version: baseline.clone(),
                        description: "baseline".to_string(),
                        kind: RevisionType::BASELINE,
                        applied: 0,
                        total: 0,
                        executed_at: now,
                        execution_time: std::time::Duration::ZERO,
                        error: None,
                        error_stmt: None,
                        hash: String::new(),
                        partial_hashes: Vec::new(),
                        operator_version: opts.operator_version.clone(),
                    })
                    .await?;
            }
            return Ok(files
                .iter()
                .filter(|f| &self.file_version(f) > baseline)
                .map(|f| PendingFile { file: f.clone(), version: self.file_version(f), skip: 0 })
                .collect());
        }

        let last = revisions.iter().rev().find(|r| !r.kind.contains(RevisionType::RESOLVED));
        let start_version = last.map(|r| r.version.clone());
        let mut pending: Vec<PendingFile> = files
            .iter()
            .filter(|f| match &start_version {
                Some(v) => &self.file_version(f) > v,
                None => true,
            })
            .map(|f| PendingFile { file: f.clone(), version: self.file_version(f), skip: 0 })
            .collect();

        if let Some(last) = last {
            if last.is_resume_point() {
                if let Some(f) = files.iter().find(|f| self.file_version(f) == last.version) {
                    pending.insert(
                        0,
                        PendingFile {
                            file: f.clone(),
                            version: self.file_version(f),
                            skip: last.applied,
                        },
                    );
                }
            }
        }

        Ok(pending)
    }

    async fn apply_one_file(
        &self,
        pending: &PendingFile,
        opts: &Options,
        revisions: &[Revision],
    ) -> CoreResult<()> {
        let PendingFile { file, version, skip } = pending;
        self.logger.log(Event::File { file: file.name.clone(), skip: *skip });

        let current_hash = hash_for_revision(&file.name, &file.bytes);
        if let Some(existing) = revisions.iter().find(|r| &r.version == version) {
            if existing.applied > 0
                && !existing.kind.contains(RevisionType::RESOLVED)
                && existing.hash != current_hash
                && existing.hash != ""
            {
                return Err(CoreError::HistoryChanged {
                    version: version.clone(),
                    expected: existing.hash.clone(),
                    actual: current_hash,
                });
            }
        }

        if opts.tx_mode == TxMode::File {
            self.driver.begin().await?;
        }

        let total = file.statements.len() as u32;
        let started = std::time::Instant::now();

        for (idx, stmt) in file.statements.iter().enumerate().skip(*skip as usize) {
            self.logger.log(Event::Stmt { sql: stmt.text.clone() });
            if let Err(e) = self.driver.exec(&stmt.text, &[]).await {
                self.logger.log(Event::Error { sql: stmt.text.clone(), err: e.to_string() });
                if opts.tx_mode == TxMode::File {
                    let _ = self.driver.rollback().await;
                }
                self.revisions
                    .write_revision(&Revision {
                        version: version.clone(),
                        description: String::new(),
                        kind: RevisionType::EXECUTE,
                        applied: idx as u32,
                        total,
                        executed_at: chrono::Utc::now(),
                        execution_time: started.elapsed(),
                        error: Some(e.to_string()),
                        error_stmt: Some(stmt.text.clone()),
                        // Left unset on failure (only a successful run stamps
                        // the hash) so a subsequent fix-and-retry isn't
                        // mistaken for drift on an already-applied file.
                        hash: String::new(),
                        partial_hashes: Vec::new(),
                        operator_version: opts.operator_version.clone(),
                    })
                    .await?;
                return Err(e);
            }
        }

        self.revisions
            .write_revision(&Revision {
                version: version.clone(),
                description: String::new(),
                kind: RevisionType::EXECUTE,
                applied: total,
                total,
                executed_at: chrono::Utc::now(),
                execution_time: started.elapsed(),
                error: None,
                error_stmt: None,
                hash: current_hash,
                partial_hashes: Vec::new(),
                operator_version: opts.operator_version.clone(),
            })
            .await?;

        if opts.tx_mode == TxMode::File {
            self.driver.commit().await?;
        }
        Ok(())
    }
}

/// Passthrough used by the planner to commit directly via the driver,
/// without going through the executor's file/statement loop.
pub async fn apply_plan_directly(driver: &dyn Driver, plan: &crate::realm::Plan) -> CoreResult<()> {
    driver.apply_changes(&plan.changes, &DriverOpts::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::MemoryDirectory;
    use crate::drivers::memory::MemoryDriver;
    use crate::logger::RecordingLogger;
    use crate::revision::SqlRevisionReadWriter;

    async fn sqlite_revisions() -> SqlRevisionReadWriter {
        sqlx::any::install_default_drivers();
        let pool = sqlx::AnyPool::connect("sqlite::memory:").await.unwrap();
        SqlRevisionReadWriter::new(pool, None)
    }

    #[tokio::test]
    async fn apply_runs_pending_files_and_records_revisions() {
        let directory = MemoryDirectory::new();
        directory
            .write("1_init.sql", b"CREATE SCHEMA public; CREATE TABLE public.users (id int);")
            .unwrap();
        directory.write_sum(&directory.sum().unwrap()).unwrap();
        let driver = MemoryDriver::new();
        let revisions = sqlite_revisions().await;
        let logger = RecordingLogger::new();
        let executor = Executor::new(&driver, &directory, &revisions, &logger);

        executor.apply(&Options::default()).await.unwrap();

        let recorded = revisions.read_revisions().await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].applied, recorded[0].total);

        let err = executor.apply(&Options::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::NoPendingFiles));
    }

    #[tokio::test]
    async fn apply_resumes_from_partial_failure() {
        let directory = MemoryDirectory::new();
        directory
            .write(
                "1_init.sql",
                b"CREATE SCHEMA public;\nCREATE TABLE public.a (id int);\nNOT VALID SQL HERE;",
            )
            .unwrap();
        directory.write_sum(&directory.sum().unwrap()).unwrap();
        let driver = MemoryDriver::new();
        let revisions = sqlite_revisions().await;
        let logger = RecordingLogger::new();
        let executor = Executor::new(&driver, &directory, &revisions, &logger);

        let opts = Options { tx_mode: TxMode::None, ..Options::default() };
        let err = executor.apply(&opts).await.unwrap_err();
        assert!(matches!(err, CoreError::Driver(_)));

        let recorded = revisions.read_revisions().await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].applied, 2);
        assert!(recorded[0].error.is_some());

        directory
            .write(
                "1_init.sql",
                b"CREATE SCHEMA public;\nCREATE TABLE public.a (id int);\nCREATE TABLE public.b (id int);",
            )
            .unwrap();
        directory.write_sum(&directory.sum().unwrap()).unwrap();

        executor.apply(&opts).await.unwrap();
        let recorded = revisions.read_revisions().await.unwrap();
        assert_eq!(recorded[0].applied, 3);
        assert!(recorded[0].error.is_none());
    }

    #[tokio::test]
    async fn apply_refuses_on_corrupted_sum_file_and_writes_no_revision() {
        let directory = MemoryDirectory::new();
        directory
            .write("1_init.sql", b"CREATE SCHEMA public; CREATE TABLE public.users (id int);")
            .unwrap();
        directory.write_sum(&directory.sum().unwrap()).unwrap();
        directory
            .write("1_init.sql", b"CREATE SCHEMA public; CREATE TABLE public.users (id text);")
            .unwrap();
        let driver = MemoryDriver::new();
        let revisions = sqlite_revisions().await;
        let logger = RecordingLogger::new();
        let executor = Executor::new(&driver, &directory, &revisions, &logger);

        let err = executor.apply(&Options::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::Checksum { kind: crate::error::ChecksumDivergence::Edited, .. }));

        assert!(revisions.read_revisions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn apply_treats_files_after_a_resolved_revision_as_still_pending() {
        let directory = MemoryDirectory::new();
        directory
            .write("1_a.sql", b"CREATE SCHEMA public; CREATE TABLE public.a (id int);")
            .unwrap();
        directory
            .write("2_b.sql", b"CREATE TABLE public.b (id int);")
            .unwrap();
        directory.write_sum(&directory.sum().unwrap()).unwrap();
        let driver = MemoryDriver::new();
        let revisions = sqlite_revisions().await;
        revisions
            .write_revision(&Revision {
                version: "2".to_string(),
                description: "manually resolved".to_string(),
                kind: RevisionType::EXECUTE | RevisionType::RESOLVED,
                applied: 0,
                total: 0,
                executed_at: chrono::Utc::now(),
                execution_time: std::time::Duration::ZERO,
                error: Some("manually fixed outside the tool".to_string()),
                error_stmt: None,
                hash: String::new(),
                partial_hashes: Vec::new(),
                operator_version: "test".to_string(),
            })
            .await
            .unwrap();
        let logger = RecordingLogger::new();
        let executor = Executor::new(&driver, &directory, &revisions, &logger);

        executor.apply(&Options::default()).await.unwrap();

        let recorded = revisions.read_revisions().await.unwrap();
        let by_version = |v: &str| recorded.iter().find(|r| r.version == v).unwrap();
        assert_eq!(by_version("1").applied, by_version("1").total);
        assert!(by_version("1").total > 0);
    }
}
