//! `oxischema`: a dialect-agnostic, versioned database schema migration core.
//!
//! The crate is organized around the seven components a migration tool needs
//! (statement lexer, directory store, revision log, change-set model,
//! planner/formatter, executor, replay/lint pipeline), each written against a
//! trait seam (`Driver`, `StateReader`, ...) so a real DBMS adapter or
//! declarative-config parser can be plugged in without touching the core.
//! This crate ships one reference `Driver` (`drivers::memory::MemoryDriver`)
//! and one reference `StateReader` (`state::directory_reader::DirectoryStateReader`),
//! sufficient to exercise every code path end to end.

pub mod config;
pub mod directory;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod hash;
pub mod lexer;
pub mod lint;
pub mod logger;
pub mod planner;
pub mod realm;
pub mod replay;
pub mod revision;
pub mod state;
pub(crate) mod utils;

use directory::Directory;
use driver::{Driver, StateReader};
use error::CoreResult;
use executor::{Executor, Options as ApplyOptions};
use lint::{Analyzer, ChangeDetector};
use logger::Logger;
use planner::{Formatter, Planner};
use realm::Plan;
use replay::DevLoader;
use revision::RevisionReadWriter;

/// Computes the desired-vs-current diff, orders it into a [`Plan`], and
/// writes the rendered plan files to `directory`. `driver`
/// both replays the existing migration history on a scratch copy (to learn
/// "current") and diffs it against whatever `state_reader` reports as
/// "desired".
pub async fn plan(
    directory: &dyn Directory,
    driver: &dyn Driver,
    state_reader: &dyn StateReader,
    formatter: &dyn Formatter,
    name: &str,
) -> CoreResult<Vec<String>> {
    let files = directory.list()?;
    let loader = DevLoader::new(driver, None);
    let replayed = loader.load_changes(&files, &[]).await?;

    let desired = state_reader.read_state().await?;
    let changes = driver.realm_diff(&replayed.to, &desired).await?;

    let planner = Planner::new(directory, formatter);
    let built = planner.plan(name, changes)?;
    planner.write_plan(&built)
}

/// Runs the executor's apply state machine against `directory`'s pending
/// files.
pub async fn apply(
    driver: &dyn Driver,
    directory: &dyn Directory,
    revisions: &dyn RevisionReadWriter,
    logger: &dyn Logger,
    opts: &ApplyOptions,
) -> CoreResult<()> {
    Executor::new(driver, directory, revisions, logger)
        .apply(opts)
        .await
}

/// Runs the lint pipeline: detect a candidate change set, replay it in
/// isolation, and run `analyzers` over the result.
pub async fn lint(
    directory: &dyn Directory,
    detector: &dyn ChangeDetector,
    driver: &dyn Driver,
    schema: Option<String>,
    analyzers: &[&dyn Analyzer],
    writer: &dyn lint::ReportWriter,
) -> CoreResult<()> {
    lint::run(directory, detector, driver, schema, analyzers, writer).await
}

/// Ensures the revision log's backing table (and schema, if scoped) exists.
/// Idempotent.
pub async fn init(revisions: &dyn RevisionReadWriter) -> CoreResult<()> {
    revisions.migrate().await
}

/// Re-exported for convenience so callers building a `Plan` by hand (rather
/// than through [`plan`]) don't need a second `use realm::Plan`.
pub type CorePlan = Plan;
