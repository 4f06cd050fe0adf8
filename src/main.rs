//! `oxischema`: DBMS-agnostic schema migration CLI.
//!
//! The CLI wires the library's traits to the one reference driver
//! (`MemoryDriver`) and the one reference state reader
//! (`DirectoryStateReader`) this crate ships; a real deployment swaps those
//! for a dialect-specific adapter without touching the core.

use clap::{Parser, Subcommand};

use oxischema::config::Config;
use oxischema::directory::dialects::DefaultDialect;
use oxischema::directory::local::LocalDirectory;
use oxischema::directory::Directory;
use oxischema::driver::Driver;
use oxischema::drivers::memory::MemoryDriver;
use oxischema::error::CoreError;
use oxischema::executor::Options as ApplyOptions;
use oxischema::lint::detector::LatestN;
use oxischema::lint::report::{JsonReportWriter, TemplateReportWriter};
use oxischema::lint::ReportWriter;
use oxischema::logger::{Logger, TermLogger};
use oxischema::planner::DefaultFormatter;
use oxischema::revision::{RevisionReadWriter, SqlRevisionReadWriter};
use oxischema::state::directory_reader::DirectoryStateReader;

#[derive(Parser)]
#[command(name = "oxischema", about = "Versioned database schema migration core")]
struct Cli {
    /// Mirror structured logs to this file via `fern`, in addition to
    /// `RUST_LOG`-driven stderr output.
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

fn init_logging(log_file: Option<&str>) {
    let Some(path) = log_file else {
        env_logger::init();
        return;
    };

    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                chrono::Utc::now().to_rfc3339(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr())
        .chain(fern::log_file(path).expect("failed to open log file"));

    if dispatch.apply().is_err() {
        env_logger::init();
    }
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the revision log in the target database.
    Init {
        /// Falls back to `oxischema.toml`/`.json`'s `connection` if omitted.
        #[arg(short, long)]
        connection: Option<String>,
        #[arg(long)]
        schema: Option<String>,
    },
    /// Compute and write a new migration plan from the declarative schema
    /// source against the current migration history.
    Plan {
        #[arg(short, long)]
        dir: Option<String>,
        #[arg(long, default_value = "schemas/")]
        schema_dir: String,
        #[arg(short, long, default_value = "changes")]
        name: String,
    },
    /// Apply pending migration files to the target database.
    #[command(alias = "migrate")]
    Apply {
        #[arg(short, long)]
        dir: Option<String>,
        #[arg(short, long)]
        connection: Option<String>,
        #[arg(long)]
        schema: Option<String>,
        #[arg(long)]
        allow_dirty: bool,
        #[arg(long)]
        from_version: Option<String>,
        #[arg(long)]
        baseline_version: Option<String>,
        #[arg(long)]
        tx_mode: Option<String>,
    },
    /// Generate declarative schema source from a live database.
    Generate {
        #[arg(long, default_value = "schemas/")]
        schema_dir: String,
        #[arg(short, long)]
        connection: Option<String>,
    },
    /// Replay the latest migration files in isolation and run analyzers.
    Lint {
        #[arg(short, long)]
        dir: Option<String>,
        #[arg(short, long, default_value_t = 1)]
        n: i64,
        #[arg(long, default_value = "text")]
        format: String,
    },
}

async fn connect_revisions(
    connection: &str,
    schema: Option<String>,
) -> Result<SqlRevisionReadWriter, CoreError> {
    sqlx::any::install_default_drivers();
    let pool = sqlx::AnyPool::connect(connection)
        .await
        .map_err(|e| CoreError::Driver(e.to_string()))?;
    Ok(SqlRevisionReadWriter::new(pool, schema))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref());

    let result = match cli.command {
        Command::Init { connection, schema } => run_init(connection, schema).await,
        Command::Plan { dir, schema_dir, name } => run_plan(dir, &schema_dir, &name).await,
        Command::Apply {
            dir,
            connection,
            schema,
            allow_dirty,
            from_version,
            baseline_version,
            tx_mode,
        } => {
            run_apply(
                dir,
                connection,
                schema,
                allow_dirty,
                from_version,
                baseline_version,
                tx_mode,
            )
            .await
        }
        Command::Generate { schema_dir, connection } => run_generate(&schema_dir, connection).await,
        Command::Lint { dir, n, format } => run_lint(dir, n, &format).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn require_connection(config: &Config) -> Result<String, CoreError> {
    config.connection.clone().ok_or_else(|| {
        CoreError::Other(
            "no connection string given: pass --connection or set it in oxischema.toml/.json"
                .to_string(),
        )
    })
}

async fn run_init(connection: Option<String>, schema: Option<String>) -> Result<(), CoreError> {
    let config = Config::load()?.with_connection(connection).with_schema(schema);
    let revisions = connect_revisions(&require_connection(&config)?, config.schema.clone()).await?;
    oxischema::init(&revisions).await?;
    println!("revision log initialized");
    Ok(())
}

async fn run_plan(dir: Option<String>, schema_dir: &str, name: &str) -> Result<(), CoreError> {
    let config = Config::load()?.with_migrations_dir(dir);
    let directory = LocalDirectory::with_dialect(&config.migrations_dir, config.name_dialect())?;
    let driver = MemoryDriver::new();
    let state_reader = DirectoryStateReader::new(schema_dir);
    let formatter = DefaultFormatter;

    let names = oxischema::plan(&directory, &driver, &state_reader, &formatter, name).await?;
    for name in &names {
        println!("wrote {name}");
    }
    Ok(())
}

async fn run_apply(
    dir: Option<String>,
    connection: Option<String>,
    schema: Option<String>,
    allow_dirty: bool,
    from_version: Option<String>,
    baseline_version: Option<String>,
    tx_mode: Option<String>,
) -> Result<(), CoreError> {
    let config = Config::load()?
        .with_migrations_dir(dir)
        .with_connection(connection)
        .with_schema(schema)
        .with_tx_mode(tx_mode);
    let directory = LocalDirectory::with_dialect(&config.migrations_dir, config.name_dialect())?;
    let driver = MemoryDriver::new();
    let revisions = connect_revisions(&require_connection(&config)?, config.schema.clone()).await?;
    let logger = TermLogger;

    let opts = ApplyOptions {
        allow_dirty,
        from_version,
        baseline_version,
        tx_mode: config.tx_mode(),
        ..ApplyOptions::default()
    };

    oxischema::apply(&driver, &directory, &revisions, &logger, &opts).await?;
    println!("apply completed");
    Ok(())
}

async fn run_generate(schema_dir: &str, connection: Option<String>) -> Result<(), CoreError> {
    let config = Config::load()?.with_connection(connection);
    let connection = require_connection(&config)?;

    // The live-schema introspection a real adapter would perform is an
    // out-of-scope external collaborator; this demonstrates the shape of
    // the round trip against the in-memory reference driver instead.
    sqlx::any::install_default_drivers();
    let _pool = sqlx::AnyPool::connect(&connection)
        .await
        .map_err(|e| CoreError::Driver(e.to_string()))?;
    let driver = MemoryDriver::new();
    let realm = driver.inspect_realm(&Default::default()).await?;
    println!(
        "{} schema(s) known to the demo driver; writing declarative source under {schema_dir} is left to a dialect-specific adapter",
        realm.schemas.len()
    );
    Ok(())
}

async fn run_lint(dir: Option<String>, n: i64, format: &str) -> Result<(), CoreError> {
    let config = Config::load()?.with_migrations_dir(dir);
    let directory = LocalDirectory::with_dialect(&config.migrations_dir, Box::new(DefaultDialect))?;
    let driver = MemoryDriver::new();
    let detector = LatestN { n };

    let writer: Box<dyn ReportWriter> = if format == "json" {
        Box::new(JsonReportWriter)
    } else {
        Box::new(TemplateReportWriter)
    };

    let analyzers: Vec<&dyn oxischema::lint::Analyzer> = Vec::new();
    oxischema::lint(&directory, &detector, &driver, None, &analyzers, writer.as_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_init() {
        let matches = Cli::command().try_get_matches_from(vec![
            "oxischema",
            "init",
            "-c",
            "postgresql://test@localhost/test",
        ]);
        assert!(matches.is_ok());
    }

    #[test]
    fn cli_accepts_migrate_as_apply_alias() {
        let matches = Cli::command().try_get_matches_from(vec![
            "oxischema",
            "migrate",
            "-c",
            "postgresql://test@localhost/test",
        ]);
        assert!(matches.is_ok());
    }

    #[test]
    fn cli_parses_lint_with_format() {
        let matches = Cli::command()
            .try_get_matches_from(vec!["oxischema", "lint", "-n", "2", "--format", "json"]);
        assert!(matches.is_ok());
    }

    #[test]
    fn cli_requires_a_subcommand() {
        let matches = Cli::command().try_get_matches_from(vec!["oxischema"]);
        assert!(matches.is_err());
    }
}
