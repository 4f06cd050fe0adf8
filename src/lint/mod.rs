//! Lint pipeline: detects a candidate change set, replays it in
//! isolation against a scratch driver, and runs a configurable analyzer
//! chain over the resulting diffs, subject to `nolint` suppression.

pub mod detector;
pub mod report;

use crate::directory::{Directory, File};
use crate::driver::Driver;
use crate::error::{CoreError, CoreResult};
use crate::replay::{DevLoader, FileChanges};

pub use detector::ChangeDetector;
pub use report::{Diagnostic, FileReport, Reporter, ReportWriter};

/// What an [`Analyzer`] receives for one file under review.
pub struct Pass<'a> {
    pub file: &'a File,
    pub dev: &'a FileChanges,
    pub reporter: &'a Reporter,
}

/// A pluggable check over one file's replayed changes. Concrete analyzers
/// (destructive-change detection, data-dependent DML, ...) are external
/// collaborators; the core only defines the seam.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str {
        ""
    }
    fn analyze(&self, pass: &Pass) -> CoreResult<Vec<Diagnostic>>;
}

/// Runs the full detect-replay-analyze pipeline and renders a report.
/// Returns `CoreError::Silent` (not a fresh error) when any file produced a
/// hard error, so the caller exits non-zero without double-printing.
pub async fn run(
    directory: &dyn Directory,
    detector: &dyn ChangeDetector,
    driver: &dyn Driver,
    schema: Option<String>,
    analyzers: &[&dyn Analyzer],
    writer: &dyn ReportWriter,
) -> CoreResult<()> {
    if let Err(e) = directory.validate() {
        writer.write(&[FileReport {
            name: String::new(),
            diagnostics: Vec::new(),
            error: Some(e.to_string()),
        }])?;
        return Err(CoreError::Silent(e.to_string()));
    }

    let files = directory.list()?;
    let (base, feat) = detector.detect(&files)?;

    let loader = DevLoader::new(driver, schema);
    let changes = loader.load_changes(&base, &feat).await?;

    let mut reports = Vec::new();
    let mut had_error = false;

    for file_changes in &changes.files {
        let Some(file) = feat.iter().find(|f| f.name == file_changes.name) else {
            continue;
        };
        let reporter = Reporter::for_file(file);
        if reporter.is_fully_ignored() {
            continue;
        }

        let mut file_report = FileReport {
            name: file.name.clone(),
            diagnostics: Vec::new(),
            error: None,
        };
        let pass = Pass { file, dev: file_changes, reporter: &reporter };

        for analyzer in analyzers {
            match analyzer.analyze(&pass) {
                Ok(diags) => {
                    for diag in diags {
                        let stamped = Diagnostic { analyzer: analyzer.name().to_string(), ..diag };
                        if let Some(kept) = reporter.report(stamped) {
                            file_report.diagnostics.push(kept);
                        }
                    }
                }
                Err(e) => {
                    file_report.error = Some(e.to_string());
                    had_error = true;
                }
            }
        }
        reports.push(file_report);
    }

    writer.write(&reports)?;

    if had_error {
        return Err(CoreError::Silent(
            "lint pipeline reported file-level errors".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::MemoryDirectory;
    use crate::drivers::memory::MemoryDriver;
    use crate::lint::detector::LatestN;
    use crate::realm::ChangeKind;

    struct DestructiveAnalyzer;

    impl Analyzer for DestructiveAnalyzer {
        fn name(&self) -> &str {
            "destructive"
        }

        fn analyze(&self, pass: &Pass) -> CoreResult<Vec<Diagnostic>> {
            Ok(pass
                .dev
                .changes
                .iter()
                .filter(|c| matches!(c.kind, ChangeKind::DropTable { .. }))
                .map(|c| Diagnostic::new(format!("destructive change: {}", c.cmd)).with_code("destructive"))
                .collect())
        }
    }

    struct RecordingWriter {
        reports: std::sync::Mutex<Vec<FileReport>>,
    }

    impl ReportWriter for RecordingWriter {
        fn write(&self, reports: &[FileReport]) -> CoreResult<()> {
            self.reports.lock().unwrap().extend_from_slice(reports);
            Ok(())
        }
    }

    #[tokio::test]
    async fn pipeline_flags_destructive_change_in_feat_file() {
        let directory = MemoryDirectory::new();
        directory
            .write("1.sql", b"CREATE SCHEMA public; CREATE TABLE public.t1 (id int);")
            .unwrap();
        directory.write("2.sql", b"DROP TABLE public.t1;").unwrap();
        let sum = directory.sum().unwrap();
        directory.write_sum(&sum).unwrap();

        let driver = MemoryDriver::new();
        let detector = LatestN { n: 1 };
        let analyzer = DestructiveAnalyzer;
        let analyzers: Vec<&dyn Analyzer> = vec![&analyzer];
        let writer = RecordingWriter { reports: std::sync::Mutex::new(Vec::new()) };

        run(&directory, &detector, &driver, None, &analyzers, &writer)
            .await
            .unwrap();

        let reports = writer.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "2.sql");
        assert_eq!(reports[0].diagnostics.len(), 1);
        assert_eq!(reports[0].diagnostics[0].analyzer, "destructive");
    }

    #[tokio::test]
    async fn nolint_suppresses_the_flagged_file() {
        let directory = MemoryDirectory::new();
        directory
            .write("1.sql", b"CREATE SCHEMA public; CREATE TABLE public.t1 (id int);")
            .unwrap();
        directory
            .write("2.sql", b"-- SYSTEM:nolint\nDROP TABLE public.t1;")
            .unwrap();
        let sum = directory.sum().unwrap();
        directory.write_sum(&sum).unwrap();

        let driver = MemoryDriver::new();
        let detector = LatestN { n: 1 };
        let analyzer = DestructiveAnalyzer;
        let analyzers: Vec<&dyn Analyzer> = vec![&analyzer];
        let writer = RecordingWriter { reports: std::sync::Mutex::new(Vec::new()) };

        run(&directory, &detector, &driver, None, &analyzers, &writer)
            .await
            .unwrap();

        assert!(writer.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_integrity_file_short_circuits_with_silent_error() {
        let directory = MemoryDirectory::new();
        directory.write("1.sql", b"CREATE TABLE t (id int);").unwrap();
        // No sum file written: validate() fails with MissingSumFile.

        let driver = MemoryDriver::new();
        let detector = LatestN { n: -1 };
        let analyzers: Vec<&dyn Analyzer> = Vec::new();
        let writer = RecordingWriter { reports: std::sync::Mutex::new(Vec::new()) };

        let err = run(&directory, &detector, &driver, None, &analyzers, &writer)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Silent(_)));
        assert_eq!(writer.reports.lock().unwrap().len(), 1);
    }
}
