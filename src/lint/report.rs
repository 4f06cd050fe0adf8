//! Diagnostics, `nolint` filtering, and report rendering.

use std::collections::HashMap;

use crate::directory::File;
use crate::error::CoreResult;
use crate::lexer::{self, Directive};

/// One analyzer finding attached to a file and, optionally, a statement.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub analyzer: String,
    pub code: Option<String>,
    pub message: String,
    pub stmt_pos: Option<usize>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Diagnostic {
            analyzer: String::new(),
            code: None,
            message: message.into(),
            stmt_pos: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_stmt_pos(mut self, pos: usize) -> Self {
        self.stmt_pos = Some(pos);
        self
    }
}

/// The outcome of linting one file: accumulated diagnostics, or a hard
/// error if an analyzer itself failed.
#[derive(Debug, Clone, Default)]
pub struct FileReport {
    pub name: String,
    pub diagnostics: Vec<Diagnostic>,
    pub error: Option<String>,
}

/// Filters diagnostics per the `nolint` directives attached to a file:
/// a bare `nolint` suppresses everything; a `nolint <token>...` suppresses
/// diagnostics whose analyzer name or code matches one of the tokens.
/// File-level directives apply to the whole file; per-statement ones only to
/// diagnostics anchored at that statement's byte position.
pub struct Reporter {
    file_rules: Vec<Vec<String>>,
    stmt_rules: HashMap<usize, Vec<Vec<String>>>,
}

impl Reporter {
    pub fn for_file(file: &File) -> Self {
        let file_rules = file
            .file_directives()
            .into_iter()
            .filter_map(|d| match d {
                Directive::NoLint { classes } => Some(classes),
                _ => None,
            })
            .collect();

        let mut stmt_rules = HashMap::new();
        for stmt in &file.statements {
            let rules: Vec<Vec<String>> = stmt
                .comments
                .iter()
                .filter_map(|c| lexer::parse_directive(c))
                .filter_map(|d| match d {
                    Directive::NoLint { classes } => Some(classes),
                    _ => None,
                })
                .collect();
            if !rules.is_empty() {
                stmt_rules.insert(stmt.pos, rules);
            }
        }

        Reporter { file_rules, stmt_rules }
    }

    /// True when a bare file-level `nolint` suppresses the whole file;
    /// callers should skip analysis entirely.
    pub fn is_fully_ignored(&self) -> bool {
        self.file_rules.iter().any(|classes| classes.is_empty())
    }

    /// Returns `None` if `diag` is suppressed by any applicable rule.
    pub fn report(&self, diag: Diagnostic) -> Option<Diagnostic> {
        if Self::suppressed_by(&self.file_rules, &diag) {
            return None;
        }
        if let Some(pos) = diag.stmt_pos {
            if let Some(rules) = self.stmt_rules.get(&pos) {
                if Self::suppressed_by(rules, &diag) {
                    return None;
                }
            }
        }
        Some(diag)
    }

    fn suppressed_by(rules: &[Vec<String>], diag: &Diagnostic) -> bool {
        rules.iter().any(|classes| {
            classes.is_empty()
                || classes
                    .iter()
                    .any(|token| token == &diag.analyzer || Some(token) == diag.code.as_ref())
        })
    }
}

/// Renders the accumulated `FileReport`s.
pub trait ReportWriter: Send + Sync {
    fn write(&self, reports: &[FileReport]) -> CoreResult<()>;
}

/// Human-readable plain-text report, one block per file.
pub struct TemplateReportWriter;

impl ReportWriter for TemplateReportWriter {
    fn write(&self, reports: &[FileReport]) -> CoreResult<()> {
        for report in reports {
            println!("{}", report.name);
            if let Some(err) = &report.error {
                println!("  error: {err}");
                continue;
            }
            if report.diagnostics.is_empty() {
                println!("  ok");
                continue;
            }
            for diag in &report.diagnostics {
                let code = diag.code.as_deref().unwrap_or("-");
                println!("  [{}:{}] {}", diag.analyzer, code, diag.message);
            }
        }
        Ok(())
    }
}

/// Machine-readable report, one JSON object per line.
pub struct JsonReportWriter;

impl ReportWriter for JsonReportWriter {
    fn write(&self, reports: &[FileReport]) -> CoreResult<()> {
        for report in reports {
            let diagnostics: Vec<_> = report
                .diagnostics
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "analyzer": d.analyzer,
                        "code": d.code,
                        "message": d.message,
                        "stmt_pos": d.stmt_pos,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "file": report.name,
                    "error": report.error,
                    "diagnostics": diagnostics,
                })
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with(text: &str) -> File {
        File::new("1.sql".to_string(), text.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn bare_file_level_nolint_ignores_everything() {
        let file = file_with("-- SYSTEM:nolint\nCREATE TABLE t (id int);");
        let reporter = Reporter::for_file(&file);
        assert!(reporter.is_fully_ignored());
    }

    #[test]
    fn class_scoped_nolint_suppresses_matching_code_only() {
        let file = file_with("-- SYSTEM:nolint destructive\nDROP TABLE t;");
        let reporter = Reporter::for_file(&file);
        assert!(!reporter.is_fully_ignored());

        let suppressed = Diagnostic::new("dropping a table").with_code("destructive");
        assert!(reporter.report(suppressed).is_none());

        let kept = Diagnostic::new("unrelated").with_code("data-dependent");
        assert!(reporter.report(kept).is_some());
    }

    #[test]
    fn analyzer_name_token_suppresses_all_its_diagnostics() {
        let file = file_with("-- SYSTEM:nolint destructive-analyzer\nDROP TABLE t;");
        let reporter = Reporter::for_file(&file);
        let mut diag = Diagnostic::new("anything");
        diag.analyzer = "destructive-analyzer".to_string();
        assert!(reporter.report(diag).is_none());
    }
}
