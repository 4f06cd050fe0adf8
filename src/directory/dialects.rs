//! On-disk layout dialects: the same [`Directory`](super::Directory)
//! contract, parsed differently depending on which migration tool's naming
//! convention is in play.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

/// Parses a migration's `version`/`description` out of its file name, and
/// formats new file names when the planner writes a plan.
pub trait NameDialect: Send + Sync {
    fn parse(&self, file_name: &str) -> (Option<String>, String);
    fn format_name(&self, version: &str, description: &str) -> String;
}

/// Default (Atlas-style) layout: `<version>[_<description>][.sql]`, version
/// is the prefix up to the first `_`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDialect;

impl NameDialect for DefaultDialect {
    fn parse(&self, file_name: &str) -> (Option<String>, String) {
        let stem = file_name.strip_suffix(".sql").unwrap_or(file_name);
        match stem.split_once('_') {
            Some((version, desc)) => (Some(version.to_string()), normalize_description(desc)),
            None => (Some(stem.to_string()), String::new()),
        }
    }

    fn format_name(&self, version: &str, description: &str) -> String {
        if description.is_empty() {
            format!("{version}.sql")
        } else {
            format!("{version}_{}.sql", description.replace(' ', "_"))
        }
    }
}

/// Flyway layout: `V<version>__<desc>.sql`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlywayDialect;

static FLYWAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^V(.+?)__(.*)\.sql$").unwrap());

impl NameDialect for FlywayDialect {
    fn parse(&self, file_name: &str) -> (Option<String>, String) {
        if let Some(caps) = FLYWAY_RE.captures(file_name) {
            (
                Some(caps[1].to_string()),
                normalize_description(&caps[2]),
            )
        } else {
            (None, String::new())
        }
    }

    fn format_name(&self, version: &str, description: &str) -> String {
        format!("V{version}__{}.sql", description.replace(' ', "_"))
    }
}

/// golang-migrate layout: `<version>_<desc>.up.sql` / `.down.sql`. Only the
/// `up` side is tracked as the canonical file for planning purposes.
#[derive(Debug, Clone, Copy, Default)]
pub struct GolangMigrateDialect;

static GOLANG_MIGRATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)_(.*)\.(up|down)\.sql$").unwrap());

impl NameDialect for GolangMigrateDialect {
    fn parse(&self, file_name: &str) -> (Option<String>, String) {
        if let Some(caps) = GOLANG_MIGRATE_RE.captures(file_name) {
            (
                Some(caps[1].to_string()),
                normalize_description(&caps[2]),
            )
        } else {
            (None, String::new())
        }
    }

    fn format_name(&self, version: &str, description: &str) -> String {
        format!("{version}_{}.up.sql", description.replace(' ', "_"))
    }
}

/// goose layout: a single file per version carrying `-- +goose Up` /
/// `-- +goose Down` sections; name itself looks like the default dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct GooseDialect;

impl NameDialect for GooseDialect {
    fn parse(&self, file_name: &str) -> (Option<String>, String) {
        DefaultDialect.parse(file_name)
    }

    fn format_name(&self, version: &str, description: &str) -> String {
        DefaultDialect.format_name(version, description)
    }
}

/// goose pragma state machine: `{none -> up -> (begin <-> end) -> down}`.
/// Any out-of-order pragma is an error carrying the file name and line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GooseState {
    None,
    Up,
    UpBegin,
    Down,
    DownBegin,
}

#[derive(Debug, thiserror::Error)]
#[error("goose pragma out of order in {file:?} at line {line}: {pragma}")]
pub struct GoosePragmaError {
    pub file: String,
    pub line: usize,
    pub pragma: String,
}

/// Split a goose-formatted file into `(up_statements, down_statements)` raw
/// text blocks, honoring `-- +goose StatementBegin/End` to keep
/// multi-statement blocks intact even though they would otherwise defy
/// delimiter detection.
pub fn split_goose_sections(
    file_name: &str,
    text: &str,
) -> Result<(String, String), GoosePragmaError> {
    let mut state = GooseState::None;
    let mut up = String::new();
    let mut down = String::new();

    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        let lineno = idx + 1;
        match trimmed {
            "-- +goose Up" => {
                if state != GooseState::None {
                    return Err(GoosePragmaError {
                        file: file_name.to_string(),
                        line: lineno,
                        pragma: trimmed.to_string(),
                    });
                }
                state = GooseState::Up;
            }
            "-- +goose Down" => {
                if state != GooseState::Up {
                    return Err(GoosePragmaError {
                        file: file_name.to_string(),
                        line: lineno,
                        pragma: trimmed.to_string(),
                    });
                }
                state = GooseState::Down;
            }
            "-- +goose StatementBegin" => {
                state = match state {
                    GooseState::Up => GooseState::UpBegin,
                    GooseState::Down => GooseState::DownBegin,
                    _ => {
                        return Err(GoosePragmaError {
                            file: file_name.to_string(),
                            line: lineno,
                            pragma: trimmed.to_string(),
                        })
                    }
                };
            }
            "-- +goose StatementEnd" => {
                state = match state {
                    GooseState::UpBegin => GooseState::Up,
                    GooseState::DownBegin => GooseState::Down,
                    _ => {
                        return Err(GoosePragmaError {
                            file: file_name.to_string(),
                            line: lineno,
                            pragma: trimmed.to_string(),
                        })
                    }
                };
            }
            _ => match state {
                GooseState::Up | GooseState::UpBegin => {
                    up.push_str(line);
                    up.push('\n');
                }
                GooseState::Down | GooseState::DownBegin => {
                    down.push_str(line);
                    down.push('\n');
                }
                GooseState::None => {}
            },
        }
    }

    Ok((up, down))
}

fn normalize_description(desc: &str) -> String {
    desc.replace('_', " ").trim().to_string()
}

/// Generate a lexicographically orderable version identifier: a
/// zero-padded UTC timestamp, matching the default dialect's documented
/// format.
pub fn new_version_stamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dialect_parses_version_and_description() {
        let (v, d) = DefaultDialect.parse("20240101000000_create_users_table.sql");
        assert_eq!(v.as_deref(), Some("20240101000000"));
        assert_eq!(d, "create users table");
    }

    #[test]
    fn flyway_dialect_parses() {
        let (v, d) = FlywayDialect.parse("V1_2__add_index.sql");
        assert_eq!(v.as_deref(), Some("1_2"));
        assert_eq!(d, "add index");
    }

    #[test]
    fn golang_migrate_dialect_parses_up_file() {
        let (v, d) = GolangMigrateDialect.parse("000001_create_users.up.sql");
        assert_eq!(v.as_deref(), Some("000001"));
        assert_eq!(d, "create users");
    }

    #[test]
    fn goose_sections_split_respecting_statement_begin_end() {
        let text = "-- +goose Up\n-- +goose StatementBegin\nCREATE TABLE a (id int);\nCREATE TABLE b(id int);\n-- +goose StatementEnd\n-- +goose Down\nDROP TABLE a;\n";
        let (up, down) = split_goose_sections("1_init.sql", text).unwrap();
        assert!(up.contains("CREATE TABLE a"));
        assert!(up.contains("CREATE TABLE b"));
        assert!(down.contains("DROP TABLE a"));
    }

    #[test]
    fn goose_out_of_order_pragma_errors_with_line() {
        let text = "-- +goose Down\n";
        let err = split_goose_sections("1_init.sql", text).unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.file, "1_init.sql");
    }
}
