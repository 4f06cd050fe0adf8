//! Message-passing executor logger: a typed event stream, separate from
//! ambient `log::` calls, so the executor never couples itself to a
//! terminal or JSON renderer.

use std::sync::Mutex;

/// One step of an apply run, emitted in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Execution { from: Option<String>, to: Option<String>, files: Vec<String> },
    File { file: String, skip: u32 },
    Checks,
    Check { name: String },
    ChecksDone,
    Stmt { sql: String },
    Error { sql: String, err: String },
    Done,
}

/// Receives the executor's event stream. Implementations choose how to
/// render it; none of them may alter executor control flow.
pub trait Logger: Send + Sync {
    fn log(&self, event: Event);
}

/// Discards every event. Useful when a caller only wants `log::` output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _event: Event) {}
}

/// Renders each event as a single line to stderr via the `log` facade
/// (`log::info!`/`log::error!`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TermLogger;

impl Logger for TermLogger {
    fn log(&self, event: Event) {
        match event {
            Event::Execution { from, to, files } => log::info!(
                "applying {} file(s) ({} -> {})",
                files.len(),
                from.as_deref().unwrap_or("<base>"),
                to.as_deref().unwrap_or("<head>")
            ),
            Event::File { file, skip } => {
                if skip > 0 {
                    log::info!("{file}: resuming at statement {skip}");
                } else {
                    log::info!("{file}: applying");
                }
            }
            Event::Checks => log::info!("running checks"),
            Event::Check { name } => log::debug!("check: {name}"),
            Event::ChecksDone => log::info!("checks done"),
            Event::Stmt { sql } => log::debug!("exec: {sql}"),
            Event::Error { sql, err } => log::error!("statement failed: {sql}: {err}"),
            Event::Done => log::info!("done"),
        }
    }
}

/// Serializes each event to a single JSON line (`serde_json`), for piping
/// apply output into another tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLogger;

impl Logger for JsonLogger {
    fn log(&self, event: Event) {
        let value = match event {
            Event::Execution { from, to, files } => serde_json::json!({
                "type": "execution", "from": from, "to": to, "files": files,
            }),
            Event::File { file, skip } => serde_json::json!({
                "type": "file", "file": file, "skip": skip,
            }),
            Event::Checks => serde_json::json!({ "type": "checks" }),
            Event::Check { name } => serde_json::json!({ "type": "check", "name": name }),
            Event::ChecksDone => serde_json::json!({ "type": "checks_done" }),
            Event::Stmt { sql } => serde_json::json!({ "type": "stmt", "sql": sql }),
            Event::Error { sql, err } => serde_json::json!({
                "type": "error", "sql": sql, "err": err,
            }),
            Event::Done => serde_json::json!({ "type": "done" }),
        };
        println!("{value}");
    }
}

/// Records every event in order, for assertions in tests.
#[derive(Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<Event>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        RecordingLogger::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("recording logger mutex poisoned").clone()
    }
}

impl Logger for RecordingLogger {
    fn log(&self, event: Event) {
        self.events.lock().expect("recording logger mutex poisoned").push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_logger_preserves_order() {
        let logger = RecordingLogger::new();
        logger.log(Event::Execution { from: None, to: None, files: vec!["1.sql".into()] });
        logger.log(Event::File { file: "1.sql".into(), skip: 0 });
        logger.log(Event::Done);
        let events = logger.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], Event::Done));
    }
}
