//! `DirectoryStateReader`: walks a `<schema>/<object-type>/<name>.sql` tree
//! with `WalkDir` and builds a [`Realm`] with lightweight regex-based
//! name/column extraction. Deliberately not a SQL grammar: the declarative
//! schema parser is an out-of-scope external collaborator.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::driver::StateReader;
use crate::error::{CoreError, CoreResult};
use crate::realm::{Column, Enum, Func, Proc, Realm, Schema, Table, View};

static CREATE_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)create table\s+(?:if not exists\s+)?(?:\w+\.)?(\w+)\s*\((.*)\)").unwrap());
static CREATE_FUNCTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)create(?: or replace)? function\s+(?:\w+\.)?(\w+)").unwrap());
static CREATE_PROC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)create(?: or replace)? (?:procedure|proc)\s+(?:\w+\.)?(\w+)").unwrap());
static CREATE_VIEW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)create(?: or replace)? view\s+(?:\w+\.)?(\w+)\s+as\s+(.*)").unwrap());
static CREATE_ENUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)create type\s+(?:\w+\.)?(\w+)\s+as enum\s*\((.*)\)").unwrap());
static ENUM_VALUE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"'([^']*)'").unwrap());

/// Reads schema state from a directory tree shaped as
/// `<schema>/<table|view|function|sp|usertype>/<name>.sql`.
pub struct DirectoryStateReader {
    root: PathBuf,
}

impl DirectoryStateReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryStateReader { root: root.into() }
    }

    fn read_schema(&self, schema_dir: &Path) -> CoreResult<Schema> {
        let schema_name = schema_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CoreError::Other("non-utf8 schema directory name".to_string()))?
            .to_string();
        let mut schema = Schema::new(schema_name);

        for entry in WalkDir::new(schema_dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| CoreError::Other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            let object_kind = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let text = std::fs::read_to_string(entry.path())?;
            classify_into_schema(&object_kind, &text, &mut schema);
        }
        Ok(schema)
    }
}

fn classify_into_schema(object_kind: &str, text: &str, schema: &mut Schema) {
    match object_kind {
        "table" => {
            if let Some(caps) = CREATE_TABLE_RE.captures(text) {
                let mut table = Table::new(caps[1].to_string());
                table.columns = parse_columns(&caps[2]);
                schema.tables.push(table);
            }
        }
        "view" => {
            if let Some(caps) = CREATE_VIEW_RE.captures(text) {
                schema.views.push(View {
                    name: caps[1].to_string(),
                    definition: caps[2].trim().to_string(),
                });
            }
        }
        "function" => {
            if let Some(caps) = CREATE_FUNCTION_RE.captures(text) {
                schema.funcs.push(Func { name: caps[1].to_string(), body: text.to_string() });
            }
        }
        "sp" | "procedure" => {
            if let Some(caps) = CREATE_PROC_RE.captures(text) {
                schema.procs.push(Proc { name: caps[1].to_string(), body: text.to_string() });
            }
        }
        "usertype" | "enum" => {
            if let Some(caps) = CREATE_ENUM_RE.captures(text) {
                let values = ENUM_VALUE_RE
                    .captures_iter(&caps[2])
                    .map(|c| c[1].to_string())
                    .collect();
                schema.enums.push(Enum { name: caps[1].to_string(), values });
            }
        }
        _ => {}
    }
}

fn parse_columns(body: &str) -> Vec<Column> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut fields = Vec::new();
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                fields.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&body[start..]);

    for field in fields {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let upper = field.to_uppercase();
        if upper.starts_with("PRIMARY KEY")
            || upper.starts_with("CONSTRAINT")
            || upper.starts_with("FOREIGN KEY")
            || upper.starts_with("UNIQUE")
            || upper.starts_with("CHECK")
        {
            continue;
        }
        let mut parts = field.splitn(2, char::is_whitespace);
        let Some(name) = parts.next() else { continue };
        let ty = parts.next().unwrap_or("text").trim().to_string();
        out.push(Column { name: name.to_string(), ty, attrs: vec![] });
    }
    out
}

#[async_trait]
impl StateReader for DirectoryStateReader {
    async fn read_state(&self) -> CoreResult<Realm> {
        let mut realm = Realm::empty();
        if !self.root.exists() {
            return Ok(realm);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let schema = self.read_schema(&entry.path())?;
                realm.upsert_schema(schema);
            }
        }
        Ok(realm)
    }
}
