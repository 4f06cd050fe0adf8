//! Typed schema model and change-set.
//!
//! Cross-entity references (column↔table, foreign-key↔ref-table) are cyclic,
//! so the realm is an arena of flat vectors indexed by name-qualified string
//! keys rather than a tree of owned/borrowed pointers.
//! Equality and diffing compare by semantic identity (name + kind), never by
//! position, so reordering the arena never changes a diff's outcome.

use std::collections::HashMap;
use std::fmt;

/// An attribute attached to a schema entity: comment, collation, default
/// value, identity sequence, generated-column expression, etc..
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    Comment(String),
    Collation(String),
    Charset(String),
    Default(String),
    GeneratedExpr(String),
    Identity,
    NotNull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: String,
    pub attrs: Vec<Attr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrimaryKey {
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    pub checks: Vec<Check>,
    pub triggers: Vec<Trigger>,
    pub primary_key: Option<PrimaryKey>,
    pub attrs: Vec<Attr>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            checks: Vec::new(),
            triggers: Vec::new(),
            primary_key: None,
            attrs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub name: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Func {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proc {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enum {
    pub name: String,
    pub values: Vec<String>,
}

/// One namespace within a [`Realm`], holding tables, views, functions, etc.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    pub name: String,
    pub tables: Vec<Table>,
    pub views: Vec<View>,
    pub funcs: Vec<Func>,
    pub procs: Vec<Proc>,
    pub enums: Vec<Enum>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// The full database scope the tool manages: a collection of schemas plus
/// realm-level attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Realm {
    pub schemas: Vec<Schema>,
}

impl Realm {
    pub fn empty() -> Self {
        Realm::default()
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.name == name)
    }

    pub fn upsert_schema(&mut self, schema: Schema) {
        if let Some(existing) = self.schemas.iter_mut().find(|s| s.name == schema.name) {
            *existing = schema;
        } else {
            self.schemas.push(schema);
        }
    }

    /// Name-qualified lookup for a table, e.g. `"public.users"`.
    pub fn table_by_qualified_name(&self, qualified: &str) -> Option<&Table> {
        let (schema, table) = qualified.split_once('.')?;
        self.schema(schema)?.table(table)
    }
}

/// A tagged union over every kind of schema change the planner can emit.
/// Planners and formatters pattern-match on this; there is no inheritance
/// hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    AddSchema { name: String },
    DropSchema { name: String },
    AddTable { table: Table, schema: String },
    DropTable { name: String, schema: String },
    RenameTable { schema: String, from: String, to: String },
    ModifyTable { schema: String, name: String, ops: Vec<String> },
    AddColumn { schema: String, table: String, column: Column },
    DropColumn { schema: String, table: String, column: String },
    RenameColumn { schema: String, table: String, from: String, to: String },
    ModifyColumn { schema: String, table: String, column: Column },
    AddIndex { schema: String, table: String, index: Index },
    DropIndex { schema: String, table: String, index: String },
    AddForeignKey { schema: String, table: String, fk: ForeignKey },
    DropForeignKey { schema: String, table: String, fk: String },
    AddCheck { schema: String, table: String, check: Check },
    DropCheck { schema: String, table: String, check: String },
    AddView { schema: String, view: View },
    DropView { schema: String, name: String },
    AddFunc { schema: String, func: Func },
    DropFunc { schema: String, name: String },
    AddProc { schema: String, proc: Proc },
    DropProc { schema: String, name: String },
    AddEnum { schema: String, r#enum: Enum },
    DropEnum { schema: String, name: String },
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Opaque pass-through parameters for statement placeholders. Most
/// changes carry none.
pub type ChangeArgs = HashMap<String, String>;

/// A single planned change: the forward command, its reverse (if the
/// change is reversible), a human-readable comment, and passthrough args.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub cmd: String,
    pub reverse: Option<String>,
    pub comment: Option<String>,
    pub args: ChangeArgs,
}

impl Change {
    pub fn new(kind: ChangeKind, cmd: impl Into<String>) -> Self {
        Change {
            kind,
            cmd: cmd.into(),
            reverse: None,
            comment: None,
            args: ChangeArgs::new(),
        }
    }

    pub fn with_reverse(mut self, reverse: impl Into<String>) -> Self {
        self.reverse = Some(reverse.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// A rough dependency-ordering rank: creates before references, drops
    /// after dereferences. Lower sorts first.
    pub fn order_rank(&self) -> i32 {
        match &self.kind {
            ChangeKind::AddSchema { .. } => 0,
            ChangeKind::AddEnum { .. } => 1,
            ChangeKind::AddTable { .. } => 2,
            ChangeKind::AddColumn { .. } => 3,
            ChangeKind::AddIndex { .. } => 4,
            ChangeKind::ModifyTable { .. } | ChangeKind::ModifyColumn { .. } => 4,
            ChangeKind::RenameTable { .. } | ChangeKind::RenameColumn { .. } => 4,
            ChangeKind::AddCheck { .. } => 5,
            ChangeKind::AddForeignKey { .. } => 6,
            ChangeKind::AddView { .. } => 7,
            ChangeKind::AddFunc { .. } | ChangeKind::AddProc { .. } => 7,
            ChangeKind::DropForeignKey { .. } => 8,
            ChangeKind::DropCheck { .. } => 9,
            ChangeKind::DropIndex { .. } => 10,
            ChangeKind::DropColumn { .. } => 11,
            ChangeKind::DropView { .. } | ChangeKind::DropFunc { .. } | ChangeKind::DropProc { .. } => 12,
            ChangeKind::DropTable { .. } => 13,
            ChangeKind::DropEnum { .. } => 14,
            ChangeKind::DropSchema { .. } => 15,
        }
    }
}

/// An ordered plan of SQL changes, not yet written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub name: String,
    pub version: Option<String>,
    pub reversible: bool,
    pub transactional: bool,
    pub changes: Vec<Change>,
}

impl Plan {
    pub fn new(name: impl Into<String>, changes: Vec<Change>) -> Self {
        let reversible = changes.iter().all(|c| c.reverse.is_some());
        Plan {
            name: name.into(),
            version: None,
            reversible,
            transactional: true,
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup_by_qualified_name() {
        let mut realm = Realm::empty();
        let mut schema = Schema::new("public");
        schema.tables.push(Table::new("users"));
        realm.upsert_schema(schema);
        assert!(realm.table_by_qualified_name("public.users").is_some());
        assert!(realm.table_by_qualified_name("public.missing").is_none());
    }

    #[test]
    fn plan_is_reversible_only_when_every_change_has_a_reverse() {
        let with_reverse = Change::new(
            ChangeKind::AddTable {
                table: Table::new("t"),
                schema: "public".into(),
            },
            "CREATE TABLE t ();",
        )
        .with_reverse("DROP TABLE t;");
        let plan = Plan::new("init", vec![with_reverse]);
        assert!(plan.reversible);

        let without_reverse = Change::new(
            ChangeKind::DropTable {
                name: "t".into(),
                schema: "public".into(),
            },
            "DROP TABLE t;",
        );
        let plan2 = Plan::new("drop", vec![without_reverse]);
        assert!(!plan2.reversible);
    }
}
