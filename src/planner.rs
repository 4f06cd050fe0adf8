//! Planner/Formatter: turns a differ's change list into an
//! ordered `Plan`, then renders that plan into files written to a
//! [`Directory`](crate::directory::Directory) with a recomputed integrity
//! sidecar.

use crate::directory::dialects::new_version_stamp;
use crate::directory::Directory;
use crate::error::{CoreError, CoreResult};
use crate::realm::{Change, ChangeKind, Plan};
use crate::utils::topsort::topo_sort;

/// Renders a [`Plan`] into one or more `(name, bytes)` files. The
/// default formatter emits a single `<timestamp>_<name>.sql`; tool-compatible
/// formatters (golang-migrate, goose, flyway) emit up/down pairs instead.
pub trait Formatter: Send + Sync {
    fn format(&self, plan: &Plan) -> CoreResult<Vec<(String, Vec<u8>)>>;
}

/// One file per plan: each change's comment (if any) followed by its
/// command, delimited with `;`.
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn format(&self, plan: &Plan) -> CoreResult<Vec<(String, Vec<u8>)>> {
        let stamp = new_version_stamp();
        let name = format!("{stamp}_{}.sql", normalize_plan_name(&plan.name));
        let mut body = String::new();
        for change in &plan.changes {
            if let Some(comment) = &change.comment {
                body.push_str("-- ");
                body.push_str(comment);
                body.push('\n');
            }
            body.push_str(change.cmd.trim_end().trim_end_matches(';'));
            body.push_str(";\n");
        }
        Ok(vec![(name, body.into_bytes())])
    }
}

/// Emits a `<timestamp>_<name>.up.sql` / `.down.sql` pair, for the
/// golang-migrate on-disk convention.
pub struct UpDownFormatter;

impl Formatter for UpDownFormatter {
    fn format(&self, plan: &Plan) -> CoreResult<Vec<(String, Vec<u8>)>> {
        let stamp = new_version_stamp();
        let base = normalize_plan_name(&plan.name);
        let mut up = String::new();
        let mut down = String::new();
        for change in &plan.changes {
            up.push_str(change.cmd.trim_end().trim_end_matches(';'));
            up.push_str(";\n");
            if let Some(reverse) = &change.reverse {
                down.push_str(reverse.trim_end().trim_end_matches(';'));
                down.push_str(";\n");
            }
        }
        let mut files = vec![(format!("{stamp}_{base}.up.sql"), up.into_bytes())];
        if plan.reversible {
            files.push((format!("{stamp}_{base}.down.sql"), down.into_bytes()));
        }
        Ok(files)
    }
}

fn normalize_plan_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect::<String>()
        .to_lowercase()
}

/// Within the run of `AddTable` changes `order_rank` already grouped
/// together, reorders them so a table referencing another new table via a
/// foreign key always sorts after the table it references. Tables with no
/// such dependency keep their relative position. Falls back to the
/// `order_rank` order unchanged if the
/// dependency graph has a cycle (the differ never produces one in practice;
/// self-referencing or circular FKs are resolved by the dialect-specific SQL
/// generator, out of this core's scope).
fn reorder_table_creates_by_foreign_key(changes: &mut [Change]) {
    let add_table_positions: Vec<usize> = changes
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c.kind, ChangeKind::AddTable { .. }))
        .map(|(i, _)| i)
        .collect();
    if add_table_positions.len() < 2 {
        return;
    }

    let name_to_idx: std::collections::HashMap<&str, usize> = add_table_positions
        .iter()
        .filter_map(|&i| match &changes[i].kind {
            ChangeKind::AddTable { table, .. } => Some((table.name.as_str(), i)),
            _ => None,
        })
        .collect();

    let mut edges = Vec::new();
    for &i in &add_table_positions {
        if let ChangeKind::AddTable { table, .. } = &changes[i].kind {
            for fk in &table.foreign_keys {
                if let Some(&ref_idx) = name_to_idx.get(fk.ref_table.as_str()) {
                    if ref_idx != i {
                        edges.push((ref_idx, i));
                    }
                }
            }
        }
    }
    if edges.is_empty() {
        return;
    }

    // `topo_sort` only tracks nodes that appear in at least one edge, so a
    // table with no foreign keys of its own would otherwise be dropped from
    // the output entirely. Route every position through a shared sentinel
    // with no outgoing edges of its own: it adds no ordering constraint
    // between real nodes and is filtered back out below.
    const SENTINEL: usize = usize::MAX;
    for &i in &add_table_positions {
        edges.push((i, SENTINEL));
    }

    let Ok(sorted_positions) = topo_sort(&edges) else {
        return;
    };
    let sorted_positions: Vec<usize> = sorted_positions
        .into_iter()
        .filter(|&p| p != SENTINEL)
        .collect();

    let reordered: Vec<Change> = sorted_positions
        .iter()
        .map(|&p| changes[p].clone())
        .collect();
    for (slot, change) in add_table_positions.iter().zip(reordered) {
        changes[*slot] = change;
    }
}

/// Converts a differ's change list into a `Plan` and writes it to a
/// directory.
pub struct Planner<'a> {
    pub directory: &'a dyn Directory,
    pub formatter: &'a dyn Formatter,
}

impl<'a> Planner<'a> {
    pub fn new(directory: &'a dyn Directory, formatter: &'a dyn Formatter) -> Self {
        Planner { directory, formatter }
    }

    /// Builds a named, dependency-ordered `Plan` from an unordered change
    /// list. `ErrNoPlan` when there is nothing to do.
    pub fn plan(&self, name: impl Into<String>, mut changes: Vec<Change>) -> CoreResult<Plan> {
        if changes.is_empty() {
            return Err(CoreError::NoPlan);
        }
        changes.sort_by_key(|c| c.order_rank());
        reorder_table_creates_by_foreign_key(&mut changes);
        Ok(Plan::new(name, changes))
    }

    /// Formats `plan` and writes the resulting files, then recomputes and
    /// writes the integrity sidecar.
    pub fn write_plan(&self, plan: &Plan) -> CoreResult<Vec<String>> {
        let files = self.formatter.format(plan)?;
        let mut names = Vec::with_capacity(files.len());
        for (name, bytes) in &files {
            self.directory.write(name, bytes)?;
            names.push(name.clone());
        }
        let sum = self.directory.sum()?;
        self.directory.write_sum(&sum)?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::MemoryDirectory;
    use crate::realm::{Change, ChangeKind, Table};

    #[test]
    fn plan_rejects_empty_changeset() {
        let dir = MemoryDirectory::new();
        let formatter = DefaultFormatter;
        let planner = Planner::new(&dir, &formatter);
        let err = planner.plan("init", vec![]).unwrap_err();
        assert!(matches!(err, CoreError::NoPlan));
    }

    #[test]
    fn plan_orders_creates_before_drops() {
        let dir = MemoryDirectory::new();
        let formatter = DefaultFormatter;
        let planner = Planner::new(&dir, &formatter);
        let changes = vec![
            Change::new(
                ChangeKind::DropTable { name: "old".into(), schema: "public".into() },
                "DROP TABLE old;",
            ),
            Change::new(
                ChangeKind::AddTable { table: Table::new("new"), schema: "public".into() },
                "CREATE TABLE new ();",
            ),
        ];
        let plan = planner.plan("swap", changes).unwrap();
        assert!(matches!(plan.changes[0].kind, ChangeKind::AddTable { .. }));
        assert!(matches!(plan.changes[1].kind, ChangeKind::DropTable { .. }));
    }

    #[test]
    fn table_with_foreign_key_is_created_after_its_referenced_table() {
        let dir = MemoryDirectory::new();
        let formatter = DefaultFormatter;
        let planner = Planner::new(&dir, &formatter);

        let mut posts = Table::new("posts");
        posts.foreign_keys.push(crate::realm::ForeignKey {
            name: "posts_author_fkey".into(),
            columns: vec!["author_id".into()],
            ref_table: "users".into(),
            ref_columns: vec!["id".into()],
        });

        // Deliberately handed to the planner in dependency-violating order.
        let changes = vec![
            Change::new(
                ChangeKind::AddTable { table: posts, schema: "public".into() },
                "CREATE TABLE posts (author_id int);",
            ),
            Change::new(
                ChangeKind::AddTable { table: Table::new("users"), schema: "public".into() },
                "CREATE TABLE users (id int primary key);",
            ),
        ];
        let plan = planner.plan("init", changes).unwrap();
        let names: Vec<&str> = plan
            .changes
            .iter()
            .map(|c| match &c.kind {
                ChangeKind::AddTable { table, .. } => table.name.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["users", "posts"]);
    }

    #[test]
    fn write_plan_produces_file_and_updates_sum() {
        let dir = MemoryDirectory::new();
        let formatter = DefaultFormatter;
        let planner = Planner::new(&dir, &formatter);
        let changes = vec![Change::new(
            ChangeKind::AddTable { table: Table::new("users"), schema: "public".into() },
            "CREATE TABLE users (id int primary key);",
        )
        .with_comment("create users")];
        let plan = planner.plan("init", changes).unwrap();
        let names = planner.write_plan(&plan).unwrap();
        assert_eq!(names.len(), 1);
        assert!(dir.validate().is_ok());
        let body = String::from_utf8(dir.open(&names[0]).unwrap()).unwrap();
        assert!(body.contains("CREATE TABLE users"));
        assert!(body.contains("-- create users"));
    }
}
