//! Render compiled filters as SQLite `WHERE`/`ORDER BY` fragments.
//!
//! Client field names are looked up in a per-table [`Columns`] whitelist.
//! Names that are not listed are dropped, and every client value is bound as
//! a parameter, so nothing the client sends is spliced into the SQL text.

use sqlx::{QueryBuilder, Sqlite};

use super::{DEFAULT_SORT_FIELD, Operator, Predicate, SortSpec, Value};
use crate::db::format_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Boolean,
    Timestamp,
    /// JSON array stored as text.
    JsonArray,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    /// Name used by clients.
    pub field: &'static str,
    /// SQL expression.
    pub sql: &'static str,
    pub kind: ColumnKind,
}

pub const fn column(field: &'static str, sql: &'static str, kind: ColumnKind) -> Column {
    Column { field, sql, kind }
}

/// Filterable and sortable columns of one table.
#[derive(Debug, Clone, Copy)]
pub struct Columns(pub &'static [Column]);

impl Columns {
    pub fn get(&self, field: &str) -> Option<&Column> {
        self.0.iter().find(|c| c.field == field)
    }

    /// `ORDER BY` body. Unknown or array columns sort by creation time.
    pub fn order_by(&self, sort: &SortSpec) -> String {
        let column = self
            .get(&sort.field)
            .filter(|c| c.kind != ColumnKind::JsonArray)
            .or_else(|| self.get(DEFAULT_SORT_FIELD))
            .map(|c| c.sql)
            .unwrap_or("rowid");
        let direction = if sort.ascending { "ASC" } else { "DESC" };
        format!("{} {}, rowid {}", column, direction, direction)
    }

    /// Drop every condition on a field this table does not expose.
    pub fn restrict(&self, predicate: &Predicate) -> Predicate {
        self.restrict_inner(predicate).unwrap_or(Predicate::All)
    }

    fn restrict_inner(&self, predicate: &Predicate) -> Option<Predicate> {
        match predicate {
            Predicate::All => Some(Predicate::All),
            Predicate::Contains { field, .. }
            | Predicate::Equals { field, .. }
            | Predicate::Between { field, .. }
            | Predicate::InSet { field, .. } => {
                self.get(field).map(|_| predicate.clone())
            }
            Predicate::And(children) => {
                let kept = children.iter().filter_map(|c| self.restrict_inner(c)).collect();
                Some(Predicate::join(Operator::And, kept))
            }
            Predicate::Or(children) => {
                let kept: Vec<Predicate> =
                    children.iter().filter_map(|c| self.restrict_inner(c)).collect();
                if kept.is_empty() {
                    return None;
                }
                Some(Predicate::join(Operator::Or, kept))
            }
        }
    }
}

/// Escape `LIKE` wildcards so client text matches literally.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Append `predicate` (already restricted to `columns`) to the builder.
pub fn push_predicate(qb: &mut QueryBuilder<Sqlite>, predicate: &Predicate, columns: &Columns) {
    match predicate {
        Predicate::All => {
            qb.push("1 = 1");
        }
        Predicate::And(children) => push_group(qb, children, " AND ", columns),
        Predicate::Or(children) => push_group(qb, children, " OR ", columns),
        Predicate::Contains { field, needle } => {
            let Some(column) = columns.get(field) else {
                qb.push("1 = 1");
                return;
            };
            match column.kind {
                ColumnKind::Text | ColumnKind::JsonArray => qb.push(column.sql),
                _ => qb.push(format!("CAST({} AS TEXT)", column.sql)),
            };
            qb.push(" LIKE ");
            qb.push_bind(format!("%{}%", escape_like(needle)));
            qb.push(" ESCAPE '\\'");
        }
        Predicate::Equals { field, value } => {
            let Some(column) = columns.get(field) else {
                qb.push("1 = 1");
                return;
            };
            if column.kind == ColumnKind::JsonArray {
                qb.push(format!(
                    "EXISTS (SELECT 1 FROM json_each({}) WHERE json_each.value = ",
                    column.sql
                ));
                push_value(qb, value);
                qb.push(")");
            } else {
                qb.push(format!("{} = ", column.sql));
                push_value(qb, value);
            }
        }
        Predicate::Between { field, min, max } => {
            let Some(column) = columns.get(field) else {
                qb.push("1 = 1");
                return;
            };
            qb.push(format!("{} BETWEEN ", column.sql));
            push_value(qb, min);
            qb.push(" AND ");
            push_value(qb, max);
        }
        Predicate::InSet { field, values } => {
            let Some(column) = columns.get(field) else {
                qb.push("1 = 1");
                return;
            };
            if values.is_empty() {
                qb.push("1 = 0");
                return;
            }
            if column.kind == ColumnKind::JsonArray {
                qb.push(format!(
                    "EXISTS (SELECT 1 FROM json_each({}) WHERE json_each.value IN (",
                    column.sql
                ));
            } else {
                qb.push(format!("{} IN (", column.sql));
            }
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push_bind(value.clone());
            }
            qb.push(")");
            if column.kind == ColumnKind::JsonArray {
                qb.push(")");
            }
        }
    }
}

fn push_group(
    qb: &mut QueryBuilder<Sqlite>,
    children: &[Predicate],
    separator: &str,
    columns: &Columns,
) {
    qb.push("(");
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        push_predicate(qb, child, columns);
    }
    qb.push(")");
}

fn push_value(qb: &mut QueryBuilder<Sqlite>, value: &Value) {
    match value {
        Value::Text(s) => qb.push_bind(s.clone()),
        Value::Integer(n) => qb.push_bind(*n),
        Value::Boolean(b) => qb.push_bind(*b),
        Value::Timestamp(t) => qb.push_bind(format_timestamp(t)),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Field, Filter, FilterRequest, compile};

    const COLUMNS: Columns = Columns(&[
        column("title", "title", ColumnKind::Text),
        column("qty_clicks", "qty_clicks", ColumnKind::Integer),
        column("links", "links", ColumnKind::JsonArray),
        column("created_at", "created_at", ColumnKind::Timestamp),
    ]);

    fn render(predicate: &Predicate) -> String {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT 1 WHERE ");
        push_predicate(&mut qb, &COLUMNS.restrict(predicate), &COLUMNS);
        qb.sql().as_str().to_string()
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let request = FilterRequest {
            filters: vec![Filter {
                operator: "or".into(),
                fields: vec![
                    Field::new("password_hash", "string", "x"),
                    Field::new("title", "string", "rust"),
                ],
            }],
            ..FilterRequest::default()
        };
        let sql = render(&compile(&request).predicate);
        assert!(!sql.contains("password_hash"));
        assert!(sql.contains("title LIKE ?"));
    }

    #[test]
    fn test_only_unknown_fields_match_everything() {
        let predicate = Predicate::Contains {
            field: "1=1; DROP TABLE users".into(),
            needle: "x".into(),
        };
        assert_eq!(COLUMNS.restrict(&predicate), Predicate::All);
        assert!(render(&predicate).ends_with("1 = 1"));
    }

    #[test]
    fn test_json_array_membership_uses_json_each() {
        let predicate = Predicate::InSet {
            field: "links".into(),
            values: vec!["a".into(), "b".into()],
        };
        assert!(
            render(&predicate)
                .contains("EXISTS (SELECT 1 FROM json_each(links) WHERE json_each.value IN (?, ?))")
        );
    }

    #[test]
    fn test_order_by_falls_back_to_created_at() {
        let sort = SortSpec {
            field: "nope".into(),
            ascending: true,
        };
        assert_eq!(COLUMNS.order_by(&sort), "created_at ASC, rowid ASC");

        let sort = SortSpec {
            field: "qty_clicks".into(),
            ascending: false,
        };
        assert_eq!(COLUMNS.order_by(&sort), "qty_clicks DESC, rowid DESC");
    }
}
