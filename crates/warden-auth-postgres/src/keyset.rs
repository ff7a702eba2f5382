//! Keyset pagination in SQL.
//!
//! Translates a validated [`KeysetQuery`] into a `(sort_key, id)` row
//! comparison, an `ORDER BY` on both columns and a `LIMIT` of one extra row.
//! Text keys are compared with `COLLATE "C"` so the database orders them by
//! byte value, the same order the in-memory backend and the cursor use.
//!
//! Column names never come from the caller: each table maps its sortable
//! fields onto a fixed column list.

use std::mem;

use sqlx_core::query_builder::QueryBuilder;
use sqlx_postgres::Postgres;
use warden_auth::pagination::{KeysetQuery, SortKind, SortValue};

use crate::{StorageError, StorageResult};

/// Tracks whether a `WHERE` keyword was already emitted.
#[derive(Debug, Default)]
pub struct Conditions {
    started: bool,
}

impl Conditions {
    /// Pushes ` WHERE ` the first time, ` AND ` afterwards.
    pub fn push_next(&mut self, builder: &mut QueryBuilder<'_, Postgres>) {
        let keyword = if mem::replace(&mut self.started, true) {
            " AND "
        } else {
            " WHERE "
        };
        builder.push(keyword);
    }
}

/// The SQL expression a sort key is compared on.
fn sort_expression(column: &str, kind: SortKind) -> String {
    match kind {
        SortKind::Text => format!(r#"{column} COLLATE "C""#),
        _ => column.to_string(),
    }
}

fn push_sort_value(builder: &mut QueryBuilder<'_, Postgres>, value: &SortValue) {
    match value.clone() {
        SortValue::Text(v) => builder.push_bind(v),
        SortValue::Integer(v) => builder.push_bind(v),
        SortValue::Timestamp(v) => builder.push_bind(v),
        SortValue::Uuid(v) => builder.push_bind(v),
    };
}

/// Appends the cursor predicate, ordering and limit of `query`.
///
/// `columns` maps each sortable field to its column; the query's field must
/// be listed.
///
/// # Errors
///
/// Returns `StorageError::InvalidInput` for a field with no column.
pub fn push_keyset(
    builder: &mut QueryBuilder<'_, Postgres>,
    conditions: &mut Conditions,
    query: &KeysetQuery,
    columns: &[(&str, &str)],
) -> StorageResult<()> {
    let column = columns
        .iter()
        .find(|(field, _)| *field == query.order_by)
        .map(|(_, column)| *column)
        .ok_or_else(|| {
            StorageError::invalid_input(format!("'{}' is not a sortable column", query.order_by))
        })?;
    let expression = sort_expression(column, query.kind);

    if let Some(cursor) = &query.after {
        let op = if query.ascending { ">" } else { "<" };
        conditions.push_next(builder);
        builder.push(format!("({expression}, id) {op} ("));
        push_sort_value(builder, &cursor.value);
        builder.push(", ");
        builder.push_bind(cursor.id);
        builder.push(")");
    }

    let direction = if query.ascending { "ASC" } else { "DESC" };
    builder.push(format!(
        " ORDER BY {expression} {direction}, id {direction} LIMIT "
    ));
    builder.push_bind(i64::try_from(query.fetch_limit()).unwrap_or(i64::MAX));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use warden_auth::pagination::Cursor;

    const COLUMNS: &[(&str, &str)] = &[("display_name", "display_name"), ("created_at", "created_at")];

    fn query(order_by: &str, kind: SortKind, ascending: bool, after: Option<Cursor>) -> KeysetQuery {
        KeysetQuery {
            order_by: order_by.to_string(),
            kind,
            ascending,
            page_size: 20,
            after,
        }
    }

    #[test]
    fn test_first_page_has_no_predicate() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT id FROM warden_clients");
        let mut conditions = Conditions::default();
        push_keyset(
            &mut builder,
            &mut conditions,
            &query("created_at", SortKind::Timestamp, true, None),
            COLUMNS,
        )
        .unwrap();

        assert_eq!(
            builder.sql(),
            "SELECT id FROM warden_clients ORDER BY created_at ASC, id ASC LIMIT $1"
        );
    }

    #[test]
    fn test_descending_text_cursor_uses_byte_collation() {
        let cursor = Cursor {
            field: "display_name".to_string(),
            value: SortValue::Text("Zeta".to_string()),
            id: Uuid::new_v4(),
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT id FROM warden_clients");
        let mut conditions = Conditions::default();
        conditions.push_next(&mut builder);
        builder.push("tenant_id = ");
        builder.push_bind(Uuid::new_v4());

        push_keyset(
            &mut builder,
            &mut conditions,
            &query("display_name", SortKind::Text, false, Some(cursor)),
            COLUMNS,
        )
        .unwrap();

        assert_eq!(
            builder.sql(),
            "SELECT id FROM warden_clients WHERE tenant_id = $1 \
             AND (display_name COLLATE \"C\", id) < ($2, $3) \
             ORDER BY display_name COLLATE \"C\" DESC, id DESC LIMIT $4"
        );
    }

    #[test]
    fn test_unmapped_field_is_rejected() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT id FROM warden_clients");
        let err = push_keyset(
            &mut builder,
            &mut Conditions::default(),
            &query("secret_hash", SortKind::Text, true, None),
            COLUMNS,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }
}
