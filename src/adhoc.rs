//! Ad-hoc statement executor: the unrestricted power-user escape hatch.
//!
//! Classification is purely lexical — the leading keyword decides whether
//! the statement returns rows. No other validation happens; engine errors
//! propagate verbatim.

use rusqlite::types::ValueRef;

use crate::engine::Engine;
use crate::error::{CatalogError, Result};
use crate::types::StatementOutcome;

const ROW_RETURNING_VERBS: &[&str] = &[
    "select", "with", "values", "show", "describe", "explain", "pragma",
];

pub fn is_row_returning(text: &str) -> bool {
    let first = text
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    ROW_RETURNING_VERBS.contains(&first.as_str())
}

pub fn run_statement(engine: &Engine, text: &str) -> Result<StatementOutcome> {
    if text.trim().is_empty() {
        return Err(CatalogError::Query("empty statement".to_string()));
    }
    if is_row_returning(text) {
        let mut stmt = engine
            .conn()
            .prepare(text)
            .map_err(|e| CatalogError::Query(e.to_string()))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();
        let mut rows_out = Vec::new();
        let mut rows = stmt
            .query([])
            .map_err(|e| CatalogError::Query(e.to_string()))?;
        while let Some(row) = rows.next().map_err(|e| CatalogError::Query(e.to_string()))? {
            let mut out = Vec::with_capacity(column_count);
            for i in 0..column_count {
                out.push(cell_to_json(row.get_ref(i)?));
            }
            rows_out.push(out);
        }
        let row_count = rows_out.len();
        Ok(StatementOutcome::Rows {
            columns,
            rows: rows_out,
            row_count,
        })
    } else {
        let rows_affected = engine
            .conn()
            .execute(text, [])
            .map_err(|e| CatalogError::Query(e.to_string()))?;
        Ok(StatementOutcome::Ack { rows_affected })
    }
}

fn cell_to_json(cell: ValueRef<'_>) -> serde_json::Value {
    match cell {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn classification_by_leading_keyword() {
        assert!(is_row_returning("SELECT 1"));
        assert!(is_row_returning("  with x as (select 1) select * from x"));
        assert!(is_row_returning("PRAGMA table_info(tcg_cards)"));
        assert!(!is_row_returning("UPDATE tcg_cards SET name = 'x'"));
        assert!(!is_row_returning("DELETE FROM tcg_cards"));
        assert!(!is_row_returning(""));
    }

    #[test]
    fn select_returns_columns_and_rows() {
        let engine = Engine::new().unwrap();
        engine
            .conn()
            .execute(
                "INSERT INTO tcg_cards (id, name, hp) VALUES (?1, ?2, ?3)",
                params!["x-1", "Pidgey", "40"],
            )
            .unwrap();
        let outcome = run_statement(&engine, "SELECT id, name FROM tcg_cards").unwrap();
        match outcome {
            StatementOutcome::Rows {
                columns,
                rows,
                row_count,
            } => {
                assert_eq!(columns, vec!["id", "name"]);
                assert_eq!(row_count, 1);
                assert_eq!(rows[0][1], serde_json::json!("Pidgey"));
            }
            _ => panic!("expected rows"),
        }
    }

    #[test]
    fn write_returns_ack() {
        let engine = Engine::new().unwrap();
        engine
            .conn()
            .execute("INSERT INTO tcg_cards (id, name) VALUES ('x-1', 'Pidgey')", [])
            .unwrap();
        let outcome =
            run_statement(&engine, "UPDATE tcg_cards SET name = 'Pidgeotto'").unwrap();
        assert!(matches!(
            outcome,
            StatementOutcome::Ack { rows_affected: 1 }
        ));
    }

    #[test]
    fn engine_errors_propagate_verbatim() {
        let engine = Engine::new().unwrap();
        let err = run_statement(&engine, "SELECT * FROM no_such_table").unwrap_err();
        assert!(matches!(err, CatalogError::Query(_)));
        assert!(err.to_string().contains("no_such_table"));
    }
}
