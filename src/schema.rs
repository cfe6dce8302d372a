use std::collections::HashMap;

use rusqlite::Connection;

use crate::error::{EngineError, EngineResult};
use crate::store::{quote_ident, table_columns, IDENTITY_COLUMN, SOURCE_FILE_COLUMN};

/// Ordered descriptor of one destination table: the source's columns plus
/// the two provenance columns, all text-typed. Built once per table per
/// session; every later source layout is validated against it instead of
/// being bound positionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn for_source(table: &str, source_columns: &[String]) -> EngineResult<TableSchema> {
        for col in source_columns {
            if col == IDENTITY_COLUMN || col == SOURCE_FILE_COLUMN {
                return Err(EngineError::SchemaMismatch {
                    table: table.to_string(),
                    expected: format!("no column named \"{}\" (reserved for provenance)", col),
                    found: source_columns.join(", "),
                });
            }
        }
        if let Some(dup) = first_duplicate(source_columns) {
            return Err(EngineError::SchemaMismatch {
                table: table.to_string(),
                expected: "distinct column names".to_string(),
                found: format!("\"{}\" appears more than once", dup),
            });
        }
        let mut columns: Vec<String> = source_columns.to_vec();
        columns.push(IDENTITY_COLUMN.to_string());
        columns.push(SOURCE_FILE_COLUMN.to_string());
        Ok(TableSchema {
            table: table.to_string(),
            columns,
        })
    }

    /// The descriptor minus the trailing provenance pair.
    pub fn source_columns(&self) -> &[String] {
        &self.columns[..self.columns.len() - 2]
    }

    fn create_sql(&self) -> String {
        let cols = self
            .columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.table),
            cols
        )
    }
}

fn first_duplicate(columns: &[String]) -> Option<&String> {
    let mut seen = std::collections::HashSet::new();
    columns.iter().find(|c| !seen.insert(c.as_str()))
}

/// Ensure the destination table exists for this source layout. Returns the
/// descriptor plus whether this call created the table (callers roll the
/// cache back if the surrounding transaction aborts).
///
/// A table that already exists is never altered: a source whose layout
/// disagrees with it is rejected here, before any row is written.
pub fn ensure_table(
    conn: &Connection,
    schemas: &mut HashMap<String, TableSchema>,
    table: &str,
    source_columns: &[String],
) -> EngineResult<(TableSchema, bool)> {
    let desired = TableSchema::for_source(table, source_columns)?;

    if let Some(known) = schemas.get(table) {
        if known.columns != desired.columns {
            return Err(mismatch(table, known.source_columns(), source_columns));
        }
        return Ok((known.clone(), false));
    }

    let existing = table_columns(conn, table)?;
    if !existing.is_empty() {
        if existing != desired.columns {
            let expected: Vec<String> = existing
                .iter()
                .filter(|c| c.as_str() != IDENTITY_COLUMN && c.as_str() != SOURCE_FILE_COLUMN)
                .cloned()
                .collect();
            return Err(mismatch(table, &expected, source_columns));
        }
        schemas.insert(table.to_string(), desired.clone());
        return Ok((desired, false));
    }

    conn.execute(&desired.create_sql(), [])?;
    schemas.insert(table.to_string(), desired.clone());
    Ok((desired, true))
}

fn mismatch(table: &str, expected: &[String], found: &[String]) -> EngineError {
    EngineError::SchemaMismatch {
        table: table.to_string(),
        expected: expected.join(", "),
        found: found.join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn mem_conn() -> Connection {
        Connection::open_in_memory().expect("open")
    }

    #[test]
    fn creates_table_with_provenance_columns_once() {
        let conn = mem_conn();
        let mut schemas = HashMap::new();
        let (schema, created) =
            ensure_table(&conn, &mut schemas, "Patients", &cols(&["ID", "Name"])).expect("ensure");
        assert!(created);
        assert_eq!(schema.columns, cols(&["ID", "Name", "hfr_code", "source_mdb"]));
        assert_eq!(
            crate::store::table_columns(&conn, "Patients").expect("cols"),
            schema.columns
        );

        // Second encounter reuses the cached descriptor, no DDL.
        let (_, created) =
            ensure_table(&conn, &mut schemas, "Patients", &cols(&["ID", "Name"])).expect("ensure");
        assert!(!created);
    }

    #[test]
    fn existing_table_from_earlier_session_is_adopted() {
        let conn = mem_conn();
        conn.execute(
            "CREATE TABLE \"Patients\"(\"ID\" TEXT, \"Name\" TEXT, \"hfr_code\" TEXT, \"source_mdb\" TEXT)",
            [],
        )
        .expect("create");
        let mut schemas = HashMap::new();
        let (_, created) =
            ensure_table(&conn, &mut schemas, "Patients", &cols(&["ID", "Name"])).expect("ensure");
        assert!(!created);
        assert!(schemas.contains_key("Patients"));
    }

    #[test]
    fn later_mismatching_layout_is_rejected_not_reconciled() {
        let conn = mem_conn();
        let mut schemas = HashMap::new();
        ensure_table(&conn, &mut schemas, "Patients", &cols(&["ID", "Name"])).expect("ensure");

        let err = ensure_table(&conn, &mut schemas, "Patients", &cols(&["ID", "FullName"]))
            .expect_err("must reject");
        let msg = err.to_string();
        assert!(msg.contains("Patients"));
        assert!(msg.contains("Name"));
        assert!(msg.contains("FullName"));
    }

    #[test]
    fn column_order_matters() {
        let conn = mem_conn();
        let mut schemas = HashMap::new();
        ensure_table(&conn, &mut schemas, "T", &cols(&["A", "B"])).expect("ensure");
        assert!(ensure_table(&conn, &mut schemas, "T", &cols(&["B", "A"])).is_err());
    }

    #[test]
    fn reserved_provenance_names_are_rejected() {
        let conn = mem_conn();
        let mut schemas = HashMap::new();
        let err = ensure_table(&conn, &mut schemas, "T", &cols(&["x", "hfr_code"]))
            .expect_err("reserved");
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn duplicate_source_columns_are_rejected() {
        let conn = mem_conn();
        let mut schemas = HashMap::new();
        assert!(ensure_table(&conn, &mut schemas, "T", &cols(&["x", "x"])).is_err());
    }

    #[test]
    fn quoted_identifiers_survive_awkward_table_names() {
        let conn = mem_conn();
        let mut schemas = HashMap::new();
        let (schema, created) =
            ensure_table(&conn, &mut schemas, "Odd \"Name\"", &cols(&["a b", "c,d"]))
                .expect("ensure");
        assert!(created);
        assert_eq!(
            crate::store::table_columns(&conn, "Odd \"Name\"").expect("cols"),
            schema.columns
        );
    }
}
