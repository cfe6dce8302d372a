use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

use crate::error::EngineResult;

/// Generic tabular result: ordered column labels plus rows of text cells.
/// Every consumer — the shell's result grid, reports, CSV export — reads
/// this one shape.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Text coercion at the result boundary; shared with the sqlite source
/// adapter so both edges of the system speak the same cells.
pub fn text_of(v: ValueRef<'_>) -> Option<String> {
    match v {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Run one SQL statement with positional text parameters and collect the
/// full result set.
pub fn run_sql(conn: &Connection, sql: &str, params: &[&str]) -> EngineResult<ResultSet> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut raw = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = raw.next()? {
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(text_of(row.get_ref(i)?));
        }
        rows.push(cells);
    }
    Ok(ResultSet { columns, rows })
}
