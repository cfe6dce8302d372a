use rusqlite::Connection;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::store::{list_tables, quote_ident, table_has_column, IDENTITY_COLUMN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalOutcome {
    /// Tables that actually lost rows.
    pub tables_touched: usize,
    pub rows_deleted: usize,
}

/// Delete every row tagged with one identity code, table by table. The
/// caller holds the store lock, so removal never interleaves with an
/// in-flight import.
///
/// Deletes are independent per table: a failure partway through leaves the
/// earlier tables cleaned and reports exactly where it stopped. Removing a
/// code that owns nothing is a no-op, not an error.
pub fn remove_records(conn: &Connection, code: &str) -> EngineResult<RemovalOutcome> {
    let mut outcome = RemovalOutcome {
        tables_touched: 0,
        rows_deleted: 0,
    };
    let mut tables_done = 0usize;

    for table in list_tables(conn)? {
        if !table_has_column(conn, &table, IDENTITY_COLUMN)? {
            continue;
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(&table),
            quote_ident(IDENTITY_COLUMN)
        );
        let deleted = conn
            .execute(&sql, [code])
            .map_err(|e| EngineError::PartialRemoval {
                table: table.clone(),
                tables_done,
                rows_deleted: outcome.rows_deleted,
                message: e.to_string(),
            })?;
        tables_done += 1;
        if deleted > 0 {
            outcome.tables_touched += 1;
            outcome.rows_deleted += deleted;
        }
    }

    info!(
        code,
        tables = outcome.tables_touched,
        rows = outcome.rows_deleted,
        "removed records by identity code"
    );
    Ok(outcome)
}
