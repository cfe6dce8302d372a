use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::warn;

use crate::schema::TableSchema;

pub const STORE_FILE_NAME: &str = "converted.sqlite3";

/// Table consulted by the duplicate guard. It arrives with the sources
/// themselves; a source that lacks it never registers as imported.
pub const MARKER_TABLE: &str = "SecurityUsers";

/// Provenance columns appended to every destination row.
pub const IDENTITY_COLUMN: &str = "hfr_code";
pub const SOURCE_FILE_COLUMN: &str = "source_mdb";

/// The destination store plus the session's ensured-schema cache. The whole
/// struct sits behind one mutex: {duplicate check, schema creation, batched
/// insert} for a file must not interleave with any other file's writes.
pub struct Store {
    pub conn: Connection,
    pub schemas: std::collections::HashMap<String, TableSchema>,
}

pub type SharedStore = Arc<Mutex<Store>>;

pub fn store_path(workspace: &Path) -> PathBuf {
    workspace.join(STORE_FILE_NAME)
}

pub fn open_store(workspace: &Path) -> anyhow::Result<Store> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(store_path(workspace))?;
    Ok(Store {
        conn,
        schemas: std::collections::HashMap::new(),
    })
}

/// Fresh-import sessions discard the store before the first job starts.
pub fn fresh_store(workspace: &Path) -> anyhow::Result<Store> {
    std::fs::create_dir_all(workspace)?;
    let path = store_path(workspace);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    open_store(workspace)
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

pub fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols)
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    Ok(table_columns(conn, table)?.iter().any(|c| c == column))
}

/// Double-quote an identifier for dynamic DDL/DML. Source tables name
/// themselves, so embedded quotes must be escaped, not trusted.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Duplicate-guard probe. A probe that itself errors is treated as "not
/// imported" so a corrupt marker table cannot wedge every future import;
/// the failure is logged rather than swallowed.
pub fn already_imported(conn: &Connection, code: &str) -> bool {
    match probe_marker(conn, code) {
        Ok(hit) => hit,
        Err(e) => {
            warn!(code, error = %e, "duplicate probe failed; treating as not imported");
            false
        }
    }
}

fn probe_marker(conn: &Connection, code: &str) -> rusqlite::Result<bool> {
    if !table_exists(conn, MARKER_TABLE)? {
        return Ok(false);
    }
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
        quote_ident(MARKER_TABLE),
        quote_ident(IDENTITY_COLUMN)
    );
    match conn.query_row(&sql, [code], |_| Ok(())) {
        Ok(()) => Ok(true),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Imported-sources listing, one entry per (identity code, source file).
pub fn list_sources(conn: &Connection) -> rusqlite::Result<Vec<(String, String)>> {
    if !table_exists(conn, MARKER_TABLE)? {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT DISTINCT {code}, {src} FROM {table} ORDER BY {code}",
        code = quote_ident(IDENTITY_COLUMN),
        src = quote_ident(SOURCE_FILE_COLUMN),
        table = quote_ident(MARKER_TABLE)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Relaxed-durability scope for bulk imports. Restores the defaults on drop
/// so the settings never outlive the import that asked for them.
pub struct DurabilityScope<'a> {
    conn: &'a Connection,
}

impl<'a> DurabilityScope<'a> {
    pub fn relax(conn: &'a Connection) -> rusqlite::Result<Self> {
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.pragma_update(None, "journal_mode", "MEMORY")?;
        Ok(DurabilityScope { conn })
    }
}

impl Drop for DurabilityScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self
            .conn
            .pragma_update(None, "synchronous", "FULL")
            .and_then(|_| self.conn.pragma_update(None, "journal_mode", "DELETE"))
        {
            warn!(error = %e, "failed to restore durability pragmas");
        }
    }
}
