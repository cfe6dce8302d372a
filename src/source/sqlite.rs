use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::error::{EngineError, EngineResult};
use crate::query::text_of;
use crate::source::{Cells, SourceReader, TableReader};
use crate::store::quote_ident;

/// How many rows one page pulls from the snapshot. Keeps memory bounded for
/// arbitrarily large source tables.
const PAGE_SIZE: usize = 500;

/// A legacy database exported as a SQLite snapshot, opened read-only so an
/// import can never write back into its own input.
pub struct SqliteSource {
    display_name: String,
    conn: Connection,
}

impl SqliteSource {
    pub fn open(path: &Path) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| EngineError::Source(format!("{}: {}", path.display(), e)))?;
        Ok(SqliteSource {
            display_name: crate::source::display_name_of(path),
            conn,
        })
    }
}

impl SourceReader for SqliteSource {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn table_names(&self) -> EngineResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn open_table(&self, name: &str) -> EngineResult<Box<dyn TableReader + '_>> {
        let columns = crate::store::table_columns(&self.conn, name)?;
        if columns.is_empty() {
            return Err(EngineError::Source(format!(
                "{}: no such table \"{}\"",
                self.display_name, name
            )));
        }
        Ok(Box::new(SqliteTableReader {
            conn: &self.conn,
            table: name.to_string(),
            columns,
            last_rowid: 0,
            page: std::collections::VecDeque::new(),
            exhausted: false,
        }))
    }
}

/// Pages through `rowid` so no statement borrow has to outlive a call.
/// Ordinary legacy tables all carry a rowid; WITHOUT ROWID tables are not a
/// shape the exporters produce.
struct SqliteTableReader<'c> {
    conn: &'c Connection,
    table: String,
    columns: Vec<String>,
    last_rowid: i64,
    page: std::collections::VecDeque<(i64, Cells)>,
    exhausted: bool,
}

impl SqliteTableReader<'_> {
    fn fetch_page(&mut self) -> EngineResult<()> {
        let col_list = self
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT rowid, {} FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT {}",
            col_list,
            quote_ident(&self.table),
            PAGE_SIZE
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([self.last_rowid])?;
        let mut fetched = 0usize;
        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            let mut cells: Cells = Vec::with_capacity(self.columns.len());
            for i in 0..self.columns.len() {
                cells.push(text_of(row.get_ref(i + 1)?));
            }
            self.page.push_back((rowid, cells));
            fetched += 1;
        }
        if fetched < PAGE_SIZE {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl TableReader for SqliteTableReader<'_> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> EngineResult<Option<Cells>> {
        if self.page.is_empty() && !self.exhausted {
            self.fetch_page()?;
        }
        match self.page.pop_front() {
            Some((rowid, cells)) => {
                self.last_rowid = rowid;
                Ok(Some(cells))
            }
            None => Ok(None),
        }
    }
}
