use rusqlite::{params_from_iter, Connection};

use crate::error::{EngineError, EngineResult};
use crate::schema::TableSchema;
use crate::source::{Cells, TableReader};
use crate::store::quote_ident;

/// Rows buffered per pull. Bounds memory no matter how large the source
/// table is.
pub const BATCH_SIZE: usize = 500;

/// Stream one source table into its destination inside the caller's
/// transaction. Cells keep their NULLs, and every row gains the identity
/// code and source filename as its final two values. Returns the row count.
pub fn copy_table(
    conn: &Connection,
    schema: &TableSchema,
    reader: &mut dyn TableReader,
    code: &str,
    source_file: &str,
) -> EngineResult<usize> {
    // The descriptor was built from some layout; re-check it against this
    // reader before any insert rather than trusting positions.
    if reader.columns() != schema.source_columns() {
        return Err(EngineError::SchemaMismatch {
            table: schema.table.clone(),
            expected: schema.source_columns().join(", "),
            found: reader.columns().join(", "),
        });
    }
    let width = schema.columns.len();

    let placeholders = (1..=width)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let col_list = schema
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&schema.table),
        col_list,
        placeholders
    );
    let mut insert = conn.prepare(&sql).map_err(|e| EngineError::Write {
        table: schema.table.clone(),
        message: e.to_string(),
    })?;

    let mut total = 0usize;
    let mut batch: Vec<Cells> = Vec::with_capacity(BATCH_SIZE);
    loop {
        batch.clear();
        while batch.len() < BATCH_SIZE {
            match reader.next_row()? {
                Some(row) => batch.push(row),
                None => break,
            }
        }
        if batch.is_empty() {
            break;
        }
        for row in batch.drain(..) {
            if row.len() != width - 2 {
                return Err(EngineError::Write {
                    table: schema.table.clone(),
                    message: format!(
                        "row {} has {} cells, expected {}",
                        total + 1,
                        row.len(),
                        width - 2
                    ),
                });
            }
            let mut values = row;
            values.push(Some(code.to_string()));
            values.push(Some(source_file.to_string()));
            insert
                .execute(params_from_iter(values))
                .map_err(|e| EngineError::Write {
                    table: schema.table.clone(),
                    message: e.to_string(),
                })?;
            total += 1;
        }
    }
    Ok(total)
}
