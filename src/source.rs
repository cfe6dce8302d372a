use std::path::Path;

use crate::error::{EngineError, EngineResult};

pub mod csvdir;
#[cfg(test)]
pub mod memory;
pub mod sqlite;

/// One row of text cells, aligned with the owning table's column order.
/// Every value is coerced to text at this boundary; NULL stays None.
pub type Cells = Vec<Option<String>>;

/// Lazy cursor over one source table. Implementations keep memory bounded
/// regardless of table size.
pub trait TableReader {
    fn columns(&self) -> &[String];
    fn next_row(&mut self) -> EngineResult<Option<Cells>>;
}

/// The external reader capability: list a source's tables and stream any of
/// them. Binary legacy formats stay outside this crate; adapters consume the
/// exported forms a legacy database actually ships in.
pub trait SourceReader {
    /// Name used for provenance tagging and user-facing messages.
    fn display_name(&self) -> &str;
    fn table_names(&self) -> EngineResult<Vec<String>>;
    fn open_table(&self, name: &str) -> EngineResult<Box<dyn TableReader + '_>>;
}

impl std::fmt::Debug for dyn SourceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceReader")
            .field("display_name", &self.display_name())
            .finish()
    }
}

/// Pick an adapter from the path shape: a directory is a CSV-per-table
/// export, a SQLite file is opened read-only.
pub fn open_source(path: &Path) -> EngineResult<Box<dyn SourceReader>> {
    if path.is_dir() {
        return Ok(Box::new(csvdir::CsvDirSource::open(path)?));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "db" | "sqlite" | "sqlite3" => Ok(Box::new(sqlite::SqliteSource::open(path)?)),
        "mdb" | "accdb" => Err(EngineError::Source(format!(
            "{}: binary Access files must be exported first (CSV directory or sqlite snapshot)",
            path.display()
        ))),
        _ => Err(EngineError::Source(format!(
            "{}: unsupported source; expected a CSV export directory or a sqlite snapshot",
            path.display()
        ))),
    }
}

pub fn display_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| path.display().to_string())
}
