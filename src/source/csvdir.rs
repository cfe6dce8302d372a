use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::export::CsvRecords;
use crate::source::{Cells, SourceReader, TableReader};

/// A legacy database exported as a directory of `<Table>.csv` files, one per
/// table, header row first (the shape mdb-export tooling produces).
pub struct CsvDirSource {
    display_name: String,
    tables: Vec<(String, PathBuf)>,
}

impl CsvDirSource {
    pub fn open(dir: &Path) -> EngineResult<Self> {
        let display_name = crate::source::display_name_of(dir);
        let mut tables: Vec<(String, PathBuf)> = Vec::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| EngineError::Source(format!("{}: {}", dir.display(), e)))?;
        for ent in entries {
            let ent = ent.map_err(|e| EngineError::Source(format!("{}: {}", dir.display(), e)))?;
            let p = ent.path();
            if !p.is_file() {
                continue;
            }
            let Some(name) = p.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !name.to_ascii_lowercase().ends_with(".csv") {
                continue;
            }
            let table = name[..name.len() - 4].to_string();
            tables.push((table, p));
        }
        if tables.is_empty() {
            return Err(EngineError::Source(format!(
                "{}: no .csv tables found",
                dir.display()
            )));
        }
        // Directory iteration order is platform noise; list deterministically.
        tables.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(CsvDirSource {
            display_name,
            tables,
        })
    }
}

impl SourceReader for CsvDirSource {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn table_names(&self) -> EngineResult<Vec<String>> {
        Ok(self.tables.iter().map(|(n, _)| n.clone()).collect())
    }

    fn open_table(&self, name: &str) -> EngineResult<Box<dyn TableReader + '_>> {
        let Some((_, path)) = self.tables.iter().find(|(n, _)| n == name) else {
            return Err(EngineError::Source(format!(
                "{}: no such table \"{}\"",
                self.display_name, name
            )));
        };
        let file = File::open(path)
            .map_err(|e| EngineError::Source(format!("{}: {}", path.display(), e)))?;
        let mut records = CsvRecords::new(BufReader::new(file));
        let header = records
            .next_record()
            .map_err(|e| EngineError::Source(format!("{}: {}", path.display(), e)))?
            .ok_or_else(|| {
                EngineError::Source(format!("{}: empty table file", path.display()))
            })?;
        Ok(Box::new(CsvTableReader {
            table: name.to_string(),
            path: path.clone(),
            columns: header,
            records,
            row_no: 1,
        }))
    }
}

struct CsvTableReader {
    table: String,
    path: PathBuf,
    columns: Vec<String>,
    records: CsvRecords<BufReader<File>>,
    row_no: usize,
}

impl TableReader for CsvTableReader {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> EngineResult<Option<Cells>> {
        loop {
            let fields = match self
                .records
                .next_record()
                .map_err(|e| EngineError::Source(format!("{}: {}", self.path.display(), e)))?
            {
                Some(f) => f,
                None => return Ok(None),
            };
            self.row_no += 1;
            // Blank separator lines show up as one empty field; skip them.
            if fields.len() == 1 && fields[0].is_empty() {
                continue;
            }
            if fields.len() != self.columns.len() {
                return Err(EngineError::Source(format!(
                    "{} row {}: {} cells, expected {} (table \"{}\")",
                    self.path.display(),
                    self.row_no,
                    fields.len(),
                    self.columns.len(),
                    self.table
                )));
            }
            // Empty fields import as NULL; delimited text cannot say which
            // one the legacy database meant.
            return Ok(Some(
                fields
                    .into_iter()
                    .map(|f| if f.is_empty() { None } else { Some(f) })
                    .collect(),
            ));
        }
    }
}
