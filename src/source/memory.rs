use crate::error::{EngineError, EngineResult};
use crate::source::{Cells, SourceReader, TableReader};

/// In-process source used by fixtures and tests: tables are listed in
/// insertion order, matching a real source's listed order.
pub struct MemorySource {
    display_name: String,
    tables: Vec<MemoryTable>,
}

struct MemoryTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Cells>,
    // Injects a stream error after N rows; exercises rollback paths.
    fail_after: Option<usize>,
}

impl MemorySource {
    pub fn new(display_name: impl Into<String>) -> Self {
        MemorySource {
            display_name: display_name.into(),
            tables: Vec::new(),
        }
    }

    pub fn with_table(
        mut self,
        name: impl Into<String>,
        columns: &[&str],
        rows: Vec<Cells>,
    ) -> Self {
        self.tables.push(MemoryTable {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            fail_after: None,
        });
        self
    }

    pub fn with_failing_table(
        mut self,
        name: impl Into<String>,
        columns: &[&str],
        rows: Vec<Cells>,
        fail_after: usize,
    ) -> Self {
        self.tables.push(MemoryTable {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            fail_after: Some(fail_after),
        });
        self
    }

    /// Shorthand for the configuration table the identity resolver reads.
    pub fn with_config(self, codes: &[Option<&str>]) -> Self {
        let rows = codes
            .iter()
            .map(|c| vec![Some("site".to_string()), c.map(|s| s.to_string())])
            .collect();
        self.with_table(crate::identity::CONFIG_TABLE, &["ConfigKey", crate::identity::IDENTITY_FIELD], rows)
    }
}

impl SourceReader for MemorySource {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn table_names(&self) -> EngineResult<Vec<String>> {
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    fn open_table(&self, name: &str) -> EngineResult<Box<dyn TableReader + '_>> {
        let Some(table) = self.tables.iter().find(|t| t.name == name) else {
            return Err(EngineError::Source(format!(
                "{}: no such table \"{}\"",
                self.display_name, name
            )));
        };
        Ok(Box::new(MemoryTableReader { table, pos: 0 }))
    }
}

struct MemoryTableReader<'s> {
    table: &'s MemoryTable,
    pos: usize,
}

impl TableReader for MemoryTableReader<'_> {
    fn columns(&self) -> &[String] {
        &self.table.columns
    }

    fn next_row(&mut self) -> EngineResult<Option<Cells>> {
        if let Some(limit) = self.table.fail_after {
            if self.pos >= limit {
                return Err(EngineError::Source(format!(
                    "simulated read failure in \"{}\" after {} rows",
                    self.table.name, limit
                )));
            }
        }
        let row = self.table.rows.get(self.pos).cloned();
        if row.is_some() {
            self.pos += 1;
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn preserves_listed_order_and_rows() {
        let src = MemorySource::new("mem.mdb")
            .with_table("B", &["x"], vec![vec![cell("1")]])
            .with_table("A", &["x"], vec![vec![cell("2")]]);
        assert_eq!(src.table_names().expect("names"), vec!["B", "A"]);
        let mut t = src.open_table("B").expect("table");
        assert_eq!(t.next_row().expect("row"), Some(vec![cell("1")]));
        assert_eq!(t.next_row().expect("row"), None);
    }

    #[test]
    fn failing_table_errors_mid_stream() {
        let src = MemorySource::new("mem.mdb").with_failing_table(
            "T",
            &["x"],
            vec![vec![cell("1")], vec![cell("2")]],
            1,
        );
        let mut t = src.open_table("T").expect("table");
        assert!(t.next_row().expect("first is fine").is_some());
        assert!(t.next_row().is_err());
    }
}
