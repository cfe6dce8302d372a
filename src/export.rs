use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

/// Quote a cell when it contains a delimiter, quote, or line break; embedded
/// quotes are doubled. Anything else passes through unquoted.
pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Serialize a result set as delimited text: one header row, then one line
/// per row. NULL cells are written as empty fields, so NULL and empty string
/// collapse together on re-read; that is the documented quoting rule's one
/// lossy corner.
pub fn write_csv(
    path: &Path,
    columns: &[String],
    rows: &[Vec<Option<String>>],
) -> anyhow::Result<usize> {
    let file = std::fs::File::create(path)?;
    let mut out = BufWriter::new(file);

    let header = columns
        .iter()
        .map(|c| csv_quote(c))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(out, "{}", header)?;

    for row in rows {
        let line = row
            .iter()
            .map(|cell| csv_quote(cell.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(rows.len())
}

enum RecordParse {
    Complete(Vec<String>),
    NeedsMore,
}

/// Split one logical record into fields. Returns NeedsMore when the record
/// ends inside a quoted field, i.e. the cell contains a line break and the
/// caller must append the next physical line.
fn parse_record(record: &str) -> RecordParse {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = record.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    if in_quotes {
        return RecordParse::NeedsMore;
    }
    out.push(buf);
    RecordParse::Complete(out)
}

/// Streaming record reader over any buffered input. Physical lines are
/// joined back together while a quoted field is still open, so quoted line
/// breaks survive the round trip.
pub struct CsvRecords<R: BufRead> {
    inner: R,
    done: bool,
}

impl<R: BufRead> CsvRecords<R> {
    pub fn new(inner: R) -> Self {
        CsvRecords { inner, done: false }
    }

    pub fn next_record(&mut self) -> anyhow::Result<Option<Vec<String>>> {
        if self.done {
            return Ok(None);
        }
        let mut record = String::new();
        loop {
            let mut line = String::new();
            let n = self.inner.read_line(&mut line)?;
            if n == 0 {
                self.done = true;
                if record.is_empty() {
                    return Ok(None);
                }
                // EOF inside a quoted field: surface what we have.
                return match parse_record(&record) {
                    RecordParse::Complete(fields) => Ok(Some(fields)),
                    RecordParse::NeedsMore => anyhow::bail!("unterminated quoted field at end of input"),
                };
            }
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if record.is_empty() {
                record.push_str(line);
            } else {
                record.push('\n');
                record.push_str(line);
            }
            match parse_record(&record) {
                RecordParse::Complete(fields) => return Ok(Some(fields)),
                RecordParse::NeedsMore => continue,
            }
        }
    }
}
