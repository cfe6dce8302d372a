use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::source::SourceReader;

/// Configuration table every legacy source carries.
pub const CONFIG_TABLE: &str = "tblConfig";
/// Nullable identity field inside it.
pub const IDENTITY_FIELD: &str = "HFRCode";
/// Resolved when the field holds no non-null values at all.
pub const UNKNOWN_CODE: &str = "UNKNOWN";

/// Derive the source's identity code by majority vote over the non-null
/// values of `tblConfig.HFRCode`. Ties break to the lexicographically
/// smallest candidate so resolution is deterministic across runs and thread
/// schedules. A missing or unreadable configuration table fails the job —
/// "can't read" is not "no data". A present table whose identity column is
/// absent or entirely null resolves to `UNKNOWN`.
pub fn resolve_identity(source: &dyn SourceReader) -> EngineResult<String> {
    let mut table = source.open_table(CONFIG_TABLE).map_err(|e| {
        EngineError::IdentityResolution(format!(
            "{}: configuration table \"{}\": {}",
            source.display_name(),
            CONFIG_TABLE,
            e
        ))
    })?;

    let field_idx = table.columns().iter().position(|c| c == IDENTITY_FIELD);

    let mut tally: HashMap<String, usize> = HashMap::new();
    loop {
        let row = match table.next_row() {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(e) => {
                return Err(EngineError::IdentityResolution(format!(
                    "{}: reading \"{}\": {}",
                    source.display_name(),
                    CONFIG_TABLE,
                    e
                )))
            }
        };
        let Some(idx) = field_idx else { continue };
        if let Some(Some(code)) = row.get(idx) {
            *tally.entry(code.clone()).or_insert(0) += 1;
        }
    }

    let winner = tally
        .into_iter()
        // Highest count wins; among equals the smallest value does.
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(code, _)| code);

    Ok(winner.unwrap_or_else(|| UNKNOWN_CODE.to_string()))
}
