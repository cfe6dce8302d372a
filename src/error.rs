use thiserror::Error;

/// Failures the import/merge engine can surface. Duplicate identities are
/// deliberately not in here: a skip is an outcome, not a fault, and is
/// reported on its own list.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration table was missing or unreadable. Distinct from
    /// "present but empty", which resolves to the UNKNOWN sentinel.
    #[error("identity resolution failed: {0}")]
    IdentityResolution(String),

    /// A source table's column layout is incompatible with the destination
    /// table that already exists under the same name.
    #[error("schema mismatch for table \"{table}\": destination has [{expected}], source has [{found}]")]
    SchemaMismatch {
        table: String,
        expected: String,
        found: String,
    },

    #[error("write failed for table \"{table}\": {message}")]
    Write { table: String, message: String },

    #[error("source error: {0}")]
    Source(String),

    #[error("removal failed at table \"{table}\" ({rows_deleted} rows already deleted from {tables_done} earlier tables): {message}")]
    PartialRemoval {
        table: String,
        tables_done: usize,
        rows_deleted: usize,
        message: String,
    },

    #[error("unknown predefined query: {0}")]
    UnknownQuery(String),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
