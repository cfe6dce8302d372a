use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::import::ImportSession;
use crate::report::{QueryCatalog, ReportRun};
use crate::store::SharedStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Session state owned by the main loop. The store handle is an explicit
/// value handed to whichever component needs it, never an ambient global;
/// swapping it (fresh import) is an ordinary assignment here.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<SharedStore>,
    pub catalog: QueryCatalog,
    pub import: Option<Arc<ImportSession>>,
    pub reports: HashMap<String, Arc<ReportRun>>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            store: None,
            catalog: QueryCatalog::builtin(),
            import: None,
            reports: HashMap::new(),
        }
    }
}
