use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::info;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report::QueryCatalog;
use crate::store;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "reports": state.catalog.names(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // A store that cannot open aborts the whole session before any job runs.
    let opened = match store::open_store(&path) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };

    // A queries.json beside the store replaces the built-in report catalog.
    // This must not prevent the workspace from opening.
    let catalog_path = path.join("queries.json");
    if catalog_path.is_file() {
        match QueryCatalog::load(&catalog_path) {
            Ok(catalog) => {
                info!(path = %catalog_path.display(), "loaded workspace query catalog");
                state.catalog = catalog;
            }
            Err(e) => {
                return err(
                    &req.id,
                    "catalog_load_failed",
                    e.to_string(),
                    Some(json!({ "path": catalog_path.to_string_lossy() })),
                )
            }
        }
    } else {
        state.catalog = QueryCatalog::builtin();
    }

    state.workspace = Some(path.clone());
    state.store = Some(Arc::new(Mutex::new(opened)));
    state.import = None;
    state.reports.clear();

    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "storePath": store::store_path(&path).to_string_lossy(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
