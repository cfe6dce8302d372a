use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::import::{self, ImportMode, ImportSession};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn handle_import_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(session) = &state.import {
        // One session at a time: the store mutex serializes writes, but two
        // interleaved sessions would scramble fresh/merge semantics.
        if !session.is_finished() {
            return err(
                &req.id,
                "import_running",
                format!(
                    "import session {} still running ({} / {})",
                    session.id,
                    session.completed(),
                    session.total
                ),
                None,
            );
        }
    }

    let paths: Vec<PathBuf> = req
        .params
        .get("paths")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default();
    if paths.is_empty() {
        return err(&req.id, "bad_params", "missing or empty params.paths", None);
    }

    let mode = match req.params.get("mode").and_then(|v| v.as_str()) {
        Some("fresh") => ImportMode::Fresh,
        Some("merge") => ImportMode::Merge,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "params.mode must be \"fresh\" or \"merge\"",
                None,
            )
        }
    };

    let shared = if mode == ImportMode::Fresh {
        // Drop our handle first so the new connection is the only one the
        // session hands out.
        state.store = None;
        match store::fresh_store(&workspace) {
            Ok(s) => {
                let shared = Arc::new(Mutex::new(s));
                state.store = Some(shared.clone());
                shared
            }
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
        }
    } else {
        match &state.store {
            Some(s) => s.clone(),
            None => match store::open_store(&workspace) {
                Ok(s) => {
                    let shared = Arc::new(Mutex::new(s));
                    state.store = Some(shared.clone());
                    shared
                }
                Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
            },
        }
    };

    let session = ImportSession::new(&paths, mode);
    let opener: import::SourceOpener = Arc::new(|p| crate::source::open_source(p));
    // The waiter thread owns the pool; it flips the session to finished.
    let _waiter = import::start(shared, session.clone(), opener);

    let resp = ok(
        &req.id,
        json!({
            "sessionId": session.id,
            "total": session.total,
            "workers": import::pool_size(session.total),
            "mode": session.mode.as_str(),
        }),
    );
    state.import = Some(session);
    resp
}

fn handle_import_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = &state.import else {
        return err(&req.id, "no_import", "no import session started", None);
    };

    let jobs: Vec<serde_json::Value> = session
        .jobs()
        .into_iter()
        .map(|j| {
            json!({
                "file": j.file,
                "state": j.state.as_str(),
                "hfrCode": j.code,
                "message": j.message,
            })
        })
        .collect();

    let mut result = json!({
        "sessionId": session.id,
        "mode": session.mode.as_str(),
        "total": session.total,
        "completed": session.completed(),
        "progress": session.progress(),
        "finished": session.is_finished(),
        "imported": session.imported(),
        "skipped": session.skipped(),
        "failures": session.failures(),
        "jobs": jobs,
    });

    // Once every job is terminal the downstream views refresh from the
    // merged store.
    if session.is_finished() {
        if let Some(store) = &state.store {
            let guard = store.lock().unwrap();
            if let Ok(tables) = store::list_tables(&guard.conn) {
                result["tables"] = json!(tables);
            }
            if let Ok(sources) = store::list_sources(&guard.conn) {
                let entries: Vec<String> = sources
                    .iter()
                    .map(|(code, file)| format!("{} [ {} ]", code, file))
                    .collect();
                result["sources"] = json!(entries);
            }
        }
    }

    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.start" => Some(handle_import_start(state, req)),
        "import.status" => Some(handle_import_status(state, req)),
        _ => None,
    }
}
