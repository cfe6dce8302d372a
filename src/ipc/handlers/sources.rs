use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::remove;
use crate::store;

fn handle_sources_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = &state.store else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let guard = store.lock().unwrap();
    match store::list_sources(&guard.conn) {
        Ok(sources) => {
            let entries: Vec<serde_json::Value> = sources
                .iter()
                .map(|(code, file)| {
                    json!({
                        "hfrCode": code,
                        "sourceFile": file,
                        "label": format!("{} [ {} ]", code, file),
                    })
                })
                .collect();
            ok(&req.id, json!({ "sources": entries }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sources_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = &state.store else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(code) = req.params.get("hfrCode").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.hfrCode", None);
    };

    // Holding the store lock for the whole sweep keeps removal exclusive
    // with any in-flight import.
    let guard = store.lock().unwrap();
    match remove::remove_records(&guard.conn, code) {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "hfrCode": code,
                "tablesTouched": outcome.tables_touched,
                "rowsDeleted": outcome.rows_deleted,
            }),
        ),
        Err(e) => err(
            &req.id,
            "removal_failed",
            e.to_string(),
            Some(json!({ "hfrCode": code })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sources.list" => Some(handle_sources_list(state, req)),
        "sources.remove" => Some(handle_sources_remove(state, req)),
        _ => None,
    }
}
