use std::path::PathBuf;

use serde_json::json;

use crate::export;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::query::run_sql;
use crate::store;

fn handle_tables_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = &state.store else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let guard = store.lock().unwrap();
    match store::list_tables(&guard.conn) {
        Ok(tables) => ok(&req.id, json!({ "tables": tables })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_query_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = &state.store else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(sql) = req.params.get("sql").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.sql", None);
    };

    let guard = store.lock().unwrap();
    match run_sql(&guard.conn, sql, &[]) {
        Ok(rs) => ok(
            &req.id,
            json!({
                "columns": rs.columns,
                "rows": rs.rows,
                "rowCount": rs.rows.len(),
            }),
        ),
        Err(e) => err(&req.id, "query_failed", e.to_string(), None),
    }
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = &state.store else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(sql) = req.params.get("sql").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.sql", None);
    };
    let Some(out_path) = req.params.get("outPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.outPath", None);
    };
    let out = PathBuf::from(out_path);

    let rs = {
        let guard = store.lock().unwrap();
        match run_sql(&guard.conn, sql, &[]) {
            Ok(rs) => rs,
            Err(e) => return err(&req.id, "query_failed", e.to_string(), None),
        }
    };

    match export::write_csv(&out, &rs.columns, &rs.rows) {
        Ok(rows) => ok(
            &req.id,
            json!({ "outPath": out.to_string_lossy(), "rows": rows }),
        ),
        Err(e) => err(
            &req.id,
            "export_failed",
            e.to_string(),
            Some(json!({ "outPath": out.to_string_lossy() })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tables.list" => Some(handle_tables_list(state, req)),
        "query.run" => Some(handle_query_run(state, req)),
        "export.csv" => Some(handle_export_csv(state, req)),
        _ => None,
    }
}
