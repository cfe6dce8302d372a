use chrono::NaiveDate;
use serde_json::json;

use crate::error::EngineError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report;

fn parse_date(req: &Request, key: &str) -> Result<NaiveDate, String> {
    let Some(raw) = req.params.get(key).and_then(|v| v.as_str()) else {
        return Err(format!("missing params.{}", key));
    };
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("params.{} must be YYYY-MM-DD, got \"{}\"", key, raw))
}

fn handle_report_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(name) = req.params.get("name").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.name", None);
    };
    let start = match parse_date(req, "startDate") {
        Ok(d) => d,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let end = match parse_date(req, "endDate") {
        Ok(d) => d,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if start > end {
        return err(
            &req.id,
            "bad_params",
            "Start Date cannot be after End Date",
            None,
        );
    }

    match report::spawn_report(store, &state.catalog, name, start, end) {
        Ok(run) => {
            let resp = ok(
                &req.id,
                json!({ "reportId": run.id, "name": run.name, "sql": run.sql }),
            );
            state.reports.insert(run.id.clone(), run);
            resp
        }
        // Unknown names land here, before any execution was attempted.
        Err(e @ EngineError::UnknownQuery(_)) => {
            err(&req.id, "unknown_query", e.to_string(), None)
        }
        Err(e) => err(&req.id, "report_failed", e.to_string(), None),
    }
}

fn handle_report_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(report_id) = req.params.get("reportId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.reportId", None);
    };
    let Some(run) = state.reports.get(report_id) else {
        return err(
            &req.id,
            "no_report",
            format!("unknown reportId: {}", report_id),
            None,
        );
    };

    let mut result = json!({
        "reportId": run.id,
        "name": run.name,
        "progress": run.progress(),
        "done": run.is_done(),
    });
    if let Some(outcome) = run.result() {
        match outcome {
            Ok(rs) => {
                result["columns"] = json!(rs.columns);
                result["rows"] = json!(rs.rows);
                result["rowCount"] = json!(rs.rows.len());
                result["sql"] = json!(run.sql);
            }
            Err(message) => {
                result["error"] = json!(message);
            }
        }
    }
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "report.run" => Some(handle_report_run(state, req)),
        "report.status" => Some(handle_report_status(state, req)),
        _ => None,
    }
}
