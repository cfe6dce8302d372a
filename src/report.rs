use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::query::{run_sql, ResultSet};
use crate::store::SharedStore;

/// Predefined templates shipped with the binary. Each takes exactly two
/// positional date parameters (period start, period end).
static BUILTIN: Lazy<QueryCatalog> = Lazy::new(|| {
    QueryCatalog::from_json(include_str!("../queries.json"))
        .expect("built-in queries.json is well-formed")
});

/// Name → parameterized SQL template, loaded once. Missing keys are a hard
/// error surfaced before any execution starts.
#[derive(Debug, Clone)]
pub struct QueryCatalog {
    queries: HashMap<String, String>,
}

impl QueryCatalog {
    pub fn builtin() -> QueryCatalog {
        BUILTIN.clone()
    }

    pub fn from_json(text: &str) -> anyhow::Result<QueryCatalog> {
        let queries: HashMap<String, String> = serde_json::from_str(text)?;
        Ok(QueryCatalog { queries })
    }

    pub fn load(path: &Path) -> anyhow::Result<QueryCatalog> {
        let text = std::fs::read_to_string(path)?;
        QueryCatalog::from_json(&text)
    }

    pub fn get(&self, name: &str) -> EngineResult<&str> {
        self.queries
            .get(name)
            .map(|s| s.as_str())
            .ok_or_else(|| EngineError::UnknownQuery(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queries.keys().cloned().collect();
        names.sort();
        names
    }
}

/// One background report execution. The shell polls progress; the fraction
/// is simulated in 5 % ticks capped at 90 % until the real query lands,
/// mirroring how long-running store queries report while SQLite gives no
/// row-level feedback.
pub struct ReportRun {
    pub id: String,
    pub name: String,
    pub sql: String,
    progress_permille: AtomicU32,
    done: AtomicBool,
    result: Mutex<Option<Result<ResultSet, String>>>,
}

const TICK_INTERVAL: Duration = Duration::from_millis(300);
const TICK_STEP: u32 = 50;
const TICK_CAP: u32 = 900;

impl ReportRun {
    pub fn progress(&self) -> f64 {
        self.progress_permille.load(Ordering::Acquire) as f64 / 1000.0
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// The finished result, if any: Ok rows or the failure message.
    pub fn result(&self) -> Option<Result<ResultSet, String>> {
        self.result.lock().unwrap().clone()
    }
}

/// Validate and launch one predefined query off the interactive path.
/// Returns immediately; the run is polled by id. The only cancellable piece
/// is the progress ticker, stopped by flag once the query completes.
pub fn spawn_report(
    store: SharedStore,
    catalog: &QueryCatalog,
    name: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> EngineResult<Arc<ReportRun>> {
    // Resolution failures happen here, before any thread or execution.
    let sql = catalog.get(name)?.to_string();

    let run = Arc::new(ReportRun {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        sql: sql.clone(),
        progress_permille: AtomicU32::new(0),
        done: AtomicBool::new(false),
        result: Mutex::new(None),
    });

    let ticker_run = run.clone();
    thread::Builder::new()
        .name(format!("report-tick-{}", name))
        .spawn(move || {
            while !ticker_run.done.load(Ordering::Acquire) {
                thread::sleep(TICK_INTERVAL);
                let p = ticker_run.progress_permille.load(Ordering::Acquire);
                if p < TICK_CAP {
                    ticker_run
                        .progress_permille
                        .store((p + TICK_STEP).min(TICK_CAP), Ordering::Release);
                }
            }
        })
        .expect("spawn report ticker");

    let worker_run = run.clone();
    let start_s = start.format("%Y-%m-%d").to_string();
    let end_s = end.format("%Y-%m-%d").to_string();
    thread::Builder::new()
        .name(format!("report-{}", name))
        .spawn(move || {
            let outcome = {
                let guard = store.lock().unwrap();
                run_sql(&guard.conn, &worker_run.sql, &[&start_s, &end_s])
            };
            match &outcome {
                Ok(rs) => info!(name = %worker_run.name, rows = rs.rows.len(), "report complete"),
                Err(e) => warn!(name = %worker_run.name, error = %e, "report failed"),
            }
            *worker_run.result.lock().unwrap() =
                Some(outcome.map_err(|e| e.to_string()));
            worker_run
                .progress_permille
                .store(1000, Ordering::Release);
            worker_run.done.store(true, Ordering::Release);
        })
        .expect("spawn report worker");

    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_store;

    fn wait_done(run: &ReportRun) {
        for _ in 0..200 {
            if run.is_done() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("report did not finish");
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn builtin_catalog_has_the_shipped_reports() {
        let catalog = QueryCatalog::builtin();
        assert_eq!(catalog.names(), vec!["HTS_SELF", "HTS_TST", "TX_NEW"]);
        assert!(catalog.get("TX_NEW").expect("get").contains("?1"));
    }

    #[test]
    fn unknown_name_fails_before_execution() {
        let catalog = QueryCatalog::builtin();
        let err = catalog.get("TX_CURR").expect_err("unknown");
        assert!(matches!(err, EngineError::UnknownQuery(_)));
        assert!(err.to_string().contains("TX_CURR"));
    }

    #[test]
    fn date_range_binds_positionally_and_filters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).expect("open");
        store
            .conn
            .execute_batch(
                "CREATE TABLE \"HtsTests\"(\"TestDate\" TEXT, \"TestResult\" TEXT, \"hfr_code\" TEXT, \"source_mdb\" TEXT);
                 INSERT INTO \"HtsTests\" VALUES('2023-03-10','NEG','HF-0001','a.mdb');
                 INSERT INTO \"HtsTests\" VALUES('2023-11-02','POS','HF-0001','a.mdb');
                 INSERT INTO \"HtsTests\" VALUES('2022-12-31','NEG','HF-0001','a.mdb');
                 INSERT INTO \"HtsTests\" VALUES('2024-01-01','POS','HF-0001','a.mdb');",
            )
            .expect("seed");
        let store: SharedStore = Arc::new(Mutex::new(store));

        let catalog = QueryCatalog::builtin();
        let run = spawn_report(
            store,
            &catalog,
            "HTS_TST",
            date("2023-01-01"),
            date("2023-12-31"),
        )
        .expect("spawn");
        wait_done(&run);

        let rs = run.result().expect("result").expect("rows");
        assert_eq!(rs.columns, vec!["Facility", "Result", "Tested"]);
        // Only the two 2023 rows are in range, one per result value.
        assert_eq!(rs.rows.len(), 2);
        assert!((run.progress() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn failure_is_captured_not_thrown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).expect("open");
        let store: SharedStore = Arc::new(Mutex::new(store));
        // No ArtPatients table in an empty store.
        let run = spawn_report(
            store,
            &QueryCatalog::builtin(),
            "TX_NEW",
            date("2023-01-01"),
            date("2023-12-31"),
        )
        .expect("spawn");
        wait_done(&run);
        let err = run.result().expect("result").expect_err("must fail");
        assert!(err.contains("ArtPatients"));
    }

    #[test]
    fn workspace_catalog_overrides_builtin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queries.json");
        std::fs::write(&path, "{\"ONLY\": \"SELECT ?1, ?2\"}").expect("write");
        let catalog = QueryCatalog::load(&path).expect("load");
        assert_eq!(catalog.names(), vec!["ONLY"]);
        assert!(catalog.get("TX_NEW").is_err());
    }
}
