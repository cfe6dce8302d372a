use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_mdbmerged");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn mdbmerged");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

const ROWS_PER_SOURCE: usize = 20_000;

/// A legacy source exported as a sqlite snapshot, big enough that imports
/// take real time.
fn write_snapshot(dir: &Path, code: &str) -> PathBuf {
    let path = dir.join(format!("{code}.db"));
    let mut conn = Connection::open(&path).expect("open snapshot");
    conn.execute_batch(
        "CREATE TABLE \"tblConfig\"(\"ConfigKey\" TEXT, \"HFRCode\" TEXT);
         CREATE TABLE \"SecurityUsers\"(\"UserName\" TEXT, \"Role\" TEXT);
         CREATE TABLE \"Visits\"(\"VisitID\" TEXT, \"VisitDate\" TEXT);
         INSERT INTO \"SecurityUsers\" VALUES('admin','clerk');",
    )
    .expect("snapshot schema");
    conn.execute(
        "INSERT INTO \"tblConfig\" VALUES('site', ?1)",
        [code],
    )
    .expect("config row");
    let tx = conn.transaction().expect("tx");
    {
        let mut ins = tx
            .prepare("INSERT INTO \"Visits\" VALUES(?1, ?2)")
            .expect("prepare");
        for i in 0..ROWS_PER_SOURCE {
            ins.execute(rusqlite::params![format!("V{i}"), "2023-06-01"])
                .expect("insert");
        }
    }
    tx.commit().expect("commit");
    path
}

fn import_and_wait(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    tag: &str,
    paths: &[&Path],
    mode: &str,
) -> serde_json::Value {
    let path_strs: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    let started = request(
        stdin,
        reader,
        &format!("{tag}-start"),
        "import.start",
        json!({ "paths": path_strs, "mode": mode }),
    );
    assert_eq!(started["ok"], true, "{started}");

    for i in 0..600 {
        let status = request(
            stdin,
            reader,
            &format!("{tag}-st{i}"),
            "import.status",
            json!({}),
        );
        if status["result"]["finished"].as_bool() == Some(true) {
            return status;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("import {tag} did not finish");
}

fn visit_count(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    tag: &str,
) -> i64 {
    let resp = request(
        stdin,
        reader,
        tag,
        "query.run",
        json!({ "sql": "SELECT COUNT(*) AS n FROM \"Visits\"" }),
    );
    resp["result"]["rows"][0][0]
        .as_str()
        .expect("count cell")
        .parse()
        .expect("numeric count")
}

#[test]
fn parallel_import_matches_sequential_and_rejects_overlap() {
    let fixtures = temp_dir("mdbmerged-parity-fixtures");
    let codes = ["HF-2001", "HF-2002", "HF-2003", "HF-2004", "HF-2005", "HF-2006"];
    let snapshots: Vec<PathBuf> = codes
        .iter()
        .map(|c| write_snapshot(&fixtures, c))
        .collect();
    let snapshot_refs: Vec<&Path> = snapshots.iter().map(|p| p.as_path()).collect();

    // Sequential baseline: each file in its own session.
    let seq_workspace = temp_dir("mdbmerged-parity-seq");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": seq_workspace.to_string_lossy() }),
    );
    for (i, snap) in snapshot_refs.iter().enumerate() {
        let mode = if i == 0 { "fresh" } else { "merge" };
        let status = import_and_wait(&mut stdin, &mut reader, &format!("seq{i}"), &[snap], mode);
        assert_eq!(status["result"]["failures"].as_array().expect("failures").len(), 0);
    }
    let sequential_total = visit_count(&mut stdin, &mut reader, "seq-count");
    drop(stdin);
    let _ = child.wait();

    // Parallel run over the same six sources in one session.
    let par_workspace = temp_dir("mdbmerged-parity-par");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": par_workspace.to_string_lossy() }),
    );
    let path_strs: Vec<String> = snapshot_refs
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    let started = request(
        &mut stdin,
        &mut reader,
        "par-start",
        "import.start",
        json!({ "paths": path_strs, "mode": "fresh" }),
    );
    assert_eq!(started["ok"], true, "{started}");

    // While the pool is busy, a second session is a conflict.
    let overlap = request(
        &mut stdin,
        &mut reader,
        "overlap",
        "import.start",
        json!({ "paths": [snapshot_refs[0].to_string_lossy()], "mode": "merge" }),
    );
    assert_eq!(overlap["error"]["code"].as_str(), Some("import_running"));

    let status = {
        let mut finished = None;
        for i in 0..600 {
            let s = request(
                &mut stdin,
                &mut reader,
                &format!("par-st{i}"),
                "import.status",
                json!({}),
            );
            if s["result"]["finished"].as_bool() == Some(true) {
                finished = Some(s);
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        finished.expect("parallel import did not finish")
    };
    assert_eq!(
        status["result"]["imported"].as_array().expect("imported").len(),
        codes.len()
    );
    assert_eq!(status["result"]["failures"].as_array().expect("failures").len(), 0);

    let parallel_total = visit_count(&mut stdin, &mut reader, "par-count");
    assert_eq!(parallel_total, sequential_total);
    assert_eq!(parallel_total as usize, codes.len() * ROWS_PER_SOURCE);

    drop(stdin);
    let _ = child.wait();
    for d in [fixtures, seq_workspace, par_workspace] {
        let _ = std::fs::remove_dir_all(d);
    }
}
