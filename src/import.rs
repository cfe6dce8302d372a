use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::source::SourceReader;
use crate::store::{already_imported, DurabilityScope, SharedStore, Store};
use crate::{identity, schema, writer};

/// Opens a path as a source. Injected so the coordinator never cares where
/// tables come from; production wires in `source::open_source`.
pub type SourceOpener =
    Arc<dyn Fn(&Path) -> EngineResult<Box<dyn SourceReader>> + Send + Sync>;

/// Fresh sessions discard the store before the first job; merge sessions
/// append to whatever is already there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportMode {
    Fresh,
    Merge,
}

impl ImportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportMode::Fresh => "fresh",
            ImportMode::Merge => "merge",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Queued,
    ResolvingIdentity,
    AwaitingStoreLock,
    CheckingDuplicate,
    Importing,
    Skipped,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Skipped | JobState::Succeeded | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::ResolvingIdentity => "resolving-identity",
            JobState::AwaitingStoreLock => "awaiting-store-lock",
            JobState::CheckingDuplicate => "checking-duplicate",
            JobState::Importing => "importing",
            JobState::Skipped => "skipped",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct JobRecord {
    pub file: String,
    pub path: PathBuf,
    pub state: JobState,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// One user-triggered import. Workers mutate it from arbitrary threads; the
/// shell reads it through snapshots. Every job increments the completed
/// counter exactly once, on its terminal transition, whichever of the three
/// terminal states it lands in.
pub struct ImportSession {
    pub id: String,
    pub mode: ImportMode,
    pub total: usize,
    completed: AtomicUsize,
    finished: AtomicBool,
    jobs: Mutex<Vec<JobRecord>>,
    imported: Mutex<Vec<String>>,
    skipped: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
}

impl ImportSession {
    pub fn new(paths: &[PathBuf], mode: ImportMode) -> Arc<ImportSession> {
        let jobs = paths
            .iter()
            .map(|p| JobRecord {
                file: crate::source::display_name_of(p),
                path: p.clone(),
                state: JobState::Queued,
                code: None,
                message: None,
            })
            .collect();
        Arc::new(ImportSession {
            id: Uuid::new_v4().to_string(),
            mode,
            total: paths.len(),
            completed: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            jobs: Mutex::new(jobs),
            imported: Mutex::new(Vec::new()),
            skipped: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        })
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed() as f64 / self.total as f64
    }

    /// True only after every job is terminal and the waiter has aggregated.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn imported(&self) -> Vec<String> {
        self.imported.lock().unwrap().clone()
    }

    pub fn skipped(&self) -> Vec<String> {
        self.skipped.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.jobs.lock().unwrap().clone()
    }

    fn set_state(&self, idx: usize, state: JobState) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs[idx].state = state;
    }

    fn job_path(&self, idx: usize) -> (PathBuf, String) {
        let jobs = self.jobs.lock().unwrap();
        (jobs[idx].path.clone(), jobs[idx].file.clone())
    }

    fn finish(&self, idx: usize, state: JobState, code: Option<String>, message: Option<String>) {
        debug_assert!(state.is_terminal());
        {
            let mut jobs = self.jobs.lock().unwrap();
            jobs[idx].state = state;
            jobs[idx].code = code;
            jobs[idx].message = message;
        }
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            session = %self.id,
            done,
            total = self.total,
            state = state.as_str(),
            "processed {} / {} sources",
            done,
            self.total
        );
    }
}

/// Worker-pool size: one thread per file, capped at the machine's available
/// parallelism.
pub fn pool_size(file_count: usize) -> usize {
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    file_count.min(cores).max(1)
}

/// Run the whole session on the calling thread: fan the queued jobs out to a
/// bounded pool, join every worker, then aggregate. The join replaces the
/// original shell's poll-until-terminated loop.
pub fn run_import(store: SharedStore, session: Arc<ImportSession>, opener: SourceOpener) {
    let queue: Arc<Mutex<VecDeque<usize>>> =
        Arc::new(Mutex::new((0..session.total).collect()));
    let workers = pool_size(session.total);

    let mut handles = Vec::with_capacity(workers);
    for w in 0..workers {
        let store = store.clone();
        let session = session.clone();
        let queue = queue.clone();
        let opener = opener.clone();
        let handle = thread::Builder::new()
            .name(format!("import-{}", w))
            .spawn(move || loop {
                let next = queue.lock().unwrap().pop_front();
                let Some(idx) = next else { break };
                run_job(&store, &session, &opener, idx);
            })
            .expect("spawn import worker");
        handles.push(handle);
    }
    for h in handles {
        if h.join().is_err() {
            warn!(session = %session.id, "import worker panicked");
        }
    }

    let (ok, skip, fail) = (
        session.imported().len(),
        session.skipped().len(),
        session.failures().len(),
    );
    session.finished.store(true, Ordering::Release);
    info!(
        session = %session.id,
        imported = ok,
        skipped = skip,
        failed = fail,
        "all sources processed"
    );
}

/// Detached variant for the IPC surface: the returned waiter thread owns the
/// pool and flips the session to finished.
pub fn start(
    store: SharedStore,
    session: Arc<ImportSession>,
    opener: SourceOpener,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("import-waiter".to_string())
        .spawn(move || run_import(store, session, opener))
        .expect("spawn import waiter")
}

fn run_job(store: &SharedStore, session: &Arc<ImportSession>, opener: &SourceOpener, idx: usize) {
    let (path, file) = session.job_path(idx);

    // Source reading and identity resolution take no store lock and run
    // fully in parallel across workers.
    session.set_state(idx, JobState::ResolvingIdentity);
    let resolved = opener(&path).and_then(|source| {
        let code = identity::resolve_identity(source.as_ref())?;
        Ok((source, code))
    });
    let (source, code) = match resolved {
        Ok(v) => v,
        Err(e) => {
            session.finish(
                idx,
                JobState::Failed,
                None,
                Some(format!("Failed: [ {} ] - {}", file, e)),
            );
            return;
        }
    };

    // From here to the end of the write the store must not interleave with
    // any other job: the duplicate check is only meaningful while we still
    // hold the lock it was made under.
    session.set_state(idx, JobState::AwaitingStoreLock);
    let mut guard = store.lock().unwrap();

    session.set_state(idx, JobState::CheckingDuplicate);
    if already_imported(&guard.conn, &code) {
        drop(guard);
        let msg = format!("{} [ {} ] already imported", code, file);
        session.skipped.lock().unwrap().push(msg.clone());
        session.finish(idx, JobState::Skipped, Some(code), Some(msg));
        return;
    }

    session.set_state(idx, JobState::Importing);
    let result = import_source(&mut guard, source.as_ref(), &code, &file);
    drop(guard);

    match result {
        Ok(rows) => {
            debug!(code = %code, file = %file, rows, "source imported");
            session
                .imported
                .lock()
                .unwrap()
                .push(format!("{} [ {} ]", code, file));
            session.finish(idx, JobState::Succeeded, Some(code), None);
        }
        Err(e) => {
            let msg = format!("Failed: [ {} ] - {}", file, e);
            session.failures.lock().unwrap().push(msg.clone());
            session.finish(idx, JobState::Failed, Some(code), Some(msg));
        }
    }
}

/// Copy every table of one source into the store inside a single
/// transaction, so a failure anywhere leaves the store exactly as it was
/// before this file began. Tables are written in source-listed order.
fn import_source(
    store: &mut Store,
    source: &dyn SourceReader,
    code: &str,
    file: &str,
) -> EngineResult<usize> {
    let mut created: Vec<String> = Vec::new();
    let result = copy_all(store, source, code, file, &mut created);
    if result.is_err() {
        // The rollback dropped any tables this file created; the cache must
        // not remember them.
        for table in &created {
            store.schemas.remove(table);
        }
    }
    result
}

fn copy_all(
    store: &mut Store,
    source: &dyn SourceReader,
    code: &str,
    file: &str,
    created: &mut Vec<String>,
) -> EngineResult<usize> {
    let Store { conn, schemas } = store;
    let _durability = DurabilityScope::relax(conn)?;
    let tx = conn.unchecked_transaction()?;

    let mut total = 0usize;
    for table in source.table_names()? {
        let mut reader = source.open_table(&table)?;
        let columns = reader.columns().to_vec();
        let (table_schema, was_created) = schema::ensure_table(&tx, schemas, &table, &columns)?;
        if was_created {
            created.push(table.clone());
        }
        total += writer::copy_table(&tx, &table_schema, reader.as_mut(), code, file)?;
    }
    tx.commit()?;
    Ok(total)
}
