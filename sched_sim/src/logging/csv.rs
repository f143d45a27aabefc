use std::sync::Arc;
use chrono::Utc;
use tokio::sync::{Mutex, OnceCell};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::warn;

use crate::report::TaskSummary;
use crate::scheduler::{runner::CpuRow, EventRecord, SimEvent};

type LogFile = Arc<Mutex<BufWriter<tokio::fs::File>>>;

static EVENTS: OnceCell<Option<LogFile>> = OnceCell::const_new();
static CPU:    OnceCell<Option<LogFile>> = OnceCell::const_new();
static TASKS:  OnceCell<Option<LogFile>> = OnceCell::const_new();

async fn ensure_dir() {
    let _ = fs::create_dir_all("logs").await;
}

/// Opens (once) an append-mode CSV, writing `header` when the file is new.
/// A file that cannot be opened disables that log with a warning.
async fn get_file(cell: &OnceCell<Option<LogFile>>, path: &str, header: &str) -> Option<LogFile> {
    cell.get_or_init(|| async move {
        ensure_dir().await;
        let fresh = !fs::try_exists(path).await.unwrap_or(false);
        let f = match OpenOptions::new().create(true).append(true).open(path).await {
            Ok(f) => f,
            Err(e) => {
                warn!(%path, error = %e, "cannot open log file, disabling it");
                return None;
            }
        };
        let m = Arc::new(Mutex::new(BufWriter::new(f)));
        if fresh {
            let mut g = m.lock().await;
            let _ = g.write_all(header.as_bytes()).await;
            let _ = g.flush().await;
        }
        Some(m)
    })
    .await
    .clone()
}

async fn append(cell: &OnceCell<Option<LogFile>>, path: &str, header: &str, line: String) {
    let Some(file) = get_file(cell, path, header).await else {
        return;
    };
    let mut f = file.lock().await;
    let _ = f.write_all(line.as_bytes()).await;
}

/// Columns shared by every event: the core it happened on, the task and a
/// free-form detail field.
fn event_fields(event: &SimEvent) -> (String, String, String) {
    let opt = |s: &Option<String>| s.clone().unwrap_or_else(|| "idle".to_string());
    match event {
        SimEvent::Spawn { core, task }
        | SimEvent::Wake { core, task }
        | SimEvent::Block { core, task }
        | SimEvent::Yield { core, task }
        | SimEvent::Exit { core, task } => (core.to_string(), task.clone(), String::new()),
        SimEvent::Switch { core, from, to } => (core.to_string(), opt(to), format!("from={}", opt(from))),
        SimEvent::Migrate { from, to, policy, moved } => {
            (to.to_string(), String::new(), format!("{policy} from={from} moved={moved}"))
        }
        SimEvent::PolicySwitch { task, from, to } => (String::new(), task.clone(), format!("{from}->{to}")),
    }
}

/// sched_events.csv: ts,tick,event,core,task,detail
pub async fn log_sched_event(record: &EventRecord) {
    let ts = Utc::now().to_rfc3339();
    let (core, task, detail) = event_fields(&record.event);
    let line = format!("{ts},{},{},{core},{task},{detail}\n", record.tick, record.event.kind());
    append(&EVENTS, "logs/sched_events.csv", "ts,tick,event,core,task,detail\n", line).await;
}

/// cpu.csv: ts,tick,core,window_ticks,busy_ticks,idle_ticks,busy_pct
pub async fn log_cpu(row: &CpuRow) {
    let ts = Utc::now().to_rfc3339();
    let busy_pct = if row.window_ticks > 0 {
        (row.busy_ticks as f64 / row.window_ticks as f64) * 100.0
    } else {
        0.0
    };
    let line = format!(
        "{ts},{},{},{},{},{},{busy_pct:.2}\n",
        row.tick, row.core, row.window_ticks, row.busy_ticks, row.idle_ticks
    );
    append(
        &CPU,
        "logs/cpu.csv",
        "ts,tick,core,window_ticks,busy_ticks,idle_ticks,busy_pct\n",
        line,
    )
    .await;
}

/// tasks.csv: one row per task at the end of a run
pub async fn log_task_summary(t: &TaskSummary) {
    let ts = Utc::now().to_rfc3339();
    let opt = |v: Option<u64>| v.map(|x| x.to_string()).unwrap_or_default();
    let line = format!(
        "{ts},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
        t.name,
        t.policy,
        t.core,
        t.time_slice,
        t.runtime_ns,
        t.max_single_run_ns,
        t.exec_ticks,
        t.wait_ticks,
        t.switches,
        t.migrations,
        t.spawned_at,
        opt(t.first_run),
        opt(t.finished_at),
    );
    append(
        &TASKS,
        "logs/tasks.csv",
        "ts,task,policy,core,time_slice,runtime_ns,max_single_run_ns,exec_ticks,wait_ticks,switches,migrations,spawned_at,first_run,finished_at\n",
        line,
    )
    .await;
}

/// Pushes buffered rows to disk; call once before exit.
pub async fn flush_all() {
    for cell in [&EVENTS, &CPU, &TASKS] {
        if let Some(Some(file)) = cell.get() {
            let _ = file.lock().await.flush().await;
        }
    }
}
