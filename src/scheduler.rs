//! The scheduler control loop: one pass per invocation.
//!
//! Pass order is fixed: reap stuck in-flight jobs first, then compute free
//! capacity against the live process table, admit pending jobs whose audio
//! has arrived, dispatch engine processes, and poll them to a terminal
//! state. All decisions are reconstructed from the store plus the OS
//! process table, so a pass killed at any point is recovered by the next
//! one.
//!
//! Overlapping passes are excluded with an advisory file lock under the
//! data root; a second invocation exits cleanly without touching the store.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::budget;
use crate::config::Config;
use crate::job::PendingJob;
use crate::layout;
use crate::store::JobStore;
use crate::supervisor::{self, EngineChild};

/// Seconds between polls of dispatched engine processes.
const SLEEP_SEC: u64 = 5;

/// Cap on engine log bytes quoted into diagnostics and tracing output.
const LOG_PREFIX_CAP: u64 = 65536;

const REASON_KILLED: &str = "killed:toolong";
const REASON_ATTEMPT: &str = "failed:attempt";
const REASON_ENGINE: &str = "error:whisper";

/// Run one control-loop pass.
pub async fn run_pass(config: &Config, store: &JobStore) -> Result<()> {
    let Some(_lock) = acquire_pass_lock(&config.data_dir)? else {
        info!(vid = "task", "another pass holds the scheduler lock, skipping");
        return Ok(());
    };

    // R1: resolve stuck in-flight rows, keeping the map of live engines.
    let procs = reap(config, store).await?;

    // R2: free slots against the live process table.
    let free = config.max_cpu.saturating_sub(procs.len());
    if free == 0 {
        info!(vid = "task", "no free slots ({} running)", procs.len());
        return Ok(());
    }

    // R3: admit pending jobs whose audio is on disk and large enough.
    let pending = store.pending().await.map_err(db_err)?;
    let total = pending.len();
    let candidates: Vec<Candidate> = pending
        .into_iter()
        .map(|job| {
            let audio = audio_path(config, &job);
            let size = std::fs::metadata(&audio).map(|m| m.len()).ok();
            Candidate { job, size }
        })
        .collect();
    let local = candidates.iter().filter(|c| c.size.is_some()).count();
    info!(vid = "loaded", "local = {local}, total = {total}");
    let admitted = admit(candidates, free, config.wav_min_size);

    // R4: dispatch.
    let mut running: Vec<(Uuid, EngineChild)> = Vec::new();
    for job in admitted {
        let audio = audio_path(config, &job);
        store.mark_processing(job.auid, Some(Utc::now().naive_utc())).await.map_err(db_err)?;
        info!(vid = %job.auid, "processing");
        match supervisor::spawn_engine(config, job.lang, job.tier, &audio) {
            Ok(child) => running.push((job.auid, child)),
            Err(err) => {
                warn!(vid = %job.auid, "engine spawn failed: {err:#}");
                store.mark_failed(job.auid, REASON_ENGINE).await.map_err(db_err)?;
            }
        }
    }

    // R5: poll dispatched engines until the set drains.
    while !running.is_empty() {
        tokio::time::sleep(Duration::from_secs(SLEEP_SEC)).await;
        running = poll_running(store, running).await?;
    }
    Ok(())
}

fn audio_path(config: &Config, job: &PendingJob) -> PathBuf {
    layout::audio_path(&config.data_dir, job.auid, job.lang, job.tier, job.loaded)
}

/// Tag a store failure with the `db` vid before it aborts the pass.
fn db_err(err: anyhow::Error) -> anyhow::Error {
    error!(vid = "db", "{err:#}");
    err
}

/// R1: compare in-flight rows against the process table and the per-job
/// deadline. Returns the process map with killed entries removed, which is
/// authoritative for capacity.
async fn reap(config: &Config, store: &JobStore) -> Result<HashMap<PathBuf, u32>> {
    let rows = store.in_flight().await.map_err(db_err)?;
    let mut procs = supervisor::running_engines(&config.whisper);
    let reported = rows.len();
    let now = Utc::now().naive_utc();

    for row in &rows {
        let audio =
            layout::audio_path(&config.data_dir, row.auid, row.lang, row.tier, row.loaded);
        // A row without its audio yet is left alone until the file arrives.
        let Ok(meta) = std::fs::metadata(&audio) else { continue };

        let ttl = budget::ttl_seconds(meta.len(), row.tier, config.n_thread, config.ttl_coef);
        let elapsed = (now - row.processing).num_milliseconds() as f64 / 1000.0;
        match reap_verdict(elapsed, ttl, procs.contains_key(&audio), row.attempt) {
            None => {}
            Some(ReapVerdict::Kill) => {
                if let Some(pid) = procs.remove(&audio) {
                    supervisor::kill(pid);
                }
                warn!(vid = %row.auid, "killed: processing too long");
                store.mark_failed(row.auid, REASON_KILLED).await.map_err(db_err)?;
            }
            Some(ReapVerdict::Resume) => {
                warn!(vid = %row.auid, "resumed: no backing process, one retry left");
                store.mark_processing(row.auid, None).await.map_err(db_err)?;
            }
            Some(ReapVerdict::Fail) => {
                warn!(vid = %row.auid, "failed: no backing process, retries exhausted");
                store.mark_failed(row.auid, REASON_ATTEMPT).await.map_err(db_err)?;
            }
        }
    }

    info!(vid = "processing", "local = {}, total = {}", procs.len(), reported);
    Ok(procs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReapVerdict {
    /// A live process exists and overran its deadline: SIGKILL + fail.
    Kill,
    /// No backing process, first attempt: return the row to LOADED.
    Resume,
    /// No backing process, retries exhausted: terminal failure.
    Fail,
}

/// Row-local reap decision. Rows within their deadline are never touched,
/// whether or not a process backs them.
fn reap_verdict(elapsed: f64, ttl: f64, has_pid: bool, attempt: i16) -> Option<ReapVerdict> {
    if elapsed <= ttl {
        return None;
    }
    Some(if has_pid {
        ReapVerdict::Kill
    } else if attempt == 1 {
        ReapVerdict::Resume
    } else {
        ReapVerdict::Fail
    })
}

/// A pending row annotated with the on-disk size of its audio, if present.
struct Candidate {
    job: PendingJob,
    size: Option<u64>,
}

/// R3: FIFO admission of jobs whose audio exists and meets the size floor,
/// bounded by the free slots.
fn admit(candidates: Vec<Candidate>, free_slots: usize, min_size: u64) -> Vec<PendingJob> {
    candidates
        .into_iter()
        .filter_map(|c| match c.size {
            Some(size) if size >= min_size => Some(c.job),
            _ => None,
        })
        .take(free_slots)
        .collect()
}

/// One poll sweep over the dispatched set; finished jobs are resolved to a
/// terminal state and dropped.
async fn poll_running(
    store: &JobStore,
    running: Vec<(Uuid, EngineChild)>,
) -> Result<Vec<(Uuid, EngineChild)>> {
    let mut alive = Vec::new();
    for (auid, mut child) in running {
        match child.poll() {
            Ok(None) => alive.push((auid, child)),
            Ok(Some(status)) if status.success() => {
                finish_success(store, auid, &child.audio).await?;
            }
            Ok(Some(status)) => {
                let diag = log_prefix(&layout::sibling(&child.audio, "log"));
                warn!(
                    vid = %auid,
                    "engine exited {status}: {}",
                    diag.replace('\n', ". ")
                );
                store.mark_failed(auid, REASON_ENGINE).await.map_err(db_err)?;
            }
            Err(err) => {
                warn!(vid = %auid, "poll failed: {err:#}");
                store.mark_failed(auid, REASON_ENGINE).await.map_err(db_err)?;
            }
        }
    }
    Ok(alive)
}

/// Clean exit: persist the transcript from the sidecar json. A missing or
/// unparseable sidecar is an engine failure.
async fn finish_success(store: &JobStore, auid: Uuid, audio: &Path) -> Result<()> {
    match read_transcript(&layout::sibling(audio, "json")) {
        Some(transcript) => {
            info!(vid = %auid, "success");
            store.mark_success(auid, &transcript).await.map_err(db_err)
        }
        None => {
            warn!(vid = %auid, "engine exited clean but left no usable transcript");
            store.mark_failed(auid, REASON_ENGINE).await.map_err(db_err)
        }
    }
}

/// Load the engine's sidecar document and extract its `transcription` key.
fn read_transcript(path: &Path) -> Option<serde_json::Value> {
    let raw = std::fs::read(path).ok()?;
    let doc: serde_json::Value = serde_json::from_slice(&raw).ok()?;
    doc.get("transcription").cloned()
}

/// First `LOG_PREFIX_CAP` bytes of an engine log, lossily decoded.
fn log_prefix(path: &Path) -> String {
    let Ok(file) = File::open(path) else {
        return String::new();
    };
    let mut buf = Vec::new();
    if file.take(LOG_PREFIX_CAP).read_to_end(&mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Advisory lock excluding overlapping passes. Returns None when another
/// pass holds it; the guard releases on drop.
fn acquire_pass_lock(data_dir: &Path) -> Result<Option<File>> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("create data root {}", data_dir.display()))?;
    let path = data_dir.join(".sched.lock");
    let file =
        File::create(&path).with_context(|| format!("open lock {}", path.display()))?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("lock {}", path.display()))
        }
    }
}
