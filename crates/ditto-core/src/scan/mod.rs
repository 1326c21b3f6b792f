pub mod accumulator;
pub mod cache;
pub mod grouper;
pub mod hasher;
pub mod manager;
pub mod priority;
pub mod walker;
pub mod writer;

use crate::cancel::CancelToken;
use crate::config::ScanWorkers;
use crate::error::Error;
use crate::model::HashedFile;
use crate::progress::Progress;
use crate::storage::{Database, ReadConn};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use hasher::PARTIAL_HASH_BYTES;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};
use writer::WriteStats;

/// Per-file non-fatal error callback: (path, stage, message). Stages report
/// through this instead of returning errors; the scan continues.
pub type ErrorReporter = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// The walker runs orders of magnitude ahead of the hashers; a deep buffer
/// decouples their throughputs.
const WALK_CHANNEL_CAP: usize = 1_000_000;
/// Inter-stage buffers up to the full-hasher input.
const STAGE_CHANNEL_CAP: usize = 100_000;
/// Buffers feeding the single-threaded writer.
const FINAL_CHANNEL_CAP: usize = 10_000;

/// Blocking send that races the cancellation signal. Returns false when the
/// send did not happen (receiver gone or scan cancelled).
pub(crate) fn send_or_cancel<T>(out: &Sender<T>, cancel: &CancelToken, item: T) -> bool {
    select! {
        send(out, item) -> res => res.is_ok(),
        recv(cancel.signal()) -> _ => false,
    }
}

/// Orchestrates one run of the duplicate-detection pipeline.
pub struct Scanner {
    db: Arc<Database>,
    roots: Vec<PathBuf>,
    excludes: HashSet<PathBuf>,
    workers: ScanWorkers,
    batch_size: usize,
}

impl Scanner {
    pub fn new(
        db: Arc<Database>,
        roots: Vec<PathBuf>,
        excludes: HashSet<PathBuf>,
        workers: ScanWorkers,
        batch_size: usize,
    ) -> Self {
        Scanner {
            db,
            roots,
            excludes,
            workers,
            batch_size,
        }
    }

    /// Standalone entry point: create the scan record, run the pipeline,
    /// return the record id. The manager uses `execute` directly instead so
    /// the id is available before the background thread starts.
    pub fn run(
        &self,
        cancel: &CancelToken,
        triggered_by: &str,
        progress: &Arc<Progress>,
    ) -> Result<(i64, WriteStats), Error> {
        let (scan_id, started_at) = self.db.insert_scan_record(triggered_by)?;
        let stats = self.execute(scan_id, started_at, cancel, progress)?;
        Ok((scan_id, stats))
    }

    /// Run the pipeline for an already-created scan record, then finalise
    /// the record whatever the outcome.
    pub(crate) fn execute(
        &self,
        scan_id: i64,
        started_at: i64,
        cancel: &CancelToken,
        progress: &Arc<Progress>,
    ) -> Result<WriteStats, Error> {
        info!(id = scan_id, "scan started");

        let result = self.run_pipeline(scan_id, cancel, progress);

        let cancelled = cancel.is_cancelled();
        let status = if cancelled {
            "cancelled"
        } else if result.is_err() {
            "failed"
        } else {
            "completed"
        };

        let finished_at = chrono::Utc::now().timestamp();
        let duration = finished_at - started_at;
        let snapshot = progress.snapshot();

        if let Err(err) =
            self.db
                .finalise_scan_record(scan_id, status, finished_at, duration, &snapshot)
        {
            error!(id = scan_id, error = %err, "finalise scan record failed");
        }

        if status == "completed" {
            if let Err(err) = self.db.insert_scan_snapshot(scan_id, finished_at) {
                error!(id = scan_id, error = %err, "insert scan snapshot failed");
            }
        }

        info!(
            id = scan_id,
            status,
            files_discovered = snapshot.files_discovered,
            "scan finished"
        );

        if cancelled && result.is_ok() {
            return Err(Error::Cancelled);
        }
        result
    }

    fn run_pipeline(
        &self,
        scan_id: i64,
        cancel: &CancelToken,
        progress: &Arc<Progress>,
    ) -> Result<WriteStats, Error> {
        // Read-only connections for the cache checkers; failing to open the
        // store is a scan-scope error, surfaced before any stage spawns.
        let mut read_conns = Vec::new();
        for _ in 0..self.workers.cache_checkers.max(1) {
            read_conns.push(ReadConn::open(self.db.path())?);
        }

        let errors: ErrorReporter = {
            let db = Arc::clone(&self.db);
            let progress = Arc::clone(progress);
            Arc::new(move |path, stage, message| {
                progress.errors.fetch_add(1, Ordering::Relaxed);
                warn!(path, stage, error = message, "scan error");
                if let Err(err) = db.insert_scan_error(scan_id, path, stage, message) {
                    warn!(error = %err, "recording scan error failed");
                }
            })
        };

        let (walk_tx, walk_rx) = bounded(WALK_CHANNEL_CAP);
        let (candidate_tx, candidate_rx) = bounded(STAGE_CHANNEL_CAP);
        let (hit_tx, hit_rx) = bounded(FINAL_CHANNEL_CAP);
        let (miss_tx, miss_rx) = bounded(STAGE_CHANNEL_CAP);
        let (partial_tx, partial_rx) = bounded(STAGE_CHANNEL_CAP);
        let (grouped_tx, grouped_rx) = bounded(STAGE_CHANNEL_CAP);
        let (queued_tx, queued_rx) = bounded(STAGE_CHANNEL_CAP);
        let (dispatch_tx, dispatch_rx) = bounded(STAGE_CHANNEL_CAP);
        let (full_tx, full_rx) = bounded(FINAL_CHANNEL_CAP);
        let (final_tx, final_rx) = bounded(FINAL_CHANNEL_CAP);

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        {
            let roots = self.roots.clone();
            let excludes = self.excludes.clone();
            let num_walkers = self.workers.walkers;
            let cancel = cancel.clone();
            let errors = errors.clone();
            handles.push(thread::spawn(move || {
                walker::walk(&roots, &excludes, num_walkers, &cancel, walk_tx, errors);
            }));
        }

        handles.push(accumulator::spawn_size_accumulator(
            Arc::clone(progress),
            cancel.clone(),
            walk_rx,
            candidate_tx,
        ));

        handles.extend(cache::spawn_cache_check(
            read_conns,
            Arc::clone(progress),
            cancel.clone(),
            candidate_rx,
            hit_tx,
            miss_tx,
        ));

        handles.extend(hasher::spawn_partial_hashers(
            self.workers.partial_hashers,
            Arc::clone(progress),
            cancel.clone(),
            errors.clone(),
            miss_rx,
            partial_tx,
        ));

        handles.push(grouper::spawn_partial_hash_grouper(
            cancel.clone(),
            partial_rx,
            grouped_tx,
        ));

        handles.push(spawn_size_router(
            Arc::clone(progress),
            cancel.clone(),
            grouped_rx,
            full_tx.clone(),
            queued_tx,
        ));

        handles.push(priority::spawn_size_priority_queue(
            cancel.clone(),
            queued_rx,
            dispatch_tx,
        ));

        handles.extend(hasher::spawn_full_hashers(
            self.workers.full_hashers,
            Arc::clone(progress),
            cancel.clone(),
            errors.clone(),
            dispatch_rx,
            full_tx,
        ));

        handles.extend(writer::spawn_merge(cancel, hit_rx, full_rx, final_tx));

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let reporter = spawn_progress_reporter(
            Arc::clone(&self.db),
            scan_id,
            Arc::clone(progress),
            cancel.clone(),
            stop_rx,
        );

        let result = writer::run_db_writer(
            &self.db,
            scan_id,
            self.batch_size,
            cancel,
            progress,
            final_rx,
        );

        drop(stop_tx);
        let _ = reporter.join();
        for handle in handles {
            let _ = handle.join();
        }

        result
    }
}

/// For a file no larger than the hash prefix, the prefix hash already is
/// the full hash: forward it straight to the merge, bypassing the full
/// hasher. Larger files go to the size priority queue.
fn spawn_size_router(
    progress: Arc<Progress>,
    cancel: CancelToken,
    input: Receiver<HashedFile>,
    small: Sender<HashedFile>,
    large: Sender<HashedFile>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        let hf = select! {
            recv(input) -> msg => match msg {
                Ok(hf) => hf,
                Err(_) => return,
            },
            recv(cancel.signal()) -> _ => return,
        };

        if hf.file.size <= PARTIAL_HASH_BYTES {
            progress.full_hashed.fetch_add(1, Ordering::Relaxed);
            if !send_or_cancel(&small, &cancel, hf) {
                return;
            }
        } else if !send_or_cancel(&large, &cancel, hf) {
            return;
        }
    })
}

/// Flushes the live counters into scan_history every second. Periodic
/// reporting stops on cancellation; the final flush on pipeline completion
/// runs unconditionally so cancelled scans keep their last counters.
fn spawn_progress_reporter(
    db: Arc<Database>,
    scan_id: i64,
    progress: Arc<Progress>,
    cancel: CancelToken,
    stop: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let ticker = tick(Duration::from_secs(1));
        loop {
            select! {
                recv(ticker) -> _ => {
                    if let Err(err) = db.flush_progress(scan_id, &progress.snapshot()) {
                        warn!(error = %err, "progress flush failed");
                    }
                }
                recv(cancel.signal()) -> _ => {
                    let _ = stop.recv();
                    final_progress_flush(&db, scan_id, &progress);
                    return;
                }
                recv(stop) -> _ => {
                    final_progress_flush(&db, scan_id, &progress);
                    return;
                }
            }
        }
    })
}

fn final_progress_flush(db: &Database, scan_id: i64, progress: &Progress) {
    if let Err(err) = db.flush_progress(scan_id, &progress.snapshot()) {
        warn!(error = %err, "final progress flush failed");
    }
}
