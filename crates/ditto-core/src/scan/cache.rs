use crate::cancel::CancelToken;
use crate::model::{FileDescriptor, HashedFile};
use crate::progress::Progress;
use crate::scan::send_or_cancel;
use crate::storage::ReadConn;
use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::warn;

/// Candidates per batched `SELECT ... WHERE path IN (...)`. Larger batches
/// mean fewer round-trips; 500 balances query size against latency.
pub const CACHE_BATCH_SIZE: usize = 500;

/// Batched cache lookup. Each worker owns a read-only connection, greedily
/// accumulates up to `CACHE_BATCH_SIZE` candidates (one blocking receive
/// then a non-blocking drain), and issues a single query for the batch.
///
/// A row whose (size, mtime) still matches the candidate is a hit and flows
/// to `hits` carrying the stored full hash; anything else (no row, or a
/// stale row) is a miss and continues toward the hashers.
pub fn spawn_cache_check(
    conns: Vec<ReadConn>,
    progress: Arc<Progress>,
    cancel: CancelToken,
    input: Receiver<FileDescriptor>,
    hits: Sender<HashedFile>,
    misses: Sender<FileDescriptor>,
) -> Vec<JoinHandle<()>> {
    conns
        .into_iter()
        .map(|conn| {
            let progress = Arc::clone(&progress);
            let cancel = cancel.clone();
            let input = input.clone();
            let hits = hits.clone();
            let misses = misses.clone();
            thread::spawn(move || cache_worker(conn, progress, cancel, input, hits, misses))
        })
        .collect()
}

fn cache_worker(
    conn: ReadConn,
    progress: Arc<Progress>,
    cancel: CancelToken,
    input: Receiver<FileDescriptor>,
    hits: Sender<HashedFile>,
    misses: Sender<FileDescriptor>,
) {
    let mut batch: Vec<FileDescriptor> = Vec::with_capacity(CACHE_BATCH_SIZE);

    loop {
        // Block for the first item of a new batch.
        let first = select! {
            recv(input) -> msg => match msg {
                Ok(fd) => fd,
                Err(_) => return,
            },
            recv(cancel.signal()) -> _ => return,
        };
        batch.push(first);

        // Greedily fill the rest without blocking.
        let mut open = true;
        while batch.len() < CACHE_BATCH_SIZE {
            match input.try_recv() {
                Ok(fd) => batch.push(fd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    open = false;
                    break;
                }
            }
        }

        if !lookup_batch(&conn, &batch, &progress, &cancel, &hits, &misses) {
            return;
        }
        batch.clear();

        if !open {
            return;
        }
    }
}

/// Returns false when the stage should stop (cancellation or closed outputs).
fn lookup_batch(
    conn: &ReadConn,
    batch: &[FileDescriptor],
    progress: &Progress,
    cancel: &CancelToken,
    hits: &Sender<HashedFile>,
    misses: &Sender<FileDescriptor>,
) -> bool {
    let started = Instant::now();
    let cached = match conn.lookup_paths(batch) {
        Ok(map) => map,
        Err(err) => {
            warn!(error = %err, "cache check batch query failed; treating batch as misses");
            Default::default()
        }
    };
    progress
        .db_read_ms
        .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);

    for fd in batch {
        let hit = cached.get(fd.path.to_string_lossy().as_ref()).and_then(|e| {
            (e.size == fd.size as i64 && e.mtime == fd.mtime).then(|| e.full_hash.clone())
        });
        match hit {
            Some(hash) => {
                progress.cache_hits.fetch_add(1, Ordering::Relaxed);
                let hf = HashedFile {
                    file: fd.clone(),
                    hash,
                };
                if !send_or_cancel(hits, cancel, hf) {
                    return false;
                }
            }
            None => {
                progress.cache_misses.fetch_add(1, Ordering::Relaxed);
                if !send_or_cancel(misses, cancel, fd.clone()) {
                    return false;
                }
            }
        }
    }
    true
}
