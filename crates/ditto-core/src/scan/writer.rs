use crate::cancel::CancelToken;
use crate::error::Error;
use crate::model::HashedFile;
use crate::progress::Progress;
use crate::scan::send_or_cancel;
use crate::storage::Database;
use crossbeam_channel::{select, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

/// Duplicate groups written per transaction in phase 2.
pub(crate) const GROUP_TX_SIZE: usize = 100;

/// Final counts returned by the writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteStats {
    pub duplicate_groups: i64,
    pub duplicate_files: i64,
    pub reclaimable_bytes: i64,
    /// Every file that reached the writer (cache hits included).
    pub files_seen: i64,
}

/// Fan-in of the cache-hit stream and the fully-hashed stream. The output
/// closes only when both inputs have closed.
pub fn spawn_merge(
    cancel: &CancelToken,
    a: Receiver<HashedFile>,
    b: Receiver<HashedFile>,
    out: Sender<HashedFile>,
) -> Vec<JoinHandle<()>> {
    [a, b]
        .into_iter()
        .map(|input| {
            let cancel = cancel.clone();
            let out = out.clone();
            thread::spawn(move || loop {
                let hf = select! {
                    recv(input) -> msg => match msg {
                        Ok(hf) => hf,
                        Err(_) => return,
                    },
                    recv(cancel.signal()) -> _ => return,
                };
                if !send_or_cancel(&out, &cancel, hf) {
                    return;
                }
            })
        })
        .collect()
}

/// Single-threaded DB writer: consumes the merged stream to completion,
/// progressively persisting the cache, then writes duplicate groups.
///
/// Cache flushes happen every `batch_size` files and once more when the
/// input closes, unconditionally, even when the scan was cancelled. The
/// flush path never looks at the cancellation token, which is what makes
/// hashing work durable: a cancelled or crashed scan still leaves a cache
/// entry behind for every file it hashed, so the next scan is strictly
/// cheaper.
///
/// Group rows are all-or-nothing per scan: if the scan was cancelled the
/// writer returns `Error::Cancelled` after the final cache flush and writes
/// no groups at all.
pub fn run_db_writer(
    db: &Database,
    scan_id: i64,
    batch_size: usize,
    cancel: &CancelToken,
    progress: &Progress,
    input: Receiver<HashedFile>,
) -> Result<WriteStats, Error> {
    let batch_size = batch_size.max(1);
    let mut groups: HashMap<String, Vec<HashedFile>> = HashMap::new();
    let mut flush_buffer: Vec<HashedFile> = Vec::with_capacity(batch_size);
    let mut stats = WriteStats::default();

    // Phase 1: accumulate groups, flushing the cache as we go. The loop runs
    // until the channel closes; on cancellation upstream stages stop and
    // drop their senders, so this terminates promptly.
    for hf in input.iter() {
        stats.files_seen += 1;
        groups.entry(hf.hash.clone()).or_default().push(hf.clone());
        flush_buffer.push(hf);

        if flush_buffer.len() >= batch_size {
            flush_cache(db, scan_id, &mut flush_buffer, progress);
        }
    }

    // Final flush, regardless of cancellation.
    flush_cache(db, scan_id, &mut flush_buffer, progress);

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    // Phase 2: write duplicate groups in transactions of GROUP_TX_SIZE.
    let eligible: Vec<(String, Vec<HashedFile>)> = groups
        .into_iter()
        .filter(|(_, files)| files.len() >= 2)
        .collect();

    progress
        .phase2_started_at
        .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    progress
        .groups_total
        .store(eligible.len() as u64, Ordering::Relaxed);

    for chunk in eligible.chunks(GROUP_TX_SIZE) {
        let started = Instant::now();
        let batch_stats = db.write_group_batch(scan_id, chunk)?;
        progress
            .db_write_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        progress
            .groups_written
            .fetch_add(batch_stats.groups as u64, Ordering::Relaxed);

        stats.duplicate_groups += batch_stats.groups;
        stats.duplicate_files += batch_stats.files;
        stats.reclaimable_bytes += batch_stats.reclaimable_bytes;
    }

    debug!(
        groups = stats.duplicate_groups,
        files = stats.duplicate_files,
        reclaimable = stats.reclaimable_bytes,
        "duplicate groups written"
    );

    Ok(stats)
}

/// Upsert the buffered files into file_cache. Failures degrade the next
/// scan's hit rate but never the current scan's results, so they are
/// logged and swallowed.
fn flush_cache(db: &Database, scan_id: i64, buffer: &mut Vec<HashedFile>, progress: &Progress) {
    if buffer.is_empty() {
        return;
    }
    let started = Instant::now();
    match db.upsert_cache_batch(scan_id, buffer) {
        Ok(n) => debug!(entries = n, "file cache flushed"),
        Err(err) => warn!(error = %err, "file cache flush failed"),
    }
    progress
        .db_write_ms
        .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
    buffer.clear();
}
