use crate::cancel::CancelToken;
use crate::model::FileDescriptor;
use crate::progress::Progress;
use crate::scan::send_or_cancel;
use crossbeam_channel::{select, Receiver, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// First-pass candidate filter: only files with at least one size-peer
/// continue downstream.
///
/// The first file seen per size is buffered. When a second file with the
/// same size arrives, both are emitted; subsequent files with a seen size
/// are emitted immediately. Zero-byte files are dropped; they cannot be
/// meaningful duplicates. Every input counts toward `files_discovered`.
pub fn spawn_size_accumulator(
    progress: Arc<Progress>,
    cancel: CancelToken,
    input: Receiver<FileDescriptor>,
    output: Sender<FileDescriptor>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut first: HashMap<u64, FileDescriptor> = HashMap::new();
        let mut seen: HashSet<u64> = HashSet::new();

        loop {
            let fd = select! {
                recv(input) -> msg => match msg {
                    Ok(fd) => fd,
                    Err(_) => return,
                },
                recv(cancel.signal()) -> _ => return,
            };

            progress
                .files_discovered
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            if fd.size == 0 {
                continue;
            }

            if seen.contains(&fd.size) {
                progress
                    .candidates_found
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if !send_or_cancel(&output, &cancel, fd) {
                    return;
                }
                continue;
            }

            if let Some(prev) = first.remove(&fd.size) {
                // Second file with this size: emit both.
                seen.insert(fd.size);
                progress
                    .candidates_found
                    .fetch_add(2, std::sync::atomic::Ordering::Relaxed);
                for f in [prev, fd] {
                    if !send_or_cancel(&output, &cancel, f) {
                        return;
                    }
                }
            } else {
                first.insert(fd.size, fd);
            }
        }
    })
}
