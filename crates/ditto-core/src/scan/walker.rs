use crate::cancel::CancelToken;
use crate::model::FileDescriptor;
use crate::scan::ErrorReporter;
use crossbeam_channel::{select, Sender};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::UNIX_EPOCH;

/// Compaction only kicks in once this many consumed entries have piled up,
/// so small scans never pay the copy.
const COMPACT_MIN_CONSUMED: usize = 1024;

/// Unbounded multi-producer/multi-consumer queue of directory paths with a
/// pending-work counter.
///
/// Termination protocol:
///   - `add_pending` must be called BEFORE `push`, by the pusher.
///   - `done` is called once per popped directory, after all of its child
///     directories have been pushed. When pending reaches 0 the queue closes
///     and every blocked `pop` wakes.
///
/// The counter cannot reach zero while any subtree is unexplored, because
/// the increment for each child precedes the decrement for its parent.
pub(crate) struct DirQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    pending: AtomicI64,
}

struct QueueState {
    items: Vec<PathBuf>,
    /// Index of the next item to pop; everything before it is consumed.
    head: usize,
    closed: bool,
}

impl DirQueue {
    pub(crate) fn new() -> Self {
        DirQueue {
            state: Mutex::new(QueueState {
                items: Vec::new(),
                head: 0,
                closed: false,
            }),
            available: Condvar::new(),
            pending: AtomicI64::new(0),
        }
    }

    pub(crate) fn add_pending(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn push(&self, dir: PathBuf) {
        let mut state = self.state.lock().unwrap();
        state.items.push(dir);
        drop(state);
        self.available.notify_one();
    }

    /// Blocks until an item is available or the queue is closed and empty.
    pub(crate) fn pop(&self) -> Option<PathBuf> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.head < state.items.len() {
                let head = state.head;
                let item = std::mem::take(&mut state.items[head]);
                state.head += 1;
                state.maybe_compact();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Decrement pending; on reaching zero, close the queue and wake all.
    pub(crate) fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.close();
        }
    }

    /// Close regardless of pending count. Used on cancellation so workers
    /// blocked in `pop` exit instead of waiting for a counter that will
    /// never reach zero.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }

    #[cfg(test)]
    fn debug_state(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.items.len() - state.head, state.items.capacity())
    }
}

impl QueueState {
    /// Move live items to a fresh buffer once the consumed prefix dominates,
    /// so peak memory tracks the queue depth rather than the historical
    /// high-water mark.
    fn maybe_compact(&mut self) {
        if self.head >= COMPACT_MIN_CONSUMED && self.head * 2 >= self.items.len() {
            self.items = self.items.split_off(self.head);
            self.head = 0;
        }
    }
}

/// Traverse `roots` with `num_workers` threads, emitting a FileDescriptor
/// for every regular file reachable. Paths in `excludes` are skipped
/// exactly; symlinks and non-regular files are skipped unconditionally.
/// The output channel closes when `walk` returns.
pub fn walk(
    roots: &[PathBuf],
    excludes: &HashSet<PathBuf>,
    num_workers: usize,
    cancel: &CancelToken,
    out: Sender<FileDescriptor>,
    errors: ErrorReporter,
) {
    if roots.is_empty() {
        return;
    }

    let queue = DirQueue::new();
    for root in roots {
        queue.add_pending();
        queue.push(root.clone());
    }

    thread::scope(|scope| {
        for _ in 0..num_workers.max(1) {
            let out = out.clone();
            let errors = errors.clone();
            let queue = &queue;
            scope.spawn(move || walker_worker(queue, excludes, cancel, &out, &errors));
        }
    });
}

fn walker_worker(
    queue: &DirQueue,
    excludes: &HashSet<PathBuf>,
    cancel: &CancelToken,
    out: &Sender<FileDescriptor>,
    errors: &ErrorReporter,
) {
    loop {
        if cancel.is_cancelled() {
            queue.close();
            return;
        }

        let Some(dir) = queue.pop() else {
            return;
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                errors(&dir.to_string_lossy(), "walk", &err.to_string());
                queue.done();
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    errors(&dir.to_string_lossy(), "walk", &err.to_string());
                    continue;
                }
            };

            let path = entry.path();
            if excludes.contains(&path) {
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(err) => {
                    errors(&path.to_string_lossy(), "walk", &err.to_string());
                    continue;
                }
            };

            if file_type.is_dir() {
                // Increment BEFORE pushing so pending is never zero while a
                // subtree remains.
                queue.add_pending();
                queue.push(path);
                continue;
            }

            if file_type.is_symlink() || !file_type.is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    errors(&path.to_string_lossy(), "walk", &err.to_string());
                    continue;
                }
            };

            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            let descriptor = FileDescriptor {
                path,
                size: metadata.len(),
                mtime,
            };

            select! {
                send(out, descriptor) -> res => {
                    if res.is_err() {
                        queue.done();
                        return;
                    }
                }
                recv(cancel.signal()) -> _ => {
                    queue.done();
                    queue.close();
                    return;
                }
            }
        }

        queue.done();
    }
}
