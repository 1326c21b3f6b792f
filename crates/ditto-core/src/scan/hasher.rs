use crate::cancel::CancelToken;
use crate::model::{FileDescriptor, HashedFile};
use crate::progress::Progress;
use crate::scan::{send_or_cancel, ErrorReporter};
use crossbeam_channel::{select, Receiver, Sender};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Prefix length for partial hashing. A file no longer than this has
/// identical prefix and full hashes, which is what lets the size router
/// skip the full hasher for small files.
pub const PARTIAL_HASH_BYTES: u64 = 64 * 1024;

fn hash_reader<R: Read>(mut reader: R) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// SHA-256 of the first `PARTIAL_HASH_BYTES` of the file. Files shorter
/// than the prefix are hashed whole; a short read is not an error.
pub(crate) fn hash_partial(path: &Path) -> io::Result<(String, u64)> {
    let file = File::open(path)?;
    hash_reader(file.take(PARTIAL_HASH_BYTES))
}

/// SHA-256 of the entire file.
pub(crate) fn hash_full(path: &Path) -> io::Result<(String, u64)> {
    hash_reader(File::open(path)?)
}

/// Worker pool computing prefix hashes. Failures are reported with
/// stage "partial_hash" and the file is dropped from the pipeline.
pub fn spawn_partial_hashers(
    num_workers: usize,
    progress: Arc<Progress>,
    cancel: CancelToken,
    errors: ErrorReporter,
    input: Receiver<FileDescriptor>,
    output: Sender<HashedFile>,
) -> Vec<JoinHandle<()>> {
    (0..num_workers.max(1))
        .map(|_| {
            let progress = Arc::clone(&progress);
            let cancel = cancel.clone();
            let errors = errors.clone();
            let input = input.clone();
            let output = output.clone();
            thread::spawn(move || loop {
                let fd = select! {
                    recv(input) -> msg => match msg {
                        Ok(fd) => fd,
                        Err(_) => return,
                    },
                    recv(cancel.signal()) -> _ => return,
                };

                let started = Instant::now();
                match hash_partial(&fd.path) {
                    Ok((hash, bytes)) => {
                        progress
                            .disk_read_ms
                            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                        progress.bytes_read.fetch_add(bytes, Ordering::Relaxed);
                        progress.partial_hashed.fetch_add(1, Ordering::Relaxed);
                        if !send_or_cancel(&output, &cancel, HashedFile { file: fd, hash }) {
                            return;
                        }
                    }
                    Err(err) => {
                        errors(&fd.path.to_string_lossy(), "partial_hash", &err.to_string());
                    }
                }
            })
        })
        .collect()
}

/// Worker pool computing full-content hashes over prefix-collision
/// survivors. The incoming hash field (a prefix hash) is replaced.
pub fn spawn_full_hashers(
    num_workers: usize,
    progress: Arc<Progress>,
    cancel: CancelToken,
    errors: ErrorReporter,
    input: Receiver<HashedFile>,
    output: Sender<HashedFile>,
) -> Vec<JoinHandle<()>> {
    (0..num_workers.max(1))
        .map(|_| {
            let progress = Arc::clone(&progress);
            let cancel = cancel.clone();
            let errors = errors.clone();
            let input = input.clone();
            let output = output.clone();
            thread::spawn(move || loop {
                let hf = select! {
                    recv(input) -> msg => match msg {
                        Ok(hf) => hf,
                        Err(_) => return,
                    },
                    recv(cancel.signal()) -> _ => return,
                };

                let started = Instant::now();
                match hash_full(&hf.file.path) {
                    Ok((hash, bytes)) => {
                        progress
                            .disk_read_ms
                            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                        progress.bytes_read.fetch_add(bytes, Ordering::Relaxed);
                        progress.full_hashed.fetch_add(1, Ordering::Relaxed);
                        let full = HashedFile {
                            file: hf.file,
                            hash,
                        };
                        if !send_or_cancel(&output, &cancel, full) {
                            return;
                        }
                    }
                    Err(err) => {
                        errors(&hf.file.path.to_string_lossy(), "full_hash", &err.to_string());
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_equals_full_for_small_files() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("small.txt");
        std::fs::write(&path, b"ditto-test-content-for-duplicate-detection").unwrap();

        let (partial, n_partial) = hash_partial(&path).unwrap();
        let (full, n_full) = hash_full(&path).unwrap();
        assert_eq!(partial, full);
        assert_eq!(n_partial, 42);
        assert_eq!(n_full, 42);
        // Hex-encoded SHA-256, lowercase.
        assert_eq!(full.len(), 64);
        assert!(full.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_partial_reads_at_most_prefix() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("big.bin");
        std::fs::write(&path, vec![0xAB; PARTIAL_HASH_BYTES as usize + 4096]).unwrap();

        let (partial, n_partial) = hash_partial(&path).unwrap();
        let (full, n_full) = hash_full(&path).unwrap();
        assert_eq!(n_partial, PARTIAL_HASH_BYTES);
        assert_eq!(n_full, PARTIAL_HASH_BYTES + 4096);
        assert_ne!(partial, full);
    }

    #[test]
    fn test_identical_content_same_hash() {
        let tmp = tempdir().unwrap();
        let a = tmp.path().join("a.bin");
        let b = tmp.path().join("b.bin");
        std::fs::write(&a, vec![7u8; 1000]).unwrap();
        std::fs::write(&b, vec![7u8; 1000]).unwrap();

        assert_eq!(hash_full(&a).unwrap().0, hash_full(&b).unwrap().0);
    }
}
