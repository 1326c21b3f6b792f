use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Live counters updated by the pipeline stages. All fields are atomic so
/// any worker thread may increment while the reporter thread reads.
#[derive(Debug, Default)]
pub struct Progress {
    // Phase 1: hashing pipeline
    pub files_discovered: AtomicU64,
    pub candidates_found: AtomicU64,
    pub partial_hashed: AtomicU64,
    pub full_hashed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub errors: AtomicU64,
    // Phase 2: group write (0 = not started)
    pub phase2_started_at: AtomicI64,
    pub groups_total: AtomicU64,
    pub groups_written: AtomicU64,
    // Timing buckets (milliseconds, accumulated across workers)
    pub disk_read_ms: AtomicU64,
    pub db_read_ms: AtomicU64,
    pub db_write_ms: AtomicU64,
}

/// Point-in-time copy of a `Progress`, cheap to hand to callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressSnapshot {
    pub files_discovered: u64,
    pub candidates_found: u64,
    pub partial_hashed: u64,
    pub full_hashed: u64,
    pub bytes_read: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub phase2_started_at: i64,
    pub groups_total: u64,
    pub groups_written: u64,
    pub disk_read_ms: u64,
    pub db_read_ms: u64,
    pub db_write_ms: u64,
}

impl Progress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files_discovered: self.files_discovered.load(Ordering::Relaxed),
            candidates_found: self.candidates_found.load(Ordering::Relaxed),
            partial_hashed: self.partial_hashed.load(Ordering::Relaxed),
            full_hashed: self.full_hashed.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            phase2_started_at: self.phase2_started_at.load(Ordering::Relaxed),
            groups_total: self.groups_total.load(Ordering::Relaxed),
            groups_written: self.groups_written.load(Ordering::Relaxed),
            disk_read_ms: self.disk_read_ms.load(Ordering::Relaxed),
            db_read_ms: self.db_read_ms.load(Ordering::Relaxed),
            db_write_ms: self.db_write_ms.load(Ordering::Relaxed),
        }
    }
}
