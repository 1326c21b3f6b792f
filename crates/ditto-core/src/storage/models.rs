/// One scan invocation, persisted in `scan_history`.
#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: String,
    pub triggered_by: String,
    pub duration_seconds: i64,
    pub files_discovered: i64,
    pub files_hashed: i64,
    pub cache_hits: i64,
    pub cache_misses: i64,
    pub duplicate_groups: i64,
    pub duplicate_files: i64,
    pub reclaimable_bytes: i64,
    pub error_count: i64,
}

/// A set of files sharing one content hash. Survives across scans; `status`
/// is user-owned and never reset by a re-scan.
#[derive(Debug, Clone)]
pub struct DuplicateGroupRow {
    pub id: i64,
    pub content_hash: String,
    pub file_size: i64,
    pub file_count: i64,
    pub reclaimable_bytes: i64,
    pub file_type: String,
    pub status: String,
    pub first_seen_scan_id: i64,
    pub last_seen_scan_id: i64,
}

/// Current membership of a duplicate group, refreshed wholesale per scan.
#[derive(Debug, Clone)]
pub struct DuplicateFileRow {
    pub id: i64,
    pub group_id: i64,
    pub scan_id: i64,
    pub path: String,
    pub size: i64,
    pub mtime: i64,
    pub file_type: String,
}

/// "This exact path last hashed to full_hash at (size, mtime)."
#[derive(Debug, Clone)]
pub struct FileCacheEntry {
    pub path: String,
    pub size: i64,
    pub mtime: i64,
    pub full_hash: String,
}

/// Per-file non-fatal diagnostic, appended during a scan.
#[derive(Debug, Clone)]
pub struct ScanErrorRow {
    pub id: i64,
    pub scan_id: i64,
    pub path: String,
    pub stage: String,
    pub error: String,
    pub created_at: i64,
}
