use super::models::*;
use super::sqlite::{Database, ReadConn};
use crate::model::{FileDescriptor, FileType, HashedFile};
use crate::progress::ProgressSnapshot;
use rusqlite::{params, Result};
use std::collections::HashMap;
use tracing::debug;

/// Totals accumulated by one group-write transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupBatchStats {
    pub groups: i64,
    pub files: i64,
    pub reclaimable_bytes: i64,
}

impl Database {
    // ── Scan lifecycle ───────────────────────────────────────────

    /// Insert a scan_history row with status 'running'. Returns (id, started_at).
    pub fn insert_scan_record(&self, triggered_by: &str) -> Result<(i64, i64)> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO scan_history (started_at, status, triggered_by, created_at) \
             VALUES (?1, 'running', ?2, ?1)",
            params![now, triggered_by],
        )?;
        Ok((conn.last_insert_rowid(), now))
    }

    /// Write the live progress counters into the active scan's row.
    pub fn flush_progress(&self, scan_id: i64, p: &ProgressSnapshot) -> Result<()> {
        self.lock().execute(
            "UPDATE scan_history SET \
                 files_discovered = ?1, \
                 progress_candidates_found = ?2, \
                 progress_partial_hashed = ?3, \
                 progress_full_hashed = ?4, \
                 progress_bytes_read = ?5, \
                 cache_hits = ?6, \
                 cache_misses = ?7, \
                 error_count = ?8 \
             WHERE id = ?9",
            params![
                p.files_discovered as i64,
                p.candidates_found as i64,
                p.partial_hashed as i64,
                p.full_hashed as i64,
                p.bytes_read as i64,
                p.cache_hits as i64,
                p.cache_misses as i64,
                p.errors as i64,
                scan_id
            ],
        )?;
        Ok(())
    }

    /// Stamp the terminal status and final counters. Duplicate aggregates are
    /// read back from duplicate_groups so the record cannot disagree with
    /// what the writer actually committed.
    pub fn finalise_scan_record(
        &self,
        scan_id: i64,
        status: &str,
        finished_at: i64,
        duration_seconds: i64,
        p: &ProgressSnapshot,
    ) -> Result<()> {
        let conn = self.lock();
        let (groups, files, reclaimable): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(file_count), 0), COALESCE(SUM(reclaimable_bytes), 0) \
             FROM duplicate_groups WHERE last_seen_scan_id = ?1",
            params![scan_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        conn.execute(
            "UPDATE scan_history SET \
                 status = ?1, \
                 finished_at = ?2, \
                 duration_seconds = ?3, \
                 files_discovered = ?4, \
                 files_hashed = ?5, \
                 cache_hits = ?6, \
                 cache_misses = ?7, \
                 duplicate_groups = ?8, \
                 duplicate_files = ?9, \
                 reclaimable_bytes = ?10, \
                 error_count = ?11 \
             WHERE id = ?12",
            params![
                status,
                finished_at,
                duration_seconds,
                p.files_discovered as i64,
                p.full_hashed as i64,
                p.cache_hits as i64,
                p.cache_misses as i64,
                groups,
                files,
                reclaimable,
                p.errors as i64,
                scan_id
            ],
        )?;
        Ok(())
    }

    /// Mark any scan still 'running' as failed. Called once at startup; the
    /// only way a running row survives a process exit is a crash.
    pub fn mark_stale_scans_failed(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let n = self.lock().execute(
            "UPDATE scan_history SET status = 'failed', finished_at = ?1 \
             WHERE status = 'running'",
            params![now],
        )?;
        Ok(n)
    }

    pub fn insert_scan_error(
        &self,
        scan_id: i64,
        path: &str,
        stage: &str,
        error: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.lock().execute(
            "INSERT INTO scan_errors (scan_id, path, stage, error, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![scan_id, path, stage, error, now],
        )?;
        Ok(())
    }

    /// Append a trend snapshot for a completed scan. Cumulative deletion
    /// totals come from the trash collaborator's deletion_log.
    pub fn insert_scan_snapshot(&self, scan_id: i64, snapshot_at: i64) -> Result<()> {
        let conn = self.lock();
        let (groups, files, reclaimable): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(file_count), 0), COALESCE(SUM(reclaimable_bytes), 0) \
             FROM duplicate_groups WHERE last_seen_scan_id = ?1",
            params![scan_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let (deleted, reclaimed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0) FROM deletion_log",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        conn.execute(
            "INSERT INTO scan_snapshots \
                 (scan_id, snapshot_at, duplicate_groups, duplicate_files, reclaimable_bytes, \
                  cumulative_deleted_files, cumulative_reclaimed_bytes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![scan_id, snapshot_at, groups, files, reclaimable, deleted, reclaimed],
        )?;
        Ok(())
    }

    // ── Cache persistence ────────────────────────────────────────

    /// Batch-upsert file_cache rows inside one transaction with a reused
    /// prepared statement. This path must never observe cancellation: it is
    /// what makes hashing work durable across cancelled or crashed scans.
    pub fn upsert_cache_batch(&self, scan_id: i64, files: &[HashedFile]) -> Result<usize> {
        if files.is_empty() {
            return Ok(0);
        }
        let now = chrono::Utc::now().timestamp();
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO file_cache (path, size, mtime, full_hash, cached_at, scan_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for hf in files {
                count += stmt.execute(params![
                    hf.file.path.to_string_lossy().into_owned(),
                    hf.file.size as i64,
                    hf.file.mtime,
                    hf.hash,
                    now,
                    scan_id
                ])?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} file_cache entries", count);
        Ok(count)
    }

    // ── Duplicate groups ─────────────────────────────────────────

    /// Write one batch of duplicate groups in a single transaction.
    ///
    /// Per group: insert-if-absent (preserves user-owned status), look up the
    /// id, delete the previous membership wholesale, insert the current
    /// members, then update the aggregates and last-seen scan id.
    pub fn write_group_batch(
        &self,
        scan_id: i64,
        groups: &[(String, Vec<HashedFile>)],
    ) -> Result<GroupBatchStats> {
        let now = chrono::Utc::now().timestamp();
        let mut stats = GroupBatchStats::default();
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut insert_group = tx.prepare_cached(
                "INSERT OR IGNORE INTO duplicate_groups \
                     (content_hash, file_size, file_type, status, \
                      first_seen_scan_id, last_seen_scan_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, 'unresolved', ?4, ?4, ?5, ?5)",
            )?;
            let mut select_id = tx
                .prepare_cached("SELECT id FROM duplicate_groups WHERE content_hash = ?1")?;
            let mut delete_files =
                tx.prepare_cached("DELETE FROM duplicate_files WHERE group_id = ?1")?;
            let mut insert_file = tx.prepare_cached(
                "INSERT OR REPLACE INTO duplicate_files \
                     (group_id, scan_id, path, size, mtime, file_type) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut update_group = tx.prepare_cached(
                "UPDATE duplicate_groups SET \
                     file_count = ?1, reclaimable_bytes = ?2, file_type = ?3, \
                     last_seen_scan_id = ?4, updated_at = ?5 \
                 WHERE id = ?6",
            )?;

            for (hash, files) in groups {
                debug_assert!(files.len() >= 2);
                let file_size = files[0].file.size as i64;
                let file_type = FileType::detect(&files[0].file.path).as_str();

                insert_group.execute(params![hash, file_size, file_type, scan_id, now])?;
                let group_id: i64 = select_id.query_row(params![hash], |row| row.get(0))?;

                delete_files.execute(params![group_id])?;
                for hf in files {
                    insert_file.execute(params![
                        group_id,
                        scan_id,
                        hf.file.path.to_string_lossy().into_owned(),
                        hf.file.size as i64,
                        hf.file.mtime,
                        file_type
                    ])?;
                }

                let reclaimable = file_size * (files.len() as i64 - 1);
                update_group.execute(params![
                    files.len() as i64,
                    reclaimable,
                    file_type,
                    scan_id,
                    now,
                    group_id
                ])?;

                stats.groups += 1;
                stats.files += files.len() as i64;
                stats.reclaimable_bytes += reclaimable;
            }
        }
        tx.commit()?;
        Ok(stats)
    }

    // ── Read-back queries ────────────────────────────────────────

    pub fn get_scan_record(&self, scan_id: i64) -> Result<ScanRecord> {
        self.lock().query_row(
            "SELECT id, started_at, finished_at, status, triggered_by, duration_seconds, \
                    files_discovered, files_hashed, cache_hits, cache_misses, \
                    duplicate_groups, duplicate_files, reclaimable_bytes, error_count \
             FROM scan_history WHERE id = ?1",
            params![scan_id],
            scan_record_from_row,
        )
    }

    pub fn list_recent_scans(&self, limit: i64) -> Result<Vec<ScanRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, status, triggered_by, duration_seconds, \
                    files_discovered, files_hashed, cache_hits, cache_misses, \
                    duplicate_groups, duplicate_files, reclaimable_bytes, error_count \
             FROM scan_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], scan_record_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Unresolved groups ordered by reclaimable bytes, biggest win first.
    pub fn top_groups(&self, limit: i64) -> Result<Vec<DuplicateGroupRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, content_hash, file_size, file_count, reclaimable_bytes, \
                    file_type, status, first_seen_scan_id, last_seen_scan_id \
             FROM duplicate_groups WHERE status = 'unresolved' \
             ORDER BY reclaimable_bytes DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(DuplicateGroupRow {
                    id: row.get(0)?,
                    content_hash: row.get(1)?,
                    file_size: row.get(2)?,
                    file_count: row.get(3)?,
                    reclaimable_bytes: row.get(4)?,
                    file_type: row.get(5)?,
                    status: row.get(6)?,
                    first_seen_scan_id: row.get(7)?,
                    last_seen_scan_id: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn files_in_group(&self, group_id: i64) -> Result<Vec<DuplicateFileRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, group_id, scan_id, path, size, mtime, file_type \
             FROM duplicate_files WHERE group_id = ?1 ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![group_id], |row| {
                Ok(DuplicateFileRow {
                    id: row.get(0)?,
                    group_id: row.get(1)?,
                    scan_id: row.get(2)?,
                    path: row.get(3)?,
                    size: row.get(4)?,
                    mtime: row.get(5)?,
                    file_type: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_scan_errors(&self, scan_id: i64) -> Result<Vec<ScanErrorRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, scan_id, path, stage, error, created_at \
             FROM scan_errors WHERE scan_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![scan_id], |row| {
                Ok(ScanErrorRow {
                    id: row.get(0)?,
                    scan_id: row.get(1)?,
                    path: row.get(2)?,
                    stage: row.get(3)?,
                    error: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn scan_record_from_row(row: &rusqlite::Row<'_>) -> Result<ScanRecord> {
    Ok(ScanRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        status: row.get(3)?,
        triggered_by: row.get(4)?,
        duration_seconds: row.get(5)?,
        files_discovered: row.get(6)?,
        files_hashed: row.get(7)?,
        cache_hits: row.get(8)?,
        cache_misses: row.get(9)?,
        duplicate_groups: row.get(10)?,
        duplicate_files: row.get(11)?,
        reclaimable_bytes: row.get(12)?,
        error_count: row.get(13)?,
    })
}

impl ReadConn {
    /// Look up one batch of candidate paths in a single `IN (...)` query.
    /// Returns path → cached entry for every row found; callers decide
    /// hit/miss by comparing (size, mtime).
    pub fn lookup_paths(&self, batch: &[FileDescriptor]) -> Result<HashMap<String, FileCacheEntry>> {
        if batch.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; batch.len()].join(",");
        let sql = format!(
            "SELECT path, size, mtime, full_hash FROM file_cache WHERE path IN ({placeholders})"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(
            batch.iter().map(|fd| fd.path.to_string_lossy().into_owned()),
        );

        let mut cached = HashMap::with_capacity(batch.len());
        let rows = stmt.query_map(params, |row| {
            Ok(FileCacheEntry {
                path: row.get(0)?,
                size: row.get(1)?,
                mtime: row.get(2)?,
                full_hash: row.get(3)?,
            })
        })?;
        for entry in rows {
            let entry = entry?;
            cached.insert(entry.path.clone(), entry);
        }
        Ok(cached)
    }
}
