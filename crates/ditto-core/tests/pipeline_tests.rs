use ditto_core::cancel::cancel_pair;
use ditto_core::config::{AppConfig, ScanWorkers};
use ditto_core::model::{FileDescriptor, HashedFile};
use ditto_core::progress::Progress;
use ditto_core::scan::writer::run_db_writer;
use ditto_core::scan::Scanner;
use ditto_core::storage::Database;
use ditto_core::{Error, ScanManager};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

const DUP_CONTENT: &[u8] = b"ditto-test-content-for-duplicate-detection";

fn open_db(dir: &Path) -> Arc<Database> {
    Arc::new(Database::open(dir.join("ditto.db")).unwrap())
}

fn make_scanner(db: &Arc<Database>, root: &Path) -> Scanner {
    Scanner::new(
        Arc::clone(db),
        vec![root.to_path_buf()],
        HashSet::new(),
        ScanWorkers::default(),
        1000,
    )
}

fn run_to_completion(scanner: &Scanner, progress: &Arc<Progress>) -> i64 {
    let (_handle, token) = cancel_pair();
    let (scan_id, _stats) = scanner.run(&token, "manual", progress).unwrap();
    scan_id
}

fn wait_until_idle(manager: &ScanManager) {
    let deadline = Instant::now() + Duration::from_secs(60);
    while manager.active_scan().is_some() {
        assert!(Instant::now() < deadline, "scan did not finish in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_two_identical_files() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("tree");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), DUP_CONTENT).unwrap();
    fs::write(root.join("b.txt"), DUP_CONTENT).unwrap();

    let db = open_db(tmp.path());
    let progress = Arc::new(Progress::default());
    let scan_id = run_to_completion(&make_scanner(&db, &root), &progress);

    let groups = db.top_groups(10).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].file_count, 2);
    assert_eq!(groups[0].file_size, DUP_CONTENT.len() as i64);
    assert_eq!(groups[0].reclaimable_bytes, DUP_CONTENT.len() as i64);
    assert_eq!(groups[0].file_type, "other");

    let record = db.get_scan_record(scan_id).unwrap();
    assert_eq!(record.status, "completed");
    assert_eq!(record.cache_hits, 0);
    assert_eq!(record.error_count, 0);
    assert_eq!(record.duplicate_groups, 1);
    assert_eq!(record.duplicate_files, 2);
    assert!(db.list_scan_errors(scan_id).unwrap().is_empty());
}

#[test]
fn test_unique_plus_duplicate_pair() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("tree");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.bin"), DUP_CONTENT).unwrap();
    fs::write(root.join("b.bin"), DUP_CONTENT).unwrap();
    // Same size as the pair so it survives size candidacy, distinct content.
    fs::write(root.join("unique.bin"), b"ditto-test-content-for-unique-detection!!!").unwrap();

    let db = open_db(tmp.path());
    let progress = Arc::new(Progress::default());
    run_to_completion(&make_scanner(&db, &root), &progress);

    let groups = db.top_groups(10).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].file_count, 2);

    let member_paths: Vec<String> = db
        .files_in_group(groups[0].id)
        .unwrap()
        .into_iter()
        .map(|f| f.path)
        .collect();
    assert!(member_paths.iter().all(|p| !p.contains("unique")));

    let orphan_rows: i64 = db
        .with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM duplicate_files WHERE path LIKE '%unique%'",
                [],
                |row| row.get(0),
            )
        })
        .unwrap();
    assert_eq!(orphan_rows, 0);
}

#[test]
fn test_cache_hit_on_rescan() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("tree");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), DUP_CONTENT).unwrap();
    fs::write(root.join("b.txt"), DUP_CONTENT).unwrap();

    let db = open_db(tmp.path());
    let first_progress = Arc::new(Progress::default());
    run_to_completion(&make_scanner(&db, &root), &first_progress);
    assert_eq!(first_progress.cache_hits.load(Ordering::Relaxed), 0);
    assert_eq!(first_progress.cache_misses.load(Ordering::Relaxed), 2);

    let groups_before: Vec<(String, i64, i64, String)> = db
        .top_groups(10)
        .unwrap()
        .into_iter()
        .map(|g| (g.content_hash, g.file_count, g.reclaimable_bytes, g.status))
        .collect();

    // No filesystem changes: every candidate must hit the cache and nothing
    // gets re-read.
    let second_progress = Arc::new(Progress::default());
    run_to_completion(&make_scanner(&db, &root), &second_progress);

    assert_eq!(second_progress.cache_hits.load(Ordering::Relaxed), 2);
    assert_eq!(second_progress.cache_misses.load(Ordering::Relaxed), 0);
    assert_eq!(second_progress.bytes_read.load(Ordering::Relaxed), 0);

    let groups_after: Vec<(String, i64, i64, String)> = db
        .top_groups(10)
        .unwrap()
        .into_iter()
        .map(|g| (g.content_hash, g.file_count, g.reclaimable_bytes, g.status))
        .collect();
    assert_eq!(groups_before, groups_after);
}

#[test]
fn test_size_distinct_files_never_hashed() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("tree");
    fs::create_dir(&root).unwrap();
    for i in 1..=1000u64 {
        fs::write(root.join(format!("f{i:04}.bin")), vec![b'x'; i as usize]).unwrap();
    }

    let db = open_db(tmp.path());
    let progress = Arc::new(Progress::default());
    let scan_id = run_to_completion(&make_scanner(&db, &root), &progress);

    assert_eq!(progress.files_discovered.load(Ordering::Relaxed), 1000);
    assert_eq!(progress.candidates_found.load(Ordering::Relaxed), 0);
    assert_eq!(progress.partial_hashed.load(Ordering::Relaxed), 0);
    assert_eq!(db.get_scan_record(scan_id).unwrap().duplicate_groups, 0);
}

/// Progressive persistence: a pre-cancelled writer must still upsert every
/// hashed file into file_cache (mid-stream flush plus the unconditional
/// final flush) while writing no duplicate groups at all.
#[test]
fn test_writer_cancellation_preserves_cache() {
    const NUM_ITEMS: usize = 150;
    const BATCH_SIZE: usize = 100;

    let tmp = tempdir().unwrap();
    let db = open_db(tmp.path());
    let (scan_id, _) = db.insert_scan_record("manual").unwrap();

    let (handle, token) = cancel_pair();
    handle.cancel();

    let (tx, rx) = crossbeam_channel::bounded(NUM_ITEMS);
    for i in 0..NUM_ITEMS {
        tx.send(HashedFile {
            file: FileDescriptor {
                path: PathBuf::from(format!("/vol1/file{i:04}.txt")),
                size: (i + 1) as u64,
                mtime: 1000,
            },
            hash: format!("hash{:02}", i % 10),
        })
        .unwrap();
    }
    drop(tx);

    let progress = Progress::default();
    let result = run_db_writer(&db, scan_id, BATCH_SIZE, &token, &progress, rx);
    assert!(matches!(result, Err(Error::Cancelled)));

    let (cache_count, group_count): (i64, i64) = db
        .with_connection(|conn| {
            Ok((
                conn.query_row("SELECT COUNT(*) FROM file_cache", [], |r| r.get(0))?,
                conn.query_row("SELECT COUNT(*) FROM duplicate_groups", [], |r| r.get(0))?,
            ))
        })
        .unwrap();
    assert_eq!(cache_count, NUM_ITEMS as i64);
    assert_eq!(group_count, 0);
}

#[test]
fn test_walk_error_is_nonfatal_and_recorded() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("tree");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), DUP_CONTENT).unwrap();
    fs::write(root.join("b.txt"), DUP_CONTENT).unwrap();

    let db = open_db(tmp.path());
    let scanner = Scanner::new(
        Arc::clone(&db),
        vec![root.clone(), tmp.path().join("does-not-exist")],
        HashSet::new(),
        ScanWorkers::default(),
        1000,
    );

    let progress = Arc::new(Progress::default());
    let scan_id = run_to_completion(&scanner, &progress);

    let record = db.get_scan_record(scan_id).unwrap();
    assert_eq!(record.status, "completed");
    assert!(record.error_count >= 1);
    assert_eq!(record.duplicate_groups, 1);

    let errors = db.list_scan_errors(scan_id).unwrap();
    assert!(errors.iter().any(|e| e.stage == "walk"));
}

#[test]
fn test_manager_single_scan_invariant_and_cancel() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("tree");
    fs::create_dir(&root).unwrap();
    for i in 0..400 {
        // ~10% duplicate content.
        let content = format!("{:->1024}", i % 40);
        fs::write(root.join(format!("f{i:04}.bin")), content).unwrap();
    }

    let db = open_db(tmp.path());
    let config = AppConfig {
        scan_paths: vec![root.to_string_lossy().into_owned()],
        ..AppConfig::default()
    };
    let manager = ScanManager::new(Arc::clone(&db), config).unwrap();

    let active = manager.start("manual").unwrap();
    assert!(active.id > 0);
    assert_eq!(active.triggered_by, "manual");

    // Second start while the first is in flight must be rejected.
    assert!(matches!(manager.start("manual"), Err(Error::AlreadyRunning)));

    let snapshot = manager.cancel().unwrap();
    assert_eq!(snapshot.id, active.id);
    wait_until_idle(&manager);

    // A tiny tree can finish before the cancel lands; both terminal states
    // are legitimate, but the record must never stay 'running'.
    let record = db.get_scan_record(active.id).unwrap();
    assert!(
        record.status == "cancelled" || record.status == "completed",
        "unexpected terminal status {}",
        record.status
    );

    assert!(manager.active_scan().is_none());
    assert!(matches!(manager.cancel(), Err(Error::NoActiveScan)));
}

#[test]
fn test_manager_startup_recovery_marks_orphans_failed() {
    let tmp = tempdir().unwrap();
    let db = open_db(tmp.path());

    // Simulate a crash: a scan record left in 'running' with no process.
    let (orphan_id, _) = db.insert_scan_record("scheduled").unwrap();

    let manager = ScanManager::new(Arc::clone(&db), AppConfig::default()).unwrap();
    assert!(manager.active_scan().is_none());

    let record = db.get_scan_record(orphan_id).unwrap();
    assert_eq!(record.status, "failed");
    assert!(record.finished_at.is_some());
}

#[test]
fn test_completed_scan_appends_trend_snapshot() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("tree");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), DUP_CONTENT).unwrap();
    fs::write(root.join("b.txt"), DUP_CONTENT).unwrap();

    let db = open_db(tmp.path());
    let progress = Arc::new(Progress::default());
    let scan_id = run_to_completion(&make_scanner(&db, &root), &progress);

    let (rows, groups): (i64, i64) = db
        .with_connection(|conn| {
            Ok((
                conn.query_row(
                    "SELECT COUNT(*) FROM scan_snapshots WHERE scan_id = ?1",
                    [scan_id],
                    |r| r.get(0),
                )?,
                conn.query_row(
                    "SELECT duplicate_groups FROM scan_snapshots WHERE scan_id = ?1",
                    [scan_id],
                    |r| r.get(0),
                )?,
            ))
        })
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(groups, 1);
}
