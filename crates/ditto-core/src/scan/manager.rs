use crate::cancel::{cancel_pair, CancelHandle};
use crate::config::{non_overlapping_directories, AppConfig};
use crate::error::Error;
use crate::progress::Progress;
use crate::scan::Scanner;
use crate::storage::Database;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{error, info, warn};

/// Live information about the running scan, handed to callers synchronously
/// so the scan id is known before the pipeline thread begins.
#[derive(Clone)]
pub struct ActiveScan {
    pub id: i64,
    pub started_at: i64,
    pub triggered_by: String,
    pub progress: Arc<Progress>,
}

struct ManagerState {
    config: AppConfig,
    active: Option<(ActiveScan, Arc<CancelHandle>)>,
}

/// Enforces the single-active-scan invariant and owns the cancellation
/// handle for the scan in flight. Safe for concurrent use.
pub struct ScanManager {
    db: Arc<Database>,
    state: Arc<Mutex<ManagerState>>,
}

impl ScanManager {
    /// Create a manager and run startup recovery: any scan_history row left
    /// in 'running' state by a crashed process is marked failed.
    pub fn new(db: Arc<Database>, config: AppConfig) -> Result<Self, Error> {
        let stale = db.mark_stale_scans_failed()?;
        if stale > 0 {
            warn!(count = stale, "marked stale running scans as failed");
        }
        Ok(ScanManager {
            db,
            state: Arc::new(Mutex::new(ManagerState {
                config,
                active: None,
            })),
        })
    }

    /// Launch an asynchronous scan. The scan_history record is created
    /// before this returns so the caller immediately knows the scan id.
    pub fn start(&self, triggered_by: &str) -> Result<ActiveScan, Error> {
        let mut state = self.state.lock().unwrap();
        if state.active.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let (scan_id, started_at) = self.db.insert_scan_record(triggered_by)?;

        let roots: Vec<PathBuf> = non_overlapping_directories(state.config.scan_paths.clone())
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let excludes: HashSet<PathBuf> = state
            .config
            .exclude_paths
            .iter()
            .map(PathBuf::from)
            .collect();

        let scanner = Scanner::new(
            Arc::clone(&self.db),
            roots,
            excludes,
            state.config.scan_workers.clone(),
            state.config.batch_size,
        );

        let progress = Arc::new(Progress::default());
        let (handle, token) = cancel_pair();
        let handle = Arc::new(handle);

        let active = ActiveScan {
            id: scan_id,
            started_at,
            triggered_by: triggered_by.to_string(),
            progress: Arc::clone(&progress),
        };
        state.active = Some((active.clone(), handle));
        drop(state);

        let manager_state = Arc::clone(&self.state);
        thread::spawn(move || {
            match scanner.execute(scan_id, started_at, &token, &progress) {
                Ok(_) => {}
                Err(Error::Cancelled) => info!(id = scan_id, "scan cancelled"),
                Err(err) => error!(id = scan_id, error = %err, "scan run error"),
            }
            manager_state.lock().unwrap().active = None;
        });

        Ok(active)
    }

    /// Cancel the running scan, returning a snapshot taken at cancel time.
    pub fn cancel(&self) -> Result<ActiveScan, Error> {
        let state = self.state.lock().unwrap();
        match &state.active {
            Some((snapshot, handle)) => {
                handle.cancel();
                Ok(snapshot.clone())
            }
            None => Err(Error::NoActiveScan),
        }
    }

    /// Snapshot of the running scan, or None when idle. Non-blocking apart
    /// from a brief lock.
    pub fn active_scan(&self) -> Option<ActiveScan> {
        self.state
            .lock()
            .unwrap()
            .active
            .as_ref()
            .map(|(snapshot, _)| snapshot.clone())
    }

    /// Replace the configuration used by FUTURE scans. A scan already in
    /// flight keeps the configuration it started with.
    pub fn update_config(&self, config: AppConfig) {
        self.state.lock().unwrap().config = config;
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}
