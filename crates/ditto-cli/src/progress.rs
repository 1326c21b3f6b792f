use ditto_core::progress::ProgressSnapshot;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner rendering the live counters of a scan in flight. The total is
/// unknown upfront (the walker discovers work dynamically), so this stays a
/// spinner rather than a bar.
pub struct ScanProgressBar {
    bar: ProgressBar,
}

impl ScanProgressBar {
    pub fn new() -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.set_message("Scanning...");
        pb.enable_steady_tick(Duration::from_millis(80));
        Self { bar: pb }
    }

    pub fn update(&self, snap: &ProgressSnapshot) {
        if snap.phase2_started_at > 0 {
            self.bar.set_message(format!(
                "Writing duplicate groups... {}/{}",
                snap.groups_written, snap.groups_total
            ));
        } else {
            self.bar.set_message(format!(
                "Scanning... {} files, {} candidates, {} hashed, {} cache hits, {} MB read",
                snap.files_discovered,
                snap.candidates_found,
                snap.full_hashed,
                snap.cache_hits,
                snap.bytes_read / (1024 * 1024),
            ));
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
