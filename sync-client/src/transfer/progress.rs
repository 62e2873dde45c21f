//! Progress of an update pass.
//!
//! Counters are atomics so the pass can update them from a background task
//! while a UI or the CLI polls [`Progress::snapshot`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Point-in-time view of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Deletes and downloads finished so far, failed ones included
    pub completed: u64,

    /// Deletes plus downloads planned for the pass
    pub total: u64,

    /// Failed downloads
    pub failures: u64,
}

impl ProgressSnapshot {
    pub fn percent_complete(&self) -> f64 {
        if self.total > 0 {
            (self.completed as f64 / self.total as f64) * 100.0
        } else {
            100.0
        }
    }
}

#[derive(Debug, Default)]
pub struct Progress {
    active: AtomicBool,
    completed: AtomicU64,
    total: AtomicU64,
    failures: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a pass of `total` operations, resetting all counters.
    pub fn start(&self, total: u64) {
        self.completed.store(0, Ordering::SeqCst);
        self.failures.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }

    /// One delete or download finished.
    pub fn advance(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// `None` while no pass is running.
    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        if !self.active.load(Ordering::SeqCst) {
            return None;
        }
        Some(ProgressSnapshot {
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
        })
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_until_started() {
        let progress = Progress::new();
        assert_eq!(progress.snapshot(), None);

        progress.start(3);
        assert_eq!(
            progress.snapshot(),
            Some(ProgressSnapshot {
                completed: 0,
                total: 3,
                failures: 0
            })
        );
    }

    #[test]
    fn test_advance_and_failures() {
        let progress = Progress::new();
        progress.start(2);
        progress.advance();
        progress.record_failure();
        progress.advance();

        let snapshot = progress.snapshot().unwrap();
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.failures, 1);
        assert!((snapshot.percent_complete() - 100.0).abs() < 0.01);

        progress.finish();
        assert_eq!(progress.snapshot(), None);
        assert_eq!(progress.failures(), 1);
    }

    #[test]
    fn test_restart_resets_counters() {
        let progress = Progress::new();
        progress.start(5);
        progress.advance();
        progress.record_failure();

        progress.start(1);
        let snapshot = progress.snapshot().unwrap();
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.failures, 0);
        assert_eq!(snapshot.total, 1);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }
}
