//! Shared health counters for the /api/health endpoint.
//! Updated by the screener and the audit writer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::DataSource;

/// Shared health metrics. Written by background components, read by the API.
#[derive(Default)]
pub struct HealthState {
    /// Millisecond timestamp of the last completed screening run (0 = none).
    pub last_run_at_ms: AtomicU64,
    pub last_run_results: AtomicU64,
    /// True when the last completed run was served from the offline dataset.
    pub last_run_demo: AtomicBool,
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    pub audit_rows_written: AtomicU64,
    pub audit_write_errors: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self, results: u64, source: DataSource) {
        self.last_run_at_ms.store(now_ms(), Ordering::Relaxed);
        self.last_run_results.store(results, Ordering::Relaxed);
        self.last_run_demo.store(source == DataSource::Demo, Ordering::Relaxed);
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_audit_written(&self) {
        self.audit_rows_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_audit_errors(&self) {
        self.audit_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_run_at_ms(&self) -> u64 {
        self.last_run_at_ms.load(Ordering::Relaxed)
    }

    pub fn last_run_results(&self) -> u64 {
        self.last_run_results.load(Ordering::Relaxed)
    }

    pub fn last_run_demo(&self) -> bool {
        self.last_run_demo.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn audit_rows_written(&self) -> u64 {
        self.audit_rows_written.load(Ordering::Relaxed)
    }

    pub fn audit_write_errors(&self) -> u64 {
        self.audit_write_errors.load(Ordering::Relaxed)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
