//! Download status tracking for the one-time model fetch
//!
//! The desktop UI polls `/download-status` while the bootstrapper fetches model
//! artifacts. The record is replaced as a whole under a short critical section,
//! so a reader always sees either the previous or the next state.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Snapshot of the model download progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStatus {
    /// `total > 0 && progress < total`
    pub is_downloading: bool,
    /// Display name of the model being fetched
    pub model_name: String,
    /// Completed stages
    pub progress: u64,
    /// Total stages (0 when idle)
    pub total: u64,
    /// `floor(progress / total * 100)`, 0 when `total == 0`
    pub percent: u8,
    /// Human readable stage description
    pub message: String,
}

impl DownloadStatus {
    /// Build a status record, deriving `is_downloading` and `percent`
    #[must_use]
    pub fn new(model_name: &str, progress: u64, total: u64, message: &str) -> Self {
        let percent = if total > 0 {
            // u128 keeps progress * 100 from overflowing
            let pct = u128::from(progress) * 100 / u128::from(total);
            pct.min(100) as u8
        } else {
            0
        };

        Self {
            is_downloading: total > 0 && progress < total,
            model_name: model_name.to_string(),
            progress,
            total,
            percent,
            message: message.to_string(),
        }
    }

    /// The idle shape: nothing downloading, all counters zero
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    /// Check the derived-field invariant
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let expected_percent = if self.total > 0 {
            (u128::from(self.progress) * 100 / u128::from(self.total)).min(100) as u8
        } else {
            0
        };
        self.percent == expected_percent
            && self.is_downloading == (self.total > 0 && self.progress < self.total)
    }
}

/// Process-wide, lock-guarded download status record
#[derive(Debug, Default)]
pub struct DownloadStatusTracker {
    inner: Mutex<DownloadStatus>,
}

impl DownloadStatusTracker {
    /// Create a tracker in the idle state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status record
    pub fn update(&self, model_name: &str, progress: u64, total: u64, message: &str) {
        // Build outside the lock so the critical section is a single move
        let next = DownloadStatus::new(model_name, progress, total, message);
        tracing::debug!(
            model = %next.model_name,
            progress = next.progress,
            total = next.total,
            percent = next.percent,
            "{}",
            next.message
        );
        *self.lock() = next;
    }

    /// Return to idle (`total = 0`, `progress = 0`)
    pub fn reset(&self) {
        *self.lock() = DownloadStatus::idle();
    }

    /// Consistent copy of the current record
    #[must_use]
    pub fn snapshot(&self) -> DownloadStatus {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, DownloadStatus> {
        // Writers never panic mid-update, so a poisoned record is still whole
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
