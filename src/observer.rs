//! Observer trait for upload lifecycle events.
//!
//! Inject an [`Arc<dyn SessionObserver>`] via
//! [`crate::config::SessionConfigBuilder::observer`] to receive events as
//! previews finish and submissions progress.
//!
//! # Why callbacks instead of channels?
//!
//! A callback is the least-invasive integration point: a caller can forward
//! events to a terminal progress bar, a channel or a log without the library
//! knowing how the host application communicates. Events fire from tokio
//! tasks, concurrently for different uploads, so implementations are
//! `Send + Sync` and protect their own state.
//!
//! Events are delivered after the registry lock is released; an observer may
//! call back into the session.
//!
//! # Example
//!
//! ```rust
//! use ocr_upload::{SessionConfig, SessionObserver, Upload};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountCompleted(AtomicUsize);
//!
//! impl SessionObserver for CountCompleted {
//!     fn on_completed(&self, upload: &Upload) {
//!         let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{} done ({} so far)", upload.name, n);
//!     }
//! }
//!
//! let config = SessionConfig::builder()
//!     .observer(Arc::new(CountCompleted(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::UploadError;
use crate::upload::{Upload, UploadId};
use std::sync::Arc;

/// Receives upload lifecycle events. Every method defaults to a no-op.
pub trait SessionObserver: Send + Sync {
    /// A batch was ingested.
    ///
    /// # Arguments
    /// * `accepted`: records added to the registry, newest first
    /// * `skipped` : files dropped as unsupported or over capacity
    fn on_files_added(&self, accepted: &[Upload], skipped: usize) {
        let _ = (accepted, skipped);
    }

    /// A PDF preview finished; `upload.page_count` is now known.
    fn on_preview_ready(&self, upload: &Upload) {
        let _ = upload;
    }

    /// A PDF preview failed; the error is also stored on the record.
    fn on_preview_failed(&self, upload: &Upload, error: &UploadError) {
        let _ = (upload, error);
    }

    /// The backend accepted a submission and polling started.
    fn on_submitted(&self, upload: &Upload, task_id: &str) {
        let _ = (upload, task_id);
    }

    /// Simulated progress advanced on a poll tick.
    fn on_progress(&self, upload: &Upload) {
        let _ = upload;
    }

    /// The upload reached `completed`; `upload.ocr_result` holds the text.
    fn on_completed(&self, upload: &Upload) {
        let _ = upload;
    }

    /// The upload reached `error` or `timed_out`.
    fn on_failed(&self, upload: &Upload, error: &UploadError) {
        let _ = (upload, error);
    }

    /// The record was removed; no further events follow for `id`.
    fn on_removed(&self, id: &UploadId) {
        let _ = id;
    }
}

/// Observer used when none is configured.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Type stored in [`crate::config::SessionConfig`].
pub type Observer = Arc<dyn SessionObserver>;
