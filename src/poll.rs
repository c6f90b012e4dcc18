//! The submit/poll cycle of one upload.
//!
//! A cycle starts after [`crate::registry::Registry::begin_cycle`] has moved
//! the record into `processing` and handed out its cancellation token:
//!
//! 1. Submit the file. A failure ends the cycle in `error` with the server's
//!    message; there is no automatic retry.
//! 2. Every `poll_interval` (first tick one interval after submission):
//!    advance the simulated progress, then query the task status.
//!    * `completed` with a non-empty result → `completed`, progress 100.
//!    * `error` → `error` with the server's `error_message`.
//!    * anything else, or a failed query → keep polling.
//! 3. Once `poll_timeout` has elapsed since polling began, the record moves
//!    to `timed_out`.
//!
//! Every write goes through [`crate::registry::Registry::patch_live`], so a
//! tick that lands after the record was removed or resubmitted changes
//! nothing. Ticks for one upload never overlap: the status query is awaited
//! before the next tick, and missed ticks are delayed rather than bunched.

use crate::api::{SubmitRequest, TaskState};
use crate::error::UploadError;
use crate::export::{self, ExportFormat};
use crate::registry::{Transition, UploadPatch};
use crate::session::{Shared, State};
use crate::upload::{Upload, UploadId, UploadStatus};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Display-only progress between submission and completion.
///
/// Starts at 10 and grows by a uniform 5–19 per tick, capped at 95 so only
/// real completion reaches 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedProgress {
    value: u8,
}

impl SimulatedProgress {
    pub const START: u8 = 10;
    pub const CAP: u8 = 95;

    pub fn new() -> Self {
        Self { value: Self::START }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Advance one tick and return the new value.
    pub fn advance(&mut self, rng: &mut impl Rng) -> u8 {
        let step = rng.gen_range(0..15u8) + 5;
        self.value = self.value.saturating_add(step).min(Self::CAP);
        self.value
    }
}

impl Default for SimulatedProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one submission to a terminal state, or until `token` is cancelled.
pub(crate) async fn run_cycle(
    shared: Arc<Shared>,
    id: UploadId,
    token: CancellationToken,
    request: SubmitRequest,
) {
    let name = request.file.name.clone();

    let submitted = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("Submission of {} cancelled before the response", id);
            return;
        }
        r = shared.backend.submit(request) => r,
    };

    let task_id = match submitted {
        Ok(task_id) => task_id.unwrap_or_else(|| id.to_string()),
        Err(e) => {
            warn!("Submission of '{}' failed: {}", name, e);
            fail(&shared, &id, &token, UploadError::SubmitFailed { message: e.to_string() });
            return;
        }
    };

    let snapshot = shared.update(|s| {
        let patch = UploadPatch {
            task_id: Some(task_id.clone()),
            ..Default::default()
        };
        if s.registry.patch_live(&id, &token, patch) {
            s.registry.get(&id).cloned()
        } else {
            None
        }
    });
    let Some(snapshot) = snapshot else {
        debug!("Upload {} went away during submission", id);
        return;
    };
    info!("'{}' submitted as task {}", name, task_id);
    shared.config.observer.on_submitted(&snapshot, &task_id);

    poll(&shared, &id, &token, &task_id, StdRng::from_entropy()).await;
}

async fn poll(
    shared: &Arc<Shared>,
    id: &UploadId,
    token: &CancellationToken,
    task_id: &str,
    mut rng: StdRng,
) {
    let period = shared.config.poll_interval;
    let started = Instant::now();
    let deadline = started + shared.config.poll_timeout;

    let mut ticker = tokio::time::interval_at(started + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut progress = SimulatedProgress::new();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Polling of {} cancelled", id);
                return;
            }
            _ = ticker.tick() => {}
        }

        let value = progress.advance(&mut rng);
        let snapshot = shared.update(|s| {
            let patch = UploadPatch {
                progress: Some(value),
                ..Default::default()
            };
            if s.registry.patch_live(id, token, patch) {
                s.registry.get(id).cloned()
            } else {
                None
            }
        });
        let Some(snapshot) = snapshot else {
            return;
        };
        shared.config.observer.on_progress(&snapshot);

        let status = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            r = shared.backend.status(task_id) => r,
        };

        match status {
            Ok(status) => {
                if let Some(result) = status.completed_result() {
                    complete(shared, id, token, result).await;
                    return;
                }
                if status.status == TaskState::Error {
                    warn!("Task {} reported an error: {:?}", task_id, status.error_message);
                    fail(
                        shared,
                        id,
                        token,
                        UploadError::Failed {
                            message: status.error_message.filter(|m| !m.is_empty()),
                        },
                    );
                    return;
                }
                debug!("Task {} is {:?} ({}%)", task_id, status.status, value);
            }
            Err(e) => warn!("Status query for task {} failed: {}", task_id, e),
        }

        if Instant::now() >= deadline {
            let secs = shared.config.poll_timeout.as_secs();
            warn!("Task {} did not finish within {}s", task_id, secs);
            fail(shared, id, token, UploadError::TimedOut { secs });
            return;
        }
    }
}

/// Move the record to `completed`, then run the auto-export hook.
async fn complete(shared: &Arc<Shared>, id: &UploadId, token: &CancellationToken, result: &str) {
    let annotate = shared.config.annotate_results;
    let snapshot = shared.update(|s| {
        let stored = match s.registry.get(id) {
            Some(u) if annotate => export::wrap(u, result),
            Some(_) => result.to_string(),
            None => return None,
        };
        let patch = UploadPatch {
            status: Some(UploadStatus::Completed),
            progress: Some(100),
            ocr_result: Some(stored),
            clear_error: true,
            ..Default::default()
        };
        if !s.registry.patch_live(id, token, patch) {
            return None;
        }
        s.registry.end_cycle(id);
        s.registry.get(id).cloned()
    });
    let Some(mut snapshot) = snapshot else {
        return;
    };
    info!("OCR completed for '{}' ({} bytes)", snapshot.name, snapshot.ocr_result.len());

    let notice = match shared.config.auto_export_dir.as_deref() {
        Some(dir) => match auto_export(&snapshot, dir).await {
            Ok(path) => {
                let flagged = shared.update(|s| mark_exported(s, id, snapshot.task_id.as_deref()));
                let Some(flagged) = flagged else {
                    debug!("Upload {} changed while its result was being saved", id);
                    return;
                };
                snapshot = flagged;
                format!("OCR completed for '{}' and saved to {}.", snapshot.name, path.display())
            }
            Err(e) => {
                warn!("Auto-export of '{}' failed: {}", snapshot.name, e);
                format!("OCR completed for '{}', but saving the result failed: {e}", snapshot.name)
            }
        },
        None => format!("OCR completed for '{}'.", snapshot.name),
    };
    shared.update(|s| {
        let _ = s.registry.apply(Transition::SetNotice {
            notice: Some(notice),
        });
    });

    shared.config.observer.on_completed(&snapshot);
}

/// Set `auto_exported` on the completed record of `task_id`.
///
/// Returns `None` once the record was removed or started another cycle.
fn mark_exported(s: &mut State, id: &UploadId, task_id: Option<&str>) -> Option<Upload> {
    let same_cycle = s.registry.get(id).is_some_and(|u| {
        u.status == UploadStatus::Completed && u.task_id.as_deref() == task_id
    }) && !s.registry.has_active_cycle(id);
    if !same_cycle {
        return None;
    }
    s.registry.patch(
        id,
        UploadPatch {
            auto_exported: Some(true),
            ..Default::default()
        },
    );
    s.registry.get(id).cloned()
}

async fn auto_export(upload: &Upload, dir: &std::path::Path) -> Result<std::path::PathBuf, crate::error::OcrError> {
    export::export(upload, ExportFormat::Markdown)?.save(dir).await
}

/// Move the record to a failed state and end its cycle.
fn fail(shared: &Arc<Shared>, id: &UploadId, token: &CancellationToken, error: UploadError) {
    let status = match error {
        UploadError::TimedOut { .. } => UploadStatus::TimedOut,
        _ => UploadStatus::Error,
    };
    let snapshot = shared.update(|s| {
        let patch = UploadPatch {
            status: Some(status),
            error: Some(error.clone()),
            ..Default::default()
        };
        if !s.registry.patch_live(id, token, patch) {
            return None;
        }
        s.registry.end_cycle(id);
        s.registry.get(id).cloned()
    });
    if let Some(snapshot) = snapshot {
        shared.config.observer.on_failed(&snapshot, &error);
    }
}
