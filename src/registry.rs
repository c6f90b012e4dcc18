//! Upload registry: an ordered, id-indexed collection of upload records.
//!
//! Every mutation is a [`Transition`] applied by [`Registry::apply`], so the
//! history of a session can be logged, replayed or asserted on in tests.
//! Patches merge by id; a patch for an id that is no longer present is a
//! no-op, which is what makes late preview results and late poll ticks safe
//! after a removal.
//!
//! Each entry also owns the [`CancellationToken`] of its current
//! submit/poll cycle. Removing the entry cancels the token in the same
//! critical section, so no task can observe a live token for a removed id.

use crate::error::{OcrError, UploadError};
use crate::upload::{Upload, UploadId, UploadStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Field-wise update of one record. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UploadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_preview: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_result: Option<String>,
    /// Sets the error; takes precedence over `clear_error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UploadError>,
    #[serde(default)]
    pub clear_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_exported: Option<bool>,
}

impl UploadPatch {
    fn merge_into(self, u: &mut Upload) {
        if let Some(v) = self.status {
            u.status = v;
        }
        if let Some(v) = self.progress {
            u.progress = v.min(100);
        }
        if let Some(v) = self.range_start {
            u.range_start = Some(v);
        }
        if let Some(v) = self.range_end {
            u.range_end = Some(v);
        }
        if let Some(v) = self.page_count {
            u.page_count = Some(v);
        }
        if let Some(v) = self.thumbnail {
            u.thumbnail = Some(v);
        }
        if let Some(v) = self.loading_preview {
            u.loading_preview = v;
        }
        if let Some(v) = self.ocr_result {
            u.ocr_result = v;
        }
        if self.clear_error {
            u.error = None;
        }
        if let Some(v) = self.error {
            u.error = Some(v);
        }
        if let Some(v) = self.task_id {
            u.task_id = Some(v);
        }
        if let Some(v) = self.auto_exported {
            u.auto_exported = v;
        }
    }
}

/// A discrete, serialisable registry mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Transition {
    /// Prepend a batch (newest first) and select every record.
    Insert { uploads: Vec<Upload> },
    Patch { id: UploadId, patch: UploadPatch },
    Remove { id: UploadId },
    Select { id: UploadId },
    Deselect { id: UploadId },
    /// Select everything, or clear the selection when everything is selected.
    ToggleSelectAll,
    ClearSelection,
    /// Replace the session-wide notice (never appended).
    SetNotice { notice: Option<String> },
}

/// What [`Registry::apply`] did.
#[derive(Debug)]
#[must_use]
pub enum Applied {
    Changed,
    /// The transition referenced a missing id or changed nothing.
    Unchanged,
    /// The record was removed; its cycle token is already cancelled.
    Removed(Box<Upload>),
}

impl Applied {
    pub fn changed(&self) -> bool {
        !matches!(self, Applied::Unchanged)
    }
}

struct Entry {
    upload: Upload,
    cycle: Option<CancellationToken>,
}

/// Ordered collection of upload records plus the selection set and notice.
#[derive(Default)]
pub struct Registry {
    order: Vec<UploadId>,
    entries: HashMap<UploadId, Entry>,
    selected: HashSet<UploadId>,
    notice: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one transition.
    pub fn apply(&mut self, transition: Transition) -> Applied {
        match transition {
            Transition::Insert { uploads } => {
                let mut fresh = Vec::with_capacity(uploads.len());
                for upload in uploads {
                    if self.entries.contains_key(&upload.id) {
                        warn!("Ignoring duplicate upload id {}", upload.id);
                        continue;
                    }
                    fresh.push(upload.id.clone());
                    self.entries.insert(
                        upload.id.clone(),
                        Entry {
                            upload,
                            cycle: None,
                        },
                    );
                }
                if fresh.is_empty() {
                    return Applied::Unchanged;
                }
                fresh.append(&mut self.order);
                self.order = fresh;
                self.selected = self.order.iter().cloned().collect();
                Applied::Changed
            }
            Transition::Patch { id, patch } => match self.entries.get_mut(&id) {
                Some(entry) => {
                    patch.merge_into(&mut entry.upload);
                    Applied::Changed
                }
                None => {
                    debug!("Dropping patch for removed upload {}", id);
                    Applied::Unchanged
                }
            },
            Transition::Remove { id } => match self.entries.remove(&id) {
                Some(entry) => {
                    if let Some(token) = entry.cycle {
                        token.cancel();
                    }
                    self.order.retain(|o| o != &id);
                    self.selected.remove(&id);
                    Applied::Removed(Box::new(entry.upload))
                }
                None => Applied::Unchanged,
            },
            Transition::Select { id } => {
                if self.entries.contains_key(&id) && self.selected.insert(id) {
                    Applied::Changed
                } else {
                    Applied::Unchanged
                }
            }
            Transition::Deselect { id } => {
                if self.selected.remove(&id) {
                    Applied::Changed
                } else {
                    Applied::Unchanged
                }
            }
            Transition::ToggleSelectAll => {
                if self.selected.len() == self.order.len() {
                    self.selected.clear();
                } else {
                    self.selected = self.order.iter().cloned().collect();
                }
                Applied::Changed
            }
            Transition::ClearSelection => {
                if self.selected.is_empty() {
                    Applied::Unchanged
                } else {
                    self.selected.clear();
                    Applied::Changed
                }
            }
            Transition::SetNotice { notice } => {
                if self.notice == notice {
                    Applied::Unchanged
                } else {
                    self.notice = notice;
                    Applied::Changed
                }
            }
        }
    }

    /// Shorthand for a [`Transition::Patch`].
    pub fn patch(&mut self, id: &UploadId, patch: UploadPatch) -> bool {
        self.apply(Transition::Patch {
            id: id.clone(),
            patch,
        })
        .changed()
    }

    // ── Submission cycles ────────────────────────────────────────────────

    /// Check the submission guard and move the record into `processing`.
    ///
    /// Any previous cycle token is cancelled and replaced, so an id never has
    /// two live cycles. On a range failure the validation error is recorded
    /// on the record and its status is left alone.
    pub fn begin_cycle(&mut self, id: &UploadId) -> Result<CancellationToken, OcrError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| OcrError::UnknownUpload { id: id.clone() })?;

        if entry.upload.status == UploadStatus::Processing {
            return Err(OcrError::AlreadyProcessing { id: id.clone() });
        }
        if let Err(reason) = entry.upload.validate_range() {
            entry.upload.error = Some(reason.clone());
            return Err(OcrError::NotSubmittable {
                id: id.clone(),
                reason,
            });
        }

        if let Some(previous) = entry.cycle.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        entry.cycle = Some(token.clone());

        let u = &mut entry.upload;
        u.status = UploadStatus::Processing;
        u.progress = 5;
        u.error = None;
        u.task_id = None;
        u.auto_exported = false;
        Ok(token)
    }

    /// Whether `token` is still the live cycle of `id`.
    pub fn is_live(&self, id: &UploadId, token: &CancellationToken) -> bool {
        !token.is_cancelled() && self.entries.contains_key(id)
    }

    /// Patch `id` only if `token` is still its live cycle.
    pub fn patch_live(&mut self, id: &UploadId, token: &CancellationToken, patch: UploadPatch) -> bool {
        self.is_live(id, token) && self.patch(id, patch)
    }

    /// Finish the cycle of `id`: cancel and forget its token.
    pub fn end_cycle(&mut self, id: &UploadId) {
        if let Some(entry) = self.entries.get_mut(id) {
            if let Some(token) = entry.cycle.take() {
                token.cancel();
            }
        }
    }

    /// Whether `id` has a submit/poll cycle in flight.
    pub fn has_active_cycle(&self, id: &UploadId) -> bool {
        self.entries
            .get(id)
            .and_then(|e| e.cycle.as_ref())
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Number of in-flight cycles across all records.
    pub fn active_cycles(&self) -> usize {
        self.entries
            .values()
            .filter_map(|e| e.cycle.as_ref())
            .filter(|t| !t.is_cancelled())
            .count()
    }

    /// Cancel every cycle and drop every record, returning the removed records.
    pub fn teardown(&mut self) -> Vec<Upload> {
        let order = std::mem::take(&mut self.order);
        self.selected.clear();
        order
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .map(|entry| {
                if let Some(token) = entry.cycle {
                    token.cancel();
                }
                entry.upload
            })
            .collect()
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn get(&self, id: &UploadId) -> Option<&Upload> {
        self.entries.get(id).map(|e| &e.upload)
    }

    pub fn contains(&self, id: &UploadId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Records in display order (newest batch first).
    pub fn iter(&self) -> impl Iterator<Item = &Upload> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| &e.upload))
    }

    /// Selected ids, in display order.
    pub fn selected_ids(&self) -> Vec<UploadId> {
        self.order
            .iter()
            .filter(|id| self.selected.contains(*id))
            .cloned()
            .collect()
    }

    pub fn is_selected(&self, id: &UploadId) -> bool {
        self.selected.contains(id)
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Status counts over the selection, or over everything when nothing is selected.
    pub fn summary(&self) -> Summary {
        let use_selection = !self.selected.is_empty();
        let mut s = Summary {
            selection_only: use_selection,
            ..Default::default()
        };
        for u in self.iter() {
            if use_selection && !self.selected.contains(&u.id) {
                continue;
            }
            s.total += 1;
            match u.status {
                UploadStatus::Waiting => s.waiting += 1,
                UploadStatus::Processing => s.processing += 1,
                UploadStatus::Completed => s.completed += 1,
                UploadStatus::Error | UploadStatus::TimedOut => s.failed += 1,
            }
        }
        s
    }
}

/// Per-status counts for a progress overview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub waiting: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Counts cover the selection rather than every record.
    pub selection_only: bool,
}

impl Summary {
    /// Completed share of the total, rounded to a whole percent.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed as f64 / self.total as f64) * 100.0).round() as u8
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    /// Overall label: any failure wins, then processing, then waiting.
    pub fn label(&self) -> &'static str {
        if self.total == 0 {
            ""
        } else if self.failed > 0 {
            "some uploads failed"
        } else if self.is_complete() {
            "complete"
        } else if self.processing > 0 {
            "processing"
        } else if self.waiting > 0 {
            "waiting"
        } else {
            "complete"
        }
    }
}
