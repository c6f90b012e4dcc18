//! The public façade: one [`OcrSession`] per set of uploads.
//!
//! A session owns the registry, the blob store for image previews, the OCR
//! backend, the shared PDF engine and the configuration. Operations that
//! start background work (previews, submissions) spawn tokio tasks and return
//! immediately; callers observe progress through the configured
//! [`crate::observer::SessionObserver`], through [`OcrSession::subscribe`], or
//! by awaiting [`OcrSession::wait_for_previews`] and
//! [`OcrSession::wait_until_settled`].
//!
//! ## Locking
//!
//! Registry and blob store sit behind one `std::sync::Mutex`. It is held only
//! for the duration of a reducer call, never across an `.await`, and observer
//! callbacks run after it is released. Every locked update bumps a
//! `tokio::sync::watch` revision counter.
//!
//! ## Teardown
//!
//! [`OcrSession::shutdown`] (also run on drop) cancels every submission
//! cycle and releases every blob URL. Background tasks still in flight notice
//! the cancellation at their next step and exit without touching the
//! registry.

use crate::api::{HttpOcrBackend, OcrBackend, SubmitRequest};
use crate::blob::{Blob, BlobStore};
use crate::clipboard::{self, Clipboard, CommandClipboard, CopyMethod, Osc52Clipboard};
use crate::config::SessionConfig;
use crate::error::{ClipboardError, OcrError, UploadError};
use crate::export::{self, ExportFormat, ExportedFile};
use crate::ingest;
use crate::poll;
use crate::preview::{self, engine::SharedEngine, pdfium::PdfiumLoader};
use crate::registry::{Applied, Registry, Summary, Transition, UploadPatch};
use crate::upload::{FileKind, SourceFile, Upload, UploadId, UploadStatus};
use bytes::Bytes;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Registry plus blob store, guarded together.
pub(crate) struct State {
    pub(crate) registry: Registry,
    pub(crate) blobs: BlobStore,
}

/// State shared between the session handle and its background tasks.
pub(crate) struct Shared {
    state: Mutex<State>,
    pub(crate) backend: Arc<dyn OcrBackend>,
    pub(crate) engine: Arc<SharedEngine>,
    pub(crate) config: SessionConfig,
    revision: watch::Sender<u64>,
}

impl Shared {
    /// Run `f` under the state lock and bump the revision counter.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let out = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut state)
        };
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
        out
    }

    /// Run `f` under the state lock without signalling a change.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn shutdown(&self) -> usize {
        let (removed, released) = self.update(|s| {
            let removed = s.registry.teardown();
            (removed.len(), s.blobs.revoke_all())
        });
        if removed > 0 {
            info!("Session closed: {} upload(s) dropped, {} preview URL(s) released", removed, released);
        }
        removed
    }
}

/// What [`OcrSession::add_files`] did with a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    /// Ids of the new records, in batch order.
    pub accepted: Vec<UploadId>,
    pub unsupported: usize,
    pub over_capacity: usize,
    /// The notice now shown for this batch, if anything was skipped.
    pub notice: Option<String>,
}

/// What [`OcrSession::start_selected`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub started: Vec<UploadId>,
    /// Selected records that were processing or had an invalid range.
    pub skipped: usize,
}

/// An upload session. See the [module docs](self).
pub struct OcrSession {
    shared: Arc<Shared>,
}

impl OcrSession {
    /// Session talking HTTP to `config.server_url`, rendering PDFs with PDFium.
    pub fn new(config: SessionConfig) -> Result<Self, OcrError> {
        let backend = HttpOcrBackend::new(config.server_url.clone(), config.request_timeout)?;
        let loader = PdfiumLoader {
            library_path: config.pdfium_library.clone(),
        };
        let engine = SharedEngine::new(Arc::new(loader));
        Ok(Self::with_parts(config, Arc::new(backend), Arc::new(engine)))
    }

    /// Session over an explicit backend and engine.
    pub fn with_parts(
        config: SessionConfig,
        backend: Arc<dyn OcrBackend>,
        engine: Arc<SharedEngine>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    registry: Registry::new(),
                    blobs: BlobStore::new(),
                }),
                backend,
                engine,
                config,
                revision,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    // ── Ingestion ────────────────────────────────────────────────────────

    /// Filter a batch, register the accepted files and start their previews.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_files(&self, files: Vec<SourceFile>) -> AddOutcome {
        if files.is_empty() {
            return AddOutcome::default();
        }
        let capacity = self.shared.config.max_uploads;

        let (accepted, outcome) = self.shared.update(|s| {
            let mut batch = ingest::ingest(files, s.registry.len(), capacity);
            for upload in batch.accepted.iter_mut().filter(|u| !u.is_pdf()) {
                let mime = preview::image_mime(&upload.file);
                upload.thumbnail = Some(s.blobs.create(upload.file.data.clone(), mime));
            }
            let notice = batch.notice(capacity);
            let outcome = AddOutcome {
                accepted: batch.accepted.iter().map(|u| u.id.clone()).collect(),
                unsupported: batch.unsupported,
                over_capacity: batch.over_capacity,
                notice: notice.clone(),
            };
            let accepted = batch.accepted.clone();
            if !batch.accepted.is_empty() {
                let _ = s.registry.apply(Transition::Insert {
                    uploads: batch.accepted,
                });
            }
            let _ = s.registry.apply(Transition::SetNotice { notice });
            (accepted, outcome)
        });

        info!(
            "Added {} file(s), skipped {} unsupported and {} over capacity",
            accepted.len(),
            outcome.unsupported,
            outcome.over_capacity
        );

        for upload in accepted.iter().filter(|u| u.is_pdf()) {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(run_preview(shared, upload.id.clone(), upload.file.data.clone()));
        }

        self.shared
            .config
            .observer
            .on_files_added(&accepted, outcome.unsupported + outcome.over_capacity);
        outcome
    }

    /// Edit a PDF's page range. `None` (or 0) clears a bound.
    ///
    /// Clears the record's error. Ranges of images and of records being
    /// processed cannot be edited.
    pub fn set_range(&self, id: &UploadId, start: Option<u32>, end: Option<u32>) -> Result<(), OcrError> {
        self.shared.update(|s| {
            let upload = s
                .registry
                .get(id)
                .ok_or_else(|| OcrError::UnknownUpload { id: id.clone() })?;
            if upload.status == UploadStatus::Processing {
                return Err(OcrError::AlreadyProcessing { id: id.clone() });
            }
            if upload.kind == FileKind::Image {
                return Ok(());
            }
            let preview_failed = matches!(upload.error, Some(UploadError::PreviewFailed { .. }));
            s.registry.patch(
                id,
                UploadPatch {
                    range_start: Some(start.unwrap_or(0)),
                    range_end: Some(end.unwrap_or(0)),
                    clear_error: !preview_failed,
                    ..Default::default()
                },
            );
            Ok(())
        })
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Submit one record and start polling it.
    ///
    /// Refused while the record is processing. A PDF with an invalid range is
    /// refused and the validation error is stored on the record.
    pub fn start(&self, id: &UploadId) -> Result<(), OcrError> {
        let (token, request) = self.shared.update(|s| {
            let token = s.registry.begin_cycle(id)?;
            let upload = s
                .registry
                .get(id)
                .ok_or_else(|| OcrError::Internal(format!("upload {id} vanished under the lock")))?;
            Ok::<_, OcrError>((token, SubmitRequest::from_upload(upload)))
        })?;

        debug!("Starting OCR for {}", id);
        tokio::spawn(poll::run_cycle(
            Arc::clone(&self.shared),
            id.clone(),
            token,
            request,
        ));
        Ok(())
    }

    /// Start every selected record that passes the guard; skip the rest silently.
    pub fn start_selected(&self) -> BatchOutcome {
        let selected = self.shared.read(|s| s.registry.selected_ids());
        let mut outcome = BatchOutcome::default();

        for id in selected {
            let ready = self.shared.read(|s| {
                s.registry.get(&id).is_some_and(|u| {
                    u.status != UploadStatus::Processing && u.validate_range().is_ok()
                })
            });
            if !ready {
                outcome.skipped += 1;
                continue;
            }
            match self.start(&id) {
                Ok(()) => outcome.started.push(id),
                Err(e) => {
                    debug!("Skipping {}: {}", id, e);
                    outcome.skipped += 1;
                }
            }
        }

        let notice = if outcome.started.is_empty() {
            "None of the selected files can be submitted for OCR.".to_string()
        } else {
            format!("Started OCR for {} file(s).", outcome.started.len())
        };
        self.set_notice(Some(notice));
        outcome
    }

    /// Server-side estimate of when the current queue finishes (`HH:MM`).
    pub async fn estimated_completion_time(&self) -> Result<String, OcrError> {
        Ok(self.shared.backend.estimated_completion_time().await?)
    }

    // ── Removal ──────────────────────────────────────────────────────────

    /// Remove a record: cancel its cycle and release its preview URL.
    pub fn remove(&self, id: &UploadId) -> Result<Upload, OcrError> {
        let removed = self.shared.update(|s| match s.registry.apply(Transition::Remove { id: id.clone() }) {
            Applied::Removed(upload) => {
                if let Some(url) = upload.thumbnail.as_deref().filter(|u| BlobStore::is_blob_url(u)) {
                    s.blobs.revoke(url);
                }
                Some(*upload)
            }
            _ => None,
        });
        let upload = removed.ok_or_else(|| OcrError::UnknownUpload { id: id.clone() })?;
        info!("Removed '{}'", upload.name);
        self.shared.config.observer.on_removed(id);
        Ok(upload)
    }

    /// Remove every selected record. Returns how many were removed.
    pub fn remove_selected(&self) -> usize {
        let selected = self.shared.read(|s| s.registry.selected_ids());
        if selected.is_empty() {
            return 0;
        }
        let removed = selected.iter().filter(|id| self.remove(id).is_ok()).count();
        self.shared.update(|s| {
            let _ = s.registry.apply(Transition::ClearSelection);
        });
        self.set_notice(Some(format!("Removed {removed} file(s).")));
        removed
    }

    // ── Selection ────────────────────────────────────────────────────────

    pub fn select(&self, id: &UploadId) -> bool {
        self.apply(Transition::Select { id: id.clone() })
    }

    pub fn deselect(&self, id: &UploadId) -> bool {
        self.apply(Transition::Deselect { id: id.clone() })
    }

    /// Select everything, or clear the selection when everything is selected.
    pub fn toggle_select_all(&self) {
        self.apply(Transition::ToggleSelectAll);
    }

    pub fn clear_selection(&self) {
        self.apply(Transition::ClearSelection);
    }

    pub fn selected_ids(&self) -> Vec<UploadId> {
        self.shared.read(|s| s.registry.selected_ids())
    }

    fn apply(&self, transition: Transition) -> bool {
        self.shared.update(|s| s.registry.apply(transition).changed())
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Clone of every record, newest batch first.
    pub fn snapshot(&self) -> Vec<Upload> {
        self.shared.read(|s| s.registry.iter().cloned().collect())
    }

    pub fn get(&self, id: &UploadId) -> Option<Upload> {
        self.shared.read(|s| s.registry.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.shared.read(|s| s.registry.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> Summary {
        self.shared.read(|s| s.registry.summary())
    }

    /// Whether `id` has a submission or poll in flight.
    pub fn is_polling(&self, id: &UploadId) -> bool {
        self.shared.read(|s| s.registry.has_active_cycle(id))
    }

    pub fn active_cycles(&self) -> usize {
        self.shared.read(|s| s.registry.active_cycles())
    }

    /// The current session-wide notice.
    pub fn notice(&self) -> Option<String> {
        self.shared.read(|s| s.registry.notice().map(str::to_string))
    }

    pub fn set_notice(&self, notice: Option<String>) {
        self.apply(Transition::SetNotice { notice });
    }

    /// Bytes behind an image preview URL, while the record exists.
    pub fn blob(&self, url: &str) -> Option<Blob> {
        self.shared.read(|s| s.blobs.get(url).cloned())
    }

    /// Number of live preview URLs.
    pub fn live_blobs(&self) -> usize {
        self.shared.read(|s| s.blobs.len())
    }

    /// A receiver that changes on every registry update.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Wait until no PDF preview is in flight.
    pub async fn wait_for_previews(&self) {
        self.wait_until(|r| r.iter().all(|u| !u.loading_preview)).await
    }

    /// Wait until no preview and no submission cycle is in flight.
    pub async fn wait_until_settled(&self) {
        self.wait_until(|r| {
            r.active_cycles() == 0
                && r.iter()
                    .all(|u| !u.loading_preview && u.status != UploadStatus::Processing)
        })
        .await
    }

    async fn wait_until(&self, done: impl Fn(&Registry) -> bool) {
        let mut rx = self.shared.revision.subscribe();
        loop {
            if self.shared.read(|s| done(&s.registry)) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    // ── Export ───────────────────────────────────────────────────────────

    /// Render a record's result. Refused when it has none.
    pub fn export(&self, id: &UploadId, format: ExportFormat) -> Result<ExportedFile, OcrError> {
        self.shared.read(|s| {
            let upload = s
                .registry
                .get(id)
                .ok_or_else(|| OcrError::UnknownUpload { id: id.clone() })?;
            export::export(upload, format)
        })
    }

    /// Export and write atomically into `dir`.
    pub async fn download(&self, id: &UploadId, format: ExportFormat, dir: impl AsRef<Path>) -> Result<PathBuf, OcrError> {
        let file = self.export(id, format)?;
        let path = file.save(dir).await?;
        let label = match format {
            ExportFormat::Markdown => "Markdown",
            ExportFormat::PlainText => "Text",
        };
        self.set_notice(Some(format!("{label} file saved to {}.", path.display())));
        Ok(path)
    }

    /// Copy a record's raw result to the system clipboard.
    ///
    /// Uses the platform clipboard tool, falling back to OSC 52 on stderr.
    /// The tool runs on a blocking thread.
    pub async fn copy_result(&self, id: &UploadId) -> Result<CopyMethod, OcrError> {
        let text = self.result_text(id)?;
        let copied = tokio::task::spawn_blocking(move || {
            let fallback = Osc52Clipboard::stderr();
            match CommandClipboard::detect() {
                Ok(primary) => clipboard::copy_with_fallback(&primary, &fallback, &text),
                Err(e) => clipboard::copy_with_fallback(&Unavailable(e.to_string()), &fallback, &text),
            }
        })
        .await
        .unwrap_or_else(|e| Err(ClipboardError::WriteFailed(format!("clipboard task failed: {e}"))));
        self.finish_copy(copied)
    }

    /// Copy a record's raw result through explicit clipboards.
    ///
    /// On failure the record is unchanged and a notice is set.
    pub fn copy_result_with(
        &self,
        id: &UploadId,
        primary: &dyn Clipboard,
        fallback: &dyn Clipboard,
    ) -> Result<CopyMethod, OcrError> {
        let text = self.result_text(id)?;
        self.finish_copy(clipboard::copy_with_fallback(primary, fallback, &text))
    }

    fn result_text(&self, id: &UploadId) -> Result<String, OcrError> {
        self.shared.read(|s| {
            let upload = s
                .registry
                .get(id)
                .ok_or_else(|| OcrError::UnknownUpload { id: id.clone() })?;
            if upload.has_result() {
                Ok(upload.ocr_result.clone())
            } else {
                Err(OcrError::NoResult { id: id.clone() })
            }
        })
    }

    fn finish_copy(&self, copied: Result<CopyMethod, ClipboardError>) -> Result<CopyMethod, OcrError> {
        match copied {
            Ok(method) => {
                self.set_notice(Some("OCR result copied to the clipboard.".into()));
                Ok(method)
            }
            Err(e) => {
                warn!("Copy failed: {}", e);
                self.set_notice(Some("Copy failed. Select the text manually.".into()));
                Err(e.into())
            }
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────

    /// Cancel every cycle, drop every record and release every preview URL.
    ///
    /// Returns how many records were dropped. Idempotent.
    pub fn shutdown(&self) -> usize {
        self.shared.shutdown()
    }
}

impl Drop for OcrSession {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// Stand-in primary clipboard when no platform tool was found.
struct Unavailable(String);

impl Clipboard for Unavailable {
    fn copy(&self, _text: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError::Unavailable(self.0.clone()))
    }

    fn name(&self) -> &str {
        "system"
    }
}

/// Render a PDF preview and merge it into the record, if it still exists.
async fn run_preview(shared: Arc<Shared>, id: UploadId, data: Bytes) {
    let width = shared.config.thumbnail_width;
    let rendered = preview::render_pdf_thumbnail(&shared.engine, data, width).await;

    let (patch, failure) = match rendered {
        Ok(p) => (
            UploadPatch {
                thumbnail: Some(p.thumbnail),
                page_count: Some(p.page_count),
                range_start: Some(1),
                range_end: Some(p.page_count),
                loading_preview: Some(false),
                clear_error: true,
                ..Default::default()
            },
            None,
        ),
        Err(e) => {
            warn!("Preview of {} failed: {}", id, e);
            let error = UploadError::PreviewFailed {
                detail: e.to_string(),
            };
            (
                UploadPatch {
                    loading_preview: Some(false),
                    error: Some(error.clone()),
                    ..Default::default()
                },
                Some(error),
            )
        }
    };

    let snapshot = shared.update(|s| {
        if s.registry.patch(&id, patch) {
            s.registry.get(&id).cloned()
        } else {
            None
        }
    });
    let Some(snapshot) = snapshot else {
        debug!("Preview for removed upload {} dropped", id);
        return;
    };

    let observer = &shared.config.observer;
    match failure {
        None => observer.on_preview_ready(&snapshot),
        Some(error) => observer.on_preview_failed(&snapshot, &error),
    }
}
