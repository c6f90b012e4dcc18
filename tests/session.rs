//! Session-level integration tests.
//!
//! The OCR backend and the PDF engine are in-process fakes, so these tests
//! exercise the full lifecycle (ingest → preview → submit → poll → export)
//! without a server or PDFium. Poll intervals are a few milliseconds and
//! every wait is bounded by a timeout.

use async_trait::async_trait;
use futures::future::BoxFuture;
use image::{DynamicImage, Rgba, RgbaImage};
use ocr_upload::clipboard::Osc52Clipboard;
use ocr_upload::{
    ApiError, Clipboard, ClipboardError, CopyMethod, EngineLoader, ExportFormat, OcrBackend,
    OcrError, OcrSession, PdfEngine, PdfPreview, PreviewError, SessionConfig, SessionObserver,
    SharedEngine, SourceFile, SubmitRequest, TaskState, TaskStatus, Upload, UploadError,
    UploadId, UploadStatus,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Renders a white page; "%PDF" documents have `pages` pages, anything else
/// fails to parse.
struct FakeEngine {
    pages: u32,
}

impl PdfEngine for FakeEngine {
    fn preview(&self, data: &[u8], target_width: u32) -> Result<PdfPreview, PreviewError> {
        if !data.starts_with(b"%PDF") {
            return Err(PreviewError::Parse("not a PDF".into()));
        }
        Ok(PdfPreview {
            page_count: self.pages,
            first_page: DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                target_width,
                target_width * 3 / 2,
                Rgba([255, 255, 255, 255]),
            )),
        })
    }
}

struct CountingLoader {
    loads: Arc<AtomicUsize>,
}

impl EngineLoader for CountingLoader {
    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn PdfEngine>, PreviewError>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(Arc::new(FakeEngine { pages: 4 }) as Arc<dyn PdfEngine>)
        })
    }
}

/// Backend answering from scripted queues.
///
/// Submissions pop `submits` (default: task id "42"). Status queries pop
/// `statuses`; once empty they answer `idle`. With a gate installed, every
/// status query first waits for the gate; `submit_gate` does the same for
/// submissions.
struct ScriptedBackend {
    submits: Mutex<VecDeque<Result<Option<String>, ApiError>>>,
    statuses: Mutex<VecDeque<Result<TaskStatus, ApiError>>>,
    idle: TaskStatus,
    submitted: Mutex<Vec<SubmitRequest>>,
    status_calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
    submit_gate: Option<Arc<Notify>>,
    entered: Arc<Notify>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            submits: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(VecDeque::new()),
            idle: status(TaskState::Processing, None, None),
            submitted: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
            gate: None,
            submit_gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    fn with_statuses(self, statuses: Vec<TaskStatus>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into_iter().map(Ok).collect();
        self
    }

    fn with_submit(self, result: Result<Option<String>, ApiError>) -> Self {
        self.submits.lock().unwrap().push_back(result);
        self
    }

    fn idle(mut self, idle: TaskStatus) -> Self {
        self.idle = idle;
        self
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn gated_submit(mut self, gate: Arc<Notify>) -> Self {
        self.submit_gate = Some(gate);
        self
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrBackend for ScriptedBackend {
    async fn submit(&self, request: SubmitRequest) -> Result<Option<String>, ApiError> {
        self.submitted.lock().unwrap().push(request);
        if let Some(gate) = &self.submit_gate {
            self.entered.notify_one();
            gate.notified().await;
        }
        self.submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Some("42".into())))
    }

    async fn status(&self, _task_id: &str) -> Result<TaskStatus, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            gate.notified().await;
        }
        let next = self.statuses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.idle.clone()))
    }

    async fn estimated_completion_time(&self) -> Result<String, ApiError> {
        Ok("12:34".into())
    }
}

fn status(state: TaskState, result: Option<&str>, error: Option<&str>) -> TaskStatus {
    TaskStatus {
        status: state,
        ocr_result: result.map(str::to_string),
        error_message: error.map(str::to_string),
    }
}

/// Records every observer event as a short string.
#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl EventLog {
    fn push(&self, e: String) {
        self.0.lock().unwrap().push(e);
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl SessionObserver for EventLog {
    fn on_preview_ready(&self, upload: &Upload) {
        self.push(format!("preview:{}", upload.id));
    }
    fn on_submitted(&self, upload: &Upload, task_id: &str) {
        self.push(format!("submitted:{}:{task_id}", upload.id));
    }
    fn on_progress(&self, upload: &Upload) {
        self.push(format!("progress:{}", upload.id));
    }
    fn on_completed(&self, upload: &Upload) {
        self.push(format!("completed:{}", upload.id));
    }
    fn on_failed(&self, upload: &Upload, _error: &UploadError) {
        self.push(format!("failed:{}", upload.id));
    }
    fn on_removed(&self, id: &UploadId) {
        self.push(format!("removed:{id}"));
    }
}

struct Failing;

impl Clipboard for Failing {
    fn copy(&self, _text: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError::Unavailable("no display".into()))
    }
    fn name(&self) -> &str {
        "failing"
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn fast_config() -> ocr_upload::SessionConfigBuilder {
    SessionConfig::builder()
        .poll_interval(Duration::from_millis(5))
        .poll_timeout(Duration::from_secs(5))
}

fn session_with(config: SessionConfig, backend: Arc<ScriptedBackend>, pages: u32) -> OcrSession {
    let engine = SharedEngine::ready(Arc::new(FakeEngine { pages }));
    OcrSession::with_parts(config, backend, Arc::new(engine))
}

fn pdf(name: &str) -> SourceFile {
    SourceFile::new(name, Some("application/pdf".into()), b"%PDF-1.7 fake".to_vec())
}

fn png(name: &str) -> SourceFile {
    SourceFile::new(name, Some("image/png".into()), vec![0x89, b'P', b'N', b'G'])
}

async fn settle(session: &OcrSession) {
    tokio::time::timeout(Duration::from_secs(5), session.wait_until_settled())
        .await
        .expect("session did not settle in time");
}

/// Poll `check` until it holds; auto-export finishes after the record settles.
async fn eventually(session: &OcrSession, check: impl Fn(&OcrSession) -> bool) {
    let mut changes = session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check(session) {
            if changes.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn previews(session: &OcrSession) {
    tokio::time::timeout(Duration::from_secs(5), session.wait_for_previews())
        .await
        .expect("previews did not finish in time");
}

// ── Ingestion & preview ──────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_preview_fills_page_count_and_range() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), backend, 10);

    let added = session.add_files(vec![pdf("report.pdf")]);
    assert_eq!(added.accepted.len(), 1);
    assert!(added.notice.is_none());
    let id = &added.accepted[0];
    assert!(session.get(id).unwrap().loading_preview);

    previews(&session).await;
    let u = session.get(id).unwrap();
    assert_eq!(u.page_count, Some(10));
    assert_eq!((u.range_start, u.range_end), (Some(1), Some(10)));
    assert!(!u.loading_preview);
    assert!(u.thumbnail.unwrap().starts_with("data:image/png;base64,"));
    assert_eq!(u.status, UploadStatus::Waiting);
}

#[tokio::test]
async fn image_preview_is_a_blob_url() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), backend, 1);

    let added = session.add_files(vec![png("a.png")]);
    let u = session.get(&added.accepted[0]).unwrap();
    let url = u.thumbnail.expect("image thumbnail is set synchronously");
    assert!(url.starts_with("blob:"));
    assert_eq!(session.blob(&url).unwrap().mime, "image/png");
    assert_eq!(u.page_count, Some(1));
}

#[tokio::test]
async fn corrupt_pdf_records_preview_error() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), backend, 3);

    let broken = SourceFile::new("broken.pdf", None, b"garbage".to_vec());
    let added = session.add_files(vec![broken]);
    previews(&session).await;

    let u = session.get(&added.accepted[0]).unwrap();
    assert!(!u.loading_preview);
    assert!(matches!(u.error, Some(UploadError::PreviewFailed { .. })));
    assert!(matches!(
        session.start(&u.id),
        Err(OcrError::NotSubmittable {
            reason: UploadError::PreviewFailed { .. },
            ..
        })
    ));

    // Editing the range does not hide the failure.
    session.set_range(&u.id, Some(1), Some(1)).unwrap();
    assert!(matches!(
        session.start(&u.id),
        Err(OcrError::NotSubmittable {
            reason: UploadError::PreviewFailed { .. },
            ..
        })
    ));
    assert_eq!(session.get(&u.id).unwrap().status, UploadStatus::Waiting);
}

#[tokio::test]
async fn engine_loads_once_for_concurrent_previews() {
    let loads = Arc::new(AtomicUsize::new(0));
    let engine = SharedEngine::new(Arc::new(CountingLoader {
        loads: Arc::clone(&loads),
    }));
    let session = OcrSession::with_parts(
        fast_config().build().unwrap(),
        Arc::new(ScriptedBackend::new()),
        Arc::new(engine),
    );

    session.add_files(vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf"), pdf("d.pdf")]);
    previews(&session).await;

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(session.snapshot().iter().all(|u| u.page_count == Some(4)));
}

#[tokio::test]
async fn capacity_is_never_exceeded() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().max_uploads(3).build().unwrap(), backend, 1);

    let first = session.add_files((0..5).map(|i| png(&format!("{i}.png"))).collect());
    assert_eq!(first.accepted.len(), 3);
    assert_eq!(first.over_capacity, 2);
    assert!(first.notice.as_deref().unwrap().contains("over the 3-file limit"));
    assert_eq!(session.len(), 3);

    let second = session.add_files(vec![png("late.png")]);
    assert!(second.accepted.is_empty());
    assert_eq!(session.len(), 3);
    assert!(session.notice().unwrap().contains("limit (3) has been reached"));

    let ids: std::collections::HashSet<_> = session.snapshot().into_iter().map(|u| u.id).collect();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn unsupported_files_are_counted_and_notice_is_replaced() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), backend, 1);

    let out = session.add_files(vec![
        SourceFile::new("notes.docx", None, vec![1u8]),
        png("ok.png"),
    ]);
    assert_eq!(out.unsupported, 1);
    assert_eq!(session.notice().as_deref(), Some("Skipped 1 unsupported file(s)."));

    session.add_files(vec![png("fine.png")]);
    assert_eq!(session.notice(), None);
}

#[tokio::test]
async fn new_batch_is_prepended_and_selected() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), backend, 1);

    session.add_files(vec![png("old.png")]);
    session.clear_selection();
    session.add_files(vec![png("new1.png"), png("new2.png")]);

    let names: Vec<_> = session.snapshot().into_iter().map(|u| u.name).collect();
    assert_eq!(names, ["new1.png", "new2.png", "old.png"]);
    assert_eq!(session.selected_ids().len(), 3);
}

// ── Submission & polling ─────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_range_is_sent_as_decimal_strings() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_statuses(vec![status(TaskState::Completed, Some("done"), None)]),
    );
    let session = session_with(fast_config().build().unwrap(), Arc::clone(&backend), 10);

    let id = session.add_files(vec![pdf("report.pdf")]).accepted.remove(0);
    previews(&session).await;
    session.set_range(&id, Some(2), Some(5)).unwrap();
    session.start(&id).unwrap();
    settle(&session).await;

    let submitted = backend.submitted.lock().unwrap();
    let fields = submitted[0].form_fields();
    let get = |name: &str| {
        fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .unwrap()
            .to_string()
    };
    assert_eq!(get("range_start"), "2");
    assert_eq!(get("range_end"), "5");
    assert_eq!(get("page_count"), "10");
    assert_eq!(get("file_type"), "pdf");
}

#[tokio::test]
async fn completed_status_finishes_the_record() {
    let backend = Arc::new(ScriptedBackend::new().with_statuses(vec![
        status(TaskState::Pending, None, None),
        status(TaskState::Processing, None, None),
        status(TaskState::Completed, Some("X"), None),
    ]));
    let log = Arc::new(EventLog::default());
    let config = fast_config().observer(log.clone()).build().unwrap();
    let session = session_with(config, Arc::clone(&backend), 1);

    let id = session.add_files(vec![png("scan.png")]).accepted.remove(0);
    session.start(&id).unwrap();
    assert_eq!(session.get(&id).unwrap().status, UploadStatus::Processing);
    assert_eq!(session.get(&id).unwrap().progress, 5);
    settle(&session).await;

    let u = session.get(&id).unwrap();
    assert_eq!(u.status, UploadStatus::Completed);
    assert_eq!(u.progress, 100);
    assert_eq!(u.ocr_result, "X");
    assert_eq!(u.task_id.as_deref(), Some("42"));
    assert!(!session.is_polling(&id));
    assert_eq!(session.active_cycles(), 0);
    assert_eq!(backend.status_calls(), 3);

    let events = log.events();
    assert!(events.contains(&format!("submitted:{id}:42")));
    assert_eq!(events.last().unwrap(), &format!("completed:{id}"));
}

#[tokio::test]
async fn error_status_keeps_result_empty() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_statuses(vec![status(TaskState::Error, None, Some("engine crashed"))]),
    );
    let session = session_with(fast_config().build().unwrap(), Arc::clone(&backend), 1);

    let id = session.add_files(vec![png("scan.png")]).accepted.remove(0);
    session.start(&id).unwrap();
    settle(&session).await;

    let u = session.get(&id).unwrap();
    assert_eq!(u.status, UploadStatus::Error);
    assert_eq!(u.ocr_result, "");
    assert_eq!(
        u.error,
        Some(UploadError::Failed {
            message: Some("engine crashed".into())
        })
    );
    assert!(!session.is_polling(&id));

    // A failed record can be resubmitted.
    *backend.statuses.lock().unwrap() =
        VecDeque::from(vec![Ok(status(TaskState::Completed, Some("second try"), None))]);
    session.start(&id).unwrap();
    assert_eq!(session.get(&id).unwrap().error, None);
    settle(&session).await;
    assert_eq!(session.get(&id).unwrap().ocr_result, "second try");
}

#[tokio::test]
async fn failed_status_queries_are_retried() {
    let backend = Arc::new(ScriptedBackend::new());
    {
        let mut q = backend.statuses.lock().unwrap();
        q.push_back(Err(ApiError::Http {
            status: 502,
            message: "HTTP 502: Bad Gateway".into(),
        }));
        q.push_back(Err(ApiError::Transport {
            url: "http://x".into(),
            reason: "connection reset".into(),
        }));
        q.push_back(Ok(status(TaskState::Completed, Some("ok"), None)));
    }
    let session = session_with(fast_config().build().unwrap(), Arc::clone(&backend), 1);

    let id = session.add_files(vec![png("a.png")]).accepted.remove(0);
    session.start(&id).unwrap();
    settle(&session).await;

    assert_eq!(session.get(&id).unwrap().status, UploadStatus::Completed);
    assert_eq!(backend.status_calls(), 3);
}

#[tokio::test]
async fn submit_failure_sets_server_message() {
    let backend = Arc::new(ScriptedBackend::new().with_submit(Err(ApiError::Http {
        status: 413,
        message: "file too large".into(),
    })));
    let session = session_with(fast_config().build().unwrap(), Arc::clone(&backend), 1);

    let id = session.add_files(vec![png("huge.png")]).accepted.remove(0);
    session.start(&id).unwrap();
    settle(&session).await;

    let u = session.get(&id).unwrap();
    assert_eq!(u.status, UploadStatus::Error);
    assert_eq!(
        u.error,
        Some(UploadError::SubmitFailed {
            message: "file too large".into()
        })
    );
    assert_eq!(backend.status_calls(), 0);
}

#[tokio::test]
async fn missing_task_id_falls_back_to_upload_id() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_submit(Ok(None))
            .with_statuses(vec![status(TaskState::Completed, Some("ok"), None)]),
    );
    let session = session_with(fast_config().build().unwrap(), backend, 1);

    let id = session.add_files(vec![png("a.png")]).accepted.remove(0);
    session.start(&id).unwrap();
    settle(&session).await;
    assert_eq!(session.get(&id).unwrap().task_id.as_deref(), Some(id.as_str()));
}

#[tokio::test]
async fn stuck_task_times_out() {
    // "completed" without a result is not a completion.
    let backend = Arc::new(
        ScriptedBackend::new().idle(status(TaskState::Completed, Some(""), None)),
    );
    let config = fast_config()
        .poll_timeout(Duration::from_millis(60))
        .build()
        .unwrap();
    let session = session_with(config, Arc::clone(&backend), 1);

    let id = session.add_files(vec![png("a.png")]).accepted.remove(0);
    session.start(&id).unwrap();
    settle(&session).await;

    let u = session.get(&id).unwrap();
    assert_eq!(u.status, UploadStatus::TimedOut);
    assert!(matches!(u.error, Some(UploadError::TimedOut { .. })));
    assert!(u.ocr_result.is_empty());
    assert!(u.progress <= 95);
    assert!(backend.status_calls() >= 2);
    assert!(!session.is_polling(&id));
}

#[tokio::test]
async fn invalid_range_is_refused_and_recorded() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), Arc::clone(&backend), 10);

    let id = session.add_files(vec![pdf("a.pdf")]).accepted.remove(0);
    previews(&session).await;

    session.set_range(&id, Some(6), Some(5)).unwrap();
    let err = session.start(&id).unwrap_err();
    assert!(matches!(err, OcrError::NotSubmittable { .. }));
    let u = session.get(&id).unwrap();
    assert_eq!(u.status, UploadStatus::Waiting);
    assert_eq!(u.error, Some(UploadError::RangeInverted { start: 6, end: 5 }));

    session.set_range(&id, Some(1), Some(11)).unwrap();
    assert_eq!(session.get(&id).unwrap().error, None);
    assert!(session.start(&id).is_err());

    session.set_range(&id, None, Some(3)).unwrap();
    assert!(matches!(
        session.start(&id),
        Err(OcrError::NotSubmittable {
            reason: UploadError::RangeMissing,
            ..
        })
    ));

    for (s, e) in [(1, 1), (10, 10)] {
        session.set_range(&id, Some(s), Some(e)).unwrap();
        assert!(
            session.get(&id).unwrap().validate_range().is_ok(),
            "{s}-{e} should be valid"
        );
    }
    assert!(backend.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn start_is_refused_while_processing() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), backend, 1);

    let id = session.add_files(vec![png("a.png")]).accepted.remove(0);
    session.start(&id).unwrap();
    assert!(matches!(
        session.start(&id),
        Err(OcrError::AlreadyProcessing { .. })
    ));
    assert!(matches!(
        session.set_range(&id, Some(1), Some(1)),
        Err(OcrError::AlreadyProcessing { .. })
    ));
    assert_eq!(session.active_cycles(), 1);
    session.shutdown();
}

#[tokio::test]
async fn batch_start_skips_invalid_records() {
    let backend = Arc::new(
        ScriptedBackend::new().idle(status(TaskState::Completed, Some("text"), None)),
    );
    let session = session_with(fast_config().build().unwrap(), Arc::clone(&backend), 10);

    let added = session.add_files(vec![png("a.png"), png("b.png"), pdf("c.pdf")]);
    previews(&session).await;
    let pdf_id = &added.accepted[2];
    session.set_range(pdf_id, Some(9), Some(3)).unwrap();

    let batch = session.start_selected();
    assert_eq!(batch.started.len(), 2);
    assert_eq!(batch.skipped, 1);
    assert_eq!(session.notice().as_deref(), Some("Started OCR for 2 file(s)."));
    // The batch path does not record the validation error.
    assert_eq!(session.get(pdf_id).unwrap().error, None);

    settle(&session).await;
    let summary = session.summary();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.waiting, 1);

    session.clear_selection();
    session.select(pdf_id);
    let none = session.start_selected();
    assert!(none.started.is_empty());
    assert!(session.notice().unwrap().contains("None of the selected files"));
}

// ── Removal & teardown ───────────────────────────────────────────────────────

#[tokio::test]
async fn tick_after_removal_is_a_no_op() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(
        ScriptedBackend::new()
            .gated(Arc::clone(&gate))
            .with_statuses(vec![status(TaskState::Completed, Some("late"), None)]),
    );
    let log = Arc::new(EventLog::default());
    let config = fast_config().observer(log.clone()).build().unwrap();
    let session = session_with(config, Arc::clone(&backend), 1);

    let id = session.add_files(vec![png("a.png")]).accepted.remove(0);
    session.start(&id).unwrap();

    // The first status query is in flight and parked on the gate.
    tokio::time::timeout(Duration::from_secs(5), backend.entered.notified())
        .await
        .expect("status query never started");
    let removed = session.remove(&id).unwrap();
    assert_eq!(removed.status, UploadStatus::Processing);
    assert!(!session.is_polling(&id));

    gate.notify_waiters();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(session.get(&id).is_none());
    assert_eq!(session.active_cycles(), 0);
    let events = log.events();
    let removed_at = events
        .iter()
        .position(|e| e == &format!("removed:{id}"))
        .unwrap();
    assert!(
        events[removed_at + 1..].iter().all(|e| !e.contains(id.as_str())),
        "events after removal: {:?}",
        &events[removed_at + 1..]
    );
    assert!(matches!(session.remove(&id), Err(OcrError::UnknownUpload { .. })));
}

#[tokio::test]
async fn submit_response_after_removal_is_ignored() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(
        ScriptedBackend::new()
            .gated_submit(Arc::clone(&gate))
            .with_statuses(vec![status(TaskState::Completed, Some("late"), None)]),
    );
    let log = Arc::new(EventLog::default());
    let config = fast_config().observer(log.clone()).build().unwrap();
    let session = session_with(config, Arc::clone(&backend), 1);

    let id = session.add_files(vec![png("a.png")]).accepted.remove(0);
    session.start(&id).unwrap();

    // The submission is in flight and parked on the gate.
    tokio::time::timeout(Duration::from_secs(5), backend.entered.notified())
        .await
        .expect("submission never started");
    session.remove(&id).unwrap();

    gate.notify_waiters();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(session.get(&id).is_none());
    assert!(session.snapshot().is_empty());
    assert_eq!(session.active_cycles(), 0);
    assert_eq!(backend.status_calls(), 0);
    let events = log.events();
    assert!(
        events.iter().all(|e| !e.starts_with("submitted:")),
        "events: {events:?}"
    );
}

#[tokio::test]
async fn blob_urls_are_released_exactly_once() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), backend, 2);

    let added = session.add_files(vec![png("a.png"), png("b.png"), pdf("c.pdf")]);
    previews(&session).await;
    assert_eq!(session.live_blobs(), 2);

    let url = session.get(&added.accepted[0]).unwrap().thumbnail.unwrap();
    session.remove(&added.accepted[0]).unwrap();
    assert_eq!(session.live_blobs(), 1);
    assert!(session.blob(&url).is_none());

    // Removing a PDF releases nothing: its thumbnail is a data URL.
    session.remove(&added.accepted[2]).unwrap();
    assert_eq!(session.live_blobs(), 1);

    assert_eq!(session.shutdown(), 1);
    assert_eq!(session.live_blobs(), 0);
    assert!(session.is_empty());
    assert_eq!(session.shutdown(), 0);
}

#[tokio::test]
async fn shutdown_cancels_every_cycle() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), Arc::clone(&backend), 1);

    session.add_files(vec![png("a.png"), png("b.png")]);
    let batch = session.start_selected();
    assert_eq!(batch.started.len(), 2);
    assert_eq!(session.active_cycles(), 2);

    tokio::time::sleep(Duration::from_millis(20)).await;
    session.shutdown();
    assert_eq!(session.active_cycles(), 0);

    let calls = backend.status_calls();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(backend.status_calls() <= calls + 2);
}

#[tokio::test]
async fn remove_selected_clears_selection() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), backend, 1);

    let added = session.add_files(vec![png("a.png"), png("b.png"), png("c.png")]);
    session.deselect(&added.accepted[1]);
    assert_eq!(session.remove_selected(), 2);
    assert_eq!(session.len(), 1);
    assert!(session.selected_ids().is_empty());
    assert_eq!(session.notice().as_deref(), Some("Removed 2 file(s)."));

    session.toggle_select_all();
    assert_eq!(session.selected_ids(), vec![added.accepted[1].clone()]);
}

// ── Export ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn annotated_result_is_auto_exported_and_strips_back() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_statuses(vec![status(TaskState::Completed, Some("Body text"), None)]),
    );
    let config = fast_config()
        .annotate_results(true)
        .auto_export_dir(dir.path())
        .build()
        .unwrap();
    let session = session_with(config, backend, 7);

    let id = session.add_files(vec![pdf("minutes.pdf")]).accepted.remove(0);
    previews(&session).await;
    session.set_range(&id, Some(2), Some(4)).unwrap();
    session.start(&id).unwrap();
    settle(&session).await;
    eventually(&session, |s| s.get(&id).is_some_and(|u| u.auto_exported)).await;

    let u = session.get(&id).unwrap();
    assert!(u.ocr_result.starts_with("# OCR Result"));
    assert!(u.ocr_result.contains("- Pages: 2-4"));
    assert!(u.auto_exported);

    let saved = std::fs::read_to_string(dir.path().join("minutes.md")).unwrap();
    assert_eq!(saved, u.ocr_result);
    assert!(session.notice().unwrap().contains("saved to"));

    let text = session.export(&id, ExportFormat::PlainText).unwrap();
    assert_eq!(text.file_name, "minutes.txt");
    assert_eq!(text.contents, "Body text");
}

#[tokio::test]
async fn download_and_export_refusal() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_statuses(vec![status(TaskState::Completed, Some("# Hello"), None)]),
    );
    let session = session_with(fast_config().build().unwrap(), backend, 1);

    let added = session.add_files(vec![png("photo.jpeg"), png("pending.png")]);
    let (done, pending) = (&added.accepted[0], &added.accepted[1]);
    assert!(matches!(
        session.export(done, ExportFormat::Markdown),
        Err(OcrError::NoResult { .. })
    ));

    session.start(done).unwrap();
    settle(&session).await;

    let path = session
        .download(done, ExportFormat::Markdown, dir.path())
        .await
        .unwrap();
    assert_eq!(path, dir.path().join("photo.md"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Hello");
    assert!(session.notice().unwrap().starts_with("Markdown file saved"));

    assert!(matches!(
        session.download(pending, ExportFormat::PlainText, dir.path()).await,
        Err(OcrError::NoResult { .. })
    ));
}

#[tokio::test]
async fn copy_falls_back_to_terminal_sequence() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_statuses(vec![status(TaskState::Completed, Some("copy me"), None)]),
    );
    let session = session_with(fast_config().build().unwrap(), backend, 1);

    let id = session.add_files(vec![png("a.png")]).accepted.remove(0);
    assert!(matches!(
        session.copy_result_with(&id, &Failing, &Failing),
        Err(OcrError::NoResult { .. })
    ));

    session.start(&id).unwrap();
    settle(&session).await;

    let fallback = Osc52Clipboard::new(Vec::new());
    let method = session.copy_result_with(&id, &Failing, &fallback).unwrap();
    assert_eq!(method, CopyMethod::Fallback);
    assert!(String::from_utf8(fallback.into_inner()).unwrap().starts_with("\x1b]52;c;"));

    let err = session.copy_result_with(&id, &Failing, &Failing).unwrap_err();
    assert!(matches!(err, OcrError::Clipboard(_)));
    assert!(session.notice().unwrap().starts_with("Copy failed"));
    assert_eq!(session.get(&id).unwrap().ocr_result, "copy me");
}

#[tokio::test]
async fn estimated_completion_time_passes_through() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_with(fast_config().build().unwrap(), backend, 1);
    assert_eq!(session.estimated_completion_time().await.unwrap(), "12:34");
}
