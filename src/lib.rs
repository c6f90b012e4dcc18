//! # ocr-upload
//!
//! Client for an OCR document-upload service: hand it PDFs and images, pick
//! page ranges, submit them, follow their progress and export the results as
//! Markdown or plain text.
//!
//! ## Why this crate?
//!
//! The OCR itself happens on the server. What is left on the client is a
//! small but fiddly state machine per file: a preview that finishes whenever
//! it finishes, a page range that must be valid before submission, a status
//! poll that must stop the moment the file is removed, and a deadline for
//! tasks that never finish. This crate models that lifecycle explicitly
//! (a reducer over an indexed registry, one cancellation token per
//! submission) so a front-end only has to render records.
//!
//! ## Lifecycle Overview
//!
//! ```text
//! files
//!  │
//!  ├─ 1. Ingest   type/extension filter + capacity limit → `waiting` records
//!  ├─ 2. Preview  image → blob URL; PDF → PDFium page count + thumbnail (async)
//!  ├─ 3. Range    PDF page range edits, validated before submission
//!  ├─ 4. Submit   multipart POST → `processing`
//!  ├─ 5. Poll     fixed-interval status queries + simulated progress + deadline
//!  └─ 6. Export   Markdown / plain text file, clipboard
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr_upload::{ExportFormat, OcrSession, SessionConfig, SourceFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder()
//!         .server_url("http://localhost:8000")
//!         .build()?;
//!     let session = OcrSession::new(config)?;
//!
//!     let added = session.add_files(vec![SourceFile::from_path("scan.pdf").await?]);
//!     session.wait_for_previews().await;
//!     session.start_selected();
//!     session.wait_until_settled().await;
//!
//!     for id in &added.accepted {
//!         if let Ok(path) = session.download(id, ExportFormat::Markdown, "out").await {
//!             println!("{}", path.display());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr-upload` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ocr-upload = { version = "0.3", default-features = false }
//! ```
//!
//! ## PDFium
//!
//! PDF previews need the PDFium shared library. It is located through
//! `PDFIUM_LIB_PATH`, then the per-user cache, and is downloaded into the
//! cache on first use. See [`preview::pdfium`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod blob;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod observer;
pub mod poll;
pub mod preview;
pub mod registry;
pub mod session;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use api::{HttpOcrBackend, OcrBackend, SubmitRequest, TaskState, TaskStatus};
pub use clipboard::{Clipboard, CopyMethod};
pub use config::{PageRange, SessionConfig, SessionConfigBuilder};
pub use error::{ApiError, ClipboardError, OcrError, PreviewError, UploadError};
pub use export::{ExportFormat, ExportedFile};
pub use observer::{NoopObserver, Observer, SessionObserver};
pub use preview::engine::{EngineLoader, PdfEngine, PdfPreview, SharedEngine};
pub use registry::{Summary, Transition, UploadPatch};
pub use session::{AddOutcome, BatchOutcome, OcrSession};
pub use upload::{format_file_size, FileKind, SourceFile, Upload, UploadId, UploadStatus};
