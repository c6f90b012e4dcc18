//! Error types for the ocr-upload library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`]: returned from session operations when the requested
//!   action cannot happen at all (unknown upload, already processing, nothing
//!   to export, output directory not writable).
//!
//! * [`UploadError`]: **non-fatal**: one record failed (preview could not be
//!   rendered, server rejected the submission, polling timed out) while every
//!   other record carries on. Stored on [`crate::upload::Upload::error`] and
//!   cleared when the record is resubmitted.
//!
//! [`ApiError`], [`PreviewError`] and [`ClipboardError`] describe failures of
//! the three external collaborators (OCR backend, PDF engine, clipboard) and
//! are folded into one of the two types above at the session boundary.

use crate::upload::UploadId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`crate::session::OcrSession`] operations.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Registry errors ───────────────────────────────────────────────────
    /// No record with this id exists (never added, or already removed).
    #[error("Unknown upload '{id}'")]
    UnknownUpload { id: UploadId },

    /// The record already has a submission in flight.
    #[error("Upload '{id}' is already being processed")]
    AlreadyProcessing { id: UploadId },

    /// The record cannot be submitted yet (range invalid, preview pending).
    #[error("Upload '{id}' cannot be submitted: {reason}")]
    NotSubmittable { id: UploadId, reason: UploadError },

    /// Export or copy was requested for a record without an OCR result.
    #[error("Upload '{id}' has no OCR result yet")]
    NoResult { id: UploadId },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Input file exists but could not be read.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an exported result file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The OCR backend could not be reached or answered with an error.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Neither the primary nor the fallback clipboard accepted the text.
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error attached to a single upload record.
///
/// The `Display` text is what a front-end shows next to the record.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadError {
    /// PDF page count or thumbnail could not be produced.
    #[error("Failed to generate the PDF preview: {detail}")]
    PreviewFailed { detail: String },

    /// The page count is still unknown because the preview is in flight.
    #[error("PDF information is still loading")]
    PreviewPending,

    /// One of the range bounds is unset.
    #[error("Enter a page range")]
    RangeMissing,

    /// `range_start > range_end`.
    #[error("The start page must not be after the end page ({start} > {end})")]
    RangeInverted { start: u32, end: u32 },

    /// A bound lies outside `[1, page_count]`.
    #[error("Pages must be within 1 – {page_count}")]
    RangeOutOfBounds { page_count: u32 },

    /// The submission request failed (transport error or non-2xx response).
    #[error("{message}")]
    SubmitFailed { message: String },

    /// The backend reported the task as failed.
    #[error("OCR processing failed{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Failed { message: Option<String> },

    /// No terminal status arrived before the poll deadline.
    #[error("OCR did not finish within {secs}s")]
    TimedOut { secs: u64 },
}

/// Failures talking to the OCR backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection refused, DNS failure, timeout and similar.
    #[error("Request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// The server answered with a non-2xx status.
    ///
    /// `message` is the server-provided `error`/`detail` text, or
    /// `HTTP <code>: <reason>` when the body carried none.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// A 2xx body could not be decoded.
    #[error("Unexpected response from '{url}': {reason}")]
    Decode { url: String, reason: String },

    /// The HTTP client itself could not be built.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Failures loading the PDF engine or rendering a preview.
#[derive(Debug, Clone, Error)]
pub enum PreviewError {
    /// The current OS/architecture has no published PDFium build.
    #[error("Unsupported platform for PDFium: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// Downloading the PDFium archive failed.
    #[error("PDFium download failed: {0}")]
    Download(String),

    /// Extracting the library from the archive failed.
    #[error("PDFium archive extraction failed: {0}")]
    Extract(String),

    /// The shared library exists but could not be bound.
    #[error(
        "Failed to bind PDFium from '{path}': {reason}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    Bind { path: PathBuf, reason: String },

    /// The document could not be parsed.
    #[error("PDF could not be opened: {0}")]
    Parse(String),

    /// The first page could not be rasterised or encoded.
    #[error("Thumbnail rendering failed: {0}")]
    Render(String),

    /// Unexpected internal error (e.g. the blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures copying text to the clipboard.
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// No clipboard mechanism is available on this system.
    #[error("No clipboard available ({0})")]
    Unavailable(String),

    /// The clipboard accepted the request but the write failed.
    #[error("Clipboard write failed: {0}")]
    WriteFailed(String),
}
