//! The upload record and the types it is built from.
//!
//! An [`Upload`] is the only entity the registry tracks. It is created by the
//! ingestion filter, patched by the preview generator, by range edits and by
//! the submission/polling cycle, and read by the exporters.

use crate::error::{OcrError, UploadError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Locally generated, registry-unique identifier of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UploadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UploadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A user-selected file: display name, declared MIME type and contents.
///
/// The bytes are reference-counted so cloning a record (or handing the file
/// to a submission task) never copies the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    /// Declared MIME type, if the caller knows one.
    pub mime: Option<String>,
    #[serde(skip)]
    pub data: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime: Option<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime,
            data: data.into(),
        }
    }

    /// Read a file from disk. The MIME type is left undeclared; the ingestion
    /// filter falls back to the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, OcrError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OcrError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                OcrError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, None, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Lower-cased extension after the last `.`, if any.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// Determines the preview strategy and whether a page range applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    /// Value of the `file_type` form field.
    pub fn as_form_value(self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
        }
    }
}

/// Lifecycle state of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Waiting,
    Processing,
    Completed,
    Error,
    /// The poll deadline elapsed before the backend reported a terminal state.
    TimedOut,
}

impl UploadStatus {
    /// No further automatic transitions happen from a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Error | UploadStatus::TimedOut
        )
    }

    pub fn is_failed(self) -> bool {
        matches!(self, UploadStatus::Error | UploadStatus::TimedOut)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadStatus::Waiting => "waiting",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
            UploadStatus::TimedOut => "timed out",
        })
    }
}

/// Per-file state tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: UploadId,
    pub file: SourceFile,
    pub name: String,
    pub size: u64,
    pub kind: FileKind,
    pub status: UploadStatus,
    /// Display-only progress, 0–100.
    pub progress: u8,
    /// 1-based inclusive page range (PDF only).
    pub range_start: Option<u32>,
    pub range_end: Option<u32>,
    pub page_count: Option<u32>,
    /// `blob:` URL for images, PNG data URL for PDFs.
    pub thumbnail: Option<String>,
    pub loading_preview: bool,
    /// Markdown result; empty until completed.
    pub ocr_result: String,
    pub error: Option<UploadError>,
    /// Server task id of the latest submission.
    pub task_id: Option<String>,
    pub auto_exported: bool,
}

impl Upload {
    /// Build a fresh `waiting` record for an accepted file.
    pub fn new(file: SourceFile, kind: FileKind) -> Self {
        let (range_end, page_count) = match kind {
            FileKind::Pdf => (None, None),
            FileKind::Image => (Some(1), Some(1)),
        };
        Self {
            id: UploadId::generate(),
            name: file.name.clone(),
            size: file.size(),
            file,
            kind,
            status: UploadStatus::Waiting,
            progress: 0,
            range_start: Some(1),
            range_end,
            page_count,
            thumbnail: None,
            loading_preview: kind == FileKind::Pdf,
            ocr_result: String::new(),
            error: None,
            task_id: None,
            auto_exported: false,
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.kind == FileKind::Pdf
    }

    pub fn has_result(&self) -> bool {
        !self.ocr_result.is_empty()
    }

    /// Check the page range before a submission.
    ///
    /// Images always pass. PDFs need a known page count and
    /// `1 ≤ range_start ≤ range_end ≤ page_count`; a zero bound counts as
    /// unset. A PDF whose preview failed keeps reporting that failure.
    pub fn validate_range(&self) -> Result<(), UploadError> {
        if !self.is_pdf() {
            return Ok(());
        }
        let page_count = match (self.page_count, &self.error) {
            (Some(n), _) if n > 0 => n,
            (_, Some(failed @ UploadError::PreviewFailed { .. })) if !self.loading_preview => {
                return Err(failed.clone())
            }
            _ => return Err(UploadError::PreviewPending),
        };
        let (start, end) = match (self.range_start, self.range_end) {
            (Some(s), Some(e)) if s > 0 && e > 0 => (s, e),
            _ => return Err(UploadError::RangeMissing),
        };
        if start > end {
            return Err(UploadError::RangeInverted { start, end });
        }
        if end > page_count {
            return Err(UploadError::RangeOutOfBounds { page_count });
        }
        Ok(())
    }

    /// Human-readable page range used in the result template.
    pub fn range_label(&self) -> String {
        match (self.kind, self.range_start, self.range_end) {
            (FileKind::Pdf, Some(s), Some(e)) => format!("{s}-{e}"),
            (FileKind::Pdf, _, _) => "all".to_string(),
            (FileKind::Image, _, _) => "single image".to_string(),
        }
    }
}

/// Render a byte count as `B`, `KB`, `MB` or `GB`.
///
/// One decimal place below 10 units, none above; bytes never get decimals.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let decimals = if exponent == 0 || value >= 10.0 { 0 } else { 1 };
    format!("{value:.decimals$} {}", UNITS[exponent])
}
