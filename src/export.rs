//! Result export: Markdown and plain-text renderings of an upload's result.
//!
//! The Markdown export is the stored result verbatim. The plain-text export
//! drops the `# OCR Result` preamble when the result carries one (results
//! stored with `annotate_results` enabled do), leaving only the recognised
//! text.
//!
//! Files are named after the source file with its last extension replaced,
//! and written atomically: a temp file next to the target is renamed over
//! it, so a reader never sees a half-written result.

use crate::error::OcrError;
use crate::upload::Upload;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Name used when the source name has no stem.
pub const FALLBACK_BASENAME: &str = "ocr-result";

/// Export flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    PlainText,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::PlainText => "txt",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "text/markdown;charset=utf-8",
            ExportFormat::PlainText => "text/plain;charset=utf-8",
        }
    }
}

/// An export ready to be written or handed to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFile {
    pub file_name: String,
    pub mime: &'static str,
    pub contents: String,
}

impl ExportedFile {
    /// Write into `dir` (created if missing) via temp file + rename.
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, OcrError> {
        let dir = dir.as_ref();
        let path = dir.join(&self.file_name);

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| OcrError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;

        let tmp_path = dir.join(format!(".{}.tmp", self.file_name));
        tokio::fs::write(&tmp_path, &self.contents)
            .await
            .map_err(|e| OcrError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(OcrError::OutputWriteFailed { path, source: e });
        }

        info!("Wrote {} ({} bytes)", path.display(), self.contents.len());
        Ok(path)
    }
}

/// Render `upload`'s result in `format`. Refused when there is no result.
pub fn export(upload: &Upload, format: ExportFormat) -> Result<ExportedFile, OcrError> {
    if !upload.has_result() {
        return Err(OcrError::NoResult {
            id: upload.id.clone(),
        });
    }
    let contents = match format {
        ExportFormat::Markdown => upload.ocr_result.clone(),
        ExportFormat::PlainText => strip_preamble(&upload.ocr_result).to_string(),
    };
    Ok(ExportedFile {
        file_name: format!("{}.{}", base_name(&upload.name), format.extension()),
        mime: format.mime(),
        contents,
    })
}

/// Source name without its last extension; [`FALLBACK_BASENAME`] when empty.
pub fn base_name(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => name,
    };
    let stem = stem.trim();
    if stem.is_empty() {
        FALLBACK_BASENAME.to_string()
    } else {
        stem.to_string()
    }
}

// ── Result template ──────────────────────────────────────────────────────────

/// Wrap a server result in the `# OCR Result` template.
///
/// Line breaks in the file name become spaces so the preamble stays one
/// bullet per line.
pub fn wrap(upload: &Upload, body: &str) -> String {
    let name = upload.name.replace(['\r', '\n'], " ");
    let pages = if upload.is_pdf() {
        format!("- Pages: {}", upload.range_label())
    } else {
        "- Pages: single image".to_string()
    };
    format!(
        "# OCR Result\n\n- File: **{}**\n{}\n- Status: completed\n\n---\n\n{}",
        name, pages, body
    )
}

// Heading, bullet lines, blank line, rule, blank line.
static RE_PREAMBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A# OCR Result\r?\n\r?\n(?:- [^\n]*\n)*\r?\n---\r?\n\r?\n").unwrap());

/// Remove the template preamble; text without one is returned unchanged.
pub fn strip_preamble(text: &str) -> &str {
    match RE_PREAMBLE.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}
