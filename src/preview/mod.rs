//! Preview generation: page count and thumbnail for each accepted file.
//!
//! Images need no rendering: their bytes are registered in the session's
//! [`crate::blob::BlobStore`] and the resulting `blob:` URL is the thumbnail.
//!
//! PDFs go through the [`engine::PdfEngine`] seam. The engine is loaded
//! lazily and shared ([`engine::SharedEngine`]); rendering is CPU-bound and
//! runs on `spawn_blocking` so the async runtime keeps polling other uploads.
//!
//! ## Why a fixed width?
//!
//! Thumbnails are sized by width only (`thumbnail_width`, 160 px by default)
//! and keep the page's aspect ratio. Landscape pages come out short, portrait
//! pages tall, and a list of previews lines up on the left edge.

pub mod encode;
pub mod engine;
pub mod pdfium;

use crate::error::PreviewError;
use crate::upload::SourceFile;
use bytes::Bytes;
use engine::SharedEngine;
use tracing::debug;

/// Page count and encoded thumbnail of a rendered PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPreview {
    pub page_count: u32,
    /// `data:image/png;base64,…`
    pub thumbnail: String,
}

/// MIME type used when registering an image's blob URL.
///
/// The declared type wins; otherwise it is derived from the extension.
pub fn image_mime(file: &SourceFile) -> String {
    if let Some(m) = file.mime.as_deref().filter(|m| !m.is_empty()) {
        return m.to_ascii_lowercase();
    }
    match file.extension().as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("tif" | "tiff") => "image/tiff",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Load the engine if needed, then count pages and render page 1.
pub async fn render_pdf_thumbnail(
    engine: &SharedEngine,
    data: Bytes,
    width: u32,
) -> Result<RenderedPreview, PreviewError> {
    let engine = engine.get().await?;

    let preview = tokio::task::spawn_blocking(move || engine.preview(&data, width))
        .await
        .map_err(|e| PreviewError::Internal(format!("preview task panicked: {e}")))??;

    let thumbnail = encode::encode_data_url(&preview.first_page)
        .map_err(|e| PreviewError::Render(format!("PNG encoding failed: {e}")))?;

    debug!("PDF preview ready: {} pages", preview.page_count);
    Ok(RenderedPreview {
        page_count: preview.page_count,
        thumbnail,
    })
}
