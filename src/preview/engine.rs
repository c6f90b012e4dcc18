//! The PDF engine seam and its single-flight loader.
//!
//! Loading a PDF engine is expensive (PDFium may have to be downloaded
//! first) and may only happen once per process. [`SharedEngine`] wraps an
//! [`EngineLoader`] in a `tokio::sync::OnceCell`: the first caller drives the
//! load, concurrent callers await that same load, and later callers get the
//! cached engine. A failed load is not cached, so the next preview retries.

use crate::error::PreviewError;
use futures::future::BoxFuture;
use image::DynamicImage;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Page count plus a raster of the first page.
#[derive(Debug, Clone)]
pub struct PdfPreview {
    pub page_count: u32,
    pub first_page: DynamicImage,
}

/// A loaded PDF rendering capability.
///
/// Methods are blocking; callers run them on `spawn_blocking`.
pub trait PdfEngine: Send + Sync {
    /// Parse `data`, count its pages and render page 1 scaled to `target_width` pixels.
    fn preview(&self, data: &[u8], target_width: u32) -> Result<PdfPreview, PreviewError>;
}

/// Produces a [`PdfEngine`]; called at most once per successful load.
pub trait EngineLoader: Send + Sync {
    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn PdfEngine>, PreviewError>>;
}

/// Lazily loaded, memoised engine shared by every preview task.
pub struct SharedEngine {
    loader: Arc<dyn EngineLoader>,
    cell: OnceCell<Arc<dyn PdfEngine>>,
}

impl SharedEngine {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    /// Wrap an engine that is already loaded.
    pub fn ready(engine: Arc<dyn PdfEngine>) -> Self {
        Self {
            loader: Arc::new(Unavailable),
            cell: OnceCell::new_with(Some(engine)),
        }
    }

    /// Return the engine, loading it on first use.
    pub async fn get(&self) -> Result<Arc<dyn PdfEngine>, PreviewError> {
        let loader = Arc::clone(&self.loader);
        self.cell
            .get_or_try_init(|| async move {
                info!("Loading PDF engine");
                let engine = loader.load().await;
                if let Err(ref e) = engine {
                    warn!("PDF engine load failed: {}", e);
                }
                engine
            })
            .await
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

/// Loader used by [`SharedEngine::ready`]; never called.
struct Unavailable;

impl EngineLoader for Unavailable {
    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn PdfEngine>, PreviewError>> {
        Box::pin(async {
            Err(PreviewError::Internal(
                "no PDF engine loader configured".into(),
            ))
        })
    }
}
