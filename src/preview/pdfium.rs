//! PDFium-backed [`PdfEngine`] and its runtime loader.
//!
//! The loader resolves the PDFium shared library in this order:
//!
//! 1. `PDFIUM_LIB_PATH`: an existing library, used as-is.
//! 2. The cache directory (`~/.cache/ocr-upload/pdfium-{VERSION}/`, override
//!    with `OCR_UPLOAD_PDFIUM_CACHE`).
//! 3. A download of the platform archive from the fixed
//!    [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries)
//!    release, extracted into the cache directory.
//!
//! All of it runs on a blocking thread; binding happens once per
//! [`super::engine::SharedEngine`].

use super::engine::{EngineLoader, PdfEngine, PdfPreview};
use crate::error::PreviewError;
use futures::future::BoxFuture;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info};

/// pdfium-binaries release tag used for downloads.
pub const PDFIUM_VERSION: &str = "7690";

const BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

// ── Engine ───────────────────────────────────────────────────────────────────

/// PDFium bound from a resolved shared library.
///
/// Each preview binds its own `Pdfium` instance on the calling (blocking)
/// thread; the lock keeps library init and teardown from interleaving.
pub struct PdfiumEngine {
    library_path: PathBuf,
    lock: Mutex<()>,
}

impl PdfiumEngine {
    /// Bind the library at `path` once to prove it loads.
    pub fn bind(path: &Path) -> Result<Self, PreviewError> {
        let engine = Self {
            library_path: path.to_path_buf(),
            lock: Mutex::new(()),
        };
        engine.pdfium()?;
        Ok(engine)
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    fn pdfium(&self) -> Result<Pdfium, PreviewError> {
        Pdfium::bind_to_library(&self.library_path)
            .map(Pdfium::new)
            .map_err(|e| PreviewError::Bind {
                path: self.library_path.clone(),
                reason: format!("{e:?}"),
            })
    }
}

impl PdfEngine for PdfiumEngine {
    fn preview(&self, data: &[u8], target_width: u32) -> Result<PdfPreview, PreviewError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PreviewError::Internal("PDFium lock poisoned".into()))?;
        let pdfium = self.pdfium()?;

        let document = pdfium
            .load_pdf_from_byte_slice(data, None)
            .map_err(|e| PreviewError::Parse(format!("{e:?}")))?;

        let pages = document.pages();
        let page_count = pages.len() as u32;
        if page_count == 0 {
            return Err(PreviewError::Parse("document has no pages".into()));
        }

        let page = pages
            .get(0)
            .map_err(|e| PreviewError::Render(format!("{e:?}")))?;

        let render_config = PdfRenderConfig::new().set_target_width(target_width as i32);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| PreviewError::Render(format!("{e:?}")))?;

        let first_page = bitmap.as_image();
        debug!(
            "Rendered thumbnail {}x{} px ({} pages)",
            first_page.width(),
            first_page.height(),
            page_count
        );

        Ok(PdfPreview {
            page_count,
            first_page,
        })
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

/// Locates (downloading if needed) and binds PDFium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumLoader {
    /// Explicit library path; skips the cache and the download.
    pub library_path: Option<PathBuf>,
}

impl PdfiumLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }
}

impl EngineLoader for PdfiumLoader {
    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn PdfEngine>, PreviewError>> {
        let explicit = self.library_path.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let path = match explicit {
                    Some(p) => p,
                    None => ensure_library()?,
                };
                info!("Binding PDFium from {}", path.display());
                PdfiumEngine::bind(&path).map(|e| Arc::new(e) as Arc<dyn PdfEngine>)
            })
            .await
            .map_err(|e| PreviewError::Internal(format!("PDFium load task panicked: {e}")))?
        })
    }
}

// ── Library resolution ───────────────────────────────────────────────────────

struct PlatformInfo {
    archive_name: &'static str,
    lib_path_in_archive: &'static str,
    lib_name: &'static str,
}

fn detect_platform() -> Result<PlatformInfo, PreviewError> {
    let (archive_name, lib_path_in_archive, lib_name) =
        match (std::env::consts::OS, std::env::consts::ARCH) {
            ("macos", "aarch64") => ("pdfium-mac-arm64.tgz", "lib/libpdfium.dylib", "libpdfium.dylib"),
            ("macos", "x86_64") => ("pdfium-mac-x64.tgz", "lib/libpdfium.dylib", "libpdfium.dylib"),
            ("linux", "x86_64") => ("pdfium-linux-x64.tgz", "lib/libpdfium.so", "libpdfium.so"),
            ("linux", "aarch64") => ("pdfium-linux-arm64.tgz", "lib/libpdfium.so", "libpdfium.so"),
            ("windows", "x86_64") => ("pdfium-win-x64.tgz", "bin/pdfium.dll", "pdfium.dll"),
            ("windows", "aarch64") => ("pdfium-win-arm64.tgz", "bin/pdfium.dll", "pdfium.dll"),
            (os, arch) => {
                return Err(PreviewError::UnsupportedPlatform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                })
            }
        };
    Ok(PlatformInfo {
        archive_name,
        lib_path_in_archive,
        lib_name,
    })
}

/// Per-version cache directory for the PDFium library.
pub fn cache_dir() -> PathBuf {
    let base = std::env::var_os("OCR_UPLOAD_PDFIUM_CACHE")
        .map(PathBuf::from)
        .or_else(|| dirs::cache_dir().map(|d| d.join("ocr-upload")))
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache").join("ocr-upload")))
        .unwrap_or_else(|| std::env::temp_dir().join("ocr-upload"));
    base.join(format!("pdfium-{PDFIUM_VERSION}"))
}

/// Archive URL for the current platform.
pub fn download_url() -> Result<String, PreviewError> {
    let info = detect_platform()?;
    Ok(format!(
        "{BASE_URL}/chromium%2F{PDFIUM_VERSION}/{}",
        info.archive_name
    ))
}

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Return a local PDFium library path, downloading it on first use. Blocking.
pub fn ensure_library() -> Result<PathBuf, PreviewError> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Ok(path.clone());
    }

    if let Some(p) = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from) {
        if p.exists() {
            return Ok(RESOLVED_PATH.get_or_init(|| p).clone());
        }
        info!("PDFIUM_LIB_PATH '{}' not found; falling back to the cache", p.display());
    }

    let platform = detect_platform()?;
    let dir = cache_dir();
    let lib_path = dir.join(platform.lib_name);

    if !lib_path.exists() {
        let url = download_url()?;
        info!("Downloading PDFium from {}", url);
        std::fs::create_dir_all(&dir)
            .map_err(|e| PreviewError::Download(format!("cache dir {}: {e}", dir.display())))?;
        let archive = download(&url)?;
        extract_library(&archive, platform.lib_path_in_archive, &lib_path)?;
    }

    Ok(RESOLVED_PATH.get_or_init(|| lib_path).clone())
}

fn download(url: &str) -> Result<Vec<u8>, PreviewError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("ocr-upload/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| PreviewError::Download(e.to_string()))?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| PreviewError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(PreviewError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let mut buf = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
    response
        .read_to_end(&mut buf)
        .map_err(|e| PreviewError::Download(format!("read error: {e}")))?;
    debug!("Downloaded {} bytes", buf.len());
    Ok(buf)
}

/// Extract one file from a gzipped tar archive into `dest`.
fn extract_library(archive: &[u8], wanted: &str, dest: &Path) -> Result<(), PreviewError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let mut archive = Archive::new(GzDecoder::new(archive));
    let entries = archive
        .entries()
        .map_err(|e| PreviewError::Extract(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| PreviewError::Extract(e.to_string()))?;
        let matches = entry
            .path()
            .map(|p| p.to_string_lossy() == wanted)
            .map_err(|e| PreviewError::Extract(e.to_string()))?;
        if matches {
            entry
                .unpack(dest)
                .map_err(|e| PreviewError::Extract(format!("unpack failed: {e}")))?;
            return Ok(());
        }
    }

    Err(PreviewError::Extract(format!("'{wanted}' not found in archive")))
}
