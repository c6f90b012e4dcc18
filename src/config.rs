//! Configuration types for an upload session.
//!
//! All session behaviour is controlled through [`SessionConfig`], built via
//! its [`SessionConfigBuilder`]. Every knob lives in one struct so a session
//! can be described, logged and compared as a whole.
//!
//! # Design choice: builder over constructor
//! Most callers only change the server URL and perhaps the poll interval.
//! The builder lets them set just that and rely on documented defaults for
//! the rest; setters clamp out-of-range values and [`SessionConfigBuilder::build`]
//! rejects the combinations that cannot work.

use crate::error::OcrError;
use crate::observer::{NoopObserver, Observer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for an [`crate::session::OcrSession`].
///
/// # Example
/// ```rust
/// use ocr_upload::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::builder()
///     .server_url("http://ocr.internal:8000")
///     .poll_interval(Duration::from_secs(2))
///     .max_uploads(50)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct SessionConfig {
    /// Base URL of the OCR backend. Default: `http://localhost:8000`.
    pub server_url: String,

    /// Maximum number of records the registry holds. Default: 20.
    ///
    /// Files beyond the remaining capacity are skipped at ingestion time and
    /// counted in the batch notice.
    pub max_uploads: usize,

    /// Delay between status queries, and before the first one. Default: 3 s.
    pub poll_interval: Duration,

    /// How long a submission may stay unfinished before it is marked
    /// `timed_out`, measured from the start of polling. Default: 10 min.
    pub poll_timeout: Duration,

    /// Per-request HTTP timeout. Default: 30 s.
    pub request_timeout: Duration,

    /// Width in pixels of rendered PDF thumbnails. Range: 32–2000. Default: 160.
    pub thumbnail_width: u32,

    /// Write each completed result as `<basename>.md` into this directory.
    /// Default: disabled.
    pub auto_export_dir: Option<PathBuf>,

    /// Store results wrapped in the `# OCR Result` template instead of the
    /// bare server body. Default: false.
    pub annotate_results: bool,

    /// Explicit PDFium library; skips the cache lookup and the download.
    pub pdfium_library: Option<PathBuf>,

    /// Lifecycle event sink. Default: [`NoopObserver`].
    pub observer: Observer,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            max_uploads: 20,
            poll_interval: Duration::from_millis(3000),
            poll_timeout: Duration::from_secs(600),
            request_timeout: Duration::from_secs(30),
            thumbnail_width: 160,
            auto_export_dir: None,
            annotate_results: false,
            pdfium_library: None,
            observer: Arc::new(NoopObserver),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("server_url", &self.server_url)
            .field("max_uploads", &self.max_uploads)
            .field("poll_interval", &self.poll_interval)
            .field("poll_timeout", &self.poll_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("thumbnail_width", &self.thumbnail_width)
            .field("auto_export_dir", &self.auto_export_dir)
            .field("annotate_results", &self.annotate_results)
            .field("pdfium_library", &self.pdfium_library)
            .field("observer", &"<dyn SessionObserver>")
            .finish()
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = url.into();
        self
    }

    pub fn max_uploads(mut self, n: usize) -> Self {
        self.config.max_uploads = n.max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn thumbnail_width(mut self, px: u32) -> Self {
        self.config.thumbnail_width = px.clamp(32, 2000);
        self
    }

    pub fn auto_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.auto_export_dir = Some(dir.into());
        self
    }

    pub fn annotate_results(mut self, v: bool) -> Self {
        self.config.annotate_results = v;
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn observer(mut self, observer: Observer) -> Self {
        self.config.observer = observer;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SessionConfig, OcrError> {
        let c = &self.config;
        let url = c.server_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(OcrError::InvalidConfig(format!(
                "server URL must start with http:// or https://, got '{}'",
                c.server_url
            )));
        }
        if c.poll_timeout < c.poll_interval {
            return Err(OcrError::InvalidConfig(format!(
                "poll timeout ({:?}) is shorter than the poll interval ({:?})",
                c.poll_timeout, c.poll_interval
            )));
        }
        Ok(self.config)
    }
}

// ── Page ranges ──────────────────────────────────────────────────────────────

/// A page range typed by the user, applied to every PDF in a batch.
///
/// Parses `"N"`, `"N-M"` and the open-ended `"N-"`. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    /// `None` means "through the last page".
    pub end: Option<u32>,
}

impl PageRange {
    /// Concrete `(start, end)` for a document of `page_count` pages.
    ///
    /// An end past the last page is clamped; a start past it is kept so the
    /// submission guard reports it.
    pub fn resolve(&self, page_count: u32) -> (u32, u32) {
        let end = self.end.unwrap_or(page_count).min(page_count);
        (self.start, end)
    }
}

impl FromStr for PageRange {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || OcrError::InvalidConfig(format!("invalid page range '{s}' (expected N, N-M or N-)"));
        let parse = |p: &str| -> Result<u32, OcrError> {
            p.trim().parse::<u32>().ok().filter(|&n| n >= 1).ok_or_else(bad)
        };

        match s.split_once('-') {
            None => {
                let n = parse(s)?;
                Ok(Self { start: n, end: Some(n) })
            }
            Some((a, b)) if b.trim().is_empty() => Ok(Self {
                start: parse(a)?,
                end: None,
            }),
            Some((a, b)) => {
                let (start, end) = (parse(a)?, parse(b)?);
                if start > end {
                    return Err(bad());
                }
                Ok(Self { start, end: Some(end) })
            }
        }
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(e) if e == self.start => write!(f, "{}", self.start),
            Some(e) => write!(f, "{}-{}", self.start, e),
            None => write!(f, "{}-", self.start),
        }
    }
}
