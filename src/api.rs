//! Client for the OCR backend.
//!
//! Three endpoints, all relative to a configurable base URL:
//!
//! | Method | Path | Body |
//! |--------|------|------|
//! | POST | `/api/aibt/ocr` | multipart: `file`, `file_type`, `file_size`, `range_start`, `range_end`, `page_count` |
//! | GET | `/api/aibt/ocr/status/{task_id}` | `{ status, ocr_result?, error_message? }` |
//! | GET | `/api/estimated_completion_time` | `{ estimated_time: "HH:MM" }` |
//!
//! The session talks to the backend through the [`OcrBackend`] trait so tests
//! can script responses without a server; [`HttpOcrBackend`] is the real
//! `reqwest` implementation.

use crate::error::ApiError;
use crate::upload::{FileKind, SourceFile, Upload};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const SUBMIT_PATH: &str = "/api/aibt/ocr";
const STATUS_PATH: &str = "/api/aibt/ocr/status";
const ETA_PATH: &str = "/api/estimated_completion_time";

// ── Request / response types ─────────────────────────────────────────────────

/// Everything the backend needs for one submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub file: SourceFile,
    pub kind: FileKind,
    pub size: u64,
    /// `(range_start, range_end, page_count)` for PDFs.
    pub range: Option<(u32, u32, u32)>,
}

impl SubmitRequest {
    /// Snapshot the submission fields of a record whose range already validated.
    pub fn from_upload(upload: &Upload) -> Self {
        let range = match (upload.kind, upload.range_start, upload.range_end, upload.page_count) {
            (FileKind::Pdf, Some(s), Some(e), Some(n)) => Some((s, e, n)),
            _ => None,
        };
        Self {
            file: upload.file.clone(),
            kind: upload.kind,
            size: upload.size,
            range,
        }
    }

    /// Text fields of the multipart form, in wire order. Numbers are decimal strings.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("file_type", self.kind.as_form_value().to_string()),
            ("file_size", self.size.to_string()),
        ];
        if let Some((start, end, count)) = self.range {
            fields.push(("range_start", start.to_string()));
            fields.push(("range_end", end.to_string()));
            fields.push(("page_count", count.to_string()));
        }
        fields
    }
}

/// Server-side task state. Unrecognised values deserialize to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

/// Body of the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: TaskState,
    #[serde(default)]
    pub ocr_result: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskStatus {
    /// The result text, when the task completed with a non-empty body.
    pub fn completed_result(&self) -> Option<&str> {
        match self.status {
            TaskState::Completed => self.ocr_result.as_deref().filter(|r| !r.is_empty()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    task_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EtaResponse {
    estimated_time: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

// ── Backend trait ────────────────────────────────────────────────────────────

/// The three backend operations the session needs.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Submit a file. Returns the server task id, or `None` when the response
    /// carried none.
    async fn submit(&self, request: SubmitRequest) -> Result<Option<String>, ApiError>;

    async fn status(&self, task_id: &str) -> Result<TaskStatus, ApiError>;

    /// Estimated wall-clock completion time of the current queue (`HH:MM`).
    async fn estimated_completion_time(&self) -> Result<String, ApiError>;
}

// ── HTTP implementation ──────────────────────────────────────────────────────

/// `reqwest`-backed [`OcrBackend`].
#[derive(Debug, Clone)]
pub struct HttpOcrBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOcrBackend {
    /// Build a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ocr-upload/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::ClientBuild(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await.map_err(|e| ApiError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(http_error(response).await)
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response, url: &str) -> Result<T, ApiError> {
        response.json::<T>().await.map_err(|e| ApiError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl OcrBackend for HttpOcrBackend {
    async fn submit(&self, request: SubmitRequest) -> Result<Option<String>, ApiError> {
        let url = self.url(SUBMIT_PATH);
        info!("Submitting '{}' ({} bytes) to {}", request.file.name, request.size, url);

        let mut file_part = reqwest::multipart::Part::bytes(request.file.data.to_vec())
            .file_name(request.file.name.clone());
        if let Some(mime) = request.file.mime.as_deref() {
            file_part = file_part
                .mime_str(mime)
                .map_err(|e| ApiError::ClientBuild(format!("invalid MIME type '{mime}': {e}")))?;
        }

        let mut form = reqwest::multipart::Form::new().part("file", file_part);
        for (name, value) in request.form_fields() {
            form = form.text(name, value);
        }

        let response = self.send(self.client.post(&url).multipart(form), &url).await?;
        let body: SubmitResponse = Self::decode(response, &url).await?;
        let task_id = body.task_id.and_then(task_id_string);
        debug!("Submission accepted, task id {:?}", task_id);
        Ok(task_id)
    }

    async fn status(&self, task_id: &str) -> Result<TaskStatus, ApiError> {
        let url = self.url(&format!("{STATUS_PATH}/{task_id}"));
        let response = self.send(self.client.get(&url), &url).await?;
        Self::decode(response, &url).await
    }

    async fn estimated_completion_time(&self) -> Result<String, ApiError> {
        let url = self.url(ETA_PATH);
        let response = self.send(self.client.get(&url), &url).await?;
        let body: EtaResponse = Self::decode(response, &url).await?;
        Ok(body.estimated_time)
    }
}

/// Accept the task id as a JSON string or number.
fn task_id_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Turn a non-2xx response into [`ApiError::Http`].
///
/// Message precedence: `error`, then `detail`, then `HTTP <code>: <reason>`.
async fn http_error(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status")
        )
    });
    ApiError::Http {
        status: status.as_u16(),
        message,
    }
}

fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    if let Some(e) = parsed.error.filter(|e| !e.is_empty()) {
        return Some(e);
    }
    match parsed.detail? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
