//! Local blob references for image previews.
//!
//! Image uploads are previewed straight from their bytes. The store hands out
//! an opaque `blob:` URL per registration and keeps the bytes alive until the
//! URL is revoked. Revocation is idempotent: a URL is released exactly once,
//! and a second revoke reports `false`.

use bytes::Bytes;
use std::collections::HashMap;
use tracing::debug;

const BLOB_SCHEME: &str = "blob:ocr-upload/";

/// Bytes and MIME type behind a blob URL.
#[derive(Debug, Clone)]
pub struct Blob {
    pub data: Bytes,
    pub mime: String,
}

#[derive(Debug, Default)]
pub struct BlobStore {
    blobs: HashMap<String, Blob>,
    released: usize,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `data` and return its URL.
    pub fn create(&mut self, data: Bytes, mime: impl Into<String>) -> String {
        let url = format!("{BLOB_SCHEME}{}", uuid::Uuid::new_v4());
        self.blobs.insert(
            url.clone(),
            Blob {
                data,
                mime: mime.into(),
            },
        );
        url
    }

    pub fn get(&self, url: &str) -> Option<&Blob> {
        self.blobs.get(url)
    }

    /// Release a URL. Returns `false` if it was unknown or already released.
    pub fn revoke(&mut self, url: &str) -> bool {
        let removed = self.blobs.remove(url).is_some();
        if removed {
            self.released += 1;
            debug!("Released {}", url);
        }
        removed
    }

    /// Release every live URL, returning how many were released.
    pub fn revoke_all(&mut self) -> usize {
        let n = self.blobs.len();
        self.blobs.clear();
        self.released += n;
        n
    }

    pub fn is_blob_url(url: &str) -> bool {
        url.starts_with(BLOB_SCHEME)
    }

    /// Number of live URLs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Total number of URLs released over the store's lifetime.
    pub fn released(&self) -> usize {
        self.released
    }
}
