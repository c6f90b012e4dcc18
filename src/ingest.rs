//! Ingestion filter: turn a batch of selected files into new upload records.
//!
//! Files are classified by declared MIME type first and by extension second;
//! a file is rejected only when *both* fail to match the supported set.
//! Supported files beyond the remaining capacity are dropped. Neither kind of
//! skip fails the batch: the counts are aggregated into one notice.

use crate::upload::{FileKind, SourceFile, Upload};
use tracing::debug;

/// Extensions accepted by the filter (lower-case, without the dot).
pub const SUPPORTED_EXTENSIONS: [&str; 8] =
    ["pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp"];

const SUPPORTED_IMAGE_MIME_TYPES: [&str; 5] = [
    "image/png",
    "image/jpeg",
    "image/tiff",
    "image/bmp",
    "image/webp",
];

/// Result of filtering one batch.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// New `waiting` records, in batch order.
    pub accepted: Vec<Upload>,
    /// Files whose type and extension were both unsupported.
    pub unsupported: usize,
    /// Supported files dropped because the registry was full.
    pub over_capacity: usize,
    /// True when the registry had no free slot at all.
    pub registry_full: bool,
}

impl IngestOutcome {
    /// Aggregated message for the skipped files, `None` when nothing was skipped.
    pub fn notice(&self, capacity: usize) -> Option<String> {
        let mut parts = Vec::new();
        if self.registry_full {
            parts.push(format!("The file limit ({capacity}) has been reached."));
        } else if self.over_capacity > 0 {
            parts.push(format!(
                "Skipped {} file(s) over the {capacity}-file limit.",
                self.over_capacity
            ));
        }
        if self.unsupported > 0 {
            parts.push(format!("Skipped {} unsupported file(s).", self.unsupported));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Decide whether a file is a PDF, a supported image, or neither.
pub fn classify(file: &SourceFile) -> Option<FileKind> {
    let mime = file.mime.as_deref().map(str::to_ascii_lowercase);
    let ext = file.extension();

    if mime.as_deref() == Some("application/pdf") || ext.as_deref() == Some("pdf") {
        return Some(FileKind::Pdf);
    }
    let mime_ok = mime
        .as_deref()
        .is_some_and(|m| SUPPORTED_IMAGE_MIME_TYPES.contains(&m));
    let ext_ok = ext
        .as_deref()
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e));
    if mime_ok || ext_ok {
        Some(FileKind::Image)
    } else {
        None
    }
}

/// Filter a batch against the supported types and the remaining capacity.
///
/// `occupied` is the current registry size; the outcome never accepts more
/// than `capacity - occupied` files.
pub fn ingest(files: Vec<SourceFile>, occupied: usize, capacity: usize) -> IngestOutcome {
    let available = capacity.saturating_sub(occupied);
    let mut outcome = IngestOutcome {
        registry_full: available == 0,
        ..Default::default()
    };

    for file in files {
        let Some(kind) = classify(&file) else {
            debug!("Rejected unsupported file: {}", file.name);
            outcome.unsupported += 1;
            continue;
        };
        if outcome.accepted.len() >= available {
            outcome.over_capacity += 1;
            continue;
        }
        outcome.accepted.push(Upload::new(file, kind));
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::UploadStatus;
    use std::collections::HashSet;

    fn file(name: &str, mime: Option<&str>) -> SourceFile {
        SourceFile::new(name, mime.map(str::to_string), b"data".to_vec())
    }

    #[test]
    fn classify_by_mime_or_extension() {
        assert_eq!(classify(&file("a.pdf", None)), Some(FileKind::Pdf));
        assert_eq!(
            classify(&file("download", Some("application/pdf"))),
            Some(FileKind::Pdf)
        );
        assert_eq!(classify(&file("scan.TIF", None)), Some(FileKind::Image));
        assert_eq!(
            classify(&file("blob", Some("image/webp"))),
            Some(FileKind::Image)
        );
        // Unsupported MIME but supported extension still passes.
        assert_eq!(
            classify(&file("photo.jpg", Some("application/octet-stream"))),
            Some(FileKind::Image)
        );
        assert_eq!(classify(&file("notes.txt", Some("text/plain"))), None);
        assert_eq!(classify(&file("anim.gif", Some("image/gif"))), None);
    }

    #[test]
    fn accepted_records_start_waiting() {
        let out = ingest(vec![file("a.pdf", None), file("b.png", None)], 0, 20);
        assert_eq!(out.accepted.len(), 2);
        for u in &out.accepted {
            assert_eq!(u.status, UploadStatus::Waiting);
            assert_eq!(u.progress, 0);
        }
        assert!(out.accepted[0].loading_preview);
        assert_eq!(out.accepted[1].page_count, Some(1));
        assert_eq!(out.notice(20), None);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        for occupied in 0..=5 {
            for batch in 0..12 {
                let files = (0..batch).map(|i| file(&format!("{i}.png"), None)).collect();
                let out = ingest(files, occupied, 5);
                assert!(occupied + out.accepted.len() <= 5);
                assert_eq!(out.accepted.len() + out.over_capacity, batch);
            }
        }
    }

    #[test]
    fn ids_unique_within_batch() {
        let files = (0..20).map(|i| file(&format!("{i}.jpg"), None)).collect();
        let out = ingest(files, 0, 20);
        let ids: HashSet<_> = out.accepted.iter().map(|u| u.id.clone()).collect();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn aggregated_notice() {
        let files = vec![
            file("a.png", None),
            file("b.txt", None),
            file("c.png", None),
            file("d.png", None),
        ];
        let out = ingest(files, 18, 20);
        assert_eq!(out.accepted.len(), 2);
        assert_eq!(out.over_capacity, 1);
        assert_eq!(out.unsupported, 1);
        let notice = out.notice(20).unwrap();
        assert!(notice.contains("Skipped 1 file(s) over the 20-file limit."));
        assert!(notice.contains("Skipped 1 unsupported file(s)."));
    }

    #[test]
    fn full_registry_accepts_nothing() {
        let out = ingest(vec![file("a.png", None)], 20, 20);
        assert!(out.accepted.is_empty());
        assert!(out.registry_full);
        assert!(out.notice(20).unwrap().contains("limit (20)"));
    }
}
