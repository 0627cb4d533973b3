//! Multipart file upload with progress reporting.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI16, Ordering};

use futures_util::stream;
use reqwest::Body;
use reqwest::multipart::{Form, Part};

use crate::error::ApiError;

/// Size of each body chunk handed to the transport.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Multipart field name the API expects the file under.
const FILE_FIELD: &str = "file";

/// Callback invoked with upload progress in percent (0..=100).
pub type ProgressCallback = Box<dyn Fn(u8) + Send + Sync>;

/// A file to upload.
///
/// The contents are held in memory so the body can be rebuilt if the
/// request has to be re-sent after a token refresh.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Reads a file from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(ApiError::io)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());
        Ok(Self::new(file_name, data))
    }
}

/// Reports monotonically increasing percentages, each at most once.
///
/// Shared across re-dispatches of the same upload, so a retried body does
/// not report progress going backwards.
pub(crate) struct ProgressTracker {
    callback: ProgressCallback,
    last: AtomicI16,
}

impl ProgressTracker {
    pub(crate) fn new(callback: ProgressCallback) -> Self {
        Self {
            callback,
            last: AtomicI16::new(-1),
        }
    }

    pub(crate) fn report(&self, sent: u64, total: u64) {
        // Floor so 100 is only reported once the last byte is handed off.
        let percent = if total == 0 {
            100
        } else {
            (sent.min(total) * 100 / total) as i16
        };
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            (self.callback)(percent as u8);
        }
    }
}

pub(crate) struct UploadBody {
    pub(crate) file: Arc<UploadFile>,
    pub(crate) progress: Option<Arc<ProgressTracker>>,
}

impl UploadBody {
    pub(crate) fn new(file: UploadFile, on_progress: Option<ProgressCallback>) -> Self {
        Self {
            file: Arc::new(file),
            progress: on_progress.map(|cb| Arc::new(ProgressTracker::new(cb))),
        }
    }

    /// Builds a fresh multipart form whose file part reports progress as
    /// the transport pulls chunks from it.
    pub(crate) fn form(&self) -> Result<Form, ApiError> {
        let total = self.file.data.len() as u64;
        let chunks: Vec<Vec<u8>> = self
            .file
            .data
            .chunks(UPLOAD_CHUNK_SIZE)
            .map(<[u8]>::to_vec)
            .collect();

        if total == 0
            && let Some(tracker) = &self.progress
        {
            tracker.report(0, 0);
        }

        let tracker = self.progress.clone();
        let mut sent = 0u64;
        let chunk_stream = stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            if let Some(t) = &tracker {
                t.report(sent, total);
            }
            Ok::<_, std::io::Error>(chunk)
        }));

        let mut part = Part::stream_with_length(Body::wrap_stream(chunk_stream), total)
            .file_name(self.file.file_name.clone());
        if let Some(ct) = &self.file.content_type {
            part = part.mime_str(ct).map_err(ApiError::network)?;
        }

        Ok(Form::new().part(FILE_FIELD, part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_tracker() -> (Arc<Mutex<Vec<u8>>>, ProgressTracker) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracker = ProgressTracker::new(Box::new(move |p| sink.lock().unwrap().push(p)));
        (seen, tracker)
    }

    #[test]
    fn tracker_reports_floor_percentages() {
        let (seen, tracker) = recording_tracker();
        tracker.report(1, 3);
        tracker.report(2, 3);
        tracker.report(3, 3);
        assert_eq!(*seen.lock().unwrap(), vec![33, 66, 100]);
    }

    #[test]
    fn tracker_never_goes_backwards() {
        let (seen, tracker) = recording_tracker();
        tracker.report(50, 100);
        tracker.report(10, 100);
        tracker.report(50, 100);
        tracker.report(100, 100);
        assert_eq!(*seen.lock().unwrap(), vec![50, 100]);
    }

    #[test]
    fn tracker_empty_file_is_complete() {
        let (seen, tracker) = recording_tracker();
        tracker.report(0, 0);
        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }

    #[test]
    fn tracker_skips_zero_progress_after_start() {
        let (seen, tracker) = recording_tracker();
        tracker.report(0, 10);
        tracker.report(0, 10);
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn from_path_uses_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chapter-1.md");
        tokio::fs::write(&path, b"# Chapter 1").await.unwrap();

        let file = UploadFile::from_path(&path).await.unwrap();
        assert_eq!(file.file_name, "chapter-1.md");
        assert_eq!(file.data, b"# Chapter 1");
        assert!(file.content_type.is_none());
    }

    #[tokio::test]
    async fn from_path_missing_file_is_io_error() {
        let err = UploadFile::from_path("/nonexistent/worldbest/upload.bin")
            .await
            .unwrap_err();
        assert_eq!(err.code.as_deref(), Some(crate::error::codes::IO_ERROR));
        assert!(err.status.is_none());
    }

    #[test]
    fn form_builds_with_content_type() {
        let body = UploadBody::new(
            UploadFile::new("cover.png", vec![0u8; 10]).with_content_type("image/png"),
            None,
        );
        assert!(body.form().is_ok());
    }

    #[test]
    fn form_rejects_invalid_content_type() {
        let body = UploadBody::new(
            UploadFile::new("cover.png", vec![0u8; 10]).with_content_type("not a mime\n"),
            None,
        );
        let err = body.form().unwrap_err();
        assert_eq!(err.code.as_deref(), Some(crate::error::codes::INVALID_REQUEST));
    }
}
