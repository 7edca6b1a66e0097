//! The file being uploaded and how its bytes are read.

use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{TransferError, needs_chunk_upload};

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Where the bytes of an [`UploadableFile`] live.
#[derive(Debug, Clone)]
enum FileSource {
    /// Whole content held in memory; ranges are zero-copy slices.
    Memory(Bytes),
    /// File on disk, opened and read per range.
    Disk(PathBuf),
}

/// A file to upload. Immutable for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct UploadableFile {
    name: String,
    mime_type: String,
    size: u64,
    source: FileSource,
}

impl UploadableFile {
    /// Wraps an in-memory buffer.
    ///
    /// When `mime_type` is `None` it is guessed from the name's extension.
    pub fn from_bytes(name: impl Into<String>, mime_type: Option<&str>, data: Bytes) -> Self {
        let name = name.into();
        let mime_type = resolve_mime_type(&name, mime_type);
        Self {
            size: data.len() as u64,
            name,
            mime_type,
            source: FileSource::Memory(data),
        }
    }

    /// Opens a file on disk. The size is captured once, here.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let mime_type = resolve_mime_type(&name, None);

        Ok(Self {
            name,
            mime_type,
            size: metadata.len(),
            source: FileSource::Disk(path.to_path_buf()),
        })
    }

    /// Overrides the detected MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Overrides the name reported to the service.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether this file is above `threshold_mb` MiB.
    pub fn needs_chunk_upload(&self, threshold_mb: u64) -> bool {
        needs_chunk_upload(self.size, threshold_mb)
    }

    /// Reads the bytes in `range`.
    ///
    /// Fails with [`TransferError::OutOfRange`] if the range does not fit the
    /// size recorded at open time, and with an I/O error if the file on disk
    /// shrank since.
    pub async fn read_range(&self, range: Range<u64>) -> Result<Bytes, TransferError> {
        if range.start > range.end || range.end > self.size {
            return Err(TransferError::OutOfRange {
                start: range.start,
                end: range.end,
                size: self.size,
            });
        }

        match &self.source {
            FileSource::Memory(data) => Ok(data.slice(range.start as usize..range.end as usize)),
            FileSource::Disk(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(range.start)).await?;
                let mut buf = vec![0u8; (range.end - range.start) as usize];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

fn resolve_mime_type(name: &str, explicit: Option<&str>) -> String {
    explicit
        .filter(|m| !m.is_empty())
        .or_else(|| detect_mime_type(name))
        .unwrap_or(FALLBACK_MIME_TYPE)
        .to_string()
}

/// Detects a MIME type from a file extension (case-insensitive).
pub fn detect_mime_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        Some("pdf") => Some("application/pdf"),
        Some("zip") => Some("application/zip"),
        Some("json") => Some("application/json"),
        Some("txt") => Some("text/plain"),
        Some("csv") => Some("text/csv"),
        Some("mp4") => Some("video/mp4"),
        Some("mov") => Some("video/quicktime"),
        Some("webm") => Some("video/webm"),
        Some("mp3") => Some("audio/mpeg"),
        Some("wav") => Some("audio/wav"),
        _ => None,
    }
}
