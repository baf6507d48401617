use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;

use crate::errors::AppResult;
use crate::security::InputValidator;

/// Key used to recognise repeated uploads of the same file without hashing
/// its content. Distinct files sharing all four fields are treated as one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub last_modified_ms: Option<i64>,
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.name,
            self.size,
            self.content_type,
            self.last_modified_ms.unwrap_or_default()
        )
    }
}

/// A file ready to be sent to the upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadFile {
    name: String,
    content_type: String,
    last_modified_ms: Option<i64>,
    data: Bytes,
}

impl UploadFile {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            last_modified_ms: None,
            data: data.into(),
        }
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified_ms = Some(last_modified.timestamp_millis());
        self
    }

    /// Read an image from disk, taking its name, content type and
    /// modification time from the filesystem.
    pub async fn from_path(file_path: &str) -> AppResult<Self> {
        InputValidator::validate_file_path(file_path)?;

        let data = tokio::fs::read(file_path).await?;
        let metadata = tokio::fs::metadata(file_path).await?;

        let name = Path::new(file_path)
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let mut file = Self::new(name, content_type_for_path(file_path), data);
        if let Ok(modified) = metadata.modified() {
            file = file.with_last_modified(DateTime::<Utc>::from(modified));
        }

        log::debug!("Loaded {} ({} bytes)", file_path, file.size());
        Ok(file)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn last_modified_ms(&self) -> Option<i64> {
        self.last_modified_ms
    }

    /// Cheap clone of the payload for each attempt.
    pub fn data(&self) -> Bytes {
        self.data.clone()
    }

    pub fn identity(&self) -> FileIdentity {
        FileIdentity {
            name: self.name.clone(),
            size: self.size(),
            content_type: self.content_type.clone(),
            last_modified_ms: self.last_modified_ms,
        }
    }
}

/// Detect MIME type based on file extension
pub fn content_type_for_path(file_path: &str) -> &'static str {
    let extension = Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("avif") => "image/avif",
        _ => "application/octet-stream",
    }
}
