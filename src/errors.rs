use thiserror::Error;

/// Errors surfaced by the upload queue.
///
/// Cloneable so a single outcome can be handed to every caller sharing an
/// in-flight upload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Upload cancelled")]
    Cancelled,

    #[error("Upload rejected with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Upload endpoint returned a non-JSON response (content-type: {content_type}). Check the endpoint or proxy configuration.")]
    UnexpectedContentType { content_type: String },

    #[error("Upload response did not contain a url")]
    MissingUrl,

    #[error("Invalid upload response: {0}")]
    InvalidResponse(String),

    #[error("Upload failed after {retries} retries (last status {status}): {message}")]
    RetriesExhausted {
        retries: u32,
        status: u16,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }

    /// Whether a later, separate `enqueue` of the same file could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::RetriesExhausted { .. } | UploadError::Network(_)
        )
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            UploadError::Http { .. }
                | UploadError::UnexpectedContentType { .. }
                | UploadError::MissingUrl
                | UploadError::InvalidResponse(_)
                | UploadError::Validation { .. }
        )
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid file type: {path}. Only image files are supported.")]
    InvalidFileType { path: String },

    #[error("File too large: {path}. Maximum size is 25MB.")]
    FileTooLarge { path: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

/// Result of a single `enqueue` call.
pub type UploadResult = Result<String, UploadError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn invalid_file_type(path: &str) -> Self {
        Self::InvalidFileType {
            path: path.to_string(),
        }
    }

    pub fn file_too_large(path: &str) -> Self {
        Self::FileTooLarge {
            path: path.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Upload(e) if e.is_cancelled())
    }
}
