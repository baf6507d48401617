use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::errors::{AppError, AppResult, UploadError};

/// Largest file the upload backend accepts.
pub const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid filename pattern"));

static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-\[\]\.]+$").expect("valid field name pattern"));

pub struct InputValidator;

impl InputValidator {
    pub fn validate_file_path(path: &str) -> AppResult<()> {
        if path.trim().is_empty() {
            return Err(AppError::validation("file_path", "File path cannot be empty"));
        }

        let path_obj = Path::new(path);

        // Check for path traversal attempts
        if path.contains("..") || path.contains('~') {
            return Err(AppError::validation("file_path", "Invalid file path detected"));
        }

        if let Some(extension) = path_obj.extension() {
            let ext = extension.to_string_lossy().to_lowercase();
            if !matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp" | "avif") {
                return Err(AppError::invalid_file_type(path));
            }
        } else {
            return Err(AppError::validation("file_path", "File must have an extension"));
        }

        if !path_obj.exists() {
            return Err(AppError::file_not_found(path));
        }

        if !path_obj.is_file() {
            return Err(AppError::validation("file_path", "Path is not a file"));
        }

        let metadata = std::fs::metadata(path_obj)?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(AppError::file_too_large(path));
        }

        Ok(())
    }

    /// Endpoints are either absolute http(s) URLs or paths rooted at `/`.
    pub fn validate_endpoint(endpoint: &str) -> Result<(), UploadError> {
        let trimmed = endpoint.trim();

        if trimmed.is_empty() {
            return Err(UploadError::validation("endpoint", "Endpoint cannot be empty"));
        }

        if trimmed.starts_with('/')
            || trimmed.starts_with("http://")
            || trimmed.starts_with("https://")
        {
            Ok(())
        } else {
            Err(UploadError::validation(
                "endpoint",
                "Endpoint must be an absolute URL or start with '/'",
            ))
        }
    }

    pub fn validate_field_name(field_name: &str) -> Result<(), UploadError> {
        if field_name.is_empty() {
            return Err(UploadError::validation("field_name", "Field name cannot be empty"));
        }

        if field_name.len() > 100 {
            return Err(UploadError::validation(
                "field_name",
                "Field name too long (max 100 characters)",
            ));
        }

        if !FIELD_NAME.is_match(field_name) {
            return Err(UploadError::validation(
                "field_name",
                "Field name contains invalid characters",
            ));
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized = UNSAFE_FILENAME_CHARS.replace_all(filename.trim(), "_");

        if sanitized.chars().count() > 255 {
            let truncated: String = sanitized.chars().take(252).collect();
            format!("{}...", truncated)
        } else {
            sanitized.to_string()
        }
    }
}
