use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderName, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{multipart, Client, Url};
use std::time::Duration;

use super::file::UploadFile;
use crate::errors::UploadError;
use crate::security::InputValidator;

/// One multipart POST of a single file.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub endpoint: String,
    pub field_name: String,
    pub file: UploadFile,
}

/// The parts of an HTTP response the retry logic cares about.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub retry_after: Option<String>,
    pub body: Bytes,
}

/// Sends a single upload attempt. Returning `Err` means no status was
/// received (connection refused, DNS failure, timeout).
#[async_trait]
pub trait UploadTransport: Send + Sync + 'static {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, UploadError>;

    /// Reject an endpoint this transport could never reach, before any
    /// attempt is made.
    fn check_endpoint(&self, _endpoint: &str) -> Result<(), UploadError> {
        Ok(())
    }
}

/// reqwest-backed transport posting `multipart/form-data`.
pub struct HttpTransport {
    client: Client,
    base_url: Option<Url>,
}

impl HttpTransport {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self, UploadError> {
        let base_url = base_url
            .map(|url| {
                Url::parse(url)
                    .map_err(|e| UploadError::validation("base_url", &e.to_string()))
            })
            .transpose()?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    /// Absolute endpoints are used as-is; paths are joined onto the base URL.
    pub fn resolve(&self, endpoint: &str) -> Result<Url, UploadError> {
        if let Ok(url) = Url::parse(endpoint) {
            return Ok(url);
        }

        let base = self.base_url.as_ref().ok_or_else(|| {
            UploadError::validation(
                "endpoint",
                "Relative endpoint requires a base_url to be configured",
            )
        })?;

        base.join(endpoint)
            .map_err(|e| UploadError::validation("endpoint", &e.to_string()))
    }

    fn build_form(request: &TransportRequest) -> Result<multipart::Form, UploadError> {
        let file = &request.file;
        let part = multipart::Part::stream_with_length(file.data(), file.size())
            .file_name(InputValidator::sanitize_filename(file.name()))
            .mime_str(file.content_type())
            .map_err(|e| UploadError::validation("content_type", &e.to_string()))?;

        Ok(multipart::Form::new().part(request.field_name.clone(), part))
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, UploadError> {
        let url = self.resolve(&request.endpoint)?;
        let form = Self::build_form(request)?;

        log::debug!("POST {} ({} bytes)", url, request.file.size());

        let response = self.client.post(url).multipart(form).send().await?;

        let status = response.status().as_u16();
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let retry_after = header(RETRY_AFTER);
        let body = response.bytes().await?;

        Ok(TransportResponse {
            status,
            content_type,
            retry_after,
            body,
        })
    }

    fn check_endpoint(&self, endpoint: &str) -> Result<(), UploadError> {
        self.resolve(endpoint).map(|_| ())
    }
}
