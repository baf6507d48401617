use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::file::UploadFile;
use super::retry::{classify_response, AttemptFailure, RetryPolicy};
use super::transport::{TransportRequest, UploadTransport};
use crate::errors::{UploadError, UploadResult};

/// Resolved destination and retry budget for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub endpoint: String,
    pub field_name: String,
    pub max_retries: u32,
}

/// Runs the attempt loop for a single file against a transport.
pub struct UploadClient<T> {
    transport: T,
    retry_policy: RetryPolicy,
}

impl<T: UploadTransport> UploadClient<T> {
    pub fn new(transport: T, retry_policy: RetryPolicy) -> Self {
        Self {
            transport,
            retry_policy,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Upload `file`, retrying transient failures. Cancellation interrupts
    /// both the network call and the backoff wait.
    pub async fn upload(
        &self,
        file: UploadFile,
        target: &UploadTarget,
        cancel: &CancellationToken,
    ) -> UploadResult {
        let request = TransportRequest {
            endpoint: target.endpoint.clone(),
            field_name: target.field_name.clone(),
            file,
        };
        let mut retries = 0;

        loop {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                response = self.transport.send(&request) => response?,
            };

            let (status, message, retry_after) = match classify_response(&response) {
                Ok(url) => {
                    log::info!(
                        "Uploaded {} -> {} ({} retries)",
                        request.file.name(),
                        url,
                        retries
                    );
                    return Ok(url);
                }
                Err(AttemptFailure::Fatal(error)) => return Err(error),
                Err(AttemptFailure::Retryable {
                    status,
                    message,
                    retry_after,
                }) => (status, message, retry_after),
            };

            if retries >= target.max_retries {
                return Err(UploadError::RetriesExhausted {
                    retries,
                    status,
                    message,
                });
            }

            let delay = self.retry_policy.delay_for(retries, retry_after);
            log::warn!(
                "Upload attempt {} for {} failed with status {}, retrying in {:?}: {}",
                retries + 1,
                request.file.name(),
                status,
                delay,
                message
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = sleep(delay) => {}
            }

            retries += 1;
        }
    }
}
