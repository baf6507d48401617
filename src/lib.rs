//! Client-side image upload queue.
//!
//! [`UploadQueue`] bounds how many uploads run at once, coalesces concurrent
//! uploads of the same file, serves repeats within a short window from a
//! cache of recent successes, and retries transient server failures with
//! exponential backoff that honours `Retry-After`.

pub mod config;
pub mod errors;
pub mod security;
pub mod uploader;

pub use errors::{AppError, AppResult, UploadError, UploadResult};
pub use uploader::{
    FileIdentity, HttpTransport, QueueConfig, QueueSnapshot, RetryPolicy, UploadFile,
    UploadOptions, UploadQueue, UploadTransport,
};
