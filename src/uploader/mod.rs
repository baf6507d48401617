// Uploader module - queueing, transport and retry for image uploads
//
// The queue coordinates; the client runs attempts; the transport speaks HTTP.

pub mod file;
pub mod retry;
pub mod transport;
pub mod upload_client;
pub mod upload_queue;

pub use file::{FileIdentity, UploadFile};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, TransportRequest, TransportResponse, UploadTransport};
pub use upload_client::{UploadClient, UploadTarget};
pub use upload_queue::{QueueConfig, QueueSnapshot, UploadOptions, UploadQueue};
