use crate::client::error::TransportResult;
use crate::session::{InitOutcome, SessionStatusInfo};
use crate::storage::SavedFile;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Called with `(bytes_sent, total_bytes)` while a single-shot body is sent.
pub type ByteProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// The upload API as seen by a client.
///
/// Dropping a returned future aborts the request.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn init(
        &self,
        filename: &str,
        directory: &str,
        total_size: u64,
        chunk_size: u64,
    ) -> TransportResult<InitOutcome>;

    async fn put_chunk(&self, session_id: &str, index: u32, data: Bytes) -> TransportResult<()>;

    async fn status(&self, session_id: &str) -> TransportResult<SessionStatusInfo>;

    async fn complete(&self, session_id: &str) -> TransportResult<SavedFile>;

    async fn cancel(&self, session_id: &str) -> TransportResult<()>;

    async fn upload_whole(
        &self,
        filename: &str,
        directory: &str,
        data: Bytes,
        progress: ByteProgress,
    ) -> TransportResult<SavedFile>;
}
