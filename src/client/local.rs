use crate::api::status_for_code;
use crate::client::error::{TransportError, TransportResult};
use crate::client::transport::{ByteProgress, UploadTransport};
use crate::session::{InitOutcome, SessionError, SessionStatusInfo, UploadManager};
use crate::storage::SavedFile;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Calls an `UploadManager` in the same process.
#[derive(Clone)]
pub struct LocalTransport {
    manager: Arc<UploadManager>,
}

impl LocalTransport {
    pub fn new(manager: Arc<UploadManager>) -> Self {
        Self { manager }
    }
}

impl From<SessionError> for TransportError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnknownSession(id) => TransportError::UnknownSession(id),
            other => {
                let code = other.code();
                TransportError::Rejected {
                    status: status_for_code(code).as_u16(),
                    code: code.to_string(),
                    message: other.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl UploadTransport for LocalTransport {
    async fn init(
        &self,
        filename: &str,
        directory: &str,
        total_size: u64,
        chunk_size: u64,
    ) -> TransportResult<InitOutcome> {
        Ok(self
            .manager
            .init(filename, directory, total_size, chunk_size)
            .await?)
    }

    async fn put_chunk(&self, session_id: &str, index: u32, data: Bytes) -> TransportResult<()> {
        Ok(self.manager.put_chunk(session_id, index, &data).await?)
    }

    async fn status(&self, session_id: &str) -> TransportResult<SessionStatusInfo> {
        Ok(self.manager.status(session_id).await?)
    }

    async fn complete(&self, session_id: &str) -> TransportResult<SavedFile> {
        Ok(self.manager.complete(session_id).await?)
    }

    async fn cancel(&self, session_id: &str) -> TransportResult<()> {
        Ok(self.manager.cancel(session_id).await?)
    }

    async fn upload_whole(
        &self,
        filename: &str,
        directory: &str,
        data: Bytes,
        progress: ByteProgress,
    ) -> TransportResult<SavedFile> {
        let total = data.len() as u64;
        progress(0, total);
        let saved = self.manager.save_whole(filename, directory, &data).await?;
        progress(total, total);
        Ok(saved)
    }
}
