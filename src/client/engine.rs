use crate::chunk::ChunkPlan;
use crate::client::error::{ClientError, ClientResult};
use crate::client::source::UploadSource;
use crate::client::transport::UploadTransport;
use crate::client::types::progress_percent;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sends the pending chunks of one session, in increasing index order, one at
/// a time.
pub struct ChunkTransferEngine {
    transport: Arc<dyn UploadTransport>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ChunkTransferEngine {
    pub fn new(transport: Arc<dyn UploadTransport>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            transport,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Upload every index of `plan` missing from `uploaded`.
    ///
    /// `on_progress` receives the overall percentage, already-persisted chunks
    /// included, after each acknowledged chunk. A chunk that keeps failing
    /// aborts the run with `RetriesExhausted`; the session is left open.
    pub async fn run<F>(
        &self,
        session_id: &str,
        source: &UploadSource,
        plan: &ChunkPlan,
        uploaded: &BTreeSet<u32>,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> ClientResult<()>
    where
        F: FnMut(u8) + Send,
    {
        let total = u64::from(plan.chunk_count());
        let pending: Vec<_> = plan.ranges().filter(|r| !uploaded.contains(&r.index)).collect();
        let mut completed = total - pending.len() as u64;

        tracing::debug!(
            upload_id = %session_id,
            pending = pending.len(),
            total_chunks = total,
            "Starting chunk transfer"
        );
        on_progress(progress_percent(completed, total));

        for range in pending {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let data = source.read_range(&range).await?;
            self.send_with_retry(session_id, range.index, data, cancel).await?;

            completed += 1;
            on_progress(progress_percent(completed, total));
        }

        Ok(())
    }

    async fn send_with_retry(
        &self,
        session_id: &str,
        index: u32,
        data: bytes::Bytes,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                result = self.transport.put_chunk(session_id, index, data.clone()) => result,
            };

            match result {
                Ok(()) => {
                    tracing::trace!(upload_id = %session_id, chunk_index = index, attempt, "Chunk acknowledged");
                    return Ok(());
                }
                Err(e) if attempt >= self.max_attempts => {
                    tracing::error!(
                        upload_id = %session_id,
                        chunk_index = index,
                        attempts = attempt,
                        error = %e,
                        "Chunk upload failed, giving up"
                    );
                    return Err(ClientError::RetriesExhausted {
                        index,
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        upload_id = %session_id,
                        chunk_index = index,
                        attempt,
                        error = %e,
                        "Chunk upload failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }
}
