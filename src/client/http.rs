use crate::api::types::*;
use crate::client::error::{TransportError, TransportResult};
use crate::client::transport::{ByteProgress, UploadTransport};
use crate::session::{InitOutcome, SessionStatusInfo};
use crate::storage::SavedFile;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Single-shot bodies are streamed in pieces of this size so progress can be
/// reported while the request is in flight.
const PROGRESS_PIECE: usize = 256 * 1024;

/// Talks to a chunkshare server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> TransportResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn init(
        &self,
        filename: &str,
        directory: &str,
        total_size: u64,
        chunk_size: u64,
    ) -> TransportResult<InitOutcome> {
        let request = InitUploadRequest {
            filename: filename.to_string(),
            directory: directory.to_string(),
            file_size: to_wire(total_size)?,
            chunk_size: to_wire(chunk_size)?,
        };

        let response = self
            .client
            .post(self.url("/files/chunk/init"))
            .json(&request)
            .send()
            .await?;
        let body: InitUploadResponse = decode(response, None).await?;

        Ok(InitOutcome {
            upload_id: body.upload_id,
            total_chunks: body.total_chunks,
            chunk_size: body.chunk_size,
        })
    }

    async fn put_chunk(&self, session_id: &str, index: u32, data: Bytes) -> TransportResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/files/chunk/upload/{session_id}")))
            .query(&[("chunk_index", index)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        let body: ChunkUploadResponse = decode(response, Some(session_id)).await?;

        if body.chunk_index != index {
            return Err(TransportError::InvalidResponse(format!(
                "server acknowledged chunk {} instead of {index}",
                body.chunk_index
            )));
        }
        Ok(())
    }

    async fn status(&self, session_id: &str) -> TransportResult<SessionStatusInfo> {
        let response = self
            .client
            .get(self.url(&format!("/files/chunk/status/{session_id}")))
            .send()
            .await?;
        let body: UploadStatusResponse = decode(response, Some(session_id)).await?;

        Ok(SessionStatusInfo {
            upload_id: body.upload_id,
            filename: body.filename,
            directory: body.directory,
            total_size: body.file_size,
            chunk_size: body.chunk_size,
            total_chunks: body.total_chunks,
            uploaded_chunks: body.uploaded_chunks,
            uploaded_size: body.uploaded_size,
            created_at: body.created_at,
            updated_at: body.updated_at,
        })
    }

    async fn complete(&self, session_id: &str) -> TransportResult<SavedFile> {
        let response = self
            .client
            .post(self.url(&format!("/files/chunk/complete/{session_id}")))
            .send()
            .await?;
        let body: CompleteUploadResponse = decode(response, Some(session_id)).await?;

        Ok(SavedFile {
            filename: body.filename,
            path: body.path,
            size: body.size,
            checksum: body.checksum,
        })
    }

    async fn cancel(&self, session_id: &str) -> TransportResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/files/chunk/cancel/{session_id}")))
            .send()
            .await?;
        let _: SuccessResponse = decode(response, Some(session_id)).await?;
        Ok(())
    }

    async fn upload_whole(
        &self,
        filename: &str,
        directory: &str,
        data: Bytes,
        progress: ByteProgress,
    ) -> TransportResult<SavedFile> {
        let total = data.len() as u64;
        let pieces: Vec<Bytes> = (0..data.len())
            .step_by(PROGRESS_PIECE)
            .map(|start| data.slice(start..std::cmp::min(start + PROGRESS_PIECE, data.len())))
            .collect();

        progress(0, total);
        let mut sent = 0u64;
        let body = futures::stream::iter(pieces).map(move |piece| {
            sent += piece.len() as u64;
            progress(sent, total);
            Ok::<_, std::io::Error>(piece)
        });

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
            .file_name(filename.to_string());
        let form = Form::new()
            .part("file", part)
            .text("directory", directory.to_string());

        let response = self
            .client
            .post(self.url("/files/upload"))
            .multipart(form)
            .send()
            .await?;
        let body: UploadResponse = decode(response, None).await?;

        Ok(SavedFile {
            filename: body.filename,
            path: body.path,
            size: body.size,
            checksum: body.checksum,
        })
    }
}

fn to_wire(value: u64) -> TransportResult<i64> {
    i64::try_from(value).map_err(|_| TransportError::Rejected {
        status: 400,
        code: "INVALID_SIZE".to_string(),
        message: format!("size {value} does not fit the wire format"),
    })
}

/// Parse a success body, or turn an error body into a `TransportError`.
/// `UnknownSession` carries the session id, as it does for in-process calls.
async fn decode<T: DeserializeOwned>(
    response: Response,
    session_id: Option<&str>,
) -> TransportResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()));
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(err) if err.code == "UNKNOWN_SESSION" => Err(TransportError::UnknownSession(
            session_id.map(str::to_string).unwrap_or(err.error),
        )),
        Ok(err) => Err(TransportError::Rejected {
            status: status.as_u16(),
            code: err.code,
            message: err.error,
        }),
        Err(_) => Err(TransportError::Rejected {
            status: status.as_u16(),
            code: format!("HTTP_{}", status.as_u16()),
            message: if text.is_empty() {
                status.to_string()
            } else {
                text
            },
        }),
    }
}
