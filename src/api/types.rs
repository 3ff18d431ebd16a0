//! Wire types of the HTTP upload API, shared by the server and the HTTP client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitUploadRequest {
    pub filename: String,
    pub directory: String,
    /// Signed so that non-positive sizes reach validation instead of failing
    /// to parse.
    pub file_size: i64,
    pub chunk_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitUploadResponse {
    pub success: bool,
    pub upload_id: String,
    pub total_chunks: u32,
    pub chunk_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkQuery {
    pub chunk_index: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub chunk_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub success: bool,
    pub upload_id: String,
    pub filename: String,
    pub directory: String,
    pub total_chunks: u32,
    pub uploaded_chunks: Vec<u32>,
    pub file_size: u64,
    pub chunk_size: u64,
    pub uploaded_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub success: bool,
    pub message: String,
    pub path: String,
    pub filename: String,
    pub size: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub size: u64,
    pub path: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
