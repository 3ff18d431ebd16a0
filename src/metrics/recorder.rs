//! Upload service metrics
//!
//! Thin wrappers over the `metrics` macros so call sites stay one line and
//! metric names live in one place.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

pub const SESSIONS_OPENED: &str = "chunkshare_sessions_opened_total";
pub const CHUNKS_RECEIVED: &str = "chunkshare_chunks_received_total";
pub const BYTES_RECEIVED: &str = "chunkshare_bytes_received_total";
pub const UPLOADS_COMPLETED: &str = "chunkshare_uploads_completed_total";
pub const UPLOADS_CANCELLED: &str = "chunkshare_uploads_cancelled_total";
pub const SESSIONS_EXPIRED: &str = "chunkshare_sessions_expired_total";
pub const OPEN_SESSIONS: &str = "chunkshare_open_sessions";
pub const CHUNK_WRITE_SECONDS: &str = "chunkshare_chunk_write_duration_seconds";

/// Register descriptions for every upload metric. Safe to call repeatedly.
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    describe_counter!(SESSIONS_OPENED, "Chunked upload sessions opened");
    describe_counter!(CHUNKS_RECEIVED, "Chunks written to staging files");
    describe_counter!(BYTES_RECEIVED, "Bytes accepted by chunk and single-shot uploads");
    describe_counter!(
        UPLOADS_COMPLETED,
        "Uploads finalized, labelled by mode (chunked or single)"
    );
    describe_counter!(UPLOADS_CANCELLED, "Chunked sessions cancelled by clients");
    describe_counter!(SESSIONS_EXPIRED, "Open sessions reaped by expiry cleanup");
    describe_gauge!(OPEN_SESSIONS, "Chunked sessions currently open");
    describe_histogram!(CHUNK_WRITE_SECONDS, "Time to persist one chunk");
}

pub fn record_session_opened() {
    counter!(SESSIONS_OPENED).increment(1);
    gauge!(OPEN_SESSIONS).increment(1.0);
}

pub fn record_chunk_received(bytes: usize) {
    counter!(CHUNKS_RECEIVED).increment(1);
    counter!(BYTES_RECEIVED).increment(bytes as u64);
}

pub fn record_chunk_duration(duration: Duration) {
    histogram!(CHUNK_WRITE_SECONDS).record(duration.as_secs_f64());
}

pub fn record_upload_completed(mode: &'static str) {
    counter!(UPLOADS_COMPLETED, "mode" => mode).increment(1);
    if mode == "chunked" {
        gauge!(OPEN_SESSIONS).decrement(1.0);
    }
}

pub fn record_single_upload(bytes: usize) {
    counter!(BYTES_RECEIVED).increment(bytes as u64);
    record_upload_completed("single");
}

pub fn record_upload_cancelled() {
    counter!(UPLOADS_CANCELLED).increment(1);
    gauge!(OPEN_SESSIONS).decrement(1.0);
}

pub fn record_sessions_expired(count: u64) {
    if count == 0 {
        return;
    }
    counter!(SESSIONS_EXPIRED).increment(count);
    gauge!(OPEN_SESSIONS).decrement(count as f64);
}

/// Resynchronize the open-session gauge with the store, e.g. after a restart.
pub fn set_open_sessions(count: u64) {
    gauge!(OPEN_SESSIONS).set(count as f64);
}

/// Times a chunk write and records it on `stop`.
pub struct ChunkTimer {
    start_time: Instant,
}

impl ChunkTimer {
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn stop(self) {
        record_chunk_duration(self.start_time.elapsed());
    }
}
