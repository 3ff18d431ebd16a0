mod common;

use chunkshare::chunk::ChunkPlan;
use chunkshare::client::{
    ChunkTransferEngine, ClientError, MemoryResumeStore, ResumeDecision, ResumeKey,
    ResumeLocator, ResumeRecord, ResumeStore, TaskStatus, TransportError, UploadMode,
    UploadOrchestrator, UploadPolicy, UploadSource, UploadTransport,
};
use chunkshare::config::StorageConfig;
use common::{create_manager, sample, RecordingTransport};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CHUNK: u64 = 1024;

fn chunked_policy() -> UploadPolicy {
    UploadPolicy {
        chunk_size: CHUNK,
        chunked_threshold: 2048,
        max_attempts: 3,
        retry_delay_ms: 5,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_chunked_upload_end_to_end() {
    let (manager, temp_dir) = create_manager(StorageConfig::default()).await;
    let transport = Arc::new(RecordingTransport::new(manager.clone()));
    let store = Arc::new(MemoryResumeStore::new());
    let orchestrator = UploadOrchestrator::new(transport.clone(), store.clone(), chunked_policy());

    let data = sample(4500);
    let id = orchestrator.submit(UploadSource::from_bytes("big.bin", data.clone()), "public");
    let task = orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
    assert_eq!(task.mode, UploadMode::Chunked);
    assert_eq!(task.progress, 100);
    assert!(task.session_id.is_some());
    assert_eq!(transport.puts(), vec![0, 1, 2, 3, 4]);

    let saved = task.saved.unwrap();
    assert_eq!(saved.size, 4500);
    let stored = tokio::fs::read(temp_dir.path().join(&saved.path)).await.unwrap();
    assert_eq!(stored, data);
    assert_eq!(saved.checksum, blake3::hash(&data).to_hex().to_string());

    assert!(store.is_empty(), "resume record must be removed after completion");
}

#[tokio::test]
async fn test_resume_sends_only_missing_chunks() {
    let (manager, temp_dir) = create_manager(StorageConfig::default()).await;
    let transport = Arc::new(RecordingTransport::new(manager.clone()));
    let store = Arc::new(MemoryResumeStore::new());
    let data = sample(5 * CHUNK as usize);

    // An earlier run got chunks 0 and 3 through before stopping.
    let init = transport.init("resume.bin", "public", data.len() as u64, CHUNK).await.unwrap();
    for index in [0usize, 3] {
        let start = index * CHUNK as usize;
        manager
            .put_chunk(&init.upload_id, index as u32, &data[start..start + CHUNK as usize])
            .await
            .unwrap();
    }
    let key = ResumeKey::new("resume.bin", data.len() as u64, "public");
    store.put(&key, ResumeRecord::new(&init.upload_id)).await.unwrap();

    let orchestrator = UploadOrchestrator::new(transport.clone(), store.clone(), chunked_policy());
    let id = orchestrator.submit(UploadSource::from_bytes("resume.bin", data.clone()), "public");
    let task = orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
    assert_eq!(task.session_id.as_deref(), Some(init.upload_id.as_str()));
    assert_eq!(transport.init_calls(), 1);
    assert_eq!(transport.puts(), vec![1, 2, 4]);

    let stored = tokio::fs::read(temp_dir.path().join(&task.saved.unwrap().path)).await.unwrap();
    assert_eq!(stored, data);
}

#[tokio::test]
async fn test_retries_exhausted_then_resumed() {
    let (manager, temp_dir) = create_manager(StorageConfig::default()).await;
    let transport = Arc::new(RecordingTransport::new(manager.clone()));
    let store = Arc::new(MemoryResumeStore::new());
    let data = sample(4 * CHUNK as usize);
    transport.fail_chunk(2, u32::MAX);

    let orchestrator = UploadOrchestrator::new(transport.clone(), store.clone(), chunked_policy());
    let id = orchestrator.submit(UploadSource::from_bytes("flaky.bin", data.clone()), "public");
    let failed = orchestrator.wait(id).await.unwrap();

    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.as_deref().unwrap_or_default().contains("3 attempts"));
    assert_eq!(transport.puts(), vec![0, 1, 2, 2, 2]);
    assert_eq!(store.len(), 1, "failed upload keeps its resume record");
    let session_id = failed.session_id.clone().unwrap();

    // The session is still open on the server with chunks 0 and 1.
    let status = manager.status(&session_id).await.unwrap();
    assert_eq!(status.uploaded_chunks, vec![0, 1]);

    transport.heal();
    let id = orchestrator.submit(UploadSource::from_bytes("flaky.bin", data.clone()), "public");
    let task = orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
    assert_eq!(task.session_id, Some(session_id));
    assert_eq!(transport.init_calls(), 1);
    assert_eq!(&transport.puts()[5..], &[2, 3]);

    let stored = tokio::fs::read(temp_dir.path().join(&task.saved.unwrap().path)).await.unwrap();
    assert_eq!(stored, data);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_task_completes_only_after_server_confirms() {
    let (manager, _dir) = create_manager(StorageConfig::default()).await;
    let transport = Arc::new(RecordingTransport::new(manager.clone()));
    let store = Arc::new(MemoryResumeStore::new());
    transport.drop_chunk(1);

    let orchestrator = UploadOrchestrator::new(transport.clone(), store.clone(), chunked_policy());
    let data = sample(3 * CHUNK as usize);
    let id = orchestrator.submit(UploadSource::from_bytes("lost.bin", data.clone()), "public");
    let task = orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.saved.is_none());
    assert!(task.error.as_deref().unwrap_or_default().contains("INCOMPLETE_UPLOAD"));
    assert_eq!(transport.puts(), vec![0, 1, 2]);

    let key = ResumeKey::new("lost.bin", data.len() as u64, "public");
    let record = store.get(&key).await.unwrap().expect("resume record kept");
    assert_eq!(Some(record.session_id.clone()), task.session_id);

    let status = manager.status(&record.session_id).await.unwrap();
    assert_eq!(status.uploaded_chunks, vec![0, 2]);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let (manager, _dir) = create_manager(StorageConfig::default()).await;
    let transport = Arc::new(RecordingTransport::new(manager));
    transport.fail_chunk(1, 2);

    let orchestrator = UploadOrchestrator::new(
        transport.clone(),
        Arc::new(MemoryResumeStore::new()),
        chunked_policy(),
    );
    let id = orchestrator.submit(UploadSource::from_bytes("t.bin", sample(3000)), "public");
    let task = orchestrator.wait(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
    assert_eq!(transport.puts(), vec![0, 1, 1, 1, 2]);
}

#[tokio::test]
async fn test_cancel_stops_further_chunks() {
    let (manager, _dir) = create_manager(StorageConfig::default()).await;
    let transport = Arc::new(RecordingTransport::new(manager.clone()));
    let store = Arc::new(MemoryResumeStore::new());
    let gate = transport.gate_on(1);

    let orchestrator = UploadOrchestrator::new(transport.clone(), store.clone(), chunked_policy());
    let id = orchestrator.submit(UploadSource::from_bytes("c.bin", sample(6000)), "public");

    gate.reached.notified().await;
    orchestrator.cancel(id).unwrap();
    gate.release.notify_one();

    let task = orchestrator.wait(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(transport.puts().iter().all(|&i| i <= 1), "{:?}", transport.puts());

    let session_id = task.session_id.unwrap();
    assert_eq!(transport.cancels(), vec![session_id.clone()]);
    assert!(manager.status(&session_id).await.is_err());
    assert!(store.is_empty());

    // Cancelling a finished task is a no-op.
    orchestrator.cancel(id).unwrap();
    assert_eq!(orchestrator.get(id).unwrap().status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_during_resume_lookup() {
    let (manager, _dir) = create_manager(StorageConfig::default()).await;
    let transport = Arc::new(RecordingTransport::new(manager.clone()));
    let store = Arc::new(MemoryResumeStore::new());
    let data = sample(3 * CHUNK as usize);

    let init = transport.init("slow.bin", "public", data.len() as u64, CHUNK).await.unwrap();
    let key = ResumeKey::new("slow.bin", data.len() as u64, "public");
    store.put(&key, ResumeRecord::new(&init.upload_id)).await.unwrap();
    let gate = transport.gate_status();

    let orchestrator = UploadOrchestrator::new(transport.clone(), store.clone(), chunked_policy());
    let id = orchestrator.submit(UploadSource::from_bytes("slow.bin", data), "public");

    gate.reached.notified().await;
    orchestrator.cancel(id).unwrap();

    // The status response never arrives; cancel must not wait for it.
    let task = tokio::time::timeout(Duration::from_secs(5), orchestrator.wait(id))
        .await
        .expect("cancel interrupted the resume lookup")
        .unwrap();

    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.session_id.is_none());
    assert_eq!(transport.init_calls(), 1);
    assert!(transport.puts().is_empty());
}

#[tokio::test]
async fn test_engine_progress_is_monotonic() {
    let (manager, _dir) = create_manager(StorageConfig::default()).await;
    let transport: Arc<dyn UploadTransport> = Arc::new(RecordingTransport::new(manager));
    let data = sample(7 * CHUNK as usize - 10);
    let plan = ChunkPlan::new(data.len() as u64, CHUNK).unwrap();
    let init = transport.init("p.bin", "public", plan.total_size(), CHUNK).await.unwrap();

    let engine = ChunkTransferEngine::new(transport.clone(), 2, Duration::from_millis(1));
    let mut seen = Vec::new();
    engine
        .run(
            &init.upload_id,
            &UploadSource::from_bytes("p.bin", data),
            &plan,
            &BTreeSet::new(),
            &CancellationToken::new(),
            |p| seen.push(p),
        )
        .await
        .unwrap();

    assert_eq!(seen.first(), Some(&0));
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.len(), 8);
}

#[tokio::test]
async fn test_threshold_routing() {
    let (manager, _dir) = create_manager(StorageConfig::default()).await;
    let transport = Arc::new(RecordingTransport::new(manager));
    let policy = chunked_policy();
    let orchestrator = UploadOrchestrator::new(
        transport.clone(),
        Arc::new(MemoryResumeStore::new()),
        policy.clone(),
    );

    let at = orchestrator.submit(
        UploadSource::from_bytes("at.bin", sample(policy.chunked_threshold as usize)),
        "public",
    );
    let task = orchestrator.wait(at).await.unwrap();
    assert_eq!(task.mode, UploadMode::Single);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert_eq!((transport.whole_calls(), transport.init_calls()), (1, 0));

    let above = orchestrator.submit(
        UploadSource::from_bytes("above.bin", sample(policy.chunked_threshold as usize + 1)),
        "public",
    );
    let task = orchestrator.wait(above).await.unwrap();
    assert_eq!(task.mode, UploadMode::Chunked);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!((transport.whole_calls(), transport.init_calls()), (1, 1));
}

#[tokio::test]
async fn test_rejected_destination_fails_task() {
    let (manager, _dir) = create_manager(StorageConfig::default()).await;
    let transport = Arc::new(RecordingTransport::new(manager));
    let orchestrator = UploadOrchestrator::new(
        transport.clone(),
        Arc::new(MemoryResumeStore::new()),
        chunked_policy(),
    );

    let small = orchestrator.submit(UploadSource::from_bytes("a.txt", sample(10)), "archive");
    let big = orchestrator.submit(UploadSource::from_bytes("b.bin", sample(5000)), "archive");

    for id in [small, big] {
        let task = orchestrator.wait(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("INVALID_DESTINATION"));
    }
    assert!(transport.puts().is_empty());
}

#[tokio::test]
async fn test_clear_finished_and_shutdown() {
    let (manager, _dir) = create_manager(StorageConfig::default()).await;
    let transport = Arc::new(RecordingTransport::new(manager));
    let gate = transport.gate_on(0);
    let orchestrator = UploadOrchestrator::new(
        transport.clone(),
        Arc::new(MemoryResumeStore::new()),
        chunked_policy(),
    );
    let mut notes = orchestrator.subscribe();

    let done = orchestrator.submit(UploadSource::from_bytes("done.txt", sample(100)), "public");
    orchestrator.wait(done).await.unwrap();

    let pending = orchestrator.submit(UploadSource::from_bytes("slow.bin", sample(5000)), "public");
    gate.reached.notified().await;

    assert_eq!(orchestrator.list().len(), 2);
    assert_eq!(orchestrator.clear_finished(), 1);
    assert_eq!(orchestrator.list()[0].id, pending);

    orchestrator.shutdown().await;
    assert!(orchestrator.list().is_empty());
    assert!(matches!(
        orchestrator.cancel(pending),
        Err(ClientError::TaskNotFound(_))
    ));

    let mut messages = Vec::new();
    while let Ok(note) = notes.try_recv() {
        messages.push(note.message);
    }
    assert!(messages.iter().any(|m| m.contains("done.txt uploaded")));
    assert!(messages.iter().any(|m| m.contains("slow.bin cancelled")));
}

#[tokio::test]
async fn test_locator_discards_unusable_records() {
    let (manager, _dir) = create_manager(StorageConfig::default()).await;
    let transport: Arc<dyn UploadTransport> = Arc::new(RecordingTransport::new(manager.clone()));
    let store = Arc::new(MemoryResumeStore::new());
    let locator = ResumeLocator::new(transport.clone(), store.clone(), Duration::from_secs(3600));
    let plan = ChunkPlan::new(3000, CHUNK).unwrap();
    let key = ResumeKey::new("r.bin", 3000, "public");

    // Nothing recorded.
    assert_eq!(locator.locate(&key, &plan).await, ResumeDecision::Fresh);

    // Session the server no longer knows.
    store.put(&key, ResumeRecord::new("no-such-session")).await.unwrap();
    assert_eq!(locator.locate(&key, &plan).await, ResumeDecision::Fresh);
    assert!(store.is_empty());

    // Record older than the resume window.
    let init = transport.init("r.bin", "public", 3000, CHUNK).await.unwrap();
    let stale = ResumeRecord {
        session_id: init.upload_id.clone(),
        created_at: chrono::Utc::now().timestamp_millis() - 7_200_000,
    };
    store.put(&key, stale).await.unwrap();
    assert_eq!(locator.locate(&key, &plan).await, ResumeDecision::Fresh);
    assert!(store.is_empty());

    // Same file, different chunk layout.
    store.put(&key, ResumeRecord::new(&init.upload_id)).await.unwrap();
    let other_plan = ChunkPlan::new(3000, 512).unwrap();
    assert_eq!(locator.locate(&key, &other_plan).await, ResumeDecision::Fresh);
    assert!(store.is_empty());

    // A usable record.
    manager.put_chunk(&init.upload_id, 1, &sample(1024)).await.unwrap();
    store.put(&key, ResumeRecord::new(&init.upload_id)).await.unwrap();
    assert_eq!(
        locator.locate(&key, &plan).await,
        ResumeDecision::Resume {
            session_id: init.upload_id.clone(),
            uploaded: BTreeSet::from([1]),
        }
    );
}

#[tokio::test]
async fn test_unknown_session_maps_to_transport_error() {
    let (manager, _dir) = create_manager(StorageConfig::default()).await;
    let transport = RecordingTransport::new(manager);

    let err = transport.status("missing").await.unwrap_err();
    assert_eq!(err, TransportError::UnknownSession("missing".into()));
    assert_eq!(err.code(), Some("UNKNOWN_SESSION"));

    let err = transport.init("x", "public", 0, CHUNK).await.unwrap_err();
    assert!(matches!(err, TransportError::Rejected { status: 400, .. }));
}
