use anyhow::Context;
use chunkshare::client::{
    HttpTransport, JsonFileResumeStore, NotificationLevel, TaskStatus, UploadOrchestrator,
    UploadPolicy, UploadSource,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chunkshare-upload", about = "Upload files to a chunkshare server")]
struct Args {
    /// Server base URL.
    #[arg(short, long, env = "CHUNKSHARE_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Destination directory on the server, e.g. `public/photos`.
    #[arg(short, long)]
    destination: String,

    /// Chunk size in bytes for chunked uploads.
    #[arg(long, default_value_t = UploadPolicy::default().chunk_size)]
    chunk_size: u64,

    /// Files strictly larger than this many bytes are uploaded in chunks.
    #[arg(long, default_value_t = UploadPolicy::default().chunked_threshold)]
    threshold: u64,

    /// Attempts per chunk, first one included.
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    /// Where resume records are kept between runs.
    #[arg(long, env = "CHUNKSHARE_RESUME_FILE", default_value = ".chunkshare-resume.json")]
    resume_file: PathBuf,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let transport = HttpTransport::new(&args.server, Duration::from_secs(args.timeout))
        .context("building HTTP client")?;
    let policy = UploadPolicy {
        chunk_size: args.chunk_size,
        chunked_threshold: args.threshold,
        max_attempts: args.attempts,
        ..Default::default()
    };
    let orchestrator = UploadOrchestrator::new(
        Arc::new(transport),
        Arc::new(JsonFileResumeStore::new(&args.resume_file)),
        policy,
    );

    let mut notifications = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(note) = notifications.recv().await {
            let tag = match note.level {
                NotificationLevel::Info => "..",
                NotificationLevel::Success => "ok",
                NotificationLevel::Warning => "!!",
                NotificationLevel::Error => "xx",
            };
            println!("[{tag}] {}: {}", note.task_id, note.message);
        }
    });

    let mut ids = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let source = UploadSource::from_path(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        ids.push(orchestrator.submit(source, &args.destination));
    }

    let waiting = async {
        let mut tasks = Vec::with_capacity(ids.len());
        for id in &ids {
            tasks.push(orchestrator.wait(*id).await?);
        }
        anyhow::Ok(tasks)
    };

    let tasks = tokio::select! {
        tasks = waiting => tasks?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, cancelling uploads");
            orchestrator.shutdown().await;
            printer.abort();
            std::process::exit(130);
        }
    };
    printer.abort();

    let mut failed = 0;
    for task in &tasks {
        match (&task.status, &task.saved) {
            (TaskStatus::Completed, Some(saved)) => {
                println!("{} -> {} ({} bytes, blake3 {})", task.filename, saved.path, saved.size, saved.checksum);
            }
            (status, _) => {
                failed += 1;
                println!(
                    "{} {}: {}",
                    task.filename,
                    status.label(),
                    task.error.as_deref().unwrap_or("no details")
                );
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} uploads did not complete", tasks.len());
    }
    Ok(())
}
