use crate::session::UploadManager;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Server-sent events: a `connected` greeting, then every broadcast event.
pub async fn events_handler(
    State(manager): State<Arc<UploadManager>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = manager.events().subscribe();
    tracing::debug!(subscribers = manager.events().subscriber_count(), "Event stream opened");

    let greeting = stream::once(async {
        Ok::<_, Infallible>(Event::default().data(r#"{"message":"connected"}"#))
    });

    let updates = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.data_json() {
                    Ok(data) => {
                        let sse = Event::default().event(event.name()).data(data);
                        return Some((Ok(sse), rx));
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(greeting.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
