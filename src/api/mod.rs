mod error;
mod rest;
mod sse;
pub mod types;

pub use error::{status_for_code, ApiError, ApiResult};
pub use rest::RestApi;
pub use sse::events_handler;
pub use types::*;

use crate::session::UploadManager;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the complete upload API: REST routes plus the event stream.
pub fn create_api_server(manager: Arc<UploadManager>) -> Router {
    let rest_api = RestApi::new(manager.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let events_router = Router::new()
        .route("/api/events", get(events_handler))
        .with_state(manager);

    Router::new()
        .merge(rest_api.router())
        .merge(events_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
