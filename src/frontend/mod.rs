//! frontend
//!
//! The HTTP side of the system, built on axum:
//! - `POST /count` stores the uploaded artifact, dispatches a count request
//!   through the `Communicator` and waits for the worker's reply
//! - `GET /file/{file_name}` serves stored artifacts to the workers
//!
//! Artifacts are not access controlled: their names are 256 random bits and
//! they only live for the duration of one request.

pub mod handlers;
pub mod upload;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::info;

use crate::correlation::Communicator;
use crate::utils::AppError;

pub use upload::Upload;

#[derive(Debug, Clone)]
pub struct AppState {
    pub communicator: Arc<Communicator>,
    pub upload_dir: PathBuf,
    pub request_timeout: Duration,
    /// Largest accepted upload; bigger bodies get 413.
    pub max_upload_bytes: usize,
}

pub fn router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    Router::new()
        .route("/count", post(handlers::count))
        .route("/file/:file_name", get(handlers::get_file))
        .layer(upload_limit)
        .with_state(state)
}

/// Bind `addr` and serve the front-end until the listener fails.
pub async fn start_http_server(addr: &str, state: AppState) -> Result<(), AppError> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{addr}");
    serve(listener, state).await
}

/// Serve the front-end on an already bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), AppError> {
    tokio::fs::create_dir_all(&state.upload_dir).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests;
