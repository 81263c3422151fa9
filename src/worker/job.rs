//! Units of work
//!
//! A worker applies a `UnitOfWork` to the `message` of every request envelope
//! it takes from the request stream. `WordCountJob` is the one this system
//! runs: fetch the uploaded artifact from the front-end, turn it into text and
//! count the words of the requested length. Plain text and PDF are understood;
//! anything else is an unsupported format.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::correlation::{CountRequest, CountResult};

/// Failures of a unit of work. They travel back to the caller as
/// `{"error": {"code": .., "message": ..}}` and never stop the worker.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("File not found")]
    NotFound,

    #[error("Unsupported file format: {0}")]
    Unsupported(String),

    #[error("Malformed request or content: {0}")]
    Malformed(String),

    #[error("Worker failed while processing the request")]
    Panicked,
}

impl JobError {
    pub fn code(&self) -> u16 {
        match self {
            JobError::NotFound => 404,
            JobError::Unsupported(_) | JobError::Malformed(_) => 400,
            JobError::Panicked => 500,
        }
    }
}

#[async_trait]
pub trait UnitOfWork: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Reply: Serialize + Send + 'static;

    async fn process(&self, request: Self::Request) -> Result<Self::Reply, JobError>;
}

/// Counts whitespace-separated words whose length in characters is `length`.
pub fn count_words(text: &str, length: u32) -> u64 {
    let length = length as usize;
    text.split_whitespace()
        .filter(|word| word.chars().count() == length)
        .count() as u64
}

/// Turn the raw artifact into text, picking the decoder from the file extension.
///
/// PDF parsing is CPU bound; async callers should run this on a blocking thread.
pub fn extract_text(file_name: &str, bytes: Vec<u8>) -> Result<String, JobError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("txt") => {
            String::from_utf8(bytes).map_err(|e| JobError::Malformed(e.to_string()))
        }
        Some("pdf") => pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| JobError::Malformed(e.to_string())),
        Some(other) => Err(JobError::Unsupported(format!(".{other}"))),
        None => Err(JobError::Unsupported("no extension".to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct WordCountJob {
    client: reqwest::Client,
    server_url: String,
}

impl WordCountJob {
    /// `server_url` is the front-end base URL, e.g. `http://127.0.0.1:65011`.
    pub fn new(server_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, file_name: &str) -> Result<Vec<u8>, JobError> {
        let url = format!("{}/file/{}", self.server_url, file_name);
        let response = self.client.get(&url).send().await.map_err(|e| {
            debug!(%url, error = %e, "Artifact request failed");
            JobError::NotFound
        })?;

        // every non-2xx answer means the artifact is gone
        if !response.status().is_success() {
            debug!(%url, status = %response.status(), "Artifact not served");
            return Err(JobError::NotFound);
        }
        let bytes = response.bytes().await.map_err(|_| JobError::NotFound)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl UnitOfWork for WordCountJob {
    type Request = CountRequest;
    type Reply = CountResult;

    async fn process(&self, request: CountRequest) -> Result<CountResult, JobError> {
        let bytes = self.fetch(&request.file_name).await?;
        let file_name = request.file_name.clone();
        let text = tokio::task::spawn_blocking(move || extract_text(&file_name, bytes))
            .await
            .map_err(|e| JobError::Malformed(format!("text extraction failed: {e}")))??;
        Ok(CountResult {
            count: count_words(&text, request.length),
        })
    }
}
