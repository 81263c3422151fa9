use super::upload::{extension_of, is_plain_file_name};
use super::{AppState, Upload, serve};
use crate::broker::Broker;
use crate::config::Settings;
use crate::correlation::Communicator;
use crate::frontend::handlers::worker_error_message;
use crate::worker::{WordCountJob, Worker};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::{TempDir, tempdir};
use tokio::net::TcpListener;

const UPLOAD_LIMIT: usize = 256;

struct Harness {
    url: String,
    upload_dir: TempDir,
    client: reqwest::Client,
}

impl Harness {
    async fn start(request_timeout: Duration, with_worker: bool) -> Self {
        let broker = Arc::new(Broker::new());
        let settings = Settings::default();
        let communicator = Communicator::initialize(
            broker.clone(),
            settings.streams.clone(),
            settings.correlator.clone(),
        )
        .await
        .unwrap();

        let upload_dir = tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(
            listener,
            AppState {
                communicator,
                upload_dir: upload_dir.path().to_path_buf(),
                request_timeout,
                max_upload_bytes: UPLOAD_LIMIT,
            },
        ));

        if with_worker {
            let worker = Worker::new(
                broker,
                WordCountJob::new(&url),
                settings.streams,
                &settings.worker,
            );
            tokio::spawn(async move {
                let _ = worker.run().await;
            });
        }

        Self {
            url,
            upload_dir,
            client: reqwest::Client::new(),
        }
    }

    async fn count(&self, query: &str, body: impl Into<reqwest::Body>) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}/count?{query}", self.url))
            .body(body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body = response.text().await.unwrap();
        (status, serde_json::from_str(&body).unwrap())
    }

    fn uploads_left(&self) -> usize {
        std::fs::read_dir(self.upload_dir.path()).unwrap().count()
    }
}

#[test]
fn test_file_name_helpers() {
    assert_eq!(extension_of("report.final.txt"), ".txt");
    assert_eq!(extension_of("README"), "");
    assert!(is_plain_file_name("ab12.txt"));
    assert!(!is_plain_file_name("../secret"));
    assert!(!is_plain_file_name("dir/file.txt"));
    assert!(!is_plain_file_name("dir\\file.txt"));
    assert!(!is_plain_file_name(""));
}

#[test]
fn test_worker_error_messages() {
    assert_eq!(worker_error_message(400), "File format is not supported");
    assert_eq!(worker_error_message(404), "Error processing file");
    assert_eq!(worker_error_message(500), "Unknown error");
}

#[tokio::test]
async fn test_upload_remove_deletes_file() {
    let dir = tempdir().unwrap();
    let upload = Upload::save(dir.path(), "notes.txt", b"hello").await.unwrap();
    let path = upload.path().to_path_buf();

    assert!(upload.file_name().ends_with(".txt"));
    assert_eq!(upload.file_name().len(), 64 + ".txt".len());
    assert!(Path::new(&path).exists());

    upload.remove().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_abandoned_upload_is_removed_on_drop() {
    let dir = tempdir().unwrap();
    let upload = Upload::save(dir.path(), "notes.txt", b"hello").await.unwrap();
    let path = upload.path().to_path_buf();

    drop(upload);
    tokio::time::timeout(Duration::from_secs(1), async {
        while path.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dropping the guard should remove the file");
}

#[test]
fn test_upload_dropped_outside_runtime_is_removed() {
    let dir = tempdir().unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let upload = runtime
        .block_on(Upload::save(dir.path(), "notes.txt", b"hello"))
        .unwrap();
    let path = upload.path().to_path_buf();
    drop(runtime);

    drop(upload);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_count_validation() {
    let harness = Harness::start(Duration::from_secs(1), false).await;

    let (status, body) = harness.count("file_name=a.txt", "words").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Length is not provided or not a number");

    let (status, body) = harness.count("length=abc&file_name=a.txt", "words").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Length is not provided or not a number");

    let (status, body) = harness.count("length=0&file_name=a.txt", "words").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Length must be greater than 0");

    let (status, body) = harness.count("length=4&file_name=a.txt", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "File is not provided");

    assert_eq!(harness.uploads_left(), 0);
}

#[tokio::test]
async fn test_count_round_trip() {
    let harness = Harness::start(Duration::from_secs(5), true).await;

    let (status, body) = harness
        .count(
            "length=4&file_name=doc.txt",
            "this word list has four long ones",
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"count": 6, "length": 4}));
    assert_eq!(harness.uploads_left(), 0);
}

#[tokio::test]
async fn test_unsupported_format() {
    let harness = Harness::start(Duration::from_secs(5), true).await;

    let (status, body) = harness.count("length=4&file_name=doc.docx", "PK zipped").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "File format is not supported");
    assert_eq!(harness.uploads_left(), 0);
}

#[tokio::test]
async fn test_timeout_without_workers() {
    let harness = Harness::start(Duration::from_secs(1), false).await;

    let started = Instant::now();
    let (status, body) = harness.count("length=4&file_name=doc.txt", "some words").await;
    let elapsed = started.elapsed();

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "Timeout waiting for response from worker");
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(3));
    assert_eq!(harness.uploads_left(), 0);
}

#[tokio::test]
async fn test_get_file() {
    let harness = Harness::start(Duration::from_secs(1), false).await;
    std::fs::write(harness.upload_dir.path().join("abc.txt"), "stored").unwrap();

    let response = harness
        .client
        .get(format!("{}/file/abc.txt", harness.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "stored");

    for name in ["missing.txt", "..%2Fabc.txt"] {
        let response = harness
            .client
            .get(format!("{}/file/{name}", harness.url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{name}");
    }
}

#[tokio::test]
async fn test_oversized_upload_gets_json_413() {
    let harness = Harness::start(Duration::from_secs(1), false).await;

    let (status, body) = harness
        .count("length=4&file_name=big.txt", "word ".repeat(UPLOAD_LIMIT))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "File is too large");
    assert_eq!(harness.uploads_left(), 0);
}
