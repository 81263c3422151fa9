use super::{JobError, UnitOfWork, WordCountJob, Worker, count_words, extract_text};
use crate::broker::{Broker, StreamBroker};
use crate::config::{Settings, StreamSettings, WorkerSettings};
use crate::correlation::{
    CountRequest, CountResult, RequestEnvelope, ResponseEnvelope, TaskId,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Answers with the requested length as the count.
struct EchoLength;

#[async_trait]
impl UnitOfWork for EchoLength {
    type Request = CountRequest;
    type Reply = CountResult;

    async fn process(&self, request: CountRequest) -> Result<CountResult, JobError> {
        Ok(CountResult {
            count: u64::from(request.length),
        })
    }
}

struct Panics;

#[async_trait]
impl UnitOfWork for Panics {
    type Request = CountRequest;
    type Reply = CountResult;

    async fn process(&self, _request: CountRequest) -> Result<CountResult, JobError> {
        panic!("converter blew up");
    }
}

async fn setup() -> (Arc<Broker>, StreamSettings) {
    let broker = Arc::new(Broker::new());
    let streams = Settings::default().streams;
    broker
        .create_group(&streams.request_stream, &streams.request_group)
        .await
        .unwrap();
    broker
        .create_group(&streams.response_stream, &streams.response_group)
        .await
        .unwrap();
    (broker, streams)
}

fn worker_settings(consumer: &str) -> WorkerSettings {
    WorkerSettings {
        consumer_name: Some(consumer.to_string()),
        ..Settings::default().worker
    }
}

async fn dispatch(broker: &Broker, streams: &StreamSettings, message: Value) -> TaskId {
    let task_id = TaskId::generate();
    let dump = serde_json::to_string(&RequestEnvelope {
        task_id: task_id.clone(),
        message,
    })
    .unwrap();
    broker.append(&streams.request_stream, dump).await.unwrap();
    task_id
}

async fn next_reply(broker: &Broker, streams: &StreamSettings) -> ResponseEnvelope<Value> {
    let entries = tokio::time::timeout(
        Duration::from_secs(1),
        broker.read_group(
            &streams.response_stream,
            &streams.response_group,
            "test",
            1,
        ),
    )
    .await
    .expect("a reply should have been published")
    .unwrap();
    serde_json::from_str(&entries[0].payload).unwrap()
}

#[test]
fn test_count_words_matches_character_length() {
    assert_eq!(count_words("one four five\tsixes\nnine", 4), 3);
    assert_eq!(count_words("", 4), 0);
    // characters, not bytes
    assert_eq!(count_words("café tea", 4), 1);
}

#[test]
fn test_extract_text_by_extension() {
    assert_eq!(
        extract_text("doc.TXT", b"hello world".to_vec()).unwrap(),
        "hello world"
    );

    let err = extract_text("doc.docx", b"PK\x03\x04".to_vec()).unwrap_err();
    assert!(matches!(err, JobError::Unsupported(_)));
    assert_eq!(err.code(), 400);

    let err = extract_text("doc.txt", vec![0xff, 0xfe, 0x00]).unwrap_err();
    assert!(matches!(err, JobError::Malformed(_)));
    assert_eq!(err.code(), 400);

    assert!(extract_text("README", b"x".to_vec()).is_err());
}

/// A one-page PDF showing `text` in Helvetica, with a correct xref table.
fn single_page_pdf(text: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 72 712 Td ({text}) Tj ET");
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 5 0 R >> >> >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{content}\nendstream", content.len()),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }

    let xref_at = pdf.len();
    let mut tail = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        tail.push_str(&format!("{offset:010} 00000 n \n"));
    }
    tail.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    ));
    pdf.extend_from_slice(tail.as_bytes());
    pdf
}

#[test]
fn test_extract_text_from_pdf() {
    let text = extract_text("scan.pdf", single_page_pdf("lion bear wolf ox")).unwrap();
    assert!(text.contains("lion"), "{text:?}");
    assert_eq!(count_words(&text, 4), 3);
}

#[test]
fn test_broken_pdf_is_malformed() {
    let err = extract_text("scan.pdf", b"%PDF-1.4 truncated".to_vec()).unwrap_err();
    assert!(matches!(err, JobError::Malformed(_)));
    assert_eq!(err.code(), 400);
}

#[test]
fn test_job_error_codes() {
    assert_eq!(JobError::NotFound.code(), 404);
    assert_eq!(JobError::NotFound.to_string(), "File not found");
    assert_eq!(JobError::Panicked.code(), 500);
}

#[tokio::test]
async fn test_unreachable_server_means_not_found() {
    // nothing listens on port 1
    let job = WordCountJob::new("http://127.0.0.1:1/");
    let err = job
        .process(CountRequest {
            length: 4,
            file_name: "doc.txt".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), 404);
}

#[test]
fn test_consumer_name_from_settings_or_generated() {
    let broker: Arc<dyn StreamBroker> = Arc::new(Broker::new());
    let streams = Settings::default().streams;

    let named = Worker::new(broker.clone(), EchoLength, streams.clone(), &worker_settings("w-1"));
    assert_eq!(named.consumer(), "w-1");

    let generated = Worker::new(broker, EchoLength, streams, &Settings::default().worker);
    assert!(generated.consumer().starts_with("consumer-"));
    assert_eq!(generated.consumer().len(), "consumer-".len() + 16);
}

#[tokio::test]
async fn test_step_replies_and_acks() {
    let (broker, streams) = setup().await;
    let worker = Worker::new(broker.clone(), EchoLength, streams.clone(), &worker_settings("w-1"));

    let task_id = dispatch(&broker, &streams, json!({"length": 4, "file_name": "doc.txt"})).await;
    assert_eq!(worker.step().await.unwrap(), 1);

    let reply = next_reply(&broker, &streams).await;
    assert_eq!(reply.task_id, task_id);
    assert_eq!(reply.message, json!({"count": 4}));
    assert!(
        broker
            .pending(&streams.request_stream, &streams.request_group)
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_malformed_request_is_acked_without_reply() {
    let (broker, streams) = setup().await;
    let worker = Worker::new(broker.clone(), EchoLength, streams.clone(), &worker_settings("w-1"));

    broker
        .append(&streams.request_stream, "{broken".to_string())
        .await
        .unwrap();
    worker.step().await.unwrap();

    assert!(
        broker
            .pending(&streams.request_stream, &streams.request_group)
            .unwrap()
            .is_empty()
    );
    assert_eq!(broker.stream_len(&streams.response_stream), 0);
}

#[tokio::test]
async fn test_unexpected_message_shape_gets_400() {
    let (broker, streams) = setup().await;
    let worker = Worker::new(broker.clone(), EchoLength, streams.clone(), &worker_settings("w-1"));

    let task_id = dispatch(&broker, &streams, json!({"file_name": 3})).await;
    worker.step().await.unwrap();

    let reply = next_reply(&broker, &streams).await;
    assert_eq!(reply.task_id, task_id);
    assert_eq!(reply.message["error"]["code"], 400);
}

#[tokio::test]
async fn test_panicking_job_becomes_error_reply() {
    let (broker, streams) = setup().await;
    let worker = Worker::new(broker.clone(), Panics, streams.clone(), &worker_settings("w-1"));

    let first = dispatch(&broker, &streams, json!({"length": 4, "file_name": "a.txt"})).await;
    let second = dispatch(&broker, &streams, json!({"length": 4, "file_name": "b.txt"})).await;
    worker.step().await.unwrap();
    worker.step().await.unwrap();

    let reply = next_reply(&broker, &streams).await;
    assert_eq!(reply.task_id, first);
    assert_eq!(reply.message["error"]["code"], 500);
    // the loop survived the panic
    assert_eq!(next_reply(&broker, &streams).await.task_id, second);
}

#[tokio::test]
async fn test_reclaim_picks_up_stuck_request() {
    let (broker, streams) = setup().await;
    let task_id = dispatch(&broker, &streams, json!({"length": 2, "file_name": "a.txt"})).await;
    // a worker that read the entry and died
    broker
        .read_group(&streams.request_stream, &streams.request_group, "crashed", 1)
        .await
        .unwrap();

    let settings = WorkerSettings {
        reclaim_idle_ms: Some(0),
        ..worker_settings("rescuer")
    };
    let worker = Worker::new(broker.clone(), EchoLength, streams.clone(), &settings);
    assert_eq!(worker.step().await.unwrap(), 1);

    let reply = next_reply(&broker, &streams).await;
    assert_eq!(reply.task_id, task_id);
    assert_eq!(reply.message, json!({"count": 2}));
}

#[tokio::test]
async fn test_broker_failure_ends_run() {
    let (broker, streams) = setup().await;
    let worker = Worker::new(broker.clone(), EchoLength, streams, &worker_settings("w-1"));

    let run = {
        let broker = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            broker.close().await;
        })
    };
    let result = tokio::time::timeout(Duration::from_secs(1), worker.run())
        .await
        .expect("closing the broker should end the loop");
    assert!(result.is_err());
    run.await.unwrap();
}
