mod common;

use std::io;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{StreamExt, stream};
use relay_webdav::{
    ByteStream, MemorySource, NoopObserver, ProvisionOutcome, RemotePath, TransferError, TransferExecutor,
    TransferObserver, WebDavConfig,
};
use tokio_util::sync::CancellationToken;

use common::spawn_mock;

fn config(base_url: &str) -> WebDavConfig {
    WebDavConfig {
        base_url: base_url.to_string(),
        remote_dir: "Media".into(),
        save_root: "/downloads".into(),
        backoff_unit: Duration::from_millis(10),
        lock_wait: Duration::from_millis(10),
        ..Default::default()
    }
}

#[derive(Default)]
struct Recorder {
    progress: Mutex<Vec<(u64, u64)>>,
    attempts: AtomicUsize,
    retries: AtomicUsize,
    abort_after: Option<u64>,
}

impl TransferObserver for Recorder {
    fn on_attempt(&self, _attempt: u32) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_progress(&self, sent: u64, total: u64) -> BoxFuture<'_, ControlFlow<()>> {
        Box::pin(async move {
            self.progress.lock().unwrap().push((sent, total));
            match self.abort_after {
                Some(limit) if sent >= limit => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        })
    }

    fn on_retry(&self, _attempt: u32, _error: &TransferError) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn streams_file_and_provisions_parents() {
    let (url, dav) = spawn_mock().await;
    let executor = TransferExecutor::new(config(&url)).unwrap();
    let remote = executor.remote_path_for("/downloads/My Chan/clip.mp4");
    let source = MemorySource::new(vec![5u8; 1000], 256);
    let recorder = Arc::new(Recorder::default());

    executor
        .send(&remote, &source, 1000, recorder.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dav.count("MKCOL", "/dav/Media"), 1);
    assert_eq!(dav.count("MKCOL", "/dav/Media/My%20Chan"), 1);
    let stored = dav.stored.lock().unwrap();
    assert_eq!(stored.get("/dav/Media/My%20Chan/clip.mp4").map(Vec::len), Some(1000));

    let progress = recorder.progress.lock().unwrap();
    assert_eq!(progress.len(), 4);
    assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(progress.last(), Some(&(1000, 1000)));
}

#[tokio::test]
async fn locked_put_is_retried_without_reprovisioning() {
    let (url, dav) = spawn_mock().await;
    dav.script_puts(&[423, 423]);
    let executor = TransferExecutor::new(config(&url)).unwrap();
    let remote = RemotePath::parse("Media/clip.mp4");
    let source = MemorySource::new(vec![1u8; 64], 16);
    let recorder = Arc::new(Recorder::default());

    executor
        .send(&remote, &source, 64, recorder.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dav.count_method("PUT"), 3);
    assert_eq!(dav.count("MKCOL", "/dav/Media"), 1);
    assert_eq!(recorder.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.retries.load(Ordering::SeqCst), 2);
    assert_eq!(
        executor.directories().outcome("Media"),
        Some(ProvisionOutcome::Created)
    );
}

#[tokio::test]
async fn exhausting_retries_is_terminal() {
    let (url, dav) = spawn_mock().await;
    dav.script_puts(&[423, 423, 423, 423]);
    let executor = TransferExecutor::new(config(&url)).unwrap();
    let source = MemorySource::new(vec![1u8; 8], 8);

    let err = executor
        .send(
            &RemotePath::parse("clip.mp4"),
            &source,
            8,
            Arc::new(NoopObserver),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        TransferError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(last.is_retryable());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(dav.count_method("PUT"), 3);
}

#[tokio::test]
async fn unexpected_status_fails_immediately_with_body() {
    let (url, dav) = spawn_mock().await;
    dav.script_puts(&[507]);
    let executor = TransferExecutor::new(config(&url)).unwrap();
    let source = MemorySource::new(vec![1u8; 8], 8);

    let err = executor
        .send(
            &RemotePath::parse("clip.mp4"),
            &source,
            8,
            Arc::new(NoopObserver),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        TransferError::Protocol { status, body } => {
            assert_eq!(status, 507);
            assert_eq!(body, "scripted failure");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(dav.count_method("PUT"), 1);
}

#[tokio::test]
async fn empty_endpoint_is_a_configuration_error() {
    let executor = TransferExecutor::new(WebDavConfig::default()).unwrap();
    let source = MemorySource::new(vec![1u8; 8], 8);
    let recorder = Arc::new(Recorder::default());

    let err = executor
        .send(
            &RemotePath::parse("clip.mp4"),
            &source,
            8,
            recorder.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Configuration(_)));
    assert_eq!(recorder.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refused_connection_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let executor = TransferExecutor::new(config(&format!("http://{}", addr))).unwrap();
    let source = MemorySource::new(vec![1u8; 8], 8);
    let recorder = Arc::new(Recorder::default());

    let err = executor
        .send(
            &RemotePath::parse("clip.mp4"),
            &source,
            8,
            recorder.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(recorder.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn observer_break_aborts_the_request() {
    let (url, dav) = spawn_mock().await;
    let executor = TransferExecutor::new(config(&url)).unwrap();
    let source = MemorySource::new(vec![1u8; 4096], 512);
    let recorder = Arc::new(Recorder {
        abort_after: Some(1024),
        ..Default::default()
    });

    let err = executor
        .send(
            &RemotePath::parse("clip.mp4"),
            &source,
            4096,
            recorder.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(err.is_abort());
    assert_eq!(recorder.progress.lock().unwrap().len(), 2);
    assert!(dav.stored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn source_read_error_fails_without_retry() {
    let (url, dav) = spawn_mock().await;
    let executor = TransferExecutor::new(config(&url)).unwrap();
    let source = || -> ByteStream {
        stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::other("disk gone")),
        ])
        .boxed()
    };
    let recorder = Arc::new(Recorder::default());

    let err = executor
        .send(
            &RemotePath::parse("Media/clip.mp4"),
            &source,
            64,
            recorder.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(&err, TransferError::Source(msg) if msg.contains("disk gone")));
    assert_eq!(recorder.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.retries.load(Ordering::SeqCst), 0);
    assert!(dav.stored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_token_stops_before_sending() {
    let (url, dav) = spawn_mock().await;
    let executor = TransferExecutor::new(config(&url)).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = executor
        .send(
            &RemotePath::parse("clip.mp4"),
            &MemorySource::new(vec![1u8; 8], 8),
            8,
            Arc::new(NoopObserver),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_abort());
    assert_eq!(dav.count_method("PUT"), 0);
}
