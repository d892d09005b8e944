use std::io;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::WebDavClient;
use crate::config::WebDavConfig;
use crate::dir_cache::DirectoryCache;
use crate::error::TransferError;
use crate::path::RemotePath;
use crate::source::{ByteSource, ByteStream};

/// Hooks the executor calls while a transfer runs.
pub trait TransferObserver: Send + Sync {
    /// A new attempt is about to stream from offset zero.
    fn on_attempt(&self, _attempt: u32) {}

    /// Called once per chunk taken from the source, before the chunk is
    /// handed to the transport. Awaiting here suspends the upload without
    /// dropping the connection; `Break` aborts it.
    fn on_progress(&self, sent: u64, total: u64) -> BoxFuture<'_, ControlFlow<()>>;

    /// A retryable failure occurred and the executor will try again.
    fn on_retry(&self, _attempt: u32, _error: &TransferError) {}
}

/// Observer that never pauses or aborts.
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_progress(&self, _sent: u64, _total: u64) -> BoxFuture<'_, ControlFlow<()>> {
        Box::pin(async { ControlFlow::Continue(()) })
    }
}

/// Why the request body stopped early, recorded by the body stream so the
/// transport error can be reclassified.
#[derive(Default)]
struct StreamFault(Mutex<Option<TransferError>>);

impl StreamFault {
    fn set(&self, err: TransferError) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(err);
        }
    }

    fn take(&self) -> Option<TransferError> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Performs one logical upload: provisioning, streaming PUT, retry.
pub struct TransferExecutor {
    client: WebDavClient,
    dirs: DirectoryCache,
}

impl TransferExecutor {
    pub fn new(config: WebDavConfig) -> Result<Self, TransferError> {
        let client = WebDavClient::new(config)?;
        let dirs = DirectoryCache::new(Arc::new(client.clone()), client.config().lock_wait);
        Ok(Self { client, dirs })
    }

    pub fn config(&self) -> &WebDavConfig {
        self.client.config()
    }

    pub fn directories(&self) -> &DirectoryCache {
        &self.dirs
    }

    /// Remote location for a local file name under the configured roots.
    pub fn remote_path_for(&self, file_name: &str) -> RemotePath {
        let config = self.client.config();
        RemotePath::from_local(file_name, &config.save_root, &config.remote_dir)
    }

    /// Uploads `source` to `remote`, retrying transient failures with linear
    /// backoff (`backoff_unit * attempt`).
    ///
    /// Cancelling `cancel` drops the in-flight request immediately.
    pub async fn send(
        &self,
        remote: &RemotePath,
        source: &dyn ByteSource,
        total: u64,
        observer: Arc<dyn TransferObserver>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let config = self.client.config();
        if !config.is_configured() {
            error!("WebDAV URL is not configured");
            return Err(TransferError::Configuration("WebDAV URL is not configured".into()));
        }
        if remote.is_empty() {
            return Err(TransferError::Configuration("empty remote path".into()));
        }

        let url = self.client.url_for(&remote.encoded());
        let max_attempts = config.max_attempts.max(1);
        info!(url = %url, total, "Uploading");

        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::Aborted);
            }

            // Already-provisioned prefixes are skipped inside the cache.
            self.dirs.ensure_provisioned(&remote.encoded_parent()).await;

            observer.on_attempt(attempt);
            let err = match self.put_once(&url, source, total, Arc::clone(&observer), cancel).await {
                Ok(()) => {
                    info!(path = %remote, attempt, "Upload complete");
                    return Ok(());
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                if err.is_abort() {
                    info!(path = %remote, "Upload aborted");
                } else {
                    error!(path = %remote, error = %err, "Upload failed");
                }
                return Err(err);
            }

            warn!(path = %remote, attempt, max_attempts, error = %err, "Retryable upload failure");
            if attempt >= max_attempts {
                error!(path = %remote, attempts = attempt, "Upload failed after retries");
                return Err(TransferError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            observer.on_retry(attempt, &err);
            let delay = config.backoff_unit * attempt;
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Aborted),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn put_once(
        &self,
        url: &str,
        source: &dyn ByteSource,
        total: u64,
        observer: Arc<dyn TransferObserver>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let fault = Arc::new(StreamFault::default());
        let body = observed_body(source.open(), total, observer, Arc::clone(&fault));

        // hyper never adds `Expect: 100-continue` by itself, so the body starts
        // streaming right after the headers; servers that stall on the
        // handshake are not an issue here.
        let mut request = self
            .client
            .request(Method::PUT, url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body));
        if total > 0 {
            request = request.header(CONTENT_LENGTH, total);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Aborted),
            r = request.send() => r,
        };

        // A broken body outranks whatever the server said about the stub it got.
        if let Some(fault) = fault.take() {
            return Err(fault);
        }
        match result {
            Ok(resp) => classify_response(resp).await,
            Err(e) => Err(TransferError::from_reqwest(e)),
        }
    }
}

async fn classify_response(resp: Response) -> Result<(), TransferError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    if status.as_u16() == 423 {
        return Err(TransferError::Transient("resource locked (423)".into()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransferError::protocol(status.as_u16(), &body))
}

/// Wraps the source so every chunk passes through the observer first.
fn observed_body(
    mut source: ByteStream,
    total: u64,
    observer: Arc<dyn TransferObserver>,
    fault: Arc<StreamFault>,
) -> ByteStream {
    let body = async_stream::stream! {
        let mut sent: u64 = 0;
        while let Some(item) = source.next().await {
            let chunk: Bytes = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    fault.set(TransferError::Source(e.to_string()));
                    yield Err(e);
                    break;
                }
            };
            sent += chunk.len() as u64;
            if observer.on_progress(sent, total).await.is_break() {
                debug!(sent, "Body stream stopped by observer");
                fault.set(TransferError::Aborted);
                yield Err(io::Error::new(io::ErrorKind::Interrupted, "transfer aborted"));
                break;
            }
            yield Ok(chunk);
        }
    };
    body.boxed()
}
