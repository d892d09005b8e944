use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::TransferError;

/// Issues one directory-creation request and reports the HTTP status.
pub trait CollectionCreator: Send + Sync {
    /// `encoded_path` is the slash-joined, already-encoded prefix.
    fn create_collection<'a>(&'a self, encoded_path: &'a str) -> BoxFuture<'a, Result<u16, TransferError>>;
}

/// Result of provisioning a directory path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisionOutcome {
    AlreadyExists,
    Created,
    Locked,
    Failed,
}

impl ProvisionOutcome {
    fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Created,
            405 => Self::AlreadyExists,
            423 => Self::Locked,
            _ => Self::Failed,
        }
    }
}

/// Remembers which remote directory prefixes have been provisioned.
///
/// Each prefix is attempted at most once per process; concurrent callers for
/// the same prefix wait on the single in-flight attempt. Failed prefixes are
/// remembered too, so a broken share never causes a MKCOL storm.
pub struct DirectoryCache {
    creator: Arc<dyn CollectionCreator>,
    entries: DashMap<String, Arc<OnceCell<ProvisionOutcome>>>,
    lock_wait: Duration,
}

impl DirectoryCache {
    pub fn new(creator: Arc<dyn CollectionCreator>, lock_wait: Duration) -> Self {
        Self {
            creator,
            entries: DashMap::new(),
            lock_wait,
        }
    }

    /// Provisions every prefix of `encoded_segments`, outermost first.
    ///
    /// Returns the worst outcome among prefixes attempted by this call;
    /// prefixes already handled earlier count as `AlreadyExists`.
    pub async fn ensure_provisioned(&self, encoded_segments: &[String]) -> ProvisionOutcome {
        let mut overall = ProvisionOutcome::AlreadyExists;

        for depth in 1..=encoded_segments.len() {
            let prefix = encoded_segments[..depth].join("/");
            let cell = Arc::clone(self.entries.entry(prefix.clone()).or_default().value());

            if cell.initialized() {
                continue;
            }

            let mut attempted_here = false;
            let outcome = *cell
                .get_or_init(|| {
                    attempted_here = true;
                    self.provision(&prefix)
                })
                .await;

            if attempted_here {
                overall = overall.max(outcome);
            }
        }

        overall
    }

    /// Cached outcome for one encoded prefix, if it has been attempted.
    pub fn outcome(&self, encoded_prefix: &str) -> Option<ProvisionOutcome> {
        self.entries
            .get(encoded_prefix)
            .and_then(|cell| cell.get().copied())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn provision(&self, prefix: &str) -> ProvisionOutcome {
        match self.create(prefix).await {
            ProvisionOutcome::Locked => {
                warn!(path = %prefix, "Directory locked, waiting before one retry");
                tokio::time::sleep(self.lock_wait).await;
                match self.create(prefix).await {
                    ProvisionOutcome::Failed => ProvisionOutcome::Locked,
                    outcome => outcome,
                }
            }
            outcome => outcome,
        }
    }

    async fn create(&self, prefix: &str) -> ProvisionOutcome {
        match self.creator.create_collection(prefix).await {
            Ok(status) => {
                let outcome = ProvisionOutcome::from_status(status);
                match outcome {
                    ProvisionOutcome::Created => info!(path = %prefix, "Created directory"),
                    ProvisionOutcome::AlreadyExists => debug!(path = %prefix, "Directory exists"),
                    ProvisionOutcome::Locked => {}
                    ProvisionOutcome::Failed => {
                        warn!(path = %prefix, status, "MKCOL returned unexpected status")
                    }
                }
                outcome
            }
            Err(e) => {
                warn!(path = %prefix, error = %e, "MKCOL failed");
                ProvisionOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Counts calls per prefix and answers from a script (default 201).
    struct ScriptedCreator {
        calls: Mutex<HashMap<String, usize>>,
        script: Mutex<HashMap<String, Vec<u16>>>,
        delay: Duration,
    }

    impl ScriptedCreator {
        fn new(delay: Duration) -> Self {
            Self {
                calls: Mutex::new(HashMap::new()),
                script: Mutex::new(HashMap::new()),
                delay,
            }
        }

        fn answer(&self, prefix: &str, statuses: Vec<u16>) {
            self.script.lock().unwrap().insert(prefix.to_string(), statuses);
        }

        fn calls(&self, prefix: &str) -> usize {
            self.calls.lock().unwrap().get(prefix).copied().unwrap_or(0)
        }
    }

    impl CollectionCreator for ScriptedCreator {
        fn create_collection<'a>(&'a self, encoded_path: &'a str) -> BoxFuture<'a, Result<u16, TransferError>> {
            Box::pin(async move {
                *self.calls.lock().unwrap().entry(encoded_path.to_string()).or_default() += 1;
                tokio::time::sleep(self.delay).await;
                let mut script = self.script.lock().unwrap();
                match script.get_mut(encoded_path) {
                    Some(statuses) if !statuses.is_empty() => Ok(statuses.remove(0)),
                    _ => Ok(201),
                }
            })
        }
    }

    fn segs(path: &str) -> Vec<String> {
        path.split('/').map(str::to_string).collect()
    }

    #[tokio::test]
    async fn each_prefix_created_once() {
        let creator = Arc::new(ScriptedCreator::new(Duration::ZERO));
        let cache = DirectoryCache::new(creator.clone(), Duration::from_millis(1));

        assert_eq!(cache.ensure_provisioned(&segs("a/b/c")).await, ProvisionOutcome::Created);
        assert_eq!(cache.ensure_provisioned(&segs("a/b/c")).await, ProvisionOutcome::AlreadyExists);
        cache.ensure_provisioned(&segs("a/b/d")).await;

        assert_eq!(creator.calls("a"), 1);
        assert_eq!(creator.calls("a/b"), 1);
        assert_eq!(creator.calls("a/b/c"), 1);
        assert_eq!(creator.calls("a/b/d"), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_attempt() {
        let creator = Arc::new(ScriptedCreator::new(Duration::from_millis(20)));
        let cache = Arc::new(DirectoryCache::new(creator.clone(), Duration::from_millis(1)));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.ensure_provisioned(&segs("Media/Chan")).await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(creator.calls("Media"), 1);
        assert_eq!(creator.calls("Media/Chan"), 1);
    }

    #[tokio::test]
    async fn existing_directory_counts_as_provisioned() {
        let creator = Arc::new(ScriptedCreator::new(Duration::ZERO));
        creator.answer("Media", vec![405]);
        let cache = DirectoryCache::new(creator.clone(), Duration::from_millis(1));

        assert_eq!(cache.ensure_provisioned(&segs("Media")).await, ProvisionOutcome::AlreadyExists);
        assert_eq!(cache.outcome("Media"), Some(ProvisionOutcome::AlreadyExists));
    }

    #[tokio::test(start_paused = true)]
    async fn locked_waits_retries_once_then_gives_up() {
        let creator = Arc::new(ScriptedCreator::new(Duration::ZERO));
        creator.answer("Media", vec![423, 423]);
        let cache = DirectoryCache::new(creator.clone(), Duration::from_secs(1));

        let started = tokio::time::Instant::now();
        assert_eq!(cache.ensure_provisioned(&segs("Media")).await, ProvisionOutcome::Locked);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(creator.calls("Media"), 2);

        // Marked anyway: never attempted again.
        cache.ensure_provisioned(&segs("Media")).await;
        assert_eq!(creator.calls("Media"), 2);
    }

    #[tokio::test]
    async fn failures_are_remembered_not_retried() {
        let creator = Arc::new(ScriptedCreator::new(Duration::ZERO));
        creator.answer("Media", vec![500]);
        let cache = DirectoryCache::new(creator.clone(), Duration::from_millis(1));

        assert_eq!(cache.ensure_provisioned(&segs("Media/x")).await, ProvisionOutcome::Failed);
        cache.ensure_provisioned(&segs("Media/y")).await;
        assert_eq!(creator.calls("Media"), 1);
        assert_eq!(cache.outcome("Media"), Some(ProvisionOutcome::Failed));
    }
}
