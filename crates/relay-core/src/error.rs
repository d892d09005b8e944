use relay_types::TaskKey;
use relay_webdav::TransferError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// The task was deleted before or during the transfer.
    #[error("task {0} was deleted")]
    Deleted(TaskKey),

    #[error("settings store: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl RelayError {
    /// Deletions are state conflicts, not failures to surface to the user.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Deleted(_) => true,
            Self::Transfer(e) => e.is_abort(),
            Self::Store(_) => false,
        }
    }
}
