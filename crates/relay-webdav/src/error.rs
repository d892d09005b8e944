/// Longest response body kept as a protocol diagnostic.
pub const MAX_DIAGNOSTIC_LEN: usize = 500;

/// Classified transfer failure.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Missing or unusable endpoint configuration. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Timeout, connection failure or a locked resource.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The endpoint answered with an unexpected status.
    #[error("protocol error: HTTP {status}: {body}")]
    Protocol { status: u16, body: String },

    /// The task was deleted while the transfer was in flight.
    #[error("transfer aborted")]
    Aborted,

    /// The input byte stream failed.
    #[error("source stream error: {0}")]
    Source(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransferError>,
    },
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// A deletion is a state conflict, not a failure to show the user.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn protocol(status: u16, body: &str) -> Self {
        Self::Protocol {
            status,
            body: truncate(body, MAX_DIAGNOSTIC_LEN),
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::Configuration(e.to_string())
        } else {
            Self::Transient(e.to_string())
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(TransferError::Transient("timeout".into()).is_retryable());
        assert!(!TransferError::Configuration("empty url".into()).is_retryable());
        assert!(!TransferError::protocol(500, "boom").is_retryable());
        assert!(!TransferError::Aborted.is_retryable());
        assert!(TransferError::Aborted.is_abort());
    }

    #[test]
    fn protocol_body_is_truncated() {
        let body = "é".repeat(800);
        match TransferError::protocol(502, &body) {
            TransferError::Protocol { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.chars().count(), MAX_DIAGNOSTIC_LEN);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
