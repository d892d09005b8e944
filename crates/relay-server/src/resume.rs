use std::path::Path;
use std::sync::Arc;

use relay_core::{Relay, RelayOutcome, RelayRequest};
use relay_types::PendingRecord;
use relay_webdav::FileSource;
use tracing::{error, info, warn};

/// Streams one local file through the relay and logs the outcome.
pub async fn relay_local_file(relay: Arc<Relay>, request: RelayRequest) {
    let source = FileSource::new(&request.file_name);
    let key = request.key;
    match relay.relay(&request, &source).await {
        RelayOutcome::Completed(record) => {
            info!(group_id = key.group_id, item_id = key.item_id, bytes = record.total_bytes, "Relay finished")
        }
        RelayOutcome::Failed(e) => {
            error!(group_id = key.group_id, item_id = key.item_id, error = %e, "Relay failed")
        }
        RelayOutcome::Cancelled => info!(group_id = key.group_id, item_id = key.item_id, "Relay cancelled"),
    }
}

/// Re-issues pending transfers whose local file is still on disk. Records
/// without a file stay pending for a later manual decision.
pub async fn resume_pending(relay: Arc<Relay>, records: Vec<PendingRecord>) {
    for record in records {
        let path = Path::new(&record.file_name);
        let total_bytes = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                warn!(
                    group_id = record.group_id,
                    item_id = record.item_id,
                    file = %record.file_name,
                    "Pending transfer has no local file, leaving it pending"
                );
                continue;
            }
        };
        info!(group_id = record.group_id, item_id = record.item_id, file = %record.file_name, "Resuming pending transfer");
        let request = RelayRequest {
            key: record.key(),
            file_name: record.file_name.clone(),
            total_bytes,
            task_id: 0,
        };
        tokio::spawn(relay_local_file(Arc::clone(&relay), request));
    }
}
