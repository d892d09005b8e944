//! Settings-store keys owned by the transfer core.
//!
//! Each key holds one whole JSON document; writers replace it wholesale.

/// Completed transfers, `{group: {item: HistoryRecord}}`.
pub const DOWNLOAD_HISTORY: &str = "download_history";

/// Non-running control entries, `{"group:item": "paused" | "deleted"}`.
pub const TASK_STATES: &str = "task_states";

/// Transfers started but not yet confirmed, `{"group_item": PendingRecord}`.
pub const PENDING_DOWNLOADS: &str = "pending_downloads";

/// Global pause flag, serialized [`crate::DownloadState`].
pub const DOWNLOAD_STATE: &str = "download_state";
