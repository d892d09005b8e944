//! Shared data model for the media relay: task identity, lifecycle states,
//! control entries and the records persisted in the settings store.

pub mod keys;
pub mod models;

pub use models::{
    ControlState, DownloadState, HistoryRecord, PendingRecord, TaskKey, TaskState, TransferTask,
};
