use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one logical file inside one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub group_id: i64,
    pub item_id: i64,
}

impl TaskKey {
    pub const fn new(group_id: i64, item_id: i64) -> Self {
        Self { group_id, item_id }
    }

    /// `group:item`, the form used by the persisted control table.
    pub fn colon_key(&self) -> String {
        format!("{}:{}", self.group_id, self.item_id)
    }

    /// `group_item`, the form used by the persisted pending set.
    pub fn underscore_key(&self) -> String {
        format!("{}_{}", self.group_id, self.item_id)
    }

    pub fn parse_colon(s: &str) -> Option<Self> {
        let (g, i) = s.split_once(':')?;
        Some(Self::new(g.trim().parse().ok()?, i.trim().parse().ok()?))
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_id, self.item_id)
    }
}

/// Lifecycle of a transfer as shown to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Waiting,
    Uploading,
    Retrying,
    Failed,
    Success,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Success)
    }

    /// States only move forward; `Retrying -> Uploading` is the one way back.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (a, b) if a == b => !a.is_terminal(),
            (Waiting, _) => true,
            (Uploading, Retrying | Failed | Success) => true,
            (Retrying, Uploading | Failed | Success) => true,
            _ => false,
        }
    }
}

/// Per-task control entry. `Running` is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    #[default]
    Running,
    Paused,
    Deleted,
}

impl ControlState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for ControlState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown control state: {other}")),
        }
    }
}

/// Process-wide pause flag. Persisted as its numeric code (1 / 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadState {
    #[default]
    Downloading,
    Stopped,
}

impl DownloadState {
    pub fn code(self) -> i64 {
        match self {
            Self::Downloading => 1,
            Self::Stopped => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Downloading),
            2 => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl Serialize for DownloadState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for DownloadState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid download state {code}")))
    }
}

/// Live snapshot of one transfer, owned by a telemetry aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTask {
    pub key: TaskKey,
    pub file_name: String,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub speed_bytes_per_sec: u64,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub task_id: i64,
    /// Remaining-time text reported by external progress sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
}

impl TransferTask {
    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.transferred_bytes >= self.total_bytes
    }
}

/// Durable marker that a transfer started but is not yet confirmed done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub group_id: i64,
    pub item_id: i64,
    #[serde(default)]
    pub file_name: String,
    /// Unix seconds.
    pub started_at: f64,
}

impl PendingRecord {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.group_id, self.item_id)
    }
}

/// One entry of the persisted transfer history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub speed_bytes_per_sec: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub task_id: i64,
}

impl HistoryRecord {
    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_key_string_forms() {
        let key = TaskKey::new(-1001, 42);
        assert_eq!(key.colon_key(), "-1001:42");
        assert_eq!(key.underscore_key(), "-1001_42");
        assert_eq!(TaskKey::parse_colon("-1001:42"), Some(key));
        assert_eq!(TaskKey::parse_colon("garbage"), None);
    }

    #[test]
    fn state_moves_forward_only() {
        use TaskState::*;
        assert!(Waiting.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Success));
        assert!(!Success.can_transition_to(Uploading));
        assert!(!Failed.can_transition_to(Success));
        assert!(!Uploading.can_transition_to(Waiting));
    }

    #[test]
    fn download_state_serializes_as_code() {
        let json = serde_json::to_value(DownloadState::Stopped).unwrap();
        assert_eq!(json, serde_json::json!(2));
        let back: DownloadState = serde_json::from_value(json).unwrap();
        assert_eq!(back, DownloadState::Stopped);
        assert!(serde_json::from_value::<DownloadState>(serde_json::json!(7)).is_err());
    }

    #[test]
    fn control_state_parses() {
        assert_eq!("paused".parse::<ControlState>(), Ok(ControlState::Paused));
        assert!("stopped".parse::<ControlState>().is_err());
    }
}
