use serde::{Deserialize, Serialize};

use super::document::Metadata;

/// Lifecycle state of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

impl OperationStatus {
    /// Completed and failed operations need no further attention.
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Started => write!(f, "started"),
            OperationStatus::InProgress => write!(f, "in_progress"),
            OperationStatus::Completed => write!(f, "completed"),
            OperationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Durable marker of a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: String,
    /// Seconds since the Unix epoch
    pub start_time: f64,
    pub operation_type: String,
    #[serde(default)]
    pub input_data: Metadata,
    pub status: OperationStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl OperationRecord {
    /// String value stored under `key` in the input data, if any.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input_data.get(key).and_then(|v| v.as_str())
    }
}
