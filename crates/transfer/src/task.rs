//! Transfer task model.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Download,
    Upload,
}

/// Lifecycle of a task. `Completed`, `Failed` and `Cancelled` are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    InProgress,
    Completed,
    Failed(String),
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Cancelled)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::InProgress => f.write_str("in progress"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// One requested download or upload, as persisted by a [`TaskStore`].
///
/// [`TaskStore`]: crate::TaskStore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub id: Uuid,
    pub file_name: String,
    pub source_path: String,
    pub destination_path: String,
    pub direction: TransferDirection,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub state: TransferState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TransferTask {
    /// New `Pending` task with a fresh id.
    pub fn new(
        direction: TransferDirection,
        source_path: impl Into<String>,
        destination_path: impl Into<String>,
        total_bytes: u64,
    ) -> Self {
        let source_path = source_path.into();
        let destination_path = destination_path.into();
        let named_from = match direction {
            TransferDirection::Download => &source_path,
            TransferDirection::Upload => &destination_path,
        };
        Self {
            id: Uuid::new_v4(),
            file_name: file_name_of(named_from),
            source_path,
            destination_path,
            direction,
            total_bytes,
            transferred_bytes: 0,
            state: TransferState::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Fraction done in `0.0..=1.0`. Empty files count as done once completed.
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.state == TransferState::Completed { 1.0 } else { 0.0 };
        }
        (self.transferred_bytes as f64 / self.total_bytes as f64).min(1.0)
    }

    /// Moves to a final state and stamps the completion time.
    pub(crate) fn finish(&mut self, state: TransferState) {
        self.error = match &state {
            TransferState::Failed(reason) => Some(reason.clone()),
            _ => None,
        };
        self.state = state;
        self.completed_at = Some(Utc::now());
    }
}

/// Last path component, accepting both `/` and `\` separators.
fn file_name_of(path: &str) -> String {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_string()
}
