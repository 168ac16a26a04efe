//! State - job の状態タグ
//!
//! タイムスタンプの有無で状態を表すのではなく、明示的な enum で状態を持ちます。
//! タイムスタンプは補助的なメタデータとして JobRecord 側に残します。

use serde::{Deserialize, Serialize};
use std::fmt;

/// JobStatus は job (step) の状態を表現
///
/// # 状態遷移
/// - Pending -> Processing
/// - Processing -> Finished
/// - Processing -> Failed
/// - Finished / Failed -> Processing（retry）
///
/// gated は manual job が Pending の間だけ意味を持つ直交フラグなので、
/// ここには含めません（`JobRecord::gated`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Untouched, or waiting for dependencies / gate release.
    #[default]
    Pending,

    /// A worker is executing the job body.
    Processing,

    /// The job body completed.
    Finished,

    /// The job body failed; `exception` holds the detail.
    Failed,
}

impl JobStatus {
    /// Finished or Failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}
