//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて状態機械を実装します。
//!
//! # 主要コンポーネント
//! - **StateContext**: store / clock / event sink の束
//! - **JobState**: 1 job の状態遷移
//! - **WorkflowState**: workflow カウンタの更新（行ロック + 読み直し）
//! - **WorkflowRegistrar**: 定義の検証と登録
//! - **FailedJobHandler**: job 失敗時のフック

pub mod context;
pub mod failure;
pub mod job_state;
pub mod registrar;
pub mod workflow_state;

pub use self::context::StateContext;
pub use self::failure::{CancelOnFailure, DefaultFailedJobHandler, FailedJobHandler};
pub use self::job_state::JobState;
pub use self::registrar::WorkflowRegistrar;
pub use self::workflow_state::WorkflowState;
