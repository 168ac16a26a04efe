//! weft-core
//!
//! Workflow / job state machines on top of a locked, transactional store.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, workflow, state, spec, dependency, errors, events）
//! - **ports**: 抽象化レイヤー（WorkflowStore, EventSink, Clock, IdGenerator）
//! - **app**: 状態機械（JobState, WorkflowState, WorkflowRegistrar, FailedJobHandler）
//! - **impls**: 実装（InMemoryWorkflowStore, event sinks）
//! - **config**: store の設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{JobState, StateContext, WorkflowRegistrar, WorkflowState};
pub use config::StoreConfig;
pub use domain::{JobId, JobStatus, StepSpec, WorkflowError, WorkflowId, WorkflowSpec};
