//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryWorkflowStore**: 行ロック付きのインメモリ正本
//! - **NoopEventSink / TracingEventSink / RecordingEventSink**
//!
//! # 本番用実装
//! RDB（`SELECT ... FOR UPDATE` が使えるもの）の実装は別クレートに配置します。

pub mod event_sink;
pub mod inmem_store;

pub use self::event_sink::{NoopEventSink, RecordingEventSink, TracingEventSink};
pub use self::inmem_store::InMemoryWorkflowStore;
