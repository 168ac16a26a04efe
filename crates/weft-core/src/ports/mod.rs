//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（RDB, イベント配送, 時計など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 状態機械（app）はこれらの trait にのみ依存する
//! - 具体的な storage engine は impls または別クレートに置く

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod workflow_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, EventSinkError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::workflow_store::{StoreError, WorkflowStore, WorkflowTransaction};
