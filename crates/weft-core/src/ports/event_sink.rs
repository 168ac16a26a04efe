//! EventSink port - イベント記録の抽象化
//!
//! WorkflowState は commit 後にイベントを送ります。送信失敗で状態遷移が
//! 巻き戻ることはありません（ログに warn を出すだけ）。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::DomainEvent;

#[derive(Debug, Error)]
#[error("event sink error: {0}")]
pub struct EventSinkError(pub String);

/// EventSink はドメインイベントを記録
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: DomainEvent) -> Result<(), EventSinkError>;
}
