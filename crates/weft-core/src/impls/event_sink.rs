//! EventSink implementations.
//!
//! - **NoopEventSink**: 何もしない（デフォルト）
//! - **TracingEventSink**: tracing に info で出す
//! - **RecordingEventSink**: メモリに溜める（テスト・デモ用）

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::DomainEvent;
use crate::ports::{EventSink, EventSinkError};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: DomainEvent) -> Result<(), EventSinkError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: DomainEvent) -> Result<(), EventSinkError> {
        tracing::info!(
            event = event.name(),
            workflow_id = %event.workflow_id(),
            job_id = event.job_id().map(|id| id.as_str()),
            "workflow event"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().await.clone()
    }

    /// Event names in emission order.
    pub async fn names(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(DomainEvent::name).collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn emit(&self, event: DomainEvent) -> Result<(), EventSinkError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
