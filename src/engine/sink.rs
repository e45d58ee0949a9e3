// src/engine/sink.rs

use crate::engine::events::JobEvent;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: JobEvent) -> Result<()>;
}
