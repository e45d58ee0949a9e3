// src/sinks/collecting.rs

use crate::engine::events::JobEvent;
use crate::engine::sink::EventSink;

use anyhow::Result;
use async_trait::async_trait;

/// Keeps every event in memory; used by tests to inspect a run.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Vec<JobEvent>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn events(&self) -> &[JobEvent] {
        &self.events
    }

    pub fn messages(&self) -> Vec<String> {
        self.events.iter().map(JobEvent::message).collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&mut self, event: JobEvent) -> Result<()> {
        self.events.push(event);
        Ok(())
    }
}
