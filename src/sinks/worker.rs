// src/sinks/worker.rs

use crate::engine::events::{JobEvent, JobEventKind};
use crate::engine::sink::EventSink;
use crate::worker::{JobSigner, JobStatus, JobStatusUpdate, WorkerClient};

use anyhow::Result;
use async_trait::async_trait;

/// Reports job progress to D2X Cloud as signed status updates.
pub struct WorkerEventSink<'a> {
    client: &'a WorkerClient,
    signer: &'a JobSigner,
    job_id: String,
}

impl<'a> WorkerEventSink<'a> {
    pub fn new(client: &'a WorkerClient, signer: &'a JobSigner, job_id: &str) -> Self {
        Self {
            client,
            signer,
            job_id: job_id.to_string(),
        }
    }
}

fn status_update(event: &JobEvent) -> JobStatusUpdate {
    let log = format!("{}\n", event.message());
    match &event.kind {
        JobEventKind::JobFinished => JobStatusUpdate::new(JobStatus::Success, log),
        JobEventKind::JobFailed { exception } => JobStatusUpdate::failed(log, exception.clone()),
        _ => JobStatusUpdate::new(JobStatus::InProgress, log),
    }
}

#[async_trait]
impl EventSink for WorkerEventSink<'_> {
    async fn emit(&mut self, event: JobEvent) -> Result<()> {
        let update = status_update(&event);
        let terminal = !matches!(update.status, JobStatus::InProgress);

        match self
            .client
            .job_status_update(self.signer, &self.job_id, &update)
            .await
        {
            Ok(()) => Ok(()),
            // Progress lines are best effort; the final status must land.
            Err(err) if !terminal => {
                tracing::warn!(job_id = %self.job_id, error = %err, "failed to report job progress");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
