// src/engine/events.rs

#[derive(Debug, Clone, PartialEq)]
pub enum JobEventKind {
    JobStarted,
    StepStarted { path: String, name: String },
    StepFinished { path: String, name: String },
    JobFinished,
    JobFailed { exception: String },
}

#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: String,
    pub kind: JobEventKind,
}

impl JobEvent {
    pub fn new(job_id: &str, kind: JobEventKind) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
        }
    }

    /// Log line reported to D2X Cloud for this event.
    pub fn message(&self) -> String {
        match &self.kind {
            JobEventKind::JobStarted => format!("Job {} started", self.job_id),
            JobEventKind::StepStarted { path, name } => format!("Task {}/{} started", path, name),
            JobEventKind::StepFinished { path, name } => format!("Task {}/{} completed", path, name),
            JobEventKind::JobFinished => format!("Job {} completed", self.job_id),
            JobEventKind::JobFailed { .. } => format!("Job {} failed", self.job_id),
        }
    }
}

pub fn job_started(job_id: &str) -> JobEvent {
    JobEvent::new(job_id, JobEventKind::JobStarted)
}
