//! Local execution of D2X Cloud jobs.
//!
//! `run::run_job` claims a job from the worker API, unpacks the repository,
//! brings an org into the local keychains, turns the job's steps into
//! CumulusCI invocations and reports progress through an `EventSink`.

pub mod checkout;
pub mod dependencies;
pub mod events;
pub mod job;
pub mod orgs;
pub mod plan;
pub mod run;
pub mod sink;
pub mod summary;

pub use run::{run_job, RunOptions};
