//! Runs a task through repeated change → test → checkpoint attempts, with
//! decisions from `ratchet-core` and rollback to the last stable checkpoint.

pub mod agent;
pub mod checkpoint;
pub mod runner;
pub mod task;
pub mod validate;

pub use runner::orchestrator::{
    FailureKind, Orchestrator, RunConfig, RunOutcome, RunResult, RunState,
};

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
