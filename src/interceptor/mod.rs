//! Workflow-worker instrumentation (`spec.md` §4.7).

pub mod worker;

pub use worker::{FailureKind, WorkerInterceptor};
