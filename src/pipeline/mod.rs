// src/pipeline/mod.rs

//! Run orchestration.
//!
//! - `context`: a parser bound to a writer for one run
//! - `worker`: runs a context on its own task with chunk acknowledgements
//! - `driver`: parser selection, error logging and the resume loop

pub mod context;
pub mod driver;
pub mod worker;

pub use context::ExecutionContext;
pub use driver::{
    AutoResume, DriveOutcome, Driver, DriverState, Pass, ResumePrompt, RunRequest, SinglePass,
};
pub use worker::{RunReport, WorkerOptions};
