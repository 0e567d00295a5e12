//! Runner Dispatch
//!
//! Hands emitted documents to an external CWL runner.
//!
//! - [`runner`]: one invocation, its configuration and the [`Launcher`] seam
//! - [`batch`]: many value sets run in parallel with cooperative cancellation

pub mod batch;
pub mod runner;

pub use batch::{expand_columns, job_key, BatchDispatcher, BatchReport, CancelToken, JobResult};
pub use runner::{
    output_globs, Invocation, LaunchOutput, Launcher, RunConfig, RunDispatcher, RunResult,
    SystemLauncher, DEFAULT_RUNNER,
};
