//! External process plumbing for lockstep.
//!
//! This crate implements the execution layer: the pluggable `Solver` trait with
//! the conda-lock solver and a deterministic mock, the per-platform lock runner
//! (parallel fan-out with timeout and cancellation), invocation of the external
//! conda/conda-build/poetry/curl tools, and prerequisite checking.

pub mod mock;
pub mod prereq;
pub mod process;
pub mod runner;
pub mod solver;
pub mod tools;

pub use mock::MockSolver;
pub use prereq::{check_prereqs, format_missing, MissingPrereq, Operation, ToolPaths};
pub use process::{run_status, SolveControl};
pub use runner::{run_platforms, SolveJob};
pub use solver::{
    select_solver, CondaLockSolver, SolveRequest, Solver, SolverOptions, CONDA_LOCK,
};
pub use tools::Credentials;

use lockstep_schema::{DescriptorError, Platform};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("solver '{0}' is not available on this system")]
    SolverUnavailable(String),
    #[error("no platforms requested")]
    NoPlatforms,
    #[error("platform '{0}' requested more than once")]
    DuplicatePlatform(Platform),
    #[error("solver failed for platform '{platform}' (exit code {}): {stderr}", code.map_or_else(|| "none".to_owned(), |c| c.to_string()))]
    SolverInvocationFailed {
        platform: Platform,
        code: Option<i32>,
        stderr: String,
    },
    #[error("solver for platform '{platform}' did not finish within {secs}s")]
    SolverTimedOut { platform: Platform, secs: u64 },
    #[error("solve for platform '{0}' was cancelled")]
    Cancelled(Platform),
    #[error("'{tool}' failed (exit code {})", code.map_or_else(|| "none".to_owned(), |c| c.to_string()))]
    ToolFailed { tool: String, code: Option<i32> },
    #[error("'{0}' was not found; install it or set its path in the manifest")]
    ToolNotFound(String),
}
