//! Core orchestration for lockstep.
//!
//! This crate ties together manifest resolution, the solver runtime and the lock
//! artifacts into the `Engine`: the central API for locking environments and
//! packages, constrained relocking against a tested baseline, syncing, building,
//! publishing and inspecting lock files. Build-system specific work goes through
//! the `PackageBackend` trait. Applications can be installed straight from a
//! rich lock. It also provides the project-level lock and cooperative
//! cancellation.

pub mod backend;
pub mod concurrency;
pub mod engine;
pub mod install;
pub mod pipeline;
pub mod relock;

pub use backend::{
    select_backend, BackendContext, BuildRequest, CondaBackend, EnvLockRequest, LockOutcome,
    PackageBackend, PackageLockRequest, PoetryBackend, PublishRequest,
};
pub use concurrency::{install_signal_handler, shutdown_requested, ProjectLock};
pub use engine::{Engine, LockInfo, LockKind, LockReport};
pub use install::{default_bin_dir, default_install_dir, InstallReport, InstallRequest};
pub use relock::BaselineLock;

use lockstep_schema::BuildSystem;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] lockstep_schema::ManifestError),
    #[error("dependency error: {0}")]
    Spec(#[from] lockstep_schema::SpecError),
    #[error("lock error: {0}")]
    Lock(#[from] lockstep_schema::LockError),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] lockstep_schema::DescriptorError),
    #[error("runtime error: {0}")]
    Runtime(#[from] lockstep_runtime::RuntimeError),
    #[error("{operation} is not supported by the {backend} backend")]
    NotSupportedByBackend {
        backend: BuildSystem,
        operation: &'static str,
    },
    #[error("this host ({os}/{arch}) is not a supported conda platform")]
    UnsupportedHost { os: &'static str, arch: &'static str },
    #[error("no repository URL to publish to; pass one or set conda-publish-url")]
    MissingPublishUrl,
    #[error("no built packages for {name} {version} under {dir}; build the package first")]
    NoBuiltPackages {
        name: String,
        version: String,
        dir: String,
    },
    #[error("no command given to run")]
    NothingToRun,
    #[error("entry point '{0}' is not a plain file name")]
    InvalidEntryPoint(String),
    #[error("entry points already exist in {dir}: {}; pass --force to replace them", names.join(", "))]
    EntryPointConflict { names: Vec<String>, dir: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
