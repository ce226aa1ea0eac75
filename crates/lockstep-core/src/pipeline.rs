//! manifest → descriptor → per-platform solve → combine.
//!
//! All intermediate files live in a scratch directory that is removed on every
//! exit path; only the returned [`CombinedLock`] leaves this module.

use crate::CoreError;
use lockstep_runtime::{run_platforms, SolveControl, SolveJob, Solver, SolverOptions};
use lockstep_schema::{
    combine_platform_locks, translate, Channel, CombinedLock, EnvironmentDescriptor,
    LockMetadata, Platform, ProjectConfig, RequirementSpecifier,
};
use std::path::Path;
use tracing::{debug, info};

const DESCRIPTOR_FILE: &str = "environment.yaml";
const OUTPUT_DIR: &str = "locks";

/// Solver plus the flags and controls for one lock operation.
#[derive(Clone, Copy)]
pub struct LockContext<'a> {
    pub solver: &'a dyn Solver,
    pub options: &'a SolverOptions,
    pub control: SolveControl<'a>,
}

/// Channels for a descriptor: the overrides when given, else the manifest's.
pub fn effective_channels(project: &ProjectConfig, overrides: &[Channel]) -> Vec<Channel> {
    if overrides.is_empty() {
        project.channels.clone()
    } else {
        overrides.to_vec()
    }
}

/// Descriptor for the development environment: every declared dependency.
pub fn env_descriptor(
    project: &ProjectConfig,
    channels: &[Channel],
    include_dev: bool,
) -> Result<EnvironmentDescriptor, CoreError> {
    let specs = translate(&project.dependencies, &project.dev_dependencies, include_dev)?;
    Ok(EnvironmentDescriptor::new(&project.env.name, channels, &specs))
}

/// Descriptor for the package lock: only the package itself at its current version.
pub fn package_descriptor(project: &ProjectConfig, channels: &[Channel]) -> EnvironmentDescriptor {
    EnvironmentDescriptor::new(
        &project.package_name,
        channels,
        &[RequirementSpecifier::pinned(&project.package_name, &project.version)],
    )
}

/// Lock one descriptor for every platform.
pub fn lock_descriptor(
    ctx: &LockContext<'_>,
    project: &ProjectConfig,
    descriptor: &EnvironmentDescriptor,
    platforms: &[Platform],
) -> Result<CombinedLock, CoreError> {
    let per_platform: Vec<(Platform, EnvironmentDescriptor)> = platforms
        .iter()
        .map(|p| (p.clone(), descriptor.clone()))
        .collect();
    lock_per_platform(ctx, project, &per_platform)
}

/// Lock each platform against its own descriptor and combine the results.
///
/// Fails without producing anything unless every platform solves.
pub fn lock_per_platform(
    ctx: &LockContext<'_>,
    project: &ProjectConfig,
    descriptors: &[(Platform, EnvironmentDescriptor)],
) -> Result<CombinedLock, CoreError> {
    let scratch = tempfile::Builder::new().prefix("lockstep-").tempdir()?;
    debug!("lock scratch directory {}", scratch.path().display());

    let mut jobs = Vec::with_capacity(descriptors.len());
    for (platform, descriptor) in descriptors {
        let path = scratch
            .path()
            .join(platform.as_str())
            .join(DESCRIPTOR_FILE);
        descriptor.write_to(&path)?;
        jobs.push(SolveJob::new(platform.clone(), vec![path]));
    }
    let platforms: Vec<Platform> = descriptors.iter().map(|(p, _)| p.clone()).collect();

    let output = scratch.path().join(OUTPUT_DIR);
    std::fs::create_dir_all(&output)?;
    run_platforms(ctx.solver, &jobs, &output, ctx.options, &ctx.control)?;

    info!("combining {} platform lock(s)", platforms.len());
    let combined = combine_from_dir(&output, &platforms, project)?;
    Ok(combined)
}

fn combine_from_dir(
    dir: &Path,
    platforms: &[Platform],
    project: &ProjectConfig,
) -> Result<CombinedLock, CoreError> {
    Ok(combine_platform_locks(
        dir,
        platforms,
        LockMetadata::for_project(project),
    )?)
}
