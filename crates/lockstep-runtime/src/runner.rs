use crate::process::SolveControl;
use crate::solver::{SolveRequest, Solver, SolverOptions};
use crate::RuntimeError;
use lockstep_schema::Platform;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

/// One platform to solve and the descriptors to feed the solver for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveJob {
    pub platform: Platform,
    pub descriptors: Vec<PathBuf>,
}

impl SolveJob {
    pub fn new(platform: Platform, descriptors: Vec<PathBuf>) -> Self {
        Self {
            platform,
            descriptors,
        }
    }
}

/// Solve every job concurrently, writing `conda-<platform>.lock` files into `work_dir`.
///
/// All jobs run to completion (or timeout/cancellation) before returning so
/// every failure is reported. Success requires every platform to succeed; the
/// error returned is the first failing platform in job order.
pub fn run_platforms(
    solver: &dyn Solver,
    jobs: &[SolveJob],
    work_dir: &Path,
    options: &SolverOptions,
    control: &SolveControl<'_>,
) -> Result<(), RuntimeError> {
    if jobs.is_empty() {
        return Err(RuntimeError::NoPlatforms);
    }
    if let Some(dup) = jobs
        .iter()
        .enumerate()
        .find_map(|(i, j)| jobs[..i].iter().any(|o| o.platform == j.platform).then_some(&j.platform))
    {
        return Err(RuntimeError::DuplicatePlatform(dup.clone()));
    }

    info!(
        "solving {} platform(s) with {}: {}",
        jobs.len(),
        solver.name(),
        jobs.iter()
            .map(|j| j.platform.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let outcomes: Vec<(&Platform, Result<(), RuntimeError>)> = jobs
        .par_iter()
        .map(|job| {
            let started = Instant::now();
            let request = SolveRequest {
                descriptors: &job.descriptors,
                platform: &job.platform,
                work_dir,
                options,
            };
            let result = solver.solve(&request, control);
            if result.is_ok() {
                info!(
                    "[{}] solved in {:.1}s",
                    job.platform,
                    started.elapsed().as_secs_f64()
                );
            }
            (&job.platform, result)
        })
        .collect();

    let mut first_failure = None;
    for (platform, result) in outcomes {
        if let Err(e) = result {
            error!("[{platform}] {e}");
            first_failure.get_or_insert(e);
        }
    }
    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
