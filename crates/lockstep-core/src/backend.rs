use crate::pipeline::{
    effective_channels, env_descriptor, lock_descriptor, package_descriptor, LockContext,
};
use crate::relock::{relock, BaselineLock};
use crate::CoreError;
use lockstep_runtime::tools::{self, CondaBuildArgs};
use lockstep_runtime::{Credentials, SolveControl, Solver, SolverOptions};
use lockstep_schema::{
    BuildSystem, Channel, CombinedLock, CondaRecipe, Platform, ProjectConfig, SolverVariant,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

const RECIPE_DIR: &str = "conda.recipe";
const RECIPE_FILE: &str = "meta.yaml";
const CONDA_MAMBABUILD: &str = "conda-mambabuild";
const POETRY_DIST_DIR: &str = "dist";

/// Everything a backend needs for one operation.
#[derive(Clone, Copy)]
pub struct BackendContext<'a> {
    pub project: &'a ProjectConfig,
    pub solver: &'a dyn Solver,
    pub control: SolveControl<'a>,
}

impl BackendContext<'_> {
    pub fn conda(&self) -> PathBuf {
        tools::executable(self.project.tools.conda.as_deref(), tools::CONDA)
    }

    pub fn poetry(&self) -> PathBuf {
        tools::executable(self.project.tools.poetry.as_deref(), tools::POETRY)
    }

    pub fn conda_build(&self) -> PathBuf {
        conda_build_executable(self.project)
    }

    fn solver_options(&self, include_dev: bool, channel_overrides: &[Channel]) -> SolverOptions {
        SolverOptions {
            variant: self.project.solver_variant,
            include_dev,
            channel_overrides: channel_overrides.to_vec(),
            conda_exe: self.project.tools.conda.clone(),
        }
    }
}

/// The conda-build front end matching the configured solver variant.
pub fn conda_build_executable(project: &ProjectConfig) -> PathBuf {
    match project.solver_variant {
        SolverVariant::Conda => PathBuf::from(tools::CONDA_BUILD),
        SolverVariant::Mamba | SolverVariant::Micromamba => PathBuf::from(CONDA_MAMBABUILD),
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvLockRequest {
    pub platforms: Vec<Platform>,
    pub channel_overrides: Vec<Channel>,
    pub include_dev: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PackageLockRequest {
    pub platforms: Vec<Platform>,
    pub channel_overrides: Vec<Channel>,
    /// Path or `{platform}` template of a tested lock to relock against.
    pub baseline: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub python_version: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub repository_url: Option<String>,
    pub credentials: Option<Credentials>,
}

/// Result of a lock operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// A combined artifact for the engine to persist.
    Combined(CombinedLock),
    /// The build tool wrote its own lock file.
    Delegated,
}

/// Build-system specific implementation of the lock/build/publish/sync
/// capability set.
pub trait PackageBackend: Send + Sync {
    fn build_system(&self) -> BuildSystem;

    fn lock_env(
        &self,
        ctx: &BackendContext<'_>,
        request: &EnvLockRequest,
    ) -> Result<LockOutcome, CoreError>;

    fn lock_package(
        &self,
        _ctx: &BackendContext<'_>,
        _request: &PackageLockRequest,
    ) -> Result<CombinedLock, CoreError> {
        Err(CoreError::NotSupportedByBackend {
            backend: self.build_system(),
            operation: "package lock",
        })
    }

    /// Refresh the environment lock. A combined outcome still has to be
    /// persisted and synced by the caller.
    fn update(
        &self,
        ctx: &BackendContext<'_>,
        request: &EnvLockRequest,
    ) -> Result<LockOutcome, CoreError> {
        self.lock_env(ctx, request)
    }

    /// Build the package; returns the directory holding the build output.
    fn build(&self, ctx: &BackendContext<'_>, request: &BuildRequest)
        -> Result<PathBuf, CoreError>;

    /// Publish the built package; returns the uploaded files, if known.
    fn publish(
        &self,
        ctx: &BackendContext<'_>,
        request: &PublishRequest,
    ) -> Result<Vec<PathBuf>, CoreError>;

    /// Install the locked environment for the current host.
    fn sync(&self, ctx: &BackendContext<'_>, lock_path: &Path) -> Result<(), CoreError>;

    /// The command running `args` inside the project environment.
    fn run_command(&self, ctx: &BackendContext<'_>, args: &[String]) -> Command;
}

pub fn select_backend(build_system: BuildSystem) -> Box<dyn PackageBackend> {
    match build_system {
        BuildSystem::Conda => Box::new(CondaBackend),
        BuildSystem::Poetry => Box::new(PoetryBackend),
    }
}

/// Locks through the solver and builds with conda-build.
#[derive(Debug, Clone, Copy, Default)]
pub struct CondaBackend;

impl PackageBackend for CondaBackend {
    fn build_system(&self) -> BuildSystem {
        BuildSystem::Conda
    }

    fn lock_env(
        &self,
        ctx: &BackendContext<'_>,
        request: &EnvLockRequest,
    ) -> Result<LockOutcome, CoreError> {
        let project = ctx.project;
        let channels = effective_channels(project, &request.channel_overrides);
        let options = ctx.solver_options(request.include_dev, &request.channel_overrides);
        let lock_ctx = LockContext {
            solver: ctx.solver,
            options: &options,
            control: ctx.control,
        };
        let descriptor = env_descriptor(project, &channels, request.include_dev)?;
        info!(
            "locking environment '{}' ({} dependencies) with {}",
            descriptor.name,
            descriptor.dependencies.len(),
            ctx.solver.name()
        );
        let lock = lock_descriptor(&lock_ctx, project, &descriptor, &request.platforms)?;
        Ok(LockOutcome::Combined(lock))
    }

    fn lock_package(
        &self,
        ctx: &BackendContext<'_>,
        request: &PackageLockRequest,
    ) -> Result<CombinedLock, CoreError> {
        let project = ctx.project;
        let channels = effective_channels(project, &request.channel_overrides);
        let options = ctx.solver_options(false, &request.channel_overrides);
        let lock_ctx = LockContext {
            solver: ctx.solver,
            options: &options,
            control: ctx.control,
        };

        if let Some(spec) = &request.baseline {
            let baseline = BaselineLock::load(spec, &request.platforms, &project.project_dir)?;
            return relock(&lock_ctx, project, &baseline, &request.platforms, &channels);
        }

        info!(
            "locking package {}=={} with {}",
            project.package_name,
            project.version,
            ctx.solver.name()
        );
        let descriptor = package_descriptor(project, &channels);
        lock_descriptor(&lock_ctx, project, &descriptor, &request.platforms)
    }

    fn build(
        &self,
        ctx: &BackendContext<'_>,
        request: &BuildRequest,
    ) -> Result<PathBuf, CoreError> {
        let project = ctx.project;
        let recipe = CondaRecipe::from_project(project, request.python_version.as_deref())?;

        let scratch = tempfile::Builder::new().prefix("lockstep-recipe-").tempdir()?;
        let recipe_dir = scratch.path().join(RECIPE_DIR);
        recipe.write_to(recipe_dir.join(RECIPE_FILE))?;

        let output_dir = project.package.conda_build_path.as_path();
        info!(
            "building {} {} into {}",
            project.package_name,
            project.version,
            output_dir.display()
        );
        tools::conda_build(
            &ctx.conda_build(),
            &CondaBuildArgs {
                recipe_dir: &recipe_dir,
                output_dir,
                channels: &project.channels,
                python_version: request.python_version.as_deref(),
            },
        )?;
        Ok(output_dir.to_path_buf())
    }

    fn publish(
        &self,
        ctx: &BackendContext<'_>,
        request: &PublishRequest,
    ) -> Result<Vec<PathBuf>, CoreError> {
        let project = ctx.project;
        let url = request
            .repository_url
            .as_deref()
            .or(project.package.conda_publish_url.as_deref())
            .ok_or(CoreError::MissingPublishUrl)?;

        let build_dir = &project.package.conda_build_path;
        let packages =
            tools::find_built_packages(build_dir, &project.package_name, &project.version)?;
        if packages.is_empty() {
            return Err(CoreError::NoBuiltPackages {
                name: project.package_name.clone(),
                version: project.version.clone(),
                dir: build_dir.display().to_string(),
            });
        }

        for package in &packages {
            let Some(destination) = tools::upload_destination(url, package) else {
                warn!("skipping {}: cannot derive an upload path", package.display());
                continue;
            };
            info!("uploading {} to {destination}", package.display());
            tools::curl_upload(package, &destination, request.credentials.as_ref())?;
        }
        Ok(packages)
    }

    fn sync(&self, ctx: &BackendContext<'_>, lock_path: &Path) -> Result<(), CoreError> {
        let lock = CombinedLock::read_from_file(lock_path)?;
        let platform = Platform::current().ok_or(CoreError::UnsupportedHost {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        })?;
        let explicit = lock.explicit_lock_for(&platform)?;

        let mut file = tempfile::Builder::new()
            .prefix("lockstep-")
            .suffix(".lock")
            .tempfile()?;
        file.write_all(explicit.as_bytes())?;
        file.flush()?;

        let env_name = &ctx.project.env.name;
        info!("creating environment '{env_name}' for {platform}");
        tools::conda_create_from_lock(&ctx.conda(), file.path(), env_name)?;
        Ok(())
    }
    fn run_command(&self, ctx: &BackendContext<'_>, args: &[String]) -> Command {
        tools::conda_run_command(&ctx.conda(), &ctx.project.env.name, args)
    }
}

/// Delegates everything except package locking to poetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoetryBackend;

impl PoetryBackend {
    fn repository_name(project: &ProjectConfig) -> String {
        format!("lockstep_{}", project.package_name)
    }

    fn run(ctx: &BackendContext<'_>, args: &[&str]) -> Result<(), CoreError> {
        tools::poetry(&ctx.poetry(), &ctx.project.project_dir, args)?;
        Ok(())
    }
}

impl PackageBackend for PoetryBackend {
    fn build_system(&self) -> BuildSystem {
        BuildSystem::Poetry
    }

    fn lock_env(
        &self,
        ctx: &BackendContext<'_>,
        _request: &EnvLockRequest,
    ) -> Result<LockOutcome, CoreError> {
        Self::run(ctx, &["lock"])?;
        Ok(LockOutcome::Delegated)
    }

    fn update(
        &self,
        ctx: &BackendContext<'_>,
        _request: &EnvLockRequest,
    ) -> Result<LockOutcome, CoreError> {
        Self::run(ctx, &["update"])?;
        Ok(LockOutcome::Delegated)
    }

    fn build(
        &self,
        ctx: &BackendContext<'_>,
        _request: &BuildRequest,
    ) -> Result<PathBuf, CoreError> {
        Self::run(ctx, &["build"])?;
        Ok(ctx.project.project_dir.join(POETRY_DIST_DIR))
    }

    fn publish(
        &self,
        ctx: &BackendContext<'_>,
        request: &PublishRequest,
    ) -> Result<Vec<PathBuf>, CoreError> {
        let project = ctx.project;
        let repository = request
            .repository_url
            .as_deref()
            .or(project.package.poetry_publish_repository.as_deref());

        let repo_name = Self::repository_name(project);
        let config_key = format!("repositories.{repo_name}");
        if let Some(url) = repository {
            Self::run(ctx, &["config", &config_key, url])?;
        }

        let mut args = vec!["publish"];
        if repository.is_some() {
            args.extend(["--repository", repo_name.as_str()]);
        }
        if let Some(c) = &request.credentials {
            args.extend([
                "--username",
                c.username.as_str(),
                "--password",
                c.password.as_str(),
            ]);
        }
        Self::run(ctx, &args)?;
        Ok(Vec::new())
    }

    fn sync(&self, ctx: &BackendContext<'_>, _lock_path: &Path) -> Result<(), CoreError> {
        Self::run(ctx, &["install", "--sync"])
    }
    fn run_command(&self, ctx: &BackendContext<'_>, args: &[String]) -> Command {
        let mut cmd = tools::poetry_command(&ctx.poetry(), &ctx.project.project_dir, &["run"]);
        cmd.args(args);
        cmd
    }
}
