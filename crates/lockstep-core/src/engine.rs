use crate::backend::{
    select_backend, BackendContext, BuildRequest, EnvLockRequest, LockOutcome, PackageBackend,
    PackageLockRequest, PublishRequest,
};
use crate::concurrency::{shutdown_requested, ProjectLock};
use crate::install::{self, InstallReport, InstallRequest};
use crate::CoreError;
use chrono::{DateTime, Utc};
use lockstep_runtime::{run_status, select_solver, SolveControl, Solver};
use lockstep_schema::{
    codec, package_name_from, parse_manifest_file, raw_lock_platform, remove_config_value,
    set_config_value, write_atomic, BuildSystem, CombinedLock, ConfigKey, Platform,
    ProjectConfig,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

static CANCELLED: fn() -> bool = shutdown_requested;

const UNSPECIFIED_PLATFORM: &str = "unspecified";

/// Central orchestration for one project.
///
/// Owns the resolved manifest and the solver, and persists every lock artifact it
/// produces. Lock operations on the same project are serialised through the
/// project lock file next to the manifest.
pub struct Engine {
    project: ProjectConfig,
    solver: Box<dyn Solver>,
    timeout: Option<Duration>,
}

/// A persisted combined lock.
#[derive(Debug, Clone, Serialize)]
pub struct LockReport {
    pub path: PathBuf,
    pub platforms: Vec<Platform>,
    pub digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    /// A combined multi-platform JSON artifact.
    Combined,
    /// An explicit lock with an embedded metadata block.
    Rich,
    /// An explicit lock without metadata.
    Plain,
}

/// What `lock-info` reports about a lock file.
#[derive(Debug, Clone, Serialize)]
pub struct LockInfo {
    pub path: PathBuf,
    pub kind: LockKind,
    pub package_name: String,
    pub version: Option<String>,
    pub entry_points: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Artifact count per platform.
    pub artifacts: BTreeMap<String, usize>,
    pub digest: Option<String>,
}

impl Engine {
    pub fn new(project: ProjectConfig, solver: Box<dyn Solver>) -> Self {
        let timeout = project.solver_timeout;
        Self {
            project,
            solver,
            timeout,
        }
    }

    /// Resolve the manifest at `manifest_path` and select the solver by name.
    pub fn from_manifest(manifest_path: &Path, solver_name: &str) -> Result<Self, CoreError> {
        let project = parse_manifest_file(manifest_path)?;
        let solver = select_solver(solver_name, project.tools.solver.as_deref())?;
        debug!(
            "loaded {} {} from {}, solver {}",
            project.package_name,
            project.version,
            project.manifest_path.display(),
            solver.name()
        );
        Ok(Self::new(project, solver))
    }

    /// Override the per-platform solver timeout from the manifest.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        if timeout.is_some() {
            self.timeout = timeout;
        }
        self
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    pub fn solver(&self) -> &dyn Solver {
        self.solver.as_ref()
    }

    fn context(&self) -> BackendContext<'_> {
        BackendContext {
            project: &self.project,
            solver: self.solver.as_ref(),
            control: SolveControl::new(self.timeout, &CANCELLED),
        }
    }

    fn backend(build_system: BuildSystem) -> Box<dyn PackageBackend> {
        debug!("using the {build_system} backend");
        select_backend(build_system)
    }

    fn platforms_or_default(&self, requested: &[Platform]) -> Vec<Platform> {
        if requested.is_empty() {
            self.project.env.platforms.clone()
        } else {
            requested.to_vec()
        }
    }

    fn persist(
        lock: &CombinedLock,
        platforms: &[Platform],
        path: &Path,
    ) -> Result<LockReport, CoreError> {
        lock.validate(platforms)?;
        lock.write_to_file(path)?;
        let report = LockReport {
            path: path.to_path_buf(),
            platforms: lock.platforms(),
            digest: lock.content_digest(),
        };
        info!(
            "wrote {} ({} platform(s), digest {})",
            path.display(),
            report.platforms.len(),
            report.digest.get(..12).unwrap_or(&report.digest)
        );
        Ok(report)
    }

    /// Lock the development environment. `None` when the build tool keeps its own lock.
    pub fn lock_env(&self, request: &EnvLockRequest) -> Result<Option<LockReport>, CoreError> {
        let _lock = ProjectLock::acquire(&self.project.project_dir)?;
        self.lock_env_locked(request, false)
    }

    fn lock_env_locked(
        &self,
        request: &EnvLockRequest,
        update: bool,
    ) -> Result<Option<LockReport>, CoreError> {
        let request = EnvLockRequest {
            platforms: self.platforms_or_default(&request.platforms),
            ..request.clone()
        };
        let backend = Self::backend(self.project.env.build_system);
        let ctx = self.context();
        let outcome = if update {
            backend.update(&ctx, &request)?
        } else {
            backend.lock_env(&ctx, &request)?
        };
        match outcome {
            LockOutcome::Combined(lock) => Ok(Some(Self::persist(
                &lock,
                &request.platforms,
                &self.project.env.lock_path,
            )?)),
            LockOutcome::Delegated => Ok(None),
        }
    }

    /// Lock the package at its current version, optionally relocking against a
    /// tested baseline.
    pub fn lock_package(&self, request: &PackageLockRequest) -> Result<LockReport, CoreError> {
        let _lock = ProjectLock::acquire(&self.project.project_dir)?;
        let request = PackageLockRequest {
            platforms: self.platforms_or_default(&request.platforms),
            ..request.clone()
        };
        let backend = Self::backend(self.project.package.build_system);
        let lock = backend.lock_package(&self.context(), &request)?;
        Self::persist(&lock, &request.platforms, &self.project.package.lock_path)
    }

    /// Install the locked environment, locking first if no lock exists yet.
    pub fn sync_env(&self, request: &EnvLockRequest) -> Result<Option<LockReport>, CoreError> {
        let lock_path = &self.project.env.lock_path;
        let backend = Self::backend(self.project.env.build_system);
        let mut report = None;
        if backend.build_system() == BuildSystem::Conda && !lock_path.is_file() {
            info!("{} does not exist, locking first", lock_path.display());
            report = self.lock_env(request)?;
        }
        backend.sync(&self.context(), lock_path)?;
        Ok(report)
    }

    /// Re-lock the environment and install the result.
    pub fn update_env(&self, request: &EnvLockRequest) -> Result<Option<LockReport>, CoreError> {
        let report = {
            let _lock = ProjectLock::acquire(&self.project.project_dir)?;
            self.lock_env_locked(request, true)?
        };
        if report.is_some() {
            let backend = Self::backend(self.project.env.build_system);
            backend.sync(&self.context(), &self.project.env.lock_path)?;
        }
        Ok(report)
    }

    pub fn build_package(&self, request: &BuildRequest) -> Result<PathBuf, CoreError> {
        Self::backend(self.project.package.build_system).build(&self.context(), request)
    }

    pub fn publish_package(&self, request: &PublishRequest) -> Result<Vec<PathBuf>, CoreError> {
        Self::backend(self.project.package.build_system).publish(&self.context(), request)
    }

    /// Run a command inside the development environment and return its exit code.
    pub fn run_in_env(&self, args: &[String]) -> Result<i32, CoreError> {
        if args.is_empty() {
            return Err(CoreError::NothingToRun);
        }
        let cmd = Self::backend(self.project.env.build_system).run_command(&self.context(), args);
        let status = run_status(cmd)?;
        debug!("{} exited with {status}", args[0]);
        Ok(status.code().unwrap_or(1))
    }

    /// Write one platform of a combined lock as a standalone explicit lock
    /// carrying the metadata block.
    pub fn export_lock(
        &self,
        lock_path: &Path,
        platform: &Platform,
        output: &Path,
    ) -> Result<(), CoreError> {
        let lock = CombinedLock::read_from_file(lock_path)?;
        let explicit = lock.explicit_lock_for(platform)?;
        let encoded = codec::encode(&explicit, &lock.metadata)?;
        write_atomic(output, encoded.as_bytes())?;
        info!(
            "exported {platform} from {} to {}",
            lock_path.display(),
            output.display()
        );
        Ok(())
    }

    /// Install an application from a rich lock into its own prefix.
    pub fn install_app(request: &InstallRequest) -> Result<InstallReport, CoreError> {
        install::install_app(request)
    }

    /// Set a `[tool.lockstep]` value in the manifest at `manifest_path`.
    pub fn set_config(
        manifest_path: &Path,
        key: ConfigKey,
        value: &str,
    ) -> Result<(), CoreError> {
        let _lock = ProjectLock::acquire(&manifest_dir(manifest_path)?)?;
        set_config_value(manifest_path, key, value)?;
        info!("set {key} in {}", manifest_path.display());
        Ok(())
    }

    /// Remove a `[tool.lockstep]` value. Returns whether it was set.
    pub fn remove_config(manifest_path: &Path, key: ConfigKey) -> Result<bool, CoreError> {
        let _lock = ProjectLock::acquire(&manifest_dir(manifest_path)?)?;
        let removed = remove_config_value(manifest_path, key)?;
        if removed {
            info!("removed {key} from {}", manifest_path.display());
        }
        Ok(removed)
    }

    /// Describe a combined, rich or plain lock file.
    ///
    /// A plain lock has no embedded package name, so `name_override` is required
    /// for it.
    pub fn lock_info(path: &Path, name_override: Option<&str>) -> Result<LockInfo, CoreError> {
        let text = std::fs::read_to_string(path)?;
        let source = path.display().to_string();

        if text.trim_start().starts_with('{') {
            let lock = CombinedLock::from_json_str(&text)?;
            let package_name = package_name_from(Some(&lock.metadata), name_override, &source)?;
            return Ok(LockInfo {
                path: path.to_path_buf(),
                kind: LockKind::Combined,
                package_name,
                version: lock.metadata.version.clone(),
                entry_points: lock.metadata.entry_points.clone(),
                created_at: Some(lock.metadata.created_at),
                artifacts: lock
                    .platform_tar_links
                    .iter()
                    .map(|(p, links)| (p.to_string(), links.len()))
                    .collect(),
                digest: Some(lock.content_digest()),
            });
        }

        let decoded = codec::decode(&text)?;
        let package_name = codec::resolve_package_name(&decoded, name_override, &source)?;
        let platform = raw_lock_platform(&decoded.header)
            .map_or_else(|| UNSPECIFIED_PLATFORM.to_owned(), Platform::into_inner);
        let artifacts = BTreeMap::from([(platform, decoded.artifacts().len())]);
        let (kind, version, entry_points, created_at) = match decoded.metadata {
            Some(m) => (LockKind::Rich, m.version, m.entry_points, Some(m.created_at)),
            None => (LockKind::Plain, None, Vec::new(), None),
        };
        Ok(LockInfo {
            path: path.to_path_buf(),
            kind,
            package_name,
            version,
            entry_points,
            created_at,
            artifacts,
            digest: None,
        })
    }
}

fn manifest_dir(manifest_path: &Path) -> Result<PathBuf, CoreError> {
    let absolute = std::path::absolute(manifest_path)?;
    Ok(absolute
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf))
}
