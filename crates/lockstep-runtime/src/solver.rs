use crate::process::{supervise, SolveControl};
use crate::RuntimeError;
use lockstep_schema::{Channel, Platform, SolverVariant};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Output naming passed to the solver; `{platform}` is substituted per target.
pub const FILENAME_TEMPLATE: &str = "conda-{platform}.lock";

/// Default solver executable, looked up on PATH.
pub const CONDA_LOCK: &str = "conda-lock";

/// Flags shared by every platform of one lock operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverOptions {
    pub variant: SolverVariant,
    pub include_dev: bool,
    pub channel_overrides: Vec<Channel>,
    /// conda/mamba executable the solver should drive.
    pub conda_exe: Option<PathBuf>,
}

/// One platform's solve: descriptor files in, `conda-<platform>.lock` out in `work_dir`.
#[derive(Debug, Clone, Copy)]
pub struct SolveRequest<'a> {
    pub descriptors: &'a [PathBuf],
    pub platform: &'a Platform,
    pub work_dir: &'a Path,
    pub options: &'a SolverOptions,
}

pub trait Solver: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Solve a single platform, blocking until the lock file is written or the
    /// solve fails. Must honour `control` for timeout and cancellation.
    fn solve(&self, request: &SolveRequest<'_>, control: &SolveControl<'_>)
        -> Result<(), RuntimeError>;
}

/// Drives the `conda-lock` executable, one process per platform.
pub struct CondaLockSolver {
    executable: PathBuf,
}

impl Default for CondaLockSolver {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CondaLockSolver {
    pub fn new(executable: Option<&Path>) -> Self {
        Self {
            executable: executable.map_or_else(|| PathBuf::from(CONDA_LOCK), Path::to_path_buf),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// The command for one platform. The working directory is set on the command,
    /// never on this process.
    pub fn command(&self, request: &SolveRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("lock");
        for descriptor in request.descriptors {
            cmd.arg("--file").arg(descriptor);
        }
        cmd.args(["--platform", request.platform.as_str()])
            .args(["--kind", "explicit"])
            .args(["--filename-template", FILENAME_TEMPLATE]);
        if let Some(conda) = &request.options.conda_exe {
            cmd.arg("--conda").arg(conda);
        }
        match request.options.variant {
            SolverVariant::Conda => {}
            SolverVariant::Mamba => {
                cmd.arg("--mamba");
            }
            SolverVariant::Micromamba => {
                cmd.arg("--micromamba");
            }
        }
        cmd.arg(if request.options.include_dev {
            "--dev-dependencies"
        } else {
            "--no-dev-dependencies"
        });
        for channel in &request.options.channel_overrides {
            cmd.args(["--channel", channel.as_str()]);
        }
        cmd.current_dir(request.work_dir);
        cmd
    }
}

impl Solver for CondaLockSolver {
    fn name(&self) -> &str {
        "conda-lock"
    }

    fn available(&self) -> bool {
        Command::new(&self.executable)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn solve(
        &self,
        request: &SolveRequest<'_>,
        control: &SolveControl<'_>,
    ) -> Result<(), RuntimeError> {
        supervise(self.command(request), request.platform, control)
    }
}

/// Pick a solver by name. `executable` overrides the conda-lock binary.
pub fn select_solver(
    name: &str,
    executable: Option<&Path>,
) -> Result<Box<dyn Solver>, RuntimeError> {
    match name {
        "conda-lock" => Ok(Box::new(CondaLockSolver::new(executable))),
        "mock" => Ok(Box::new(crate::mock::MockSolver::new())),
        other => Err(RuntimeError::SolverUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn command_line_for_one_platform() {
        let descriptors = vec![PathBuf::from("/tmp/env.yaml")];
        let platform = Platform::new("osx-64");
        let options = SolverOptions {
            variant: SolverVariant::Micromamba,
            include_dev: false,
            channel_overrides: vec![Channel::new("conda-forge")],
            conda_exe: Some(PathBuf::from("/opt/bin/micromamba")),
        };
        let request = SolveRequest {
            descriptors: &descriptors,
            platform: &platform,
            work_dir: Path::new("/tmp/work"),
            options: &options,
        };
        let cmd = CondaLockSolver::new(Some(Path::new("/opt/bin/conda-lock"))).command(&request);
        assert_eq!(cmd.get_program(), "/opt/bin/conda-lock");
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/tmp/work")));
        assert_eq!(
            args(&cmd),
            [
                "lock",
                "--file",
                "/tmp/env.yaml",
                "--platform",
                "osx-64",
                "--kind",
                "explicit",
                "--filename-template",
                "conda-{platform}.lock",
                "--conda",
                "/opt/bin/micromamba",
                "--micromamba",
                "--no-dev-dependencies",
                "--channel",
                "conda-forge",
            ]
        );
    }

    #[test]
    fn dev_dependencies_flag() {
        let descriptors = vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")];
        let platform = Platform::new("linux-64");
        let options = SolverOptions {
            include_dev: true,
            ..SolverOptions::default()
        };
        let request = SolveRequest {
            descriptors: &descriptors,
            platform: &platform,
            work_dir: Path::new("."),
            options: &options,
        };
        let a = args(&CondaLockSolver::default().command(&request));
        assert!(a.contains(&"--dev-dependencies".to_owned()));
        assert_eq!(a.iter().filter(|x| *x == "--file").count(), 2);
        assert!(!a.contains(&"--mamba".to_owned()));
    }

    #[test]
    fn select_known_solvers() {
        assert_eq!(select_solver("conda-lock", None).unwrap().name(), "conda-lock");
        assert_eq!(select_solver("mock", None).unwrap().name(), "mock");
        assert!(matches!(
            select_solver("pip", None),
            Err(RuntimeError::SolverUnavailable(_))
        ));
    }
}
