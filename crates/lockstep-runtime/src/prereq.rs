use crate::tools::CURL;
use lockstep_schema::BuildSystem;
use std::fmt;
use std::path::Path;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

/// Whether `program` resolves: an existing path, or a name found by `which`.
pub fn command_exists(program: &Path) -> bool {
    if program.components().count() > 1 {
        return program.is_file();
    }
    Command::new("which")
        .arg(program)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn check(missing: &mut Vec<MissingPrereq>, program: &Path, purpose: &'static str, install_hint: &'static str) {
    if !command_exists(program) {
        missing.push(MissingPrereq {
            name: program.display().to_string(),
            purpose,
            install_hint,
        });
    }
}

/// What a command is about to do. Only the tools that step shells out to are
/// required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Lock,
    Sync,
    Update,
    Run,
    Build,
    Publish,
    Install,
}

/// Executables a project may shell out to.
///
/// `solver` is `None` when the solver runs in-process and needs no executable.
#[derive(Debug, Clone, Copy)]
pub struct ToolPaths<'a> {
    pub conda: &'a Path,
    pub solver: Option<&'a Path>,
    pub conda_build: &'a Path,
    pub poetry: &'a Path,
}

fn need_conda(missing: &mut Vec<MissingPrereq>, tools: &ToolPaths<'_>) {
    check(
        missing,
        tools.conda,
        "creating environments from lock files",
        "https://docs.conda.io/en/latest/miniconda.html, or set conda-path",
    );
}

fn need_solver(missing: &mut Vec<MissingPrereq>, tools: &ToolPaths<'_>) {
    if let Some(solver) = tools.solver {
        check(
            missing,
            solver,
            "solving per-platform lock files",
            "conda install -c conda-forge conda-lock, or set solver-path",
        );
    }
}

/// Check the tools `operation` needs under `system`.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_prereqs(
    system: BuildSystem,
    operation: Operation,
    tools: &ToolPaths<'_>,
) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    match (system, operation) {
        (_, Operation::Install) => need_conda(&mut missing, tools),
        (BuildSystem::Poetry, _) => check(
            &mut missing,
            tools.poetry,
            "locking, building and publishing with poetry",
            "pipx install poetry, or set poetry-path",
        ),
        (BuildSystem::Conda, Operation::Lock) => need_solver(&mut missing, tools),
        (BuildSystem::Conda, Operation::Sync | Operation::Run) => need_conda(&mut missing, tools),
        (BuildSystem::Conda, Operation::Update) => {
            need_solver(&mut missing, tools);
            need_conda(&mut missing, tools);
        }
        (BuildSystem::Conda, Operation::Build) => check(
            &mut missing,
            tools.conda_build,
            "building conda packages",
            "conda install -c conda-forge conda-build",
        ),
        (BuildSystem::Conda, Operation::Publish) => check(
            &mut missing,
            Path::new(CURL),
            "uploading conda packages",
            "zypper install curl | apt install curl | dnf install curl | pacman -S curl",
        ),
    }
    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nlockstep delegates solving, installing, building and uploading to these tools.");
    msg
}
