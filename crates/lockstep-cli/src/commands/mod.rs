pub mod app;
pub mod completions;
pub mod config;
pub mod doctor;
pub mod env;
pub mod lock_info;
pub mod man_pages;
pub mod package;

use indicatif::{ProgressBar, ProgressStyle};
use lockstep_core::{CoreError, Engine, LockReport};
use lockstep_runtime::tools::{self, CONDA};
use lockstep_runtime::{
    check_prereqs, format_missing, MissingPrereq, Operation, ToolPaths, CONDA_LOCK,
};
use lockstep_schema::project::parse_platforms;
use lockstep_schema::{BuildSystem, Channel, Platform, ProjectConfig};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_LOCK_ERROR: u8 = 3;

const MOCK_SOLVER: &str = "mock";

/// Platforms and channels given on the command line for a lock operation.
#[derive(Debug, Clone, Default)]
pub struct LockSelection {
    pub platforms: Vec<String>,
    pub channels: Vec<String>,
}

impl LockSelection {
    pub fn platforms(&self) -> Result<Vec<Platform>, String> {
        parse_platforms(&self.platforms).map_err(|e| CoreError::from(e).to_string())
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channels.iter().map(|c| Channel::new(c.as_str())).collect()
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    pb.set_style(
        ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

/// Run a solver-bound operation behind a spinner unless JSON output is requested.
pub fn with_spinner<T>(
    json: bool,
    msg: &str,
    done: &str,
    failed: &str,
    op: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, String> {
    let pb = if json { None } else { Some(spinner(msg)) };
    let result = op();
    if let Some(ref pb) = pb {
        match &result {
            Ok(_) => spin_ok(pb, done),
            Err(_) => spin_fail(pb, failed),
        }
    }
    result.map_err(|e| e.to_string())
}

/// Print the outcome of a lock operation. `None` means the build tool kept its own lock.
pub fn print_lock_report(report: Option<&LockReport>, json: bool) -> Result<(), String> {
    match (report, json) {
        (Some(r), true) => {
            let payload = serde_json::json!({
                "status": "locked",
                "path": r.path,
                "platforms": r.platforms,
                "digest": r.digest,
            });
            println!("{}", json_pretty(&payload)?);
        }
        (None, true) => {
            println!("{}", json_pretty(&serde_json::json!({ "status": "delegated" }))?);
        }
        (Some(r), false) => {
            let platforms: Vec<&str> = r.platforms.iter().map(Platform::as_str).collect();
            println!("wrote {}", r.path.display());
            println!("platforms: {}", platforms.join(", "));
            println!("digest:    {}", r.digest);
        }
        (None, false) => println!("lock file managed by poetry"),
    }
    Ok(())
}

/// Executables a backend will call, paired for the prerequisite checks.
pub struct ToolSet {
    pub conda: PathBuf,
    pub solver: PathBuf,
    pub conda_build: PathBuf,
    pub poetry: PathBuf,
}

impl ToolSet {
    pub fn for_project(project: &ProjectConfig) -> Self {
        Self {
            conda: tools::executable(project.tools.conda.as_deref(), CONDA),
            solver: tools::executable(project.tools.solver.as_deref(), CONDA_LOCK),
            conda_build: lockstep_core::backend::conda_build_executable(project),
            poetry: tools::executable(project.tools.poetry.as_deref(), tools::POETRY),
        }
    }

    /// `in_process_solver` leaves the solver executable out of every check.
    pub fn paths(&self, in_process_solver: bool) -> ToolPaths<'_> {
        ToolPaths {
            conda: &self.conda,
            solver: (!in_process_solver).then_some(self.solver.as_path()),
            conda_build: &self.conda_build,
            poetry: &self.poetry,
        }
    }
}

fn prereqs_skipped() -> bool {
    std::env::var("LOCKSTEP_SKIP_PREREQS").as_deref() == Ok("1")
}

/// Check every tool `operations` shell out to under `system`, reporting each
/// missing tool once.
pub fn require_tools(
    system: BuildSystem,
    operations: &[Operation],
    paths: &ToolPaths<'_>,
) -> Result<(), String> {
    if prereqs_skipped() {
        return Ok(());
    }
    let mut missing: Vec<MissingPrereq> = Vec::new();
    for &operation in operations {
        for item in check_prereqs(system, operation, paths) {
            if !missing.iter().any(|m| m.name == item.name) {
                missing.push(item);
            }
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format_missing(&missing))
    }
}

/// Fail early when a tool `operations` need for this project is missing.
///
/// Skipped when `LOCKSTEP_SKIP_PREREQS=1`.
pub fn ensure_prereqs(
    engine: &Engine,
    system: BuildSystem,
    operations: &[Operation],
) -> Result<(), String> {
    let tools = ToolSet::for_project(engine.project());
    require_tools(
        system,
        operations,
        &tools.paths(engine.solver().name() == MOCK_SOLVER),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_MANIFEST_ERROR);
        assert_ne!(EXIT_MANIFEST_ERROR, EXIT_LOCK_ERROR);
    }

    #[test]
    fn selection_rejects_unknown_platform() {
        let sel = LockSelection {
            platforms: vec!["linux-64".into(), "amiga-68k".into()],
            channels: vec![],
        };
        let err = sel.platforms().unwrap_err();
        assert!(err.starts_with("manifest error:"), "{err}");
    }

    #[test]
    fn selection_keeps_channel_order() {
        let sel = LockSelection {
            platforms: vec![],
            channels: vec!["internal".into(), "conda-forge".into()],
        };
        assert_eq!(
            sel.channels(),
            [Channel::new("internal"), Channel::new("conda-forge")]
        );
        assert!(sel.platforms().unwrap().is_empty());
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
