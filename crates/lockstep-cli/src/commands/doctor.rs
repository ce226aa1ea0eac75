use super::{ToolSet, EXIT_FAILURE, EXIT_SUCCESS};
use lockstep_core::ProjectLock;
use lockstep_runtime::prereq::command_exists;
use lockstep_runtime::{select_solver, CONDA_LOCK};
use lockstep_schema::{parse_manifest_file, BuildSystem, Platform, ProjectConfig};
use std::path::Path;

pub fn run(manifest: &Path, solver: &str, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    match Platform::current() {
        Some(p) => checks.push(Check::pass("host_platform", &format!("Host platform: {p}"))),
        None => checks.push(Check::warn(
            "host_platform",
            "Host is not a supported conda platform; env sync will not work here",
        )),
    }

    match parse_manifest_file(manifest) {
        Ok(project) => {
            checks.push(Check::pass(
                "manifest",
                &format!(
                    "Manifest OK: {} {} ({} platform(s))",
                    project.package_name,
                    project.version,
                    project.env.platforms.len()
                ),
            ));
            check_tools(&project, solver, &mut checks, &mut all_pass);
            check_project_lock(&project, &mut checks);
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail(
                "manifest",
                &format!("Cannot load {}: {e}", manifest.display()),
            ));
        }
    }

    print_results(&checks, all_pass, json_output)
}

fn check_tools(project: &ProjectConfig, solver: &str, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let tools = ToolSet::for_project(project);
    let uses = |system: BuildSystem| {
        project.env.build_system == system || project.package.build_system == system
    };

    match select_solver(solver, project.tools.solver.as_deref()) {
        Ok(s) if s.available() => {
            checks.push(Check::pass("solver", &format!("Solver '{}' available", s.name())));
        }
        Ok(s) => {
            *all_pass = false;
            checks.push(Check::fail(
                "solver",
                &format!("Solver '{}' not found ({})", s.name(), tools.solver.display()),
            ));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("solver", &e.to_string()));
        }
    }

    let mut wanted: Vec<(&str, &Path)> = Vec::new();
    if uses(BuildSystem::Conda) {
        wanted.push(("conda", tools.conda.as_path()));
        if solver == CONDA_LOCK {
            wanted.push(("conda_lock", tools.solver.as_path()));
        }
        wanted.push(("conda_build", tools.conda_build.as_path()));
        wanted.push(("curl", Path::new("curl")));
    }
    if uses(BuildSystem::Poetry) {
        wanted.push(("poetry", tools.poetry.as_path()));
    }
    for (name, program) in wanted {
        if command_exists(program) {
            checks.push(Check::pass(name, &format!("Found {}", program.display())));
        } else {
            *all_pass = false;
            checks.push(Check::fail(name, &format!("Missing {}", program.display())));
        }
    }
}

fn check_project_lock(project: &ProjectConfig, checks: &mut Vec<Check>) {
    match ProjectLock::try_acquire(&project.project_dir) {
        Ok(Some(_)) => checks.push(Check::pass("project_lock", "Project lock is free")),
        Ok(None) => checks.push(Check::warn(
            "project_lock",
            "Project lock is held by another lockstep process",
        )),
        Err(e) => checks.push(Check::warn(
            "project_lock",
            &format!("Cannot check project lock: {e}"),
        )),
    }
    for (name, path) in [
        ("env_lock", &project.env.lock_path),
        ("package_lock", &project.package.lock_path),
    ] {
        if path.is_file() {
            checks.push(Check::info(name, &format!("{} exists", path.display())));
        } else {
            checks.push(Check::info(name, &format!("{} not created yet", path.display())));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("lockstep doctor\n");
        for check in checks {
            let icon = match check.status.as_str() {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: String,
    status: String,
    message: String,
}

impl Check {
    fn new(name: &str, status: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: status.to_owned(),
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
