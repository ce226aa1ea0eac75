use super::{json_pretty, require_tools, EXIT_SUCCESS};
use lockstep_core::{Engine, InstallRequest};
use lockstep_runtime::tools::{CONDA_BUILD, POETRY};
use lockstep_runtime::{Operation, ToolPaths};
use lockstep_schema::BuildSystem;
use std::path::Path;

pub fn install(request: &InstallRequest, json: bool) -> Result<u8, String> {
    require_tools(
        BuildSystem::Conda,
        &[Operation::Install],
        &ToolPaths {
            conda: &request.conda,
            solver: None,
            conda_build: Path::new(CONDA_BUILD),
            poetry: Path::new(POETRY),
        },
    )?;
    let report = Engine::install_app(request).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }
    println!(
        "installed {} into {}",
        report.package_name,
        report.prefix.display()
    );
    for link in &report.linked {
        println!("  linked {}", link.display());
    }
    for name in &report.missing {
        println!("  not provided: {name}");
    }
    Ok(EXIT_SUCCESS)
}
