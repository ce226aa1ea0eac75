use super::{json_pretty, EXIT_SUCCESS};
use console::Style;
use lockstep_core::{Engine, LockKind};
use std::path::Path;

pub fn colorize_kind(kind: LockKind) -> String {
    match kind {
        LockKind::Combined => Style::new().green().apply_to("combined").to_string(),
        LockKind::Rich => Style::new().cyan().apply_to("rich").to_string(),
        LockKind::Plain => Style::new().yellow().apply_to("plain").to_string(),
    }
}

pub fn run(file: &Path, package_name: Option<&str>, json: bool) -> Result<u8, String> {
    let info = Engine::lock_info(file, package_name).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&info)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("file:         {}", info.path.display());
    println!("kind:         {}", colorize_kind(info.kind));
    println!("package:      {}", info.package_name);
    println!("version:      {}", info.version.as_deref().unwrap_or("(none)"));
    if info.entry_points.is_empty() {
        println!("entry points: (none)");
    } else {
        println!("entry points: {}", info.entry_points.join(", "));
    }
    if let Some(created) = info.created_at {
        println!("created_at:   {}", created.to_rfc3339());
    }
    for (platform, count) in &info.artifacts {
        println!("{:<14}{count} artifacts", format!("{platform}:"));
    }
    if let Some(digest) = &info.digest {
        println!("digest:       {digest}");
    }
    Ok(EXIT_SUCCESS)
}
