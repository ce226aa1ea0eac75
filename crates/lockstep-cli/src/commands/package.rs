use super::{
    ensure_prereqs, json_pretty, print_lock_report, with_spinner, LockSelection, EXIT_SUCCESS,
};
use lockstep_core::{BuildRequest, Engine, PackageLockRequest, PublishRequest};
use lockstep_runtime::{Credentials, Operation};
use lockstep_schema::Platform;
use std::path::PathBuf;

#[derive(Debug)]
pub enum Action {
    Lock {
        selection: LockSelection,
        baseline: Option<String>,
    },
    Build {
        python_version: Option<String>,
    },
    Publish {
        repository_url: Option<String>,
        username: Option<String>,
        password: Option<String>,
        build: bool,
        python_version: Option<String>,
    },
    ExportLock {
        lock_file: Option<PathBuf>,
        platform: Option<String>,
        output: PathBuf,
    },
}

impl Action {
    /// Operations whose tools must be present before the action starts.
    fn operations(&self) -> Vec<Operation> {
        match self {
            Self::Lock { .. } => vec![Operation::Lock],
            Self::Build { .. } => vec![Operation::Build],
            Self::Publish { build: true, .. } => vec![Operation::Build, Operation::Publish],
            Self::Publish { build: false, .. } => vec![Operation::Publish],
            Self::ExportLock { .. } => Vec::new(),
        }
    }
}

pub fn run(engine: &Engine, action: Action, json: bool) -> Result<u8, String> {
    ensure_prereqs(
        engine,
        engine.project().package.build_system,
        &action.operations(),
    )?;
    match action {
        Action::Lock {
            selection,
            baseline,
        } => {
            let request = PackageLockRequest {
                platforms: selection.platforms()?,
                channel_overrides: selection.channels(),
                baseline,
            };
            let msg = if request.baseline.is_some() {
                "relocking package against tested lock..."
            } else {
                "locking package..."
            };
            let report = with_spinner(json, msg, "package locked", "package lock failed", || {
                engine.lock_package(&request)
            })?;
            print_lock_report(Some(&report), json)?;
        }
        Action::Build { python_version } => {
            let out = build(engine, python_version)?;
            print_path("built", &out, json)?;
        }
        Action::Publish {
            repository_url,
            username,
            password,
            build: build_first,
            python_version,
        } => {
            let credentials = credentials(username, password)?;
            if build_first {
                build(engine, python_version)?;
            }
            let published = engine
                .publish_package(&PublishRequest {
                    repository_url,
                    credentials,
                })
                .map_err(|e| e.to_string())?;
            if json {
                let payload = serde_json::json!({
                    "status": "published",
                    "files": published,
                });
                println!("{}", json_pretty(&payload)?);
            } else {
                for file in &published {
                    println!("published {}", file.display());
                }
                if published.is_empty() {
                    println!("published {}", engine.project().package_name);
                }
            }
        }
        Action::ExportLock {
            lock_file,
            platform,
            output,
        } => {
            let lock_file = lock_file.unwrap_or_else(|| engine.project().package.lock_path.clone());
            let platform = match platform {
                Some(p) => Platform::parse(&p).ok_or_else(|| format!("unsupported platform '{p}'"))?,
                None => Platform::current().ok_or_else(|| {
                    "this host is not a supported conda platform; pass --platform".to_owned()
                })?,
            };
            engine
                .export_lock(&lock_file, &platform, &output)
                .map_err(|e| e.to_string())?;
            print_path("exported", &output, json)?;
        }
    }
    Ok(EXIT_SUCCESS)
}

fn build(engine: &Engine, python_version: Option<String>) -> Result<PathBuf, String> {
    engine
        .build_package(&BuildRequest { python_version })
        .map_err(|e| e.to_string())
}

fn credentials(
    username: Option<String>,
    password: Option<String>,
) -> Result<Option<Credentials>, String> {
    match (username, password) {
        (Some(username), Some(password)) => Ok(Some(Credentials { username, password })),
        (None, None) => Ok(None),
        _ => Err("--username and --password must be given together".to_owned()),
    }
}

fn print_path(status: &str, path: &std::path::Path, json: bool) -> Result<(), String> {
    if json {
        let payload = serde_json::json!({ "status": status, "path": path });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{status} {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_need_only_their_own_tools() {
        let lock = Action::Lock {
            selection: LockSelection::default(),
            baseline: None,
        };
        assert_eq!(lock.operations(), [Operation::Lock]);
        let publish = Action::Publish {
            repository_url: None,
            username: None,
            password: None,
            build: true,
            python_version: None,
        };
        assert_eq!(publish.operations(), [Operation::Build, Operation::Publish]);
        let export = Action::ExportLock {
            lock_file: None,
            platform: None,
            output: PathBuf::from("x.lock"),
        };
        assert!(export.operations().is_empty());
    }

    #[test]
    fn credentials_need_both_parts() {
        assert!(credentials(None, None).unwrap().is_none());
        assert!(credentials(Some("u".into()), None).is_err());
        assert!(credentials(None, Some("p".into())).is_err());
        let c = credentials(Some("u".into()), Some("p".into())).unwrap().unwrap();
        assert_eq!(c.username, "u");
    }
}
