//! Installing an application from a rich lock into a prefix of its own.
//!
//! The lock's entry points end up as links in a shared bin directory, so the
//! application is callable without activating anything.

use crate::concurrency::ProjectLock;
use crate::relock::PLATFORM_PLACEHOLDER;
use crate::CoreError;
use lockstep_runtime::tools;
use lockstep_schema::{codec, raw_lock_platform, LockError, Platform};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::symlink;
#[cfg(windows)]
use std::os::windows::fs::symlink_file as symlink;

#[cfg(windows)]
const PREFIX_BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
const PREFIX_BIN_DIR: &str = "bin";

const DOWNLOADED_LOCK: &str = "app.lock";

#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Path or URL of the lock. `{platform}` is replaced by the host platform.
    pub lock: String,
    pub package_name: Option<String>,
    /// Replaces the entry points recorded in the lock when non-empty.
    pub entry_points: Vec<String>,
    /// Each application gets the prefix `<install_dir>/<package>`.
    pub install_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub conda: PathBuf,
    /// Replace entry points that already exist in `bin_dir`.
    pub force: bool,
}

impl InstallRequest {
    pub fn new(lock: impl Into<String>) -> Self {
        Self {
            lock: lock.into(),
            package_name: None,
            entry_points: Vec::new(),
            install_dir: default_install_dir(),
            bin_dir: default_bin_dir(),
            conda: PathBuf::from(tools::CONDA),
            force: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub package_name: String,
    pub prefix: PathBuf,
    /// Links created in the bin directory.
    pub linked: Vec<PathBuf>,
    /// Entry points the installed prefix does not provide.
    pub missing: Vec<String>,
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(std::env::temp_dir, PathBuf::from)
}

/// `~/.lockstep/apps`
pub fn default_install_dir() -> PathBuf {
    home_dir().join(".lockstep").join("apps")
}

/// `~/.local/bin`
pub fn default_bin_dir() -> PathBuf {
    home_dir().join(".local").join("bin")
}

fn check_plain_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(CoreError::InvalidEntryPoint(name.to_owned()));
    }
    Ok(())
}

fn is_remote(location: &str) -> bool {
    location.starts_with("https://") || location.starts_with("http://")
}

/// Local path of the lock, downloading it into `scratch` when remote.
fn fetch_lock(location: &str, scratch: &Path) -> Result<PathBuf, CoreError> {
    if !is_remote(location) {
        return Ok(PathBuf::from(location));
    }
    let destination = scratch.join(DOWNLOADED_LOCK);
    info!("downloading {location}");
    tools::curl_download(location, &destination)?;
    Ok(destination)
}

fn link_entry_points(
    prefix: &Path,
    bin_dir: &Path,
    entry_points: &[String],
) -> Result<(Vec<PathBuf>, Vec<String>), CoreError> {
    let mut linked = Vec::new();
    let mut missing = Vec::new();
    for name in entry_points {
        let source = prefix.join(PREFIX_BIN_DIR).join(name);
        if !source.exists() {
            warn!("{name} is not provided by {}", prefix.display());
            missing.push(name.clone());
            continue;
        }
        fs::create_dir_all(bin_dir)?;
        let target = bin_dir.join(name);
        if target.symlink_metadata().is_ok() {
            fs::remove_file(&target)?;
        }
        symlink(&source, &target)?;
        debug!("linked {} -> {}", target.display(), source.display());
        linked.push(target);
    }
    Ok((linked, missing))
}

/// Install the application described by a rich lock for this host.
///
/// Refuses to overwrite existing entry points in the bin directory unless
/// `force` is set; a lock solved for another platform is rejected before conda
/// runs.
pub fn install_app(request: &InstallRequest) -> Result<InstallReport, CoreError> {
    let platform = Platform::current().ok_or(CoreError::UnsupportedHost {
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    })?;
    let location = request.lock.replace(PLATFORM_PLACEHOLDER, platform.as_str());
    for name in &request.entry_points {
        check_plain_name(name)?;
    }

    fs::create_dir_all(&request.install_dir)?;
    let _lock = ProjectLock::acquire(&request.install_dir)?;
    let scratch = tempfile::Builder::new().prefix("lockstep-").tempdir()?;
    let lock_file = fetch_lock(&location, scratch.path())?;

    let decoded = codec::decode(&fs::read_to_string(&lock_file)?)?;
    let package_name =
        codec::resolve_package_name(&decoded, request.package_name.as_deref(), &location)?;
    check_plain_name(&package_name)?;
    if let Some(found) = raw_lock_platform(&decoded.header) {
        if found != platform {
            return Err(LockError::PlatformMismatch {
                expected: vec![platform],
                found: vec![found],
            }
            .into());
        }
    }

    let entry_points = if request.entry_points.is_empty() {
        decoded.metadata.map(|m| m.entry_points).unwrap_or_default()
    } else {
        request.entry_points.clone()
    };
    for name in &entry_points {
        check_plain_name(name)?;
    }
    if !request.force {
        let taken: Vec<String> = entry_points
            .iter()
            .filter(|name| request.bin_dir.join(name).symlink_metadata().is_ok())
            .cloned()
            .collect();
        if !taken.is_empty() {
            return Err(CoreError::EntryPointConflict {
                names: taken,
                dir: request.bin_dir.display().to_string(),
            });
        }
    }

    let prefix = request.install_dir.join(&package_name);
    info!("installing {package_name} into {}", prefix.display());
    tools::conda_create_in_prefix(&request.conda, &lock_file, &prefix)?;

    let (linked, missing) = link_entry_points(&prefix, &request.bin_dir, &entry_points)?;
    Ok(InstallReport {
        package_name,
        prefix,
        linked,
        missing,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use lockstep_schema::LockMetadata;
    use std::os::unix::fs::PermissionsExt;

    /// A conda stand-in that creates `<prefix>/bin/demo` and records its args.
    fn fake_conda(dir: &Path) -> PathBuf {
        let path = dir.join("conda");
        let script = r#"#!/bin/sh
echo "$@" > "$(dirname "$0")/conda-args"
while [ $# -gt 0 ]; do
  if [ "$1" = "--prefix" ]; then prefix="$2"; fi
  shift
done
mkdir -p "$prefix/bin"
printf '#!/bin/sh\n' > "$prefix/bin/demo"
"#;
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn rich_lock(dir: &Path, platform: &Platform) -> PathBuf {
        let explicit = format!(
            "# platform: {platform}\n@EXPLICIT\nhttps://conda.anaconda.org/conda-forge/{platform}/demo-1.0-py_0.tar.bz2\n"
        );
        let metadata = LockMetadata {
            package_name: Some("demo".into()),
            entry_points: vec!["demo".into(), "demo-admin".into()],
            version: Some("1.0".into()),
            created_at: chrono::Utc::now(),
        };
        let path = dir.join(format!("demo-{platform}.lock"));
        fs::write(&path, codec::encode(&explicit, &metadata).unwrap()).unwrap();
        path
    }

    fn request(dir: &Path, lock: String) -> InstallRequest {
        InstallRequest {
            install_dir: dir.join("apps"),
            bin_dir: dir.join("bin"),
            conda: fake_conda(dir),
            ..InstallRequest::new(lock)
        }
    }

    #[test]
    fn installs_into_a_prefix_and_links_entry_points() {
        let Some(platform) = Platform::current() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        rich_lock(dir.path(), &platform);
        let template = dir.path().join("demo-{platform}.lock");
        let req = request(dir.path(), template.display().to_string());

        let report = install_app(&req).unwrap();
        assert_eq!(report.package_name, "demo");
        assert_eq!(report.prefix, dir.path().join("apps").join("demo"));
        assert_eq!(report.linked, [dir.path().join("bin").join("demo")]);
        assert_eq!(report.missing, ["demo-admin"]);
        assert_eq!(
            fs::read_link(dir.path().join("bin").join("demo")).unwrap(),
            report.prefix.join("bin").join("demo")
        );
        let args = fs::read_to_string(dir.path().join("conda-args")).unwrap();
        assert!(args.starts_with("create --yes --prefix"), "{args}");
    }

    #[test]
    fn existing_entry_points_need_force() {
        let Some(platform) = Platform::current() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let lock = rich_lock(dir.path(), &platform);
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin").join("demo"), "mine").unwrap();

        let mut req = request(dir.path(), lock.display().to_string());
        let err = install_app(&req).unwrap_err();
        assert!(matches!(err, CoreError::EntryPointConflict { ref names, .. } if names == &["demo"]));
        assert!(!dir.path().join("conda-args").exists());

        req.force = true;
        install_app(&req).unwrap();
        assert!(fs::symlink_metadata(dir.path().join("bin").join("demo"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn lock_for_another_platform_is_rejected() {
        let Some(host) = Platform::current() else {
            return;
        };
        let other = if host.as_str() == "win-64" {
            Platform::new("linux-64")
        } else {
            Platform::new("win-64")
        };
        let dir = tempfile::tempdir().unwrap();
        let lock = rich_lock(dir.path(), &other);

        let err = install_app(&request(dir.path(), lock.display().to_string())).unwrap_err();
        assert!(matches!(err, CoreError::Lock(LockError::PlatformMismatch { .. })), "{err}");
    }

    #[test]
    fn entry_points_must_be_plain_names() {
        if Platform::current().is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path(), "unused.lock".into());
        req.entry_points = vec!["../escape".into()];
        let err = install_app(&req).unwrap_err();
        assert!(matches!(err, CoreError::InvalidEntryPoint(_)), "{err}");
        assert!(check_plain_name("demo-cli").is_ok());
        assert!(check_plain_name("..").is_err());
    }
}
