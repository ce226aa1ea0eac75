//! Invocations of the external conda, conda-build, poetry and curl executables.
//!
//! Each function builds a [`Command`] and hands it to [`run_tool`]; the
//! `*_command` builders are public so callers can log or inspect them.

use crate::process::run_tool;
use crate::RuntimeError;
use lockstep_schema::Channel;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const CONDA: &str = "conda";
pub const CONDA_BUILD: &str = "conda-build";
pub const POETRY: &str = "poetry";
pub const CURL: &str = "curl";

/// The configured executable, or the bare name for PATH lookup.
pub fn executable(configured: Option<&Path>, default_name: &str) -> PathBuf {
    configured.map_or_else(|| PathBuf::from(default_name), Path::to_path_buf)
}

/// `conda create --file <lock> --yes --name <env>`: install an explicit lock.
pub fn conda_create_command(conda: &Path, lock_file: &Path, env_name: &str) -> Command {
    let mut cmd = Command::new(conda);
    cmd.arg("create")
        .arg("--file")
        .arg(lock_file)
        .args(["--yes", "--name", env_name]);
    cmd
}

pub fn conda_create_from_lock(
    conda: &Path,
    lock_file: &Path,
    env_name: &str,
) -> Result<(), RuntimeError> {
    run_tool(conda_create_command(conda, lock_file, env_name))
}

/// `conda create --yes --prefix <prefix> --file <lock>`: install an explicit
/// lock into a standalone prefix.
pub fn conda_create_prefix_command(conda: &Path, lock_file: &Path, prefix: &Path) -> Command {
    let mut cmd = Command::new(conda);
    cmd.args(["create", "--yes", "--prefix"])
        .arg(prefix)
        .arg("--file")
        .arg(lock_file);
    cmd
}

pub fn conda_create_in_prefix(
    conda: &Path,
    lock_file: &Path,
    prefix: &Path,
) -> Result<(), RuntimeError> {
    run_tool(conda_create_prefix_command(conda, lock_file, prefix))
}

/// `conda run -n <env> --no-capture-output --live-stream <args>`.
pub fn conda_run_command(conda: &Path, env_name: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(conda);
    cmd.args(["run", "-n", env_name, "--no-capture-output", "--live-stream"])
        .args(args);
    cmd
}

/// Settings for one conda-build run.
#[derive(Debug, Clone)]
pub struct CondaBuildArgs<'a> {
    pub recipe_dir: &'a Path,
    pub output_dir: &'a Path,
    pub channels: &'a [Channel],
    pub python_version: Option<&'a str>,
}

pub fn conda_build_command(conda_build: &Path, args: &CondaBuildArgs<'_>) -> Command {
    let mut cmd = Command::new(conda_build);
    cmd.args(["--no-test", "--override-channels"]);
    for channel in args.channels {
        cmd.args(["--channel", channel.as_str()]);
    }
    if let Some(python) = args.python_version {
        cmd.args(["--python", python]);
    }
    cmd.arg(args.recipe_dir);
    cmd.env("CONDA_BLD_PATH", args.output_dir);
    cmd
}

pub fn conda_build(conda_build: &Path, args: &CondaBuildArgs<'_>) -> Result<(), RuntimeError> {
    fs::create_dir_all(args.output_dir)?;
    run_tool(conda_build_command(conda_build, args))
}

/// `poetry <args>` run from the project directory.
pub fn poetry_command(poetry: &Path, project_dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(poetry);
    cmd.args(args).current_dir(project_dir);
    cmd
}

pub fn poetry(poetry: &Path, project_dir: &Path, args: &[&str]) -> Result<(), RuntimeError> {
    run_tool(poetry_command(poetry, project_dir, args))
}

/// Basic-auth credentials forwarded to the upload tool.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Upload URL for a built package: `<repository>/<subdir>/<file>`.
pub fn upload_destination(repository_url: &str, package: &Path) -> Option<String> {
    let file = package.file_name()?.to_str()?;
    let subdir = package.parent()?.file_name()?.to_str()?;
    Some(format!(
        "{}/{subdir}/{file}",
        repository_url.trim_end_matches('/')
    ))
}

pub fn curl_upload_command(
    package: &Path,
    destination: &str,
    credentials: Option<&Credentials>,
) -> Command {
    let mut cmd = Command::new(CURL);
    cmd.arg("--fail");
    if let Some(c) = credentials {
        cmd.arg("-u").arg(format!("{}:{}", c.username, c.password));
    }
    cmd.arg("-T").arg(package).arg(destination);
    cmd
}

pub fn curl_upload(
    package: &Path,
    destination: &str,
    credentials: Option<&Credentials>,
) -> Result<(), RuntimeError> {
    run_tool(curl_upload_command(package, destination, credentials))
}

pub fn curl_download_command(url: &str, destination: &Path) -> Command {
    let mut cmd = Command::new(CURL);
    cmd.args(["--fail", "--location", "--silent", "--show-error", "--output"])
        .arg(destination)
        .arg(url);
    cmd
}

/// Fetch `url` to `destination`.
pub fn curl_download(url: &str, destination: &Path) -> Result<(), RuntimeError> {
    run_tool(curl_download_command(url, destination))
}

/// Built archives `<build_dir>/<subdir>/<name>-<version>*.tar.bz2`, sorted.
pub fn find_built_packages(
    build_dir: &Path,
    name: &str,
    version: &str,
) -> Result<Vec<PathBuf>, RuntimeError> {
    let prefix = format!("{name}-{version}");
    let mut found = Vec::new();
    if !build_dir.is_dir() {
        return Ok(found);
    }
    for subdir in fs::read_dir(build_dir)? {
        let subdir = subdir?.path();
        if !subdir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&subdir)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".tar.bz2"));
            if matches {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
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
    fn conda_create_args() {
        let cmd = conda_create_command(Path::new("conda"), Path::new("/tmp/x.lock"), "demo");
        assert_eq!(
            args(&cmd),
            ["create", "--file", "/tmp/x.lock", "--yes", "--name", "demo"]
        );
    }

    #[test]
    fn conda_prefix_and_run_args() {
        let cmd = conda_create_prefix_command(
            Path::new("conda"),
            Path::new("/tmp/app.lock"),
            Path::new("/apps/demo"),
        );
        assert_eq!(
            args(&cmd),
            ["create", "--yes", "--prefix", "/apps/demo", "--file", "/tmp/app.lock"]
        );

        let cmd = conda_run_command(
            Path::new("conda"),
            "demo-dev",
            &["pytest".to_owned(), "-x".to_owned()],
        );
        assert_eq!(
            args(&cmd),
            ["run", "-n", "demo-dev", "--no-capture-output", "--live-stream", "pytest", "-x"]
        );
    }

    #[test]
    fn download_writes_to_destination() {
        let cmd = curl_download_command("https://host/app-linux-64.lock", Path::new("/tmp/a.lock"));
        let a = args(&cmd);
        assert_eq!(a.last().map(String::as_str), Some("https://host/app-linux-64.lock"));
        assert!(a.windows(2).any(|w| w[0] == "--output" && w[1] == "/tmp/a.lock"));
    }

    #[test]
    fn conda_build_args_and_env() {
        let channels = [Channel::new("conda-forge")];
        let cmd = conda_build_command(
            Path::new("conda-build"),
            &CondaBuildArgs {
                recipe_dir: Path::new("/p/conda.recipe"),
                output_dir: Path::new("/home/u/.lockstep/demo/dist_conda"),
                channels: &channels,
                python_version: Some("3.9"),
            },
        );
        assert_eq!(
            args(&cmd),
            [
                "--no-test",
                "--override-channels",
                "--channel",
                "conda-forge",
                "--python",
                "3.9",
                "/p/conda.recipe"
            ]
        );
        let env: Vec<_> = cmd.get_envs().collect();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].0, "CONDA_BLD_PATH");
    }

    #[test]
    fn upload_destination_uses_subdir() {
        let dest = upload_destination(
            "https://repo.example.com/conda/",
            Path::new("/b/noarch/demo-1.0-py_0.tar.bz2"),
        );
        assert_eq!(
            dest.as_deref(),
            Some("https://repo.example.com/conda/noarch/demo-1.0-py_0.tar.bz2")
        );
    }

    #[test]
    fn credentials_are_redacted_in_debug() {
        let c = Credentials {
            username: "ci".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{c:?}").contains("hunter2"));
        let cmd = curl_upload_command(Path::new("/b/noarch/x.tar.bz2"), "https://r/x", Some(&c));
        assert_eq!(args(&cmd)[1], "-u");
    }

    #[test]
    fn finds_built_packages() {
        let dir = tempfile::tempdir().unwrap();
        let noarch = dir.path().join("noarch");
        fs::create_dir_all(&noarch).unwrap();
        fs::write(noarch.join("demo-1.0-py_0.tar.bz2"), b"").unwrap();
        fs::write(noarch.join("demo-0.9-py_0.tar.bz2"), b"").unwrap();
        fs::write(noarch.join("other-1.0-py_0.tar.bz2"), b"").unwrap();
        fs::write(dir.path().join("demo-1.0-py_0.tar.bz2"), b"").unwrap();

        let found = find_built_packages(dir.path(), "demo", "1.0").unwrap();
        assert_eq!(found, vec![noarch.join("demo-1.0-py_0.tar.bz2")]);
        assert!(find_built_packages(&dir.path().join("missing"), "demo", "1.0")
            .unwrap()
            .is_empty());
    }
}
