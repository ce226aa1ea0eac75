use crate::types::{default_platforms, Channel, Platform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Dependency name → constraint, exactly as written in the manifest.
pub type DependencyMap = BTreeMap<String, toml::Value>;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("package name is required (set tool.lockstep.name or tool.poetry.name)")]
    MissingPackageName,
    #[error("package version is required (set tool.lockstep.version or tool.poetry.version)")]
    MissingVersion,
    #[error("unsupported platform '{0}'")]
    UnsupportedPlatform(String),
    #[error("unknown build system '{0}', expected 'conda' or 'poetry'")]
    UnknownBuildSystem(String),
    #[error("unknown solver '{0}', expected 'conda', 'mamba' or 'micromamba'")]
    UnknownSolver(String),
    #[error("conda-build-path '{0}' must not be inside the project directory")]
    BuildPathInsideProject(String),
    #[error("invalid baseline lock template '{0}': the only placeholder is {{platform}}")]
    InvalidBaselineTemplate(String),
    #[error("failed to edit manifest: {0}")]
    Edit(#[from] toml_edit::TomlError),
    #[error("unknown setting '{}'; known settings: {}", .0, crate::settings::ConfigKey::known())]
    UnknownConfigKey(String),
    #[error("invalid value '{value}' for {key}")]
    InvalidConfigValue { key: String, value: String },
    #[error("'{0}' in the manifest is not a table")]
    NotATable(String),
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    #[default]
    Conda,
    Poetry,
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Conda => "conda",
            Self::Poetry => "poetry",
        })
    }
}

impl FromStr for BuildSystem {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conda" => Ok(Self::Conda),
            "poetry" => Ok(Self::Poetry),
            other => Err(ManifestError::UnknownBuildSystem(other.to_owned())),
        }
    }
}

/// Which conda frontend the solver drives.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SolverVariant {
    #[default]
    Conda,
    Mamba,
    Micromamba,
}

impl FromStr for SolverVariant {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conda" => Ok(Self::Conda),
            "mamba" => Ok(Self::Mamba),
            "micromamba" => Ok(Self::Micromamba),
            other => Err(ManifestError::UnknownSolver(other.to_owned())),
        }
    }
}

/// Fields shared by `[tool.poetry]` and `[tool.lockstep]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SharedSection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub dependencies: DependencyMap,
    #[serde(default)]
    pub dev_dependencies: DependencyMap,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct EnvSection {
    #[serde(default)]
    pub build_system: Option<BuildSystem>,
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PackageSection {
    #[serde(default)]
    pub build_system: Option<BuildSystem>,
    #[serde(default)]
    pub conda_build_path: Option<PathBuf>,
    #[serde(default)]
    pub conda_publish_url: Option<String>,
    #[serde(default)]
    pub poetry_publish_repository: Option<String>,
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
}

/// `[tool.lockstep]`: the shared fields plus tool-only settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LockstepSection {
    #[serde(flatten)]
    pub shared: SharedSection,
    #[serde(default)]
    pub build_system: Option<BuildSystem>,
    #[serde(default)]
    pub conda_channels: Vec<String>,
    #[serde(default)]
    pub conda_path: Option<PathBuf>,
    #[serde(default)]
    pub poetry_path: Option<PathBuf>,
    #[serde(default)]
    pub solver_path: Option<PathBuf>,
    #[serde(default)]
    pub solver: Option<SolverVariant>,
    #[serde(default)]
    pub solver_timeout_secs: Option<u64>,
    #[serde(default)]
    pub env: EnvSection,
    #[serde(default)]
    pub package: PackageSection,
}

#[derive(Debug, Default, Deserialize)]
struct ToolTable {
    #[serde(default)]
    poetry: Option<SharedSection>,
    #[serde(default)]
    lockstep: Option<LockstepSection>,
}

#[derive(Debug, Default, Deserialize)]
struct PyProjectDocument {
    #[serde(default)]
    tool: ToolTable,
}

/// Executables the backends shell out to. `None` means "discover on PATH".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPaths {
    pub conda: Option<PathBuf>,
    pub poetry: Option<PathBuf>,
    pub solver: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSettings {
    pub build_system: BuildSystem,
    pub platforms: Vec<Platform>,
    pub lock_path: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSettings {
    pub build_system: BuildSystem,
    pub conda_build_path: PathBuf,
    pub conda_publish_url: Option<String>,
    pub poetry_publish_repository: Option<String>,
    pub lock_path: PathBuf,
}

/// The resolved, immutable view of a project manifest.
///
/// Built once per invocation and passed by reference to every component.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    pub manifest_path: PathBuf,
    pub project_dir: PathBuf,
    pub package_name: String,
    pub version: String,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub license: String,
    pub homepage: Option<String>,
    pub documentation: Option<String>,
    pub dependencies: DependencyMap,
    pub dev_dependencies: DependencyMap,
    pub scripts: BTreeMap<String, String>,
    pub channels: Vec<Channel>,
    pub tools: ToolPaths,
    pub solver_variant: SolverVariant,
    pub solver_timeout: Option<Duration>,
    pub env: EnvSettings,
    pub package: PackageSettings,
}

const DEFAULT_LICENSE: &str = "Proprietary";
const DEFAULT_ENV_LOCK: &str = "conda_env.lock.json";
const DEFAULT_PACKAGE_LOCK: &str = "package_locked.lock.json";

/// Merge the two shared sections field by field, tool section first.
///
/// Dependency maps are taken wholesale from whichever section declares a
/// non-empty map, preferring the tool section.
pub fn merge_shared(poetry: &SharedSection, tool: &SharedSection) -> SharedSection {
    fn pick<T: Clone>(tool: &Option<T>, poetry: &Option<T>) -> Option<T> {
        tool.clone().or_else(|| poetry.clone())
    }
    fn pick_map<K: Clone + Ord, V: Clone>(
        tool: &BTreeMap<K, V>,
        poetry: &BTreeMap<K, V>,
    ) -> BTreeMap<K, V> {
        if tool.is_empty() {
            poetry.clone()
        } else {
            tool.clone()
        }
    }

    SharedSection {
        name: pick(&tool.name, &poetry.name),
        version: pick(&tool.version, &poetry.version),
        description: pick(&tool.description, &poetry.description),
        authors: pick(&tool.authors, &poetry.authors),
        license: pick(&tool.license, &poetry.license),
        homepage: pick(&tool.homepage, &poetry.homepage),
        documentation: pick(&tool.documentation, &poetry.documentation),
        dependencies: pick_map(&tool.dependencies, &poetry.dependencies),
        dev_dependencies: pick_map(&tool.dev_dependencies, &poetry.dev_dependencies),
        scripts: pick_map(&tool.scripts, &poetry.scripts),
    }
}

impl ProjectConfig {
    /// Resolve the two manifest sections plus environment overrides into a config.
    ///
    /// `lookup_env` is consulted for the `LOCKSTEP_*` overrides; pass
    /// `|k| std::env::var(k).ok()` for the process environment.
    pub fn resolve(
        manifest_path: &Path,
        poetry: &SharedSection,
        tool: &LockstepSection,
        lookup_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ManifestError> {
        let manifest_path = absolute(manifest_path);
        let project_dir = manifest_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let shared = merge_shared(poetry, &tool.shared);
        let package_name = shared
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(ManifestError::MissingPackageName)?;
        let version = shared
            .version
            .filter(|v| !v.trim().is_empty())
            .ok_or(ManifestError::MissingVersion)?;

        let build_system = tool.build_system.unwrap_or_default();

        let platforms = match &tool.env.platforms {
            Some(raw) if !raw.is_empty() => parse_platforms(raw)?,
            _ => default_platforms(),
        };

        let env = EnvSettings {
            build_system: tool.env.build_system.unwrap_or(build_system),
            platforms,
            lock_path: project_dir.join(
                tool.env
                    .lock_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_LOCK)),
            ),
            name: tool
                .env
                .name
                .clone()
                .unwrap_or_else(|| package_name.clone()),
        };

        let conda_build_path = lookup_env("LOCKSTEP_CONDA_BUILD_PATH")
            .map(PathBuf::from)
            .or_else(|| tool.package.conda_build_path.clone())
            .map_or_else(
                || default_build_path(&package_name, &lookup_env),
                |p| project_dir.join(p),
            );
        let conda_build_path = lexical_normalize(&conda_build_path);
        if conda_build_path.starts_with(lexical_normalize(&project_dir)) {
            return Err(ManifestError::BuildPathInsideProject(
                conda_build_path.display().to_string(),
            ));
        }

        let package = PackageSettings {
            build_system: tool.package.build_system.unwrap_or(build_system),
            conda_build_path,
            conda_publish_url: lookup_env("LOCKSTEP_CONDA_PUBLISH_URL")
                .or_else(|| tool.package.conda_publish_url.clone()),
            poetry_publish_repository: lookup_env("LOCKSTEP_POETRY_PUBLISH_REPOSITORY")
                .or_else(|| tool.package.poetry_publish_repository.clone()),
            lock_path: project_dir.join(
                tool.package
                    .lock_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_PACKAGE_LOCK)),
            ),
        };

        let tools = ToolPaths {
            conda: lookup_env("LOCKSTEP_CONDA_PATH")
                .map(PathBuf::from)
                .or_else(|| tool.conda_path.clone()),
            poetry: lookup_env("LOCKSTEP_POETRY_PATH")
                .map(PathBuf::from)
                .or_else(|| tool.poetry_path.clone()),
            solver: lookup_env("LOCKSTEP_SOLVER_PATH")
                .map(PathBuf::from)
                .or_else(|| tool.solver_path.clone()),
        };

        Ok(Self {
            manifest_path,
            project_dir,
            package_name,
            version,
            description: shared.description,
            authors: shared.authors.unwrap_or_default(),
            license: shared.license.unwrap_or_else(|| DEFAULT_LICENSE.to_owned()),
            homepage: shared.homepage,
            documentation: shared.documentation,
            dependencies: shared.dependencies,
            dev_dependencies: shared.dev_dependencies,
            scripts: shared.scripts,
            channels: tool.conda_channels.iter().map(|c| Channel::new(c.trim())).collect(),
            tools,
            solver_variant: tool.solver.unwrap_or_default(),
            solver_timeout: tool.solver_timeout_secs.map(Duration::from_secs),
            env,
            package,
        })
    }

    /// Names of the declared console entry points.
    pub fn entry_points(&self) -> Vec<String> {
        self.scripts.keys().cloned().collect()
    }

    /// Exact conda pin for this package at its manifest version.
    pub fn self_pin(&self) -> String {
        format!(
            "{}=={}",
            crate::specifier::normalize_name(&self.package_name),
            self.version
        )
    }
}

pub fn parse_platforms(raw: &[String]) -> Result<Vec<Platform>, ManifestError> {
    let mut out = Vec::with_capacity(raw.len());
    for p in raw {
        let platform =
            Platform::parse(p).ok_or_else(|| ManifestError::UnsupportedPlatform(p.clone()))?;
        if !out.contains(&platform) {
            out.push(platform);
        }
    }
    Ok(out)
}

pub fn parse_manifest_str(
    input: &str,
    manifest_path: &Path,
    lookup_env: impl Fn(&str) -> Option<String>,
) -> Result<ProjectConfig, ManifestError> {
    let doc: PyProjectDocument = toml::from_str(input)?;
    let poetry = doc.tool.poetry.unwrap_or_default();
    let tool = doc.tool.lockstep.unwrap_or_default();
    ProjectConfig::resolve(manifest_path, &poetry, &tool, lookup_env)
}

/// Read and resolve a manifest, applying overrides from the process environment.
pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<ProjectConfig, ManifestError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content, path, |k| std::env::var(k).ok())
}

fn default_build_path(package_name: &str, lookup_env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    let home = lookup_env("HOME").map_or_else(std::env::temp_dir, PathBuf::from);
    home.join(".lockstep").join(package_name).join("dist_conda")
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn parse(input: &str) -> Result<ProjectConfig, ManifestError> {
        parse_manifest_str(input, Path::new("/work/demo/pyproject.toml"), |k| {
            (k == "HOME").then(|| "/home/dev".to_owned())
        })
    }

    const POETRY_ONLY: &str = r#"
[build-system]
requires = ["poetry-core"]

[tool.poetry]
name = "demo_app"
version = "0.1.0"
description = "a demo"
authors = ["Dev <dev@example.com>"]
readme = "README.md"

[tool.poetry.dependencies]
python = ">=3.7,<3.10"
click = "*"

[tool.poetry.dev-dependencies]
pytest = "*"

[tool.poetry.scripts]
demo = "demo_app.cli:main"
"#;

    #[test]
    fn parses_poetry_only_manifest() {
        let cfg = parse(POETRY_ONLY).unwrap();
        assert_eq!(cfg.package_name, "demo_app");
        assert_eq!(cfg.version, "0.1.0");
        assert_eq!(cfg.dependencies.len(), 2);
        assert_eq!(cfg.dev_dependencies.len(), 1);
        assert_eq!(cfg.entry_points(), vec!["demo"]);
        assert_eq!(cfg.license, "Proprietary");
        assert_eq!(cfg.env.name, "demo_app");
        assert_eq!(cfg.env.build_system, BuildSystem::Conda);
        assert_eq!(cfg.env.platforms, default_platforms());
        assert_eq!(
            cfg.env.lock_path,
            PathBuf::from("/work/demo/conda_env.lock.json")
        );
        assert_eq!(
            cfg.package.conda_build_path,
            PathBuf::from("/home/dev/.lockstep/demo_app/dist_conda")
        );
    }

    #[test]
    fn tool_section_wins_field_by_field() {
        let input = format!(
            r#"{POETRY_ONLY}
[tool.lockstep]
name = "overridden_name"
conda-channels = ["conda-forge", "defaults"]
"#
        );
        let cfg = parse(&input).unwrap();
        assert_eq!(cfg.package_name, "overridden_name");
        // version is not set in tool.lockstep, so poetry's value survives
        assert_eq!(cfg.version, "0.1.0");
        assert_eq!(cfg.channels.len(), 2);
        assert_eq!(cfg.channels[0], "conda-forge");
    }

    #[test]
    fn dependency_maps_replace_wholesale() {
        let input = format!(
            r#"{POETRY_ONLY}
[tool.lockstep.dependencies]
python = "^3.9"
"#
        );
        let cfg = parse(&input).unwrap();
        assert_eq!(cfg.dependencies.len(), 1);
        assert!(!cfg.dependencies.contains_key("click"));
        // dev-dependencies were not declared in tool.lockstep
        assert!(cfg.dev_dependencies.contains_key("pytest"));
    }

    #[test]
    fn missing_name_is_rejected() {
        let err = parse("[tool.poetry]\nversion = \"1.0\"\n").unwrap_err();
        assert!(matches!(err, ManifestError::MissingPackageName));
    }

    #[test]
    fn missing_version_is_rejected() {
        let err = parse("[tool.lockstep]\nname = \"x\"\n").unwrap_err();
        assert!(matches!(err, ManifestError::MissingVersion));
    }

    #[test]
    fn env_and_package_build_system_default_to_top_level() {
        let input = r#"
[tool.lockstep]
name = "x"
version = "1.0"
build-system = "poetry"

[tool.lockstep.package]
build-system = "conda"
"#;
        let cfg = parse(input).unwrap();
        assert_eq!(cfg.env.build_system, BuildSystem::Poetry);
        assert_eq!(cfg.package.build_system, BuildSystem::Conda);
    }

    #[test]
    fn platforms_are_validated_and_deduplicated() {
        let input = r#"
[tool.lockstep]
name = "x"
version = "1.0"

[tool.lockstep.env]
platforms = ["linux-64", "LINUX-64", "osx-arm64"]
"#;
        let cfg = parse(input).unwrap();
        assert_eq!(cfg.env.platforms.len(), 2);

        let bad = input.replace("osx-arm64", "amiga-68k");
        assert!(matches!(
            parse(&bad).unwrap_err(),
            ManifestError::UnsupportedPlatform(_)
        ));
    }

    #[test]
    fn environment_overrides_take_precedence() {
        let input = r#"
[tool.lockstep]
name = "x"
version = "1.0"
conda-path = "/opt/conda/bin/conda"
"#;
        let cfg = parse_manifest_str(input, Path::new("/p/pyproject.toml"), |k| match k {
            "LOCKSTEP_CONDA_PATH" => Some("/usr/bin/micromamba".to_owned()),
            "LOCKSTEP_CONDA_PUBLISH_URL" => Some("https://repo.example.com".to_owned()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.tools.conda, Some(PathBuf::from("/usr/bin/micromamba")));
        assert_eq!(
            cfg.package.conda_publish_url.as_deref(),
            Some("https://repo.example.com")
        );
    }

    #[test]
    fn build_path_inside_project_is_rejected() {
        let input = r#"
[tool.lockstep]
name = "x"
version = "1.0"

[tool.lockstep.package]
conda-build-path = "./dist"
"#;
        let err = parse_manifest_str(input, Path::new("/p/pyproject.toml"), no_env).unwrap_err();
        assert!(matches!(err, ManifestError::BuildPathInsideProject(_)));
    }

    #[test]
    fn self_pin_normalizes_name() {
        let cfg = parse(POETRY_ONLY).unwrap();
        assert_eq!(cfg.self_pin(), "demo-app==0.1.0");
    }

    #[test]
    fn build_system_from_str() {
        assert_eq!("Poetry".parse::<BuildSystem>().unwrap(), BuildSystem::Poetry);
        assert!("maven".parse::<BuildSystem>().is_err());
    }
}
