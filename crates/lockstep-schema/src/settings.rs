//! In-place edits of the `[tool.lockstep]` settings in a manifest.
//!
//! Edits go through `toml_edit` so comments and layout elsewhere in the file
//! survive. The edited document is re-resolved before it is written back; an
//! edit that would leave an invalid manifest is rejected and the file is left
//! untouched.

use crate::lock::write_atomic;
use crate::project::{parse_manifest_str, ManifestError};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use toml_edit::{Array, DocumentMut, Item, Table};

const TOOL: &str = "tool";
const LOCKSTEP: &str = "lockstep";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    List,
    Integer,
}

/// A tool-only setting that `config set`/`config remove` may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    BuildSystem,
    CondaChannels,
    CondaPath,
    PoetryPath,
    SolverPath,
    Solver,
    SolverTimeoutSecs,
    EnvBuildSystem,
    EnvPlatforms,
    EnvLockPath,
    EnvName,
    PackageBuildSystem,
    PackageCondaBuildPath,
    PackageCondaPublishUrl,
    PackagePoetryPublishRepository,
    PackageLockPath,
}

impl ConfigKey {
    pub const ALL: [Self; 16] = [
        Self::BuildSystem,
        Self::CondaChannels,
        Self::CondaPath,
        Self::PoetryPath,
        Self::SolverPath,
        Self::Solver,
        Self::SolverTimeoutSecs,
        Self::EnvBuildSystem,
        Self::EnvPlatforms,
        Self::EnvLockPath,
        Self::EnvName,
        Self::PackageBuildSystem,
        Self::PackageCondaBuildPath,
        Self::PackageCondaPublishUrl,
        Self::PackagePoetryPublishRepository,
        Self::PackageLockPath,
    ];

    /// Dotted key below `[tool.lockstep]`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BuildSystem => "build-system",
            Self::CondaChannels => "conda-channels",
            Self::CondaPath => "conda-path",
            Self::PoetryPath => "poetry-path",
            Self::SolverPath => "solver-path",
            Self::Solver => "solver",
            Self::SolverTimeoutSecs => "solver-timeout-secs",
            Self::EnvBuildSystem => "env.build-system",
            Self::EnvPlatforms => "env.platforms",
            Self::EnvLockPath => "env.lock-path",
            Self::EnvName => "env.name",
            Self::PackageBuildSystem => "package.build-system",
            Self::PackageCondaBuildPath => "package.conda-build-path",
            Self::PackageCondaPublishUrl => "package.conda-publish-url",
            Self::PackagePoetryPublishRepository => "package.poetry-publish-repository",
            Self::PackageLockPath => "package.lock-path",
        }
    }

    /// Comma-separated list of every key, for error messages and help text.
    pub fn known() -> String {
        Self::ALL
            .into_iter()
            .map(Self::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn kind(self) -> ValueKind {
        match self {
            Self::CondaChannels | Self::EnvPlatforms => ValueKind::List,
            Self::SolverTimeoutSecs => ValueKind::Integer,
            _ => ValueKind::Text,
        }
    }

    /// Sub-table (`env`/`package`) and the key inside it.
    fn location(self) -> (Option<&'static str>, &'static str) {
        match self.as_str().split_once('.') {
            Some((table, key)) => (Some(table), key),
            None => (None, self.as_str()),
        }
    }

    /// List settings take comma-separated values.
    fn to_item(self, raw: &str) -> Result<Item, ManifestError> {
        let invalid = || ManifestError::InvalidConfigValue {
            key: self.as_str().to_owned(),
            value: raw.to_owned(),
        };
        match self.kind() {
            ValueKind::Text => {
                let text = raw.trim();
                if text.is_empty() {
                    return Err(invalid());
                }
                Ok(toml_edit::value(text))
            }
            ValueKind::List => {
                let mut values = Array::new();
                for v in raw.split(',').map(str::trim).filter(|v| !v.is_empty()) {
                    values.push(v);
                }
                if values.is_empty() {
                    return Err(invalid());
                }
                Ok(toml_edit::value(values))
            }
            ValueKind::Integer => raw
                .trim()
                .parse::<u32>()
                .map(|n| toml_edit::value(i64::from(n)))
                .map_err(|_| invalid()),
        }
    }
}

impl FromStr for ConfigKey {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| ManifestError::UnknownConfigKey(wanted.to_owned()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn child_table<'t>(
    parent: &'t mut Table,
    key: &str,
    path: &str,
) -> Result<&'t mut Table, ManifestError> {
    let item = parent.entry(key).or_insert_with(|| {
        let mut table = Table::new();
        table.set_implicit(true);
        Item::Table(table)
    });
    item.as_table_mut()
        .ok_or_else(|| ManifestError::NotATable(path.to_owned()))
}

fn edit_manifest<T>(
    manifest: &Path,
    edit: impl FnOnce(&mut Table) -> Result<T, ManifestError>,
) -> Result<T, ManifestError> {
    let text = fs::read_to_string(manifest)?;
    let mut doc: DocumentMut = text.parse()?;
    let tool = child_table(doc.as_table_mut(), TOOL, TOOL)?;
    let lockstep = child_table(tool, LOCKSTEP, "tool.lockstep")?;
    let result = edit(lockstep)?;

    let edited = doc.to_string();
    parse_manifest_str(&edited, manifest, |_| None)?;
    write_atomic(manifest, edited.as_bytes())?;
    Ok(result)
}

/// Set `key` in the manifest's `[tool.lockstep]` table.
pub fn set_config_value(
    manifest: &Path,
    key: ConfigKey,
    raw: &str,
) -> Result<(), ManifestError> {
    let item = key.to_item(raw)?;
    edit_manifest(manifest, |lockstep| {
        let (table, field) = key.location();
        let target = match table {
            Some(name) => child_table(lockstep, name, &format!("tool.lockstep.{name}"))?,
            None => lockstep,
        };
        target.insert(field, item);
        Ok(())
    })
}

/// Remove `key` from the manifest. Returns whether it was present.
pub fn remove_config_value(manifest: &Path, key: ConfigKey) -> Result<bool, ManifestError> {
    edit_manifest(manifest, |lockstep| {
        let (table, field) = key.location();
        let target = match table {
            Some(name) => match lockstep.get_mut(name).and_then(Item::as_table_mut) {
                Some(t) => t,
                None => return Ok(false),
            },
            None => lockstep,
        };
        Ok(target.remove(field).is_some())
    })
}
