//! Translation of manifest dependency declarations into solver requirement specifiers.
//!
//! Manifest constraints use caret/tilde ranges; the solver expects explicit
//! comparison operators. Names are normalized to the solver's canonical form and
//! `python` is always placed first in any translated list.

use crate::project::DependencyMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

pub const PYTHON: &str = "python";

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("dependency '{name}' must be a version string or a table with a 'version' key")]
    UnsupportedDependencyShape { name: String },
    #[error("no python version could be determined: {0}")]
    InvalidPythonVersion(String),
    #[error("dependency '{name}' has an invalid version constraint '{constraint}'")]
    InvalidConstraint { name: String, constraint: String },
}

/// A normalized `{name, version_constraint}` pair ready for the solver.
///
/// An empty constraint means "any version".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSpecifier {
    pub name: String,
    pub version_constraint: String,
}

impl RequirementSpecifier {
    pub fn new(name: &str, version_constraint: impl Into<String>) -> Self {
        Self {
            name: normalize_name(name),
            version_constraint: version_constraint.into(),
        }
    }

    /// An exact `name==version` pin.
    pub fn pinned(name: &str, version: &str) -> Self {
        Self::new(name, format!("=={version}"))
    }

    pub fn is_python(&self) -> bool {
        self.name == PYTHON
    }
}

impl fmt::Display for RequirementSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version_constraint.is_empty() {
            f.write_str(&self.name)
        } else if self.version_constraint.starts_with("==") {
            write!(f, "{}{}", self.name, self.version_constraint)
        } else {
            write!(f, "{} {}", self.name, self.version_constraint)
        }
    }
}

/// Canonical solver name: lowercase, with `_` and `.` folded to `-`.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '_' | '.' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Stable reorder so `python` comes first and everything else keeps its position.
pub fn python_first(specs: &mut [RequirementSpecifier]) {
    specs.sort_by_key(|s| !s.is_python());
}

/// Translate the dependency map (and optionally the dev map) into specifiers.
///
/// A name declared in both maps is taken from the main map.
pub fn translate(
    dependencies: &DependencyMap,
    dev_dependencies: &DependencyMap,
    include_dev: bool,
) -> Result<Vec<RequirementSpecifier>, SpecError> {
    let mut specs = Vec::with_capacity(dependencies.len() + dev_dependencies.len());
    for (name, value) in dependencies {
        specs.push(translate_one(name, value)?);
    }
    if include_dev {
        for (name, value) in dev_dependencies {
            let normalized = normalize_name(name);
            if specs.iter().any(|s| s.name == normalized) {
                debug!("dev dependency '{name}' already declared as a main dependency");
                continue;
            }
            specs.push(translate_one(name, value)?);
        }
    }
    python_first(&mut specs);
    Ok(specs)
}

fn translate_one(name: &str, value: &toml::Value) -> Result<RequirementSpecifier, SpecError> {
    let raw = declared_constraint(name, value)?;
    Ok(RequirementSpecifier::new(name, to_conda_constraint(name, raw)?))
}

/// The raw constraint string of one declaration: a bare string or a table's `version`.
pub fn declared_constraint<'a>(name: &str, value: &'a toml::Value) -> Result<&'a str, SpecError> {
    match value {
        toml::Value::String(s) => Ok(s),
        toml::Value::Table(table) => {
            let version = table.get("version").and_then(toml::Value::as_str).ok_or_else(|| {
                SpecError::UnsupportedDependencyShape {
                    name: name.to_owned(),
                }
            })?;
            let ignored: Vec<&str> = table
                .keys()
                .map(String::as_str)
                .filter(|k| *k != "version")
                .collect();
            if !ignored.is_empty() {
                debug!("dependency '{name}': ignoring unsupported keys {ignored:?}");
            }
            Ok(version)
        }
        _ => Err(SpecError::UnsupportedDependencyShape {
            name: name.to_owned(),
        }),
    }
}

/// Convert a manifest constraint into solver syntax.
///
/// `*` and the empty string mean "no constraint". Caret and tilde ranges are
/// expanded, a bare version becomes `==`, and anything else passes through with
/// whitespace removed. `||` alternatives and `,` conjunctions are handled per part.
pub fn to_conda_constraint(name: &str, raw: &str) -> Result<String, SpecError> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || compact == "*" {
        return Ok(String::new());
    }

    let invalid = || SpecError::InvalidConstraint {
        name: name.to_owned(),
        constraint: raw.to_owned(),
    };

    let mut alternatives = Vec::new();
    for alternative in compact.split("||") {
        let mut parts = Vec::new();
        for part in alternative.split(',') {
            if part.is_empty() {
                return Err(invalid());
            }
            parts.push(translate_part(part).ok_or_else(invalid)?);
        }
        alternatives.push(parts.join(","));
    }
    Ok(alternatives.join("|"))
}

fn translate_part(part: &str) -> Option<String> {
    if let Some(rest) = part.strip_prefix('^') {
        let parts = numeric_components(rest)?;
        let bump = parts.iter().position(|&c| c != 0).unwrap_or(parts.len() - 1);
        return Some(format!(">={rest},<{}", upper_bound(&parts, bump)?));
    }
    if part.starts_with("~=") {
        return Some(part.to_owned());
    }
    if let Some(rest) = part.strip_prefix('~') {
        let parts = numeric_components(rest)?;
        let bump = if parts.len() == 1 { 0 } else { 1 };
        return Some(format!(">={rest},<{}", upper_bound(&parts, bump)?));
    }
    if part.starts_with(|c: char| c.is_ascii_digit()) {
        if part.contains('*') {
            return Some(part.to_owned());
        }
        return Some(format!("=={part}"));
    }
    Some(part.to_owned())
}

fn numeric_components(version: &str) -> Option<Vec<u64>> {
    if version.is_empty() {
        return None;
    }
    version.split('.').map(|c| c.parse().ok()).collect()
}

/// `None` when the bumped component does not fit in a `u64`.
fn upper_bound(parts: &[u64], bump: usize) -> Option<String> {
    let bound = parts
        .iter()
        .enumerate()
        .map(|(i, &c)| match i.cmp(&bump) {
            std::cmp::Ordering::Less => Some(c.to_string()),
            std::cmp::Ordering::Equal => c.checked_add(1).map(|c| c.to_string()),
            std::cmp::Ordering::Greater => Some("0".to_owned()),
        })
        .collect::<Option<Vec<_>>>()?;
    Some(bound.join("."))
}

/// Determine the python constraint for operations that need one.
///
/// The manifest's declaration wins; an explicit value that disagrees with it
/// is reported and ignored. Without either, `InvalidPythonVersion` is returned.
pub fn resolve_python_version(
    dependencies: &DependencyMap,
    explicit: Option<&str>,
) -> Result<String, SpecError> {
    let declared = match dependencies.get(PYTHON) {
        Some(value) => {
            let raw = declared_constraint(PYTHON, value)?;
            Some(to_conda_constraint(PYTHON, raw)?)
        }
        None => None,
    };
    let explicit = explicit.map(str::trim).filter(|v| !v.is_empty());

    match (declared, explicit) {
        (Some(declared), Some(explicit)) => {
            let explicit_translated = to_conda_constraint(PYTHON, explicit)?;
            if explicit_translated != declared {
                warn!(
                    "python version '{explicit}' differs from the manifest's '{declared}'; using the manifest"
                );
            }
            if declared.is_empty() {
                return Err(SpecError::InvalidPythonVersion(
                    "the manifest declares python without a version".to_owned(),
                ));
            }
            Ok(declared)
        }
        (Some(declared), None) if !declared.is_empty() => Ok(declared),
        (Some(_), None) => Err(SpecError::InvalidPythonVersion(
            "the manifest declares python without a version".to_owned(),
        )),
        (None, Some(explicit)) => to_conda_constraint(PYTHON, explicit),
        (None, None) => Err(SpecError::InvalidPythonVersion(
            "declare python in the manifest dependencies or pass one explicitly".to_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(entries: &[(&str, &str)]) -> DependencyMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), toml::Value::String((*v).to_owned())))
            .collect()
    }

    fn names(specs: &[RequirementSpecifier]) -> Vec<&str> {
        specs.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn python_is_first_regardless_of_input_order() {
        // BTreeMap iterates alphabetically, so python starts in the middle
        let map = deps(&[
            ("aiohttp", "*"),
            ("click", "*"),
            ("numpy", "*"),
            ("python", ">=3.7"),
            ("zlib", "*"),
        ]);
        let specs = translate(&map, &DependencyMap::new(), false).unwrap();
        assert_eq!(specs[0].name, "python");
        assert_eq!(names(&specs), ["python", "aiohttp", "click", "numpy", "zlib"]);
    }

    #[test]
    fn python_first_when_only_in_dev_map() {
        let main = deps(&[("click", "*")]);
        let dev = deps(&[("python", "^3.9"), ("black", "*")]);
        let specs = translate(&main, &dev, true).unwrap();
        assert_eq!(specs[0].name, "python");
    }

    #[test]
    fn dev_dependencies_are_optional() {
        let main = deps(&[("python", ">=3.7,<3.10"), ("click", "*")]);
        let dev = deps(&[("pytest", "*")]);
        assert_eq!(names(&translate(&main, &dev, false).unwrap()), ["python", "click"]);
        assert_eq!(
            names(&translate(&main, &dev, true).unwrap()),
            ["python", "click", "pytest"]
        );
    }

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize_name("Ruamel.Yaml"), "ruamel-yaml");
        assert_eq!(normalize_name("typing_extensions"), "typing-extensions");
    }

    #[test]
    fn caret_ranges() {
        let t = |c: &str| to_conda_constraint("x", c).unwrap();
        assert_eq!(t("^1.2.3"), ">=1.2.3,<2.0.0");
        assert_eq!(t("^0.2.3"), ">=0.2.3,<0.3.0");
        assert_eq!(t("^0.0.3"), ">=0.0.3,<0.0.4");
        assert_eq!(t("^0.0"), ">=0.0,<0.1");
        assert_eq!(t("^3.9"), ">=3.9,<4.0");
    }

    #[test]
    fn tilde_ranges() {
        let t = |c: &str| to_conda_constraint("x", c).unwrap();
        assert_eq!(t("~1.2.3"), ">=1.2.3,<1.3.0");
        assert_eq!(t("~1.2"), ">=1.2,<1.3");
        assert_eq!(t("~1"), ">=1,<2");
        assert_eq!(t("~=1.4"), "~=1.4");
    }

    #[test]
    fn passthrough_and_bare_versions() {
        let t = |c: &str| to_conda_constraint("x", c).unwrap();
        assert_eq!(t("*"), "");
        assert_eq!(t(""), "");
        assert_eq!(t(">= 3.7, < 3.10"), ">=3.7,<3.10");
        assert_eq!(t("1.4.2"), "==1.4.2");
        assert_eq!(t("1.4.*"), "1.4.*");
        assert_eq!(t("^1.0 || ^2.0"), ">=1.0,<2.0|>=2.0,<3.0");
    }

    #[test]
    fn non_numeric_caret_is_invalid() {
        let err = to_conda_constraint("x", "^1.x").unwrap_err();
        assert!(matches!(err, SpecError::InvalidConstraint { .. }));
    }

    #[test]
    fn bumping_past_u64_is_invalid() {
        for raw in ["^18446744073709551615", "~1.18446744073709551615", "~18446744073709551615"] {
            let err = to_conda_constraint("x", raw).unwrap_err();
            assert!(
                matches!(err, SpecError::InvalidConstraint { ref constraint, .. } if constraint == raw),
                "{raw}: {err}"
            );
        }
        assert_eq!(
            to_conda_constraint("x", "^0.18446744073709551614").unwrap(),
            ">=0.18446744073709551614,<0.18446744073709551615"
        );
    }

    #[test]
    fn table_dependency_uses_version_key() {
        let value: toml::Value =
            toml::from_str::<toml::Table>("v = { version = \"^1.0\", markers = \"sys_platform == 'linux'\" }")
                .unwrap()["v"]
                .clone();
        let mut map = DependencyMap::new();
        map.insert("requests".to_owned(), value);
        let specs = translate(&map, &DependencyMap::new(), false).unwrap();
        assert_eq!(specs[0].to_string(), "requests >=1.0,<2.0");
    }

    #[test]
    fn unsupported_shapes_name_the_dependency() {
        let mut map = DependencyMap::new();
        map.insert("weird".to_owned(), toml::Value::Integer(3));
        let err = translate(&map, &DependencyMap::new(), false).unwrap_err();
        assert!(err.to_string().contains("weird"));

        let path_dep: toml::Table = toml::from_str("local = { path = \"../local\" }").unwrap();
        let map: DependencyMap = path_dep.into_iter().collect();
        let err = translate(&map, &DependencyMap::new(), false).unwrap_err();
        assert!(matches!(err, SpecError::UnsupportedDependencyShape { .. }));
    }

    #[test]
    fn rendering() {
        assert_eq!(RequirementSpecifier::new("Click", "").to_string(), "click");
        assert_eq!(RequirementSpecifier::pinned("numpy", "1.2.3").to_string(), "numpy==1.2.3");
        assert_eq!(
            RequirementSpecifier::new("python", ">=3.7,<3.10").to_string(),
            "python >=3.7,<3.10"
        );
    }

    #[test]
    fn python_version_manifest_wins() {
        let map = deps(&[("python", "^3.8")]);
        assert_eq!(
            resolve_python_version(&map, Some("3.11")).unwrap(),
            ">=3.8,<4.0"
        );
        assert_eq!(resolve_python_version(&map, None).unwrap(), ">=3.8,<4.0");
    }

    #[test]
    fn python_version_from_explicit_or_error() {
        let empty = DependencyMap::new();
        assert_eq!(resolve_python_version(&empty, Some("3.10")).unwrap(), "==3.10");
        assert!(matches!(
            resolve_python_version(&empty, None).unwrap_err(),
            SpecError::InvalidPythonVersion(_)
        ));
        let unconstrained = deps(&[("python", "*")]);
        assert!(resolve_python_version(&unconstrained, None).is_err());
    }
}
