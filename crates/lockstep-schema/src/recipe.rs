//! Conda build recipe (`meta.yaml`) generated from the project manifest.

use crate::descriptor::DescriptorError;
use crate::project::ProjectConfig;
use crate::specifier::{self, SpecError, PYTHON};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const INSTALL_SCRIPT: &str = "python -m pip install --no-deps --ignore-installed -vv .";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipePackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeSource {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeBuild {
    #[serde(default)]
    pub entry_points: Vec<String>,
    pub script: String,
    pub noarch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeRequirements {
    pub host: Vec<String>,
    pub run: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeAbout {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    pub license: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeExtra {
    #[serde(default)]
    pub maintainers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondaRecipe {
    pub package: RecipePackage,
    pub source: RecipeSource,
    pub build: RecipeBuild,
    pub requirements: RecipeRequirements,
    pub about: RecipeAbout,
    pub extra: RecipeExtra,
}

impl CondaRecipe {
    /// Build the recipe for a noarch python package.
    ///
    /// Run requirements are the main dependencies (no dev dependencies). The host
    /// python comes from the manifest, or from `python_version` when the manifest
    /// does not declare one.
    pub fn from_project(
        project: &ProjectConfig,
        python_version: Option<&str>,
    ) -> Result<Self, SpecError> {
        let python = specifier::resolve_python_version(&project.dependencies, python_version)?;
        let run = specifier::translate(&project.dependencies, &project.dev_dependencies, false)?
            .iter()
            .map(ToString::to_string)
            .collect();

        let license = if project.license == "Proprietary" {
            "INTERNAL".to_owned()
        } else {
            project.license.clone()
        };

        Ok(Self {
            package: RecipePackage {
                name: project.package_name.clone(),
                version: project.version.clone(),
            },
            source: RecipeSource {
                path: project.project_dir.clone(),
            },
            build: RecipeBuild {
                entry_points: project
                    .scripts
                    .iter()
                    .map(|(name, target)| format!("{name} = {target}"))
                    .collect(),
                script: INSTALL_SCRIPT.to_owned(),
                noarch: PYTHON.to_owned(),
            },
            requirements: RecipeRequirements {
                host: vec![format!("{PYTHON} {python}"), "pip".to_owned(), "poetry".to_owned()],
                run,
            },
            about: RecipeAbout {
                home: project.homepage.clone(),
                license,
                description: project.description.clone(),
                doc_url: project.documentation.clone(),
            },
            extra: RecipeExtra {
                maintainers: project.authors.clone(),
            },
        })
    }

    /// Render as YAML with a leading document marker, which conda-build expects.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let body = serde_yaml::to_string(self)?;
        if body.starts_with("---") {
            Ok(body)
        } else {
            Ok(format!("---\n{body}"))
        }
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), DescriptorError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::parse_manifest_str;

    fn project(extra_deps: &str) -> ProjectConfig {
        let input = format!(
            r#"
[tool.poetry]
name = "demo"
version = "1.2.0"
authors = ["Dev <dev@example.com>"]
homepage = "https://example.com"

[tool.poetry.dependencies]
{extra_deps}
click = "^8.0"

[tool.poetry.dev-dependencies]
pytest = "*"

[tool.poetry.scripts]
demo = "demo.cli:main"
"#
        );
        parse_manifest_str(&input, Path::new("/src/demo/pyproject.toml"), |_| None).unwrap()
    }

    #[test]
    fn recipe_from_project() {
        let recipe = CondaRecipe::from_project(&project("python = \"^3.9\""), None).unwrap();
        assert_eq!(recipe.package.name, "demo");
        assert_eq!(recipe.requirements.host[0], "python >=3.9,<4.0");
        assert_eq!(recipe.requirements.run, ["python >=3.9,<4.0", "click >=8.0,<9.0"]);
        assert_eq!(recipe.build.entry_points, ["demo = demo.cli:main"]);
        assert_eq!(recipe.about.license, "INTERNAL");
        assert_eq!(recipe.extra.maintainers.len(), 1);
    }

    #[test]
    fn recipe_requires_python() {
        let err = CondaRecipe::from_project(&project(""), None).unwrap_err();
        assert!(matches!(err, SpecError::InvalidPythonVersion(_)));

        let recipe = CondaRecipe::from_project(&project(""), Some("3.10")).unwrap();
        assert_eq!(recipe.requirements.host[0], "python ==3.10");
    }

    #[test]
    fn yaml_has_document_marker() {
        let recipe = CondaRecipe::from_project(&project("python = \"3.9\""), None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conda.recipe/meta.yaml");
        recipe.write_to(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("---\n"));
        let back: CondaRecipe = serde_yaml::from_str(&content).unwrap();
        assert_eq!(back, recipe);
    }
}
