use crate::specifier::RequirementSpecifier;
use crate::types::Channel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("environment descriptor I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("environment descriptor YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Minimal solver input: name, channels in priority order, and dependency lines.
///
/// Dependency lines are rendered specifiers (`name`, `name >=1.0`) or exact
/// pins (`name==1.2.3`), kept in the order they were supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl EnvironmentDescriptor {
    pub fn new(
        name: impl Into<String>,
        channels: &[Channel],
        specifiers: &[RequirementSpecifier],
    ) -> Self {
        Self {
            name: name.into(),
            channels: channels.to_vec(),
            dependencies: specifiers.iter().map(ToString::to_string).collect(),
        }
    }

    /// Write the descriptor as YAML, creating parent directories and replacing any
    /// existing file.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), DescriptorError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}
