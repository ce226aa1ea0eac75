//! Manifest parsing, dependency translation, and lock artifacts for lockstep.
//!
//! This crate defines the schema layer: `pyproject.toml` parsing with the
//! explicit `[tool.poetry]`/`[tool.lockstep]` merge (`ProjectConfig`), the
//! dependency spec translator (`translate`), the environment descriptor and
//! conda recipe documents, the combined multi-platform lock (`CombinedLock`),
//! the metadata codec for explicit lock files (`encode`/`decode`), and in-place
//! edits of the tool settings (`set_config_value`).

pub mod codec;
pub mod descriptor;
pub mod lock;
pub mod project;
pub mod recipe;
pub mod reference;
pub mod settings;
pub mod specifier;
pub mod types;

pub use codec::{decode, encode, package_name_from, resolve_package_name, DecodedLock};
pub use descriptor::{DescriptorError, EnvironmentDescriptor};
pub use lock::{
    combine_platform_locks, raw_artifact_lines, raw_lock_platform, write_atomic, CombinedLock,
    LockError, LockMetadata, EXPLICIT_MARKER,
};
pub use project::{
    parse_manifest_file, parse_manifest_str, BuildSystem, DependencyMap, ManifestError,
    ProjectConfig, SolverVariant,
};
pub use recipe::CondaRecipe;
pub use reference::ArtifactRef;
pub use settings::{remove_config_value, set_config_value, ConfigKey};
pub use specifier::{normalize_name, translate, RequirementSpecifier, SpecError};
pub use types::{Channel, Platform};
