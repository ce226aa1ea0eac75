//! Constrained relock against a previously tested lock.
//!
//! The direct dependencies of the package (plus python) are pinned to the exact
//! versions found in the baseline, the package itself is pinned at its manifest
//! version, and only that small set is re-solved per platform.

use crate::pipeline::{lock_per_platform, LockContext};
use crate::CoreError;
use lockstep_schema::codec;
use lockstep_schema::specifier::{python_first, PYTHON};
use lockstep_schema::{
    normalize_name, raw_lock_platform, ArtifactRef, Channel, CombinedLock, EnvironmentDescriptor,
    LockError, ManifestError, Platform, ProjectConfig, RequirementSpecifier,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PLATFORM_PLACEHOLDER: &str = "{platform}";

/// A trusted lock the relock is based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineLock {
    /// A combined multi-platform artifact.
    Combined(CombinedLock),
    /// Raw explicit locks, one per platform.
    PerPlatform(BTreeMap<Platform, Vec<String>>),
}

impl BaselineLock {
    /// Load a baseline from a path or a `{platform}` path template.
    ///
    /// A template names one raw lock per requested platform. A plain path is a
    /// combined artifact (JSON) or a single raw lock whose platform is taken from
    /// its `# platform:` header. Relative paths resolve against `base_dir`.
    pub fn load(spec: &str, platforms: &[Platform], base_dir: &Path) -> Result<Self, CoreError> {
        if spec.contains(PLATFORM_PLACEHOLDER) {
            return Self::load_template(spec, platforms, base_dir);
        }
        if spec.contains('{') || spec.contains('}') {
            return Err(ManifestError::InvalidBaselineTemplate(spec.to_owned()).into());
        }

        let path = base_dir.join(spec);
        let text = fs::read_to_string(&path)?;
        if text.trim_start().starts_with('{') {
            debug!("baseline {} is a combined lock", path.display());
            return Ok(Self::Combined(CombinedLock::from_json_str(&text)?));
        }

        let decoded = codec::decode(&text)?;
        let platform = raw_lock_platform(&decoded.header).ok_or_else(|| {
            LockError::MalformedLockFile(format!(
                "{}: no '# platform:' header; use a {PLATFORM_PLACEHOLDER} template",
                path.display()
            ))
        })?;
        let mut links = BTreeMap::new();
        links.insert(platform, decoded.artifacts());
        Ok(Self::PerPlatform(links))
    }

    fn load_template(
        template: &str,
        platforms: &[Platform],
        base_dir: &Path,
    ) -> Result<Self, CoreError> {
        let paths: Vec<(Platform, PathBuf)> = platforms
            .iter()
            .map(|p| (p.clone(), base_dir.join(template.replace(PLATFORM_PLACEHOLDER, p))))
            .collect();
        let missing: Vec<Platform> = paths
            .iter()
            .filter(|(_, path)| !path.is_file())
            .map(|(p, _)| p.clone())
            .collect();
        if !missing.is_empty() {
            return Err(LockError::IncompletePlatformCoverage { missing }.into());
        }

        let mut links = BTreeMap::new();
        for (platform, path) in paths {
            let decoded = codec::decode(&fs::read_to_string(&path)?)?;
            links.insert(platform, decoded.artifacts());
        }
        Ok(Self::PerPlatform(links))
    }

    pub fn links(&self, platform: &Platform) -> Option<&[String]> {
        match self {
            Self::Combined(lock) => lock.platform_tar_links.get(platform),
            Self::PerPlatform(links) => links.get(platform),
        }
        .map(Vec::as_slice)
    }

    /// Fail with the requested platforms the baseline does not cover.
    pub fn ensure_covers(&self, requested: &[Platform]) -> Result<(), LockError> {
        match self {
            Self::Combined(lock) => lock.ensure_covers(requested),
            Self::PerPlatform(links) => {
                let mut missing: Vec<Platform> = Vec::new();
                for p in requested {
                    if !links.contains_key(p) && !missing.contains(p) {
                        missing.push(p.clone());
                    }
                }
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(LockError::IncompletePlatformCoverage { missing })
                }
            }
        }
    }
}

/// Normalized names of the manifest's direct dependencies, always including python.
pub fn direct_dependency_names(project: &ProjectConfig) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = project
        .dependencies
        .keys()
        .map(|n| normalize_name(n))
        .collect();
    names.insert(PYTHON.to_owned());
    names
}

/// Exact pins for one platform: the package itself, then every baseline artifact
/// whose name is in `pin_set`, python first.
pub fn pinned_specifiers(
    project: &ProjectConfig,
    links: &[String],
    pin_set: &BTreeSet<String>,
) -> Result<Vec<RequirementSpecifier>, LockError> {
    let own_name = normalize_name(&project.package_name);
    let mut specs = vec![RequirementSpecifier::pinned(&own_name, &project.version)];
    let mut seen = BTreeSet::from([own_name]);

    for line in links {
        let artifact = ArtifactRef::parse(line)?;
        let name = artifact.normalized_name();
        if pin_set.contains(&name) && seen.insert(name.clone()) {
            specs.push(RequirementSpecifier::pinned(&name, &artifact.version));
        }
    }
    python_first(&mut specs);
    Ok(specs)
}

/// One descriptor per requested platform, pinned from the baseline.
pub fn relock_descriptors(
    project: &ProjectConfig,
    baseline: &BaselineLock,
    platforms: &[Platform],
    channels: &[Channel],
) -> Result<Vec<(Platform, EnvironmentDescriptor)>, CoreError> {
    baseline.ensure_covers(platforms)?;
    let pin_set = direct_dependency_names(project);

    let mut out = Vec::with_capacity(platforms.len());
    for platform in platforms {
        let links = baseline.links(platform).ok_or_else(|| LockError::IncompletePlatformCoverage {
            missing: vec![platform.clone()],
        })?;
        let specs = pinned_specifiers(project, links, &pin_set)?;
        debug!(
            "[{platform}] relock pins: {}",
            specs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        out.push((
            platform.clone(),
            EnvironmentDescriptor::new(&project.package_name, channels, &specs),
        ));
    }
    Ok(out)
}

/// Re-solve the pinned set for every platform and combine the results.
pub fn relock(
    ctx: &LockContext<'_>,
    project: &ProjectConfig,
    baseline: &BaselineLock,
    platforms: &[Platform],
    channels: &[Channel],
) -> Result<CombinedLock, CoreError> {
    let descriptors = relock_descriptors(project, baseline, platforms, channels)?;
    info!(
        "relocking {} against the tested baseline for {} platform(s)",
        project.package_name,
        descriptors.len()
    );
    lock_per_platform(ctx, project, &descriptors)
}
