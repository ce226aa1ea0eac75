use crate::project::ProjectConfig;
use crate::types::Platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Token separating a raw lock's header from its artifact list.
pub const EXPLICIT_MARKER: &str = "@EXPLICIT";

const PLATFORM_HEADER: &str = "# platform:";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock file JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("solver produced no lock for platform '{platform}' (expected {})", path.display())]
    MissingPlatformLock { platform: Platform, path: PathBuf },
    #[error("lock for platform '{0}' contains no artifacts")]
    EmptyPlatformLock(Platform),
    #[error("malformed lock file: {0}")]
    MalformedLockFile(String),
    #[error("lock file {0} has no metadata; supply the package name explicitly")]
    PackageNameRequired(String),
    #[error("lock does not cover platforms: {}", join_platforms(missing))]
    IncompletePlatformCoverage { missing: Vec<Platform> },
    #[error("lock platforms do not match the request: expected [{}], found [{}]", join_platforms(expected), join_platforms(found))]
    PlatformMismatch {
        expected: Vec<Platform>,
        found: Vec<Platform>,
    },
}

fn join_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(Platform::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Provenance embedded in every combined artifact and rich lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub entry_points: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl LockMetadata {
    /// Fresh metadata from the current manifest state.
    pub fn for_project(project: &ProjectConfig) -> Self {
        Self {
            package_name: Some(project.package_name.clone()),
            entry_points: project.entry_points(),
            version: Some(project.version.clone()),
            created_at: Utc::now(),
        }
    }
}

/// The persisted multi-platform lock: metadata plus one artifact list per platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedLock {
    pub metadata: LockMetadata,
    pub platform_tar_links: BTreeMap<Platform, Vec<String>>,
}

impl CombinedLock {
    pub fn platforms(&self) -> Vec<Platform> {
        self.platform_tar_links.keys().cloned().collect()
    }

    /// Requested platforms this artifact has no entry for, in request order.
    pub fn missing_platforms(&self, requested: &[Platform]) -> Vec<Platform> {
        let mut missing: Vec<Platform> = Vec::new();
        for p in requested {
            if !self.platform_tar_links.contains_key(p) && !missing.contains(p) {
                missing.push(p.clone());
            }
        }
        missing
    }

    pub fn ensure_covers(&self, requested: &[Platform]) -> Result<(), LockError> {
        let missing = self.missing_platforms(requested);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LockError::IncompletePlatformCoverage { missing })
        }
    }

    /// Check that the keys equal `requested` exactly and every list is non-empty.
    pub fn validate(&self, requested: &[Platform]) -> Result<(), LockError> {
        let expected: BTreeSet<&Platform> = requested.iter().collect();
        let found: BTreeSet<&Platform> = self.platform_tar_links.keys().collect();
        if expected != found {
            return Err(LockError::PlatformMismatch {
                expected: expected.into_iter().cloned().collect(),
                found: found.into_iter().cloned().collect(),
            });
        }
        for (platform, links) in &self.platform_tar_links {
            if links.is_empty() {
                return Err(LockError::EmptyPlatformLock(platform.clone()));
            }
        }
        Ok(())
    }

    pub fn links(&self, platform: &Platform) -> Result<&[String], LockError> {
        self.platform_tar_links
            .get(platform)
            .map(Vec::as_slice)
            .ok_or_else(|| LockError::IncompletePlatformCoverage {
                missing: vec![platform.clone()],
            })
    }

    /// Render one platform as a standalone explicit lock (without metadata).
    pub fn explicit_lock_for(&self, platform: &Platform) -> Result<String, LockError> {
        let links = self.links(platform)?;
        let mut out = format!("{PLATFORM_HEADER} {platform}\n{EXPLICIT_MARKER}\n");
        for link in links {
            out.push_str(link);
            out.push('\n');
        }
        Ok(out)
    }

    /// Digest over the platform-sorted artifact lists. Metadata is not included,
    /// so relocking the same resolution yields the same digest.
    pub fn content_digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (platform, links) in &self.platform_tar_links {
            hasher.update(format!("platform:{platform}\n").as_bytes());
            for link in links {
                hasher.update(format!("link:{link}\n").as_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn to_json_pretty(&self) -> Result<String, LockError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self, LockError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), LockError> {
        let mut content = self.to_json_pretty()?;
        content.push('\n');
        write_atomic(path.as_ref(), content.as_bytes())?;
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}

/// Replace `path` with `content` via a synced temp file in the same directory.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    // Fsync parent directory to ensure rename durability on power loss.
    if let Ok(f) = fs::File::open(dir) {
        let _ = f.sync_all();
    }
    Ok(())
}

/// The artifact lines following the explicit marker, trimmed, blank lines dropped.
pub fn raw_artifact_lines(text: &str) -> Result<Vec<String>, LockError> {
    let (_, tail) = text.split_once(EXPLICIT_MARKER).ok_or_else(|| {
        LockError::MalformedLockFile(format!("no {EXPLICIT_MARKER} marker found"))
    })?;
    Ok(tail
        .trim()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}

/// The platform named by a raw lock's `# platform: <id>` header line, if any.
pub fn raw_lock_platform(text: &str) -> Option<Platform> {
    text.lines()
        .take_while(|l| l.trim() != EXPLICIT_MARKER)
        .find_map(|l| l.trim().strip_prefix(PLATFORM_HEADER))
        .and_then(Platform::parse)
}

/// Merge the solver's per-platform raw locks in `dir` into one artifact.
///
/// Every requested platform must have a raw lock named after it with at least
/// one artifact; the resulting keys equal the requested set exactly.
pub fn combine_platform_locks(
    dir: &Path,
    platforms: &[Platform],
    metadata: LockMetadata,
) -> Result<CombinedLock, LockError> {
    let mut platform_tar_links = BTreeMap::new();
    for platform in platforms {
        let path = dir.join(platform.raw_lock_file_name());
        if !path.is_file() {
            return Err(LockError::MissingPlatformLock {
                platform: platform.clone(),
                path,
            });
        }
        let text = fs::read_to_string(&path)?;
        let links = raw_artifact_lines(&text).map_err(|e| match e {
            LockError::MalformedLockFile(msg) => {
                LockError::MalformedLockFile(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        if links.is_empty() {
            return Err(LockError::EmptyPlatformLock(platform.clone()));
        }
        platform_tar_links.insert(platform.clone(), links);
    }

    let combined = CombinedLock {
        metadata,
        platform_tar_links,
    };
    combined.validate(platforms)?;
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> LockMetadata {
        LockMetadata {
            package_name: Some("demo".to_owned()),
            entry_points: vec!["demo".to_owned()],
            version: Some("0.1.0".to_owned()),
            created_at: Utc::now(),
        }
    }

    fn write_raw(dir: &Path, platform: &str, links: &[&str]) {
        let mut text = format!("# generated\n# platform: {platform}\n@EXPLICIT\n");
        for l in links {
            text.push_str(l);
            text.push('\n');
        }
        fs::write(dir.join(format!("conda-{platform}.lock")), text).unwrap();
    }

    #[test]
    fn combines_requested_platforms() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), "linux-64", &["c/linux-64/python-3.9.7-h0_0.tar.bz2", "c/linux-64/click-8.0.1-py_0.tar.bz2"]);
        write_raw(dir.path(), "osx-64", &["c/osx-64/python-3.9.7-h1_0.tar.bz2"]);
        // not requested, must not appear
        write_raw(dir.path(), "win-64", &["c/win-64/python-3.9.7-h2_0.tar.bz2"]);

        let platforms = vec![Platform::new("linux-64"), Platform::new("osx-64")];
        let combined = combine_platform_locks(dir.path(), &platforms, metadata()).unwrap();
        assert_eq!(combined.platforms(), platforms);
        assert_eq!(combined.platform_tar_links[&Platform::new("linux-64")].len(), 2);
    }

    #[test]
    fn missing_platform_lock_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), "linux-64", &["c/x-1-0.tar.bz2"]);
        let err = combine_platform_locks(
            dir.path(),
            &[Platform::new("linux-64"), Platform::new("osx-64")],
            metadata(),
        )
        .unwrap_err();
        assert!(matches!(err, LockError::MissingPlatformLock { ref platform, .. } if platform == "osx-64"));
    }

    #[test]
    fn empty_platform_lock_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), "linux-64", &[]);
        let err = combine_platform_locks(dir.path(), &[Platform::new("linux-64")], metadata())
            .unwrap_err();
        assert!(matches!(err, LockError::EmptyPlatformLock(_)));
    }

    #[test]
    fn raw_lock_without_marker_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("conda-linux-64.lock"), "just text\n").unwrap();
        let err = combine_platform_locks(dir.path(), &[Platform::new("linux-64")], metadata())
            .unwrap_err();
        assert!(matches!(err, LockError::MalformedLockFile(_)));
    }

    #[test]
    fn json_shape_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), "linux-64", &["c/foo-1.0-0.tar.bz2"]);
        let combined =
            combine_platform_locks(dir.path(), &[Platform::new("linux-64")], metadata()).unwrap();

        let path = dir.path().join("out/conda_env.lock.json");
        combined.write_to_file(&path).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["metadata"]["package_name"], "demo");
        assert!(raw["metadata"]["created_at"].is_string());
        assert_eq!(raw["platform_tar_links"]["linux-64"][0], "c/foo-1.0-0.tar.bz2");

        let loaded = CombinedLock::read_from_file(&path).unwrap();
        assert_eq!(loaded, combined);
    }

    #[test]
    fn coverage_names_missing_platforms() {
        let mut links = BTreeMap::new();
        links.insert(Platform::new("linux-64"), vec!["c/a-1-0.tar.bz2".to_owned()]);
        let combined = CombinedLock {
            metadata: metadata(),
            platform_tar_links: links,
        };
        let err = combined
            .ensure_covers(&[
                Platform::new("osx-64"),
                Platform::new("win-64"),
                Platform::new("linux-64"),
            ])
            .unwrap_err();
        match err {
            LockError::IncompletePlatformCoverage { missing } => {
                assert_eq!(missing, vec![Platform::new("osx-64"), Platform::new("win-64")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn digest_ignores_metadata() {
        let mut links = BTreeMap::new();
        links.insert(Platform::new("linux-64"), vec!["c/a-1-0.tar.bz2".to_owned()]);
        let a = CombinedLock {
            metadata: metadata(),
            platform_tar_links: links.clone(),
        };
        let mut b = a.clone();
        b.metadata.version = Some("9.9.9".to_owned());
        assert_eq!(a.content_digest(), b.content_digest());

        b.platform_tar_links
            .insert(Platform::new("linux-64"), vec!["c/a-2-0.tar.bz2".to_owned()]);
        assert_ne!(a.content_digest(), b.content_digest());
    }

    #[test]
    fn explicit_lock_for_platform() {
        let mut links = BTreeMap::new();
        links.insert(Platform::new("osx-64"), vec!["c/a-1-0.tar.bz2".to_owned()]);
        let combined = CombinedLock {
            metadata: metadata(),
            platform_tar_links: links,
        };
        let text = combined.explicit_lock_for(&Platform::new("osx-64")).unwrap();
        assert_eq!(raw_artifact_lines(&text).unwrap(), ["c/a-1-0.tar.bz2"]);
        assert_eq!(raw_lock_platform(&text), Some(Platform::new("osx-64")));
        assert!(combined.explicit_lock_for(&Platform::new("win-64")).is_err());
    }
}
