use crate::lock::LockError;
use crate::specifier::normalize_name;

const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.bz2", ".conda"];

/// One resolved artifact line: `<channel>/<name>-<version>-<build>.<ext>[#hash]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub channel: String,
    pub name: String,
    pub version: String,
    pub build: String,
}

impl ArtifactRef {
    pub fn parse(line: &str) -> Result<Self, LockError> {
        let malformed = || LockError::MalformedLockFile(format!("invalid artifact reference '{line}'"));

        let trimmed = line.trim();
        let without_hash = trimmed.split_once('#').map_or(trimmed, |(url, _)| url);
        let (channel, file) = without_hash.rsplit_once('/').ok_or_else(malformed)?;
        let stem = ARCHIVE_EXTENSIONS
            .iter()
            .find_map(|ext| file.strip_suffix(ext))
            .unwrap_or(file);

        let mut parts = stem.rsplitn(3, '-');
        let build = parts.next().ok_or_else(malformed)?;
        let version = parts.next().ok_or_else(malformed)?;
        let name = parts.next().ok_or_else(malformed)?;
        if name.is_empty() || version.is_empty() || build.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            channel: channel.to_owned(),
            name: name.to_owned(),
            version: version.to_owned(),
            build: build.to_owned(),
        })
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_url_with_hash() {
        let r = ArtifactRef::parse(
            "https://conda.anaconda.org/conda-forge/linux-64/typing_extensions-4.1.1-pyha770c72_0.tar.bz2#abc123",
        )
        .unwrap();
        assert_eq!(r.channel, "https://conda.anaconda.org/conda-forge/linux-64");
        assert_eq!(r.name, "typing_extensions");
        assert_eq!(r.version, "4.1.1");
        assert_eq!(r.build, "pyha770c72_0");
        assert_eq!(r.normalized_name(), "typing-extensions");
    }

    #[test]
    fn dashes_in_name_are_kept() {
        let r = ArtifactRef::parse("chan/ruamel-yaml-0.17.21-py39hb9d737c_1.conda").unwrap();
        assert_eq!(r.name, "ruamel-yaml");
        assert_eq!(r.version, "0.17.21");
    }

    #[test]
    fn short_form() {
        let r = ArtifactRef::parse("chan/foo-1.0-0.tar.bz2").unwrap();
        assert_eq!((r.name.as_str(), r.version.as_str(), r.build.as_str()), ("foo", "1.0", "0"));
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["no-slash-1.0-0.tar.bz2", "chan/onlyname.tar.bz2", "chan/name-1.0.tar.bz2", "chan/-1.0-0"] {
            assert!(
                matches!(ArtifactRef::parse(bad), Err(LockError::MalformedLockFile(_))),
                "{bad} should be rejected"
            );
        }
    }
}
