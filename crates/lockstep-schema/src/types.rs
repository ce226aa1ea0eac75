//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so lock files stay readable
//! by other tooling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string without validation.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Solver target identifier such as `linux-64` or `osx-arm64`.
    Platform
);

string_newtype!(
    /// Conda channel or registry reference, in priority order where it appears in lists.
    Channel
);

/// Platforms the solver can target.
pub const SUPPORTED_PLATFORMS: &[&str] = &[
    "linux-64",
    "linux-aarch64",
    "linux-ppc64le",
    "osx-64",
    "osx-arm64",
    "win-64",
];

/// Platforms locked when the manifest does not name any.
pub const DEFAULT_PLATFORMS: &[&str] = &["linux-64", "osx-64", "win-64"];

impl Platform {
    /// Parse a user-supplied platform id, rejecting targets the solver does not know.
    pub fn parse(raw: &str) -> Option<Self> {
        let id = raw.trim().to_lowercase();
        SUPPORTED_PLATFORMS
            .contains(&id.as_str())
            .then(|| Self(id))
    }

    /// The platform of the running host, if it is one the solver supports.
    pub fn current() -> Option<Self> {
        let id = match (std::env::consts::OS, std::env::consts::ARCH) {
            ("linux", "x86_64") => "linux-64",
            ("linux", "aarch64") => "linux-aarch64",
            ("linux", "powerpc64") => "linux-ppc64le",
            ("macos", "x86_64") => "osx-64",
            ("macos", "aarch64") => "osx-arm64",
            ("windows", "x86_64") => "win-64",
            _ => return None,
        };
        Some(Self(id.to_owned()))
    }

    /// File name the solver writes this platform's explicit lock to.
    pub fn raw_lock_file_name(&self) -> String {
        format!("conda-{}.lock", self.0)
    }
}

/// The default platform set as typed values.
pub fn default_platforms() -> Vec<Platform> {
    DEFAULT_PLATFORMS.iter().map(|p| Platform::new(*p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parse_normalizes_case() {
        let p = Platform::parse(" Linux-64 ").unwrap();
        assert_eq!(p.as_str(), "linux-64");
    }

    #[test]
    fn platform_parse_rejects_unknown() {
        assert!(Platform::parse("plan9-64").is_none());
    }

    #[test]
    fn platform_serde_is_plain_string() {
        let p = Platform::new("osx-64");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"osx-64\"");
        let back: Platform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn raw_lock_file_name_follows_solver_convention() {
        assert_eq!(
            Platform::new("win-64").raw_lock_file_name(),
            "conda-win-64.lock"
        );
    }

    #[test]
    fn defaults_are_supported() {
        for p in default_platforms() {
            assert!(Platform::parse(&p).is_some());
        }
    }
}
