//! # Name Newtypes
//!
//! Validated names for everything that becomes a directory on disk.
//! Each name is a distinct type, so an environment name cannot be passed
//! where an artifact name is expected, and every constructor guarantees the
//! value is a single safe path segment.
//!
//! ## Validation
//!
//! - [`ArtifactName`]: exactly two non-empty segments joined by one hyphen,
//!   `author-name`. Segments are ASCII alphanumerics or `_`.
//! - [`EnvName`], [`Version`]: one path segment. No separators, no NUL, no
//!   leading `.` (dot-directories are reserved for backups and staging).

use serde::{Deserialize, Serialize};

use crate::error::PemError;

/// Longest accepted name, in bytes.
const MAX_SEGMENT_LEN: usize = 128;

/// Deserialize string newtypes through their validating constructor so
/// invalid values are rejected at parse time, not silently accepted.
macro_rules! impl_validating_deserialize {
    ($ty:ident) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

macro_rules! impl_str_newtype {
    ($ty:ident) => {
        impl $ty {
            /// Borrow the validated string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<std::path::Path> for $ty {
            fn as_ref(&self) -> &std::path::Path {
                std::path::Path::new(&self.0)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = PemError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl_validating_deserialize!($ty);
    };
}

/// Check that `value` can be used verbatim as one directory name.
pub fn validate_segment(kind: &'static str, value: &str) -> Result<(), PemError> {
    if value.is_empty() {
        return Err(PemError::invalid_name(kind, value, "must not be empty"));
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(PemError::invalid_name(
            kind,
            value,
            format!("longer than {MAX_SEGMENT_LEN} bytes"),
        ));
    }
    if value.starts_with('.') {
        return Err(PemError::invalid_name(kind, value, "must not start with '.'"));
    }
    if let Some(c) = value
        .chars()
        .find(|c| matches!(c, '/' | '\\' | '\0') || c.is_control() || c.is_whitespace())
    {
        return Err(PemError::invalid_name(
            kind,
            value,
            format!("contains forbidden character {c:?}"),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ArtifactName
// ---------------------------------------------------------------------------

/// A module or data registration name in `author-name` form.
///
/// The author segment lets two authors publish modules with the same short
/// name; environments flatten the name to its second segment (the
/// "friendly" name) when laying modules out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArtifactName(String);

impl_str_newtype!(ArtifactName);

impl ArtifactName {
    /// Validate and wrap an artifact name.
    ///
    /// # Errors
    ///
    /// [`PemError::InvalidName`] unless the value is exactly two non-empty
    /// `[A-Za-z0-9_]` segments separated by a single hyphen.
    pub fn new(value: impl Into<String>) -> Result<Self, PemError> {
        let s = value.into();
        let mut parts = s.split('-');
        let (author, module) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(m), None) => (a, m),
            _ => {
                return Err(PemError::invalid_name(
                    "artifact",
                    &s,
                    "must be <author>-<name> with exactly one hyphen",
                ))
            }
        };
        for (label, segment) in [("author", author), ("name", module)] {
            if segment.is_empty() {
                return Err(PemError::invalid_name(
                    "artifact",
                    &s,
                    format!("{label} segment is empty"),
                ));
            }
            if !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(PemError::invalid_name(
                    "artifact",
                    &s,
                    format!("{label} segment must be [A-Za-z0-9_]"),
                ));
            }
        }
        if s.len() > MAX_SEGMENT_LEN {
            return Err(PemError::invalid_name(
                "artifact",
                &s,
                format!("longer than {MAX_SEGMENT_LEN} bytes"),
            ));
        }
        Ok(Self(s))
    }

    /// Build a name from its two segments.
    pub fn from_parts(author: &str, module: &str) -> Result<Self, PemError> {
        Self::new(format!("{author}-{module}"))
    }

    /// The author segment.
    pub fn author(&self) -> &str {
        self.0.split_once('-').map(|(a, _)| a).unwrap_or(&self.0)
    }

    /// The module segment, used as the directory name inside environments.
    pub fn friendly(&self) -> &str {
        self.0.split_once('-').map(|(_, m)| m).unwrap_or(&self.0)
    }
}

// ---------------------------------------------------------------------------
// EnvName
// ---------------------------------------------------------------------------

/// The name of an environment directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EnvName(String);

impl_str_newtype!(EnvName);

impl EnvName {
    /// Validate and wrap an environment name.
    pub fn new(value: impl Into<String>) -> Result<Self, PemError> {
        let s = value.into();
        validate_segment("environment", &s)?;
        Ok(Self(s))
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// A version string: a release number, a commit id, a tag, or a
/// caller-assigned upload label. Opaque to the store beyond path safety.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Version(String);

impl_str_newtype!(Version);

impl Version {
    /// Validate and wrap a version string.
    pub fn new(value: impl Into<String>) -> Result<Self, PemError> {
        let s = value.into();
        validate_segment("version", &s)?;
        Ok(Self(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_name_accepts_author_and_module() {
        let name = ArtifactName::new("puppetlabs-ntp").unwrap();
        assert_eq!(name.author(), "puppetlabs");
        assert_eq!(name.friendly(), "ntp");
        assert_eq!(name.as_str(), "puppetlabs-ntp");
    }

    #[test]
    fn artifact_name_accepts_underscores() {
        let name = ArtifactName::new("aristanetworks-netdev_stdlib_eos").unwrap();
        assert_eq!(name.friendly(), "netdev_stdlib_eos");
    }

    #[test]
    fn artifact_name_rejects_missing_hyphen() {
        let err = ArtifactName::new("ntp").unwrap_err();
        assert!(matches!(err, PemError::InvalidName { kind: "artifact", .. }));
    }

    #[test]
    fn artifact_name_rejects_extra_segments() {
        assert!(ArtifactName::new("a-b-c").is_err());
        assert!(ArtifactName::new("-ntp").is_err());
        assert!(ArtifactName::new("acme-").is_err());
    }

    #[test]
    fn artifact_name_rejects_path_characters() {
        assert!(ArtifactName::new("acme-../etc").is_err());
        assert!(ArtifactName::new("acme-n/tp").is_err());
        assert!(ArtifactName::new("ac me-ntp").is_err());
    }

    #[test]
    fn artifact_name_from_parts() {
        let name = ArtifactName::from_parts("myorg", "teamx").unwrap();
        assert_eq!(name.as_str(), "myorg-teamx");
    }

    #[test]
    fn version_rejects_traversal() {
        assert!(Version::new("..").is_err());
        assert!(Version::new("1.0/../../x").is_err());
        assert!(Version::new(".hidden").is_err());
        assert!(Version::new("").is_err());
        assert!(Version::new("1.0.0").is_ok());
        assert!(Version::new("e93a55d").is_ok());
    }

    #[test]
    fn env_name_rejects_separator() {
        assert!(EnvName::new("prod").is_ok());
        assert!(EnvName::new("feature_x").is_ok());
        assert!(EnvName::new("a/b").is_err());
        assert!(EnvName::new(".pem-backup-prod").is_err());
    }

    #[test]
    fn deserialize_routes_through_validation() {
        let ok: ArtifactName = serde_yaml::from_str("acme-ntp").unwrap();
        assert_eq!(ok.friendly(), "ntp");
        let bad: Result<ArtifactName, _> = serde_yaml::from_str("ntp");
        assert!(bad.is_err());
    }

    #[test]
    fn from_str_matches_new() {
        let parsed: Version = "2.0.0".parse().unwrap();
        assert_eq!(parsed, Version::new("2.0.0").unwrap());
    }
}
