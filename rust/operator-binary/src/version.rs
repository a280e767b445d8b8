//! Resolution of the requested Prometheus (or Thanos) version into a [`Version`], and the
//! version dependent behaviour of the Prometheus binary.
//!
//! The flag syntax changed twice over the lifetime of Prometheus, and several flags only exist
//! from a certain release on. Both are looked up in the ordered tables below, so supporting a new
//! release means adding a row instead of another comparison.
use semver::Version;
use snafu::{ResultExt, Snafu};
use strum::Display;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("default version {version:?} is not a valid version"))]
    InvalidDefaultVersion {
        source: semver::Error,
        version: String,
    },

    #[snafu(display("version {version} is not supported, the oldest supported version is {oldest}"))]
    UnsupportedVersion { version: Version, oldest: Version },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// The command line syntax understood by a Prometheus release.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FlagDialect {
    /// Prometheus 1.x: single dash flags and the local storage engine
    Legacy,
    /// Prometheus 2.0 to 2.6: `--storage.tsdb.retention`
    TsdbV1,
    /// Prometheus 2.7 and later: `--storage.tsdb.retention.time` and `--storage.tsdb.retention.size`
    TsdbV2,
}

/// Features that only exist from a certain Prometheus release on.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum Capability {
    /// `/-/healthy` and `/-/ready` instead of `/status`
    ReadinessEndpoints,
    /// `--rules.alert.*`
    AlertTuning,
    /// `--query.max-samples`
    QueryMaxSamples,
    /// `--log.format`
    LogFormat,
    /// `--storage.tsdb.wal-compression`
    WalCompression,
}

/// Lower bounds, sorted ascending. A version uses the dialect of the last row it is not older than.
const FLAG_DIALECTS: [(Version, FlagDialect); 3] = [
    (Version::new(1, 0, 0), FlagDialect::Legacy),
    (Version::new(2, 0, 0), FlagDialect::TsdbV1),
    (Version::new(2, 7, 0), FlagDialect::TsdbV2),
];

const CAPABILITIES: [(Version, Capability); 5] = [
    (Version::new(1, 8, 0), Capability::ReadinessEndpoints),
    (Version::new(2, 4, 0), Capability::AlertTuning),
    (Version::new(2, 5, 0), Capability::QueryMaxSamples),
    (Version::new(2, 6, 0), Capability::LogFormat),
    (Version::new(2, 11, 0), Capability::WalCompression),
];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedVersion {
    /// The version as written by the user (or the default), used as image tag even if it does not
    /// parse
    pub tag: String,
    pub version: Version,
}

impl ResolvedVersion {
    /// Resolves the requested version. A missing request uses `default` as tag and version.
    ///
    /// A request that is not a version (`latest`, `master-2019-12-23-39f3623b`) is kept as tag, and
    /// only its version dependent behaviour falls back to `default`. Only an invalid `default` is
    /// an error, and only when it is needed.
    pub fn resolve(requested: Option<&str>, default: &str) -> Result<Self> {
        let requested = requested.map(str::trim).filter(|tag| !tag.is_empty());
        let tag = match requested {
            Some(tag) => match parse_tolerant(tag) {
                Ok(version) => {
                    return Ok(Self {
                        tag: tag.to_string(),
                        version,
                    })
                }
                Err(error) => {
                    tracing::warn!(
                        requested = tag,
                        default,
                        %error,
                        "Requested version does not parse, version dependent settings use the default version"
                    );
                    tag
                }
            },
            None => default.trim(),
        };

        let version = parse_tolerant(default).context(InvalidDefaultVersionSnafu {
            version: default,
        })?;
        Ok(Self {
            tag: tag.to_string(),
            version,
        })
    }

    /// The flag syntax of this Prometheus version
    pub fn flag_dialect(&self) -> Result<FlagDialect> {
        let known = FLAG_DIALECTS.partition_point(|(lower, _)| *lower <= self.version);
        match known.checked_sub(1) {
            Some(index) => Ok(FLAG_DIALECTS[index].1),
            None => UnsupportedVersionSnafu {
                version: self.version.clone(),
                oldest: FLAG_DIALECTS[0].0.clone(),
            }
            .fail(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        CAPABILITIES
            .iter()
            .find(|(_, candidate)| *candidate == capability)
            .is_some_and(|(lower, _)| self.version >= *lower)
    }
}

/// Parses versions the way they are commonly written in image tags: an optional `v` prefix and
/// missing minor or patch components (`v2`, `2.7`).
fn parse_tolerant(raw: &str) -> Result<Version, semver::Error> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let core_end = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(core_end);

    let missing = 3usize.saturating_sub(core.split('.').count());
    let mut padded = core.to_string();
    for _ in 0..missing {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    Version::parse(&padded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(requested: Option<&str>) -> ResolvedVersion {
        ResolvedVersion::resolve(requested, "v2.13.1").unwrap()
    }

    #[test]
    fn test_resolve_requested() {
        let resolved = resolve(Some("v2.3.2"));
        assert_eq!(resolved.tag, "v2.3.2");
        assert_eq!(resolved.version, Version::new(2, 3, 2));
    }

    #[test]
    fn test_resolve_partial_versions() {
        assert_eq!(resolve(Some("v2")).version, Version::new(2, 0, 0));
        assert_eq!(resolve(Some("2.7")).version, Version::new(2, 7, 0));
        assert_eq!(resolve(Some("2.7")).tag, "2.7");
        assert_eq!(
            resolve(Some("v2.7-rc.0")).version,
            Version::parse("2.7.0-rc.0").unwrap()
        );
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        for requested in [None, Some(""), Some("   ")] {
            let resolved = resolve(requested);
            assert_eq!(resolved.tag, "v2.13.1", "requested {requested:?}");
            assert_eq!(resolved.version, Version::new(2, 13, 1));
        }
    }

    #[test]
    fn test_unparseable_request_keeps_its_tag() {
        for requested in ["latest", "v2.x", " master-2019-12-23-39f3623b "] {
            let resolved = resolve(Some(requested));
            assert_eq!(resolved.tag, requested.trim());
            assert_eq!(resolved.version, Version::new(2, 13, 1));
        }
    }

    #[test]
    fn test_invalid_default() {
        assert!(matches!(
            ResolvedVersion::resolve(None, "latest"),
            Err(Error::InvalidDefaultVersion { .. })
        ));
        assert!(matches!(
            ResolvedVersion::resolve(Some("not a version"), ""),
            Err(Error::InvalidDefaultVersion { .. })
        ));
        // A valid request does not need the default
        assert!(ResolvedVersion::resolve(Some("v2.0.0"), "latest").is_ok());
    }

    #[test]
    fn test_flag_dialect() {
        for (version, dialect) in [
            ("v1.0.0", FlagDialect::Legacy),
            ("v1.8.2", FlagDialect::Legacy),
            ("v2.0.0", FlagDialect::TsdbV1),
            ("v2.6.99", FlagDialect::TsdbV1),
            ("v2.7.0-rc.0", FlagDialect::TsdbV1),
            ("v2.7.0", FlagDialect::TsdbV2),
            ("v2.13.1", FlagDialect::TsdbV2),
            ("v3.0.0", FlagDialect::TsdbV2),
        ] {
            assert_eq!(
                resolve(Some(version)).flag_dialect().unwrap(),
                dialect,
                "version {version}"
            );
        }
    }

    #[test]
    fn test_unsupported_version() {
        assert!(matches!(
            resolve(Some("v0.20.0")).flag_dialect(),
            Err(Error::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_capabilities() {
        let old = resolve(Some("v1.7.0"));
        assert!(!old.supports(Capability::ReadinessEndpoints));

        let v2_5 = resolve(Some("v2.5.0"));
        assert!(v2_5.supports(Capability::ReadinessEndpoints));
        assert!(v2_5.supports(Capability::AlertTuning));
        assert!(v2_5.supports(Capability::QueryMaxSamples));
        assert!(!v2_5.supports(Capability::LogFormat));
        assert!(!v2_5.supports(Capability::WalCompression));

        let v2_11 = resolve(Some("v2.11.0"));
        assert!(v2_11.supports(Capability::LogFormat));
        assert!(v2_11.supports(Capability::WalCompression));
    }
}
