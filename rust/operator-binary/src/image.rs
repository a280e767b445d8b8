//! Computes the final image reference of a container from the user supplied image fields and the
//! operator defaults.
use snafu::{ensure, Snafu};

use crate::version::ResolvedVersion;

const DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_NAMESPACE: &str = "library";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("no default base image configured for {workload}"))]
    MissingDefaultBaseImage { workload: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// The image related fields of a workload, empty strings count as unset
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageReference<'a> {
    pub image: Option<&'a str>,
    pub sha: Option<&'a str>,
    pub tag: Option<&'a str>,
}

impl<'a> ImageReference<'a> {
    pub fn new(image: Option<&'a str>, sha: Option<&'a str>, tag: Option<&'a str>) -> Self {
        let non_empty = |value: Option<&'a str>| value.map(str::trim).filter(|v| !v.is_empty());
        Self {
            image: non_empty(image),
            sha: non_empty(sha),
            tag: non_empty(tag),
        }
    }
}

/// Resolves the image of `workload`, the first matching rule wins:
///
/// 1. an explicit image that already carries a tag or digest is used verbatim
/// 2. a sha pins the digest of the explicit image (or the default base image)
/// 3. a tag is appended to the registry qualified explicit image (or the default base image)
/// 4. the resolved version is used as tag of the explicit image (or the default base image)
pub fn resolve_image(
    reference: ImageReference,
    default_base_image: &str,
    version: &ResolvedVersion,
    workload: &str,
) -> Result<String> {
    let default_base_image = default_base_image.trim();
    ensure!(
        !default_base_image.is_empty(),
        MissingDefaultBaseImageSnafu { workload }
    );

    if let Some(image) = reference.image {
        if has_tag_or_digest(image) {
            return Ok(image.to_string());
        }
    }

    if let Some(sha) = reference.sha {
        let repository = reference.image.unwrap_or(default_base_image);
        return Ok(format!("{repository}@sha256:{sha}"));
    }

    if let Some(tag) = reference.tag {
        return Ok(match reference.image {
            Some(image) => format!("{}:{tag}", registry_qualified(image)),
            None => format!("{default_base_image}:{tag}"),
        });
    }

    let repository = reference.image.unwrap_or(default_base_image);
    Ok(format!("{repository}:{}", version.tag))
}

/// Tags and digests can only appear after the last path separator, a colon before it belongs to
/// a registry port
fn has_tag_or_digest(image: &str) -> bool {
    let last_component = image.rsplit('/').next().unwrap_or(image);
    last_component.contains(':') || last_component.contains('@')
}

/// Expands short Docker Hub references, `prometheus` becomes `docker.io/library/prometheus`
fn registry_qualified(image: &str) -> String {
    match image.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            image.to_string()
        }
        Some(_) => format!("{DEFAULT_REGISTRY}/{image}"),
        None => format!("{DEFAULT_REGISTRY}/{DEFAULT_NAMESPACE}/{image}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "quay.io/prometheus/prometheus";

    fn resolve(image: Option<&str>, sha: Option<&str>, tag: Option<&str>) -> String {
        let version = ResolvedVersion::resolve(Some("v2.3.2"), "v2.13.1").unwrap();
        resolve_image(ImageReference::new(image, sha, tag), BASE, &version, "prometheus").unwrap()
    }

    #[test]
    fn test_default_image() {
        assert_eq!(resolve(None, None, None), "quay.io/prometheus/prometheus:v2.3.2");
        assert_eq!(
            resolve(Some(""), Some(""), Some("")),
            "quay.io/prometheus/prometheus:v2.3.2"
        );
    }

    #[test]
    fn test_explicit_image_with_tag_wins() {
        for image in [
            "myrepo.com/prometheus:v2.3.2",
            "myrepo.com/prometheus@sha256:12345",
            "localhost:5000/prometheus:custom",
        ] {
            assert_eq!(resolve(Some(image), Some("abcdef"), Some("v9.9.9")), image);
        }
    }

    #[test]
    fn test_sha() {
        assert_eq!(
            resolve(
                None,
                Some("7384a79f4b4991bf8269e7452390249b7c70bcdd10509c8c1c6c6e30e32fb324"),
                Some("v2.3.2")
            ),
            "quay.io/prometheus/prometheus@sha256:7384a79f4b4991bf8269e7452390249b7c70bcdd10509c8c1c6c6e30e32fb324"
        );
        assert_eq!(
            resolve(Some("myrepo.com/prometheus"), Some("12345"), Some("v2.3.2")),
            "myrepo.com/prometheus@sha256:12345"
        );
    }

    #[test]
    fn test_tag() {
        assert_eq!(
            resolve(None, None, Some("my-unparseable-tag")),
            "quay.io/prometheus/prometheus:my-unparseable-tag"
        );
        assert_eq!(
            resolve(Some("myrepo.com/prometheus"), None, Some("v2.3.2")),
            "myrepo.com/prometheus:v2.3.2"
        );
        assert_eq!(
            resolve(Some("localhost:5000/prometheus"), None, Some("v2.3.2")),
            "localhost:5000/prometheus:v2.3.2"
        );
        assert_eq!(
            resolve(Some("myorg/prometheus"), None, Some("v2.3.2")),
            "docker.io/myorg/prometheus:v2.3.2"
        );
        assert_eq!(
            resolve(Some("prometheus"), None, Some("v2.3.2")),
            "docker.io/library/prometheus:v2.3.2"
        );
    }

    #[test]
    fn test_image_without_tag_uses_version() {
        assert_eq!(
            resolve(Some("myrepo.com/prometheus"), None, None),
            "myrepo.com/prometheus:v2.3.2"
        );
        assert_eq!(
            resolve(Some("localhost:5000/prometheus"), None, None),
            "localhost:5000/prometheus:v2.3.2"
        );
    }

    #[test]
    fn test_image_falls_back_to_default_version() {
        let version = ResolvedVersion::resolve(None, "v2.13.1").unwrap();
        assert_eq!(
            resolve_image(
                ImageReference::new(Some("myrepo.com/prometheus"), None, None),
                BASE,
                &version,
                "prometheus"
            )
            .unwrap(),
            "myrepo.com/prometheus:v2.13.1"
        );
    }

    #[test]
    fn test_unparseable_version_is_kept_as_tag() {
        let version = ResolvedVersion::resolve(Some("latest"), "v2.13.1").unwrap();
        assert_eq!(
            resolve_image(ImageReference::default(), BASE, &version, "prometheus").unwrap(),
            "quay.io/prometheus/prometheus:latest"
        );
    }

    #[test]
    fn test_missing_default_base_image() {
        let version = ResolvedVersion::resolve(None, "v2.13.1").unwrap();
        assert!(matches!(
            resolve_image(ImageReference::default(), " ", &version, "thanos"),
            Err(Error::MissingDefaultBaseImage { .. })
        ));
    }
}
