use std::{fmt::Display, str::FromStr, sync::LazyLock};

use docker_api::opts::ImageFilter;
use regex::Regex;

use crate::error::Error;

static SHA256_DIGEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[0-9a-fA-F]{32,}$").expect("digest pattern should compile"));

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w][\w.\-]{0,127}$").expect("tag pattern should compile"));

/// A parsed image reference such as `mcr.microsoft.com/mssql/server:2022-latest`.
#[derive(Debug, Clone, PartialEq)]
pub struct DockerImage {
    reference: String,
    registry: Option<String>,
    repository: String,
    version: Version,
}

impl DockerImage {
    pub fn get_full_name(&self) -> &str {
        &self.reference
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn version(&self) -> &Version {
        &self.version
    }
}

impl Display for DockerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reference)
    }
}

impl FromStr for DockerImage {
    type Err = Error;

    fn from_str(reference: &str) -> Result<Self, Self::Err> {
        if reference.trim().is_empty() {
            return Err(Error::InvalidImage("empty image reference".into()));
        }

        // the first path segment is a registry only if it looks like a host
        let (registry, remainder) = match reference.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first), rest)
            }
            _ => (None, reference),
        };

        let (repository, version) = match remainder.split_once("@sha256:") {
            Some((name, digest)) => {
                // `repo:tag@sha256:...` is pinned by the digest, the tag is informative
                let repository = match name.rsplit_once(':') {
                    Some((repository, tag)) => {
                        Version::from_tag(tag)?;
                        repository
                    }
                    None => name,
                };
                (repository, Version::from_sha256(digest)?)
            }
            None => match remainder.split_once(':') {
                Some((repository, tag)) => (repository, Version::from_tag(tag)?),
                None => (remainder, Version::Any),
            },
        };

        if repository.is_empty() || repository.contains('@') || repository.contains(':') {
            return Err(Error::InvalidImage(format!(
                "invalid repository name: {repository}"
            )));
        }

        Ok(DockerImage {
            reference: reference.into(),
            registry: registry.map(Into::into),
            repository: repository.into(),
            version,
        })
    }
}

impl TryFrom<&str> for DockerImage {
    type Error = Error;

    fn try_from(reference: &str) -> Result<Self, Self::Error> {
        reference.parse()
    }
}

impl From<&DockerImage> for ImageFilter {
    fn from(image: &DockerImage) -> Self {
        let name = match &image.registry {
            Some(registry) => format!("{registry}/{}", image.repository),
            None => image.repository.clone(),
        };
        let tag = match &image.version {
            Version::Any => None,
            Version::Sha256(digest) => Some(digest.clone()),
            Version::Tag(tag) => Some(tag.clone()),
        };
        ImageFilter::Reference(name, tag)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Version {
    Any,
    Sha256(String),
    Tag(String),
}

impl Version {
    fn from_sha256(digest: &str) -> Result<Version, Error> {
        if SHA256_DIGEST.is_match(digest) {
            Ok(Version::Sha256(digest.into()))
        } else {
            Err(Error::InvalidImage(format!(
                "invalid sha256 digest version: {digest}"
            )))
        }
    }

    fn from_tag(tag: &str) -> Result<Version, Error> {
        if TAG.is_match(tag) {
            Ok(Version::Tag(tag.into()))
        } else {
            Err(Error::InvalidImage(format!("invalid tag version: {tag}")))
        }
    }
}
