use crate::error::RegistryError;
use std::fmt;

const DOCKER_TRANSPORT: &str = "docker://";
const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parses `[docker://][registry/]repository[:tag][@digest]`.
    pub fn parse(reference: &str) -> Result<Self, RegistryError> {
        let reference = reference.trim();
        let reference = reference.strip_prefix(DOCKER_TRANSPORT).unwrap_or(reference);

        if reference.is_empty() {
            return Err(RegistryError::InvalidReference("empty reference".to_string()));
        }

        let (reference, digest) = if let Some(idx) = reference.rfind('@') {
            let digest = reference[idx + 1..].to_string();
            if !digest.contains(':') {
                return Err(RegistryError::InvalidReference(format!(
                    "malformed digest in {}",
                    reference
                )));
            }
            (&reference[..idx], Some(digest))
        } else {
            (reference, None)
        };

        let (reference, tag) = match reference.rfind(':') {
            Some(idx) if !reference[idx + 1..].contains('/') => {
                (&reference[..idx], Some(reference[idx + 1..].to_string()))
            }
            _ => (reference, None),
        };

        let (registry, repository) = match reference.split_once('/') {
            Some((first_part, rest))
                if first_part.contains('.')
                    || first_part.contains(':')
                    || first_part == "localhost" =>
            {
                (first_part.to_string(), rest.to_string())
            }
            Some(_) => (DEFAULT_REGISTRY.to_string(), reference.to_string()),
            None => (DEFAULT_REGISTRY.to_string(), format!("library/{}", reference)),
        };

        if repository.is_empty() {
            return Err(RegistryError::InvalidReference(format!(
                "missing repository in {}",
                reference
            )));
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    /// Tag or digest as used in a `/manifests/<reference>` URL; digest wins.
    pub fn reference(&self) -> String {
        if let Some(digest) = &self.digest {
            digest.clone()
        } else {
            self.tag_or_default().to_string()
        }
    }

    /// Same repository pinned to `digest`, tag dropped.
    pub fn with_digest(&self, digest: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }

    pub fn full_name(&self) -> String {
        let name = if self.registry == DEFAULT_REGISTRY {
            self.repository
                .strip_prefix("library/")
                .unwrap_or(&self.repository)
                .to_string()
        } else {
            format!("{}/{}", self.registry, self.repository)
        };

        match &self.digest {
            Some(digest) => format!("{}@{}", name, digest),
            None => format!("{}:{}", name, self.tag_or_default()),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, None);
        assert_eq!(r.tag_or_default(), "latest");
    }

    #[test]
    fn test_parse_with_namespace() {
        let r = ImageReference::parse("myuser/myimage:v1").unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "myuser/myimage");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_docker_transport() {
        let r = ImageReference::parse("docker://quay.io/podman/machine-os:5.3").unwrap();
        assert_eq!(r.registry, "quay.io");
        assert_eq!(r.repository, "podman/machine-os");
        assert_eq!(r.tag.as_deref(), Some("5.3"));
        assert_eq!(r.full_name(), "quay.io/podman/machine-os:5.3");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/machine-os@sha256:abcd").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "machine-os");
        assert_eq!(r.tag, None);
        assert_eq!(r.reference(), "sha256:abcd");
    }

    #[test]
    fn test_with_digest_drops_tag() {
        let r = ImageReference::parse("quay.io/podman/machine-os:5.3").unwrap();
        let pinned = r.with_digest("sha256:1234");
        assert_eq!(pinned.tag, None);
        assert_eq!(pinned.reference(), "sha256:1234");
        assert_eq!(pinned.to_string(), "quay.io/podman/machine-os@sha256:1234");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(ImageReference::parse("docker://").is_err());
        assert!(ImageReference::parse("quay.io/repo@nodigest").is_err());
    }
}
