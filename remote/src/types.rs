use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MEDIA_TYPE_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_EMPTY: &str = "application/vnd.oci.empty.v1+json";

/// Layer annotation carrying the artifact's original file name.
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
/// Manifest-list annotation naming the disk flavor of an instance.
pub const ANNOTATION_DISK_TYPE: &str = "disktype";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestV2 {
    pub schema_version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    pub schema_version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<ManifestDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl ManifestDescriptor {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl Descriptor {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: Option<String>,
    pub access_token: Option<String>,
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    pub fn get_token(&self) -> Option<&str> {
        self.token.as_deref().or(self.access_token.as_deref())
    }
}

#[derive(Debug, Clone)]
pub enum Manifest {
    V2(ManifestV2),
    List(ManifestList),
}

impl Manifest {
    /// Decodes a manifest body according to the content type the registry reported.
    pub fn from_slice(content_type: &str, body: &[u8]) -> Result<Self, serde_json::Error> {
        if content_type.contains("manifest.list") || content_type.contains("image.index") {
            Ok(Manifest::List(serde_json::from_slice(body)?))
        } else {
            Ok(Manifest::V2(serde_json::from_slice(body)?))
        }
    }

    pub fn layers(&self) -> Option<&[Descriptor]> {
        match self {
            Manifest::V2(m) => Some(&m.layers),
            Manifest::List(_) => None,
        }
    }

    pub fn config(&self) -> Option<&Descriptor> {
        match self {
            Manifest::V2(m) => Some(&m.config),
            Manifest::List(_) => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Manifest::List(_))
    }
}

/// A manifest as served by the registry, kept byte-exact so it can be
/// written into a local layout under its own digest.
#[derive(Debug, Clone)]
pub struct RawManifest {
    pub manifest: Manifest,
    pub content_type: String,
    pub digest: String,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_with_annotations() {
        let body = br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:aaaa",
                "size": 10,
                "platform": {"architecture": "x86_64", "os": "linux"},
                "annotations": {"disktype": "qemu"}
            }]
        }"#;

        let manifest = Manifest::from_slice(MEDIA_TYPE_OCI_INDEX, body).unwrap();
        let Manifest::List(list) = manifest else {
            panic!("expected a manifest list");
        };
        assert_eq!(list.manifests.len(), 1);
        assert_eq!(list.manifests[0].annotation(ANNOTATION_DISK_TYPE), Some("qemu"));
    }

    #[test]
    fn test_single_manifest_layers() {
        let body = br#"{
            "schemaVersion": 2,
            "config": {"mediaType": "application/vnd.oci.empty.v1+json", "digest": "sha256:44", "size": 2},
            "layers": [{
                "mediaType": "application/zstd",
                "digest": "sha256:bbbb",
                "size": 3,
                "annotations": {"org.opencontainers.image.title": "disk-qemu.x86_64.qcow2.zst"}
            }]
        }"#;

        let manifest = Manifest::from_slice(MEDIA_TYPE_OCI_MANIFEST, body).unwrap();
        assert!(!manifest.is_list());
        let layers = manifest.layers().unwrap();
        assert_eq!(
            layers[0].annotation(ANNOTATION_TITLE),
            Some("disk-qemu.x86_64.qcow2.zst")
        );
    }
}
