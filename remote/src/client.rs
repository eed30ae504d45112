use crate::error::RegistryError;
use crate::reference::ImageReference;
use crate::types::*;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct RegistryClient {
    client: Client,
    tokens: Arc<RwLock<HashMap<String, String>>>,
    insecure: bool,
}

impl RegistryClient {
    pub fn new() -> Result<Self, RegistryError> {
        Self::with_options(false)
    }

    /// `insecure` switches every registry to plain http and skips TLS verification.
    pub fn with_options(insecure: bool) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .user_agent(concat!("berth/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(Self {
            client,
            tokens: Arc::new(RwLock::new(HashMap::new())),
            insecure,
        })
    }

    fn registry_url(&self, registry: &str) -> String {
        if self.insecure || registry.starts_with("localhost") || registry.contains("127.0.0.1") {
            format!("http://{}", registry)
        } else {
            format!("https://{}", registry)
        }
    }

    async fn get_token(&self, reference: &ImageReference) -> Option<String> {
        let key = format!("{}/{}", reference.registry, reference.repository);
        let tokens = self.tokens.read().await;
        tokens.get(&key).cloned()
    }

    async fn authenticate(
        &self,
        reference: &ImageReference,
        www_auth: &str,
    ) -> Result<String, RegistryError> {
        let realm = extract_auth_param(www_auth, "realm")
            .ok_or_else(|| RegistryError::AuthFailed("no realm in www-authenticate".to_string()))?;
        let service = extract_auth_param(www_auth, "service");
        let scope = extract_auth_param(www_auth, "scope")
            .unwrap_or_else(|| format!("repository:{}:pull", reference.repository));

        let mut url = realm;
        url.push_str("?scope=");
        url.push_str(&scope);
        if let Some(svc) = service {
            url.push_str("&service=");
            url.push_str(&svc);
        }

        tracing::debug!("Authenticating at: {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(RegistryError::AuthFailed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        let token = token_response
            .get_token()
            .ok_or_else(|| RegistryError::AuthFailed("no token in response".to_string()))?
            .to_string();

        let key = format!("{}/{}", reference.registry, reference.repository);
        self.tokens.write().await.insert(key, token.clone());

        Ok(token)
    }

    async fn request_with_auth(
        &self,
        url: &str,
        reference: &ImageReference,
        accept: &[&str],
    ) -> Result<reqwest::Response, RegistryError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_str(&accept.join(", "))?);

        if let Some(token) = self.get_token(reference).await {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }

        let response = self.client.get(url).headers(headers.clone()).send().await?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let www_auth = response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok())
            .ok_or(RegistryError::AuthRequired)?
            .to_string();

        let token = self.authenticate(reference, &www_auth).await?;

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))?,
        );

        Ok(self.client.get(url).headers(headers).send().await?)
    }

    /// Fetches the manifest or manifest list `reference` points at.
    ///
    /// When the reference is pinned by digest the body is hashed and checked
    /// against it, so the returned bytes can be stored under that digest.
    pub async fn get_manifest(
        &self,
        reference: &ImageReference,
    ) -> Result<RawManifest, RegistryError> {
        let tag_or_digest = reference.reference();
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url(&reference.registry),
            reference.repository,
            tag_or_digest
        );

        tracing::debug!("Fetching manifest from: {}", url);

        let accept = [
            MEDIA_TYPE_OCI_INDEX,
            MEDIA_TYPE_OCI_MANIFEST,
            MEDIA_TYPE_MANIFEST_LIST,
            MEDIA_TYPE_MANIFEST_V2,
        ];

        let response = self.request_with_auth(&url, reference, &accept).await?;

        if !response.status().is_success() {
            return Err(RegistryError::ManifestNotFound(format!(
                "{}/{}:{} ({})",
                reference.registry,
                reference.repository,
                tag_or_digest,
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(MEDIA_TYPE_OCI_MANIFEST)
            .to_string();

        let header_digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await?.to_vec();
        let computed = format!("sha256:{}", hex::encode(Sha256::digest(&bytes)));

        if let Some(expected) = &reference.digest
            && expected.starts_with("sha256:")
            && *expected != computed
        {
            return Err(RegistryError::DigestMismatch {
                reference: reference.to_string(),
                expected: expected.clone(),
                actual: computed,
            });
        }

        let manifest = Manifest::from_slice(&content_type, &bytes)?;
        let digest = header_digest.unwrap_or(computed);

        Ok(RawManifest {
            manifest,
            content_type,
            digest,
            bytes,
        })
    }

    pub async fn get_blob(
        &self,
        reference: &ImageReference,
        digest: &str,
    ) -> Result<reqwest::Response, RegistryError> {
        let url = format!(
            "{}/v2/{}/blobs/{}",
            self.registry_url(&reference.registry),
            reference.repository,
            digest
        );

        tracing::debug!("Fetching blob: {}", digest);

        let response = self
            .request_with_auth(&url, reference, &["application/octet-stream"])
            .await?;

        if !response.status().is_success() {
            return Err(RegistryError::BlobNotFound(format!(
                "{} ({})",
                digest,
                response.status()
            )));
        }

        Ok(response)
    }
}

fn extract_auth_param(header: &str, param: &str) -> Option<String> {
    let search = format!("{}=\"", param);
    let start = header.find(&search)? + search.len();
    let end = header[start..].find('"')?;
    Some(header[start..start + end].to_string())
}
