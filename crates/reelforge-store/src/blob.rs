//! Blob host backends.
//!
//! The chunk store treats its host as an opaque key/value store addressed by
//! `(container, blob name)`. Two backends ship: a directory tree on local
//! disk and a plain HTTP object endpoint.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use reelforge_common::StoreError;
use reqwest::{Client, StatusCode, Url};

/// Opaque `(container, name)` addressed blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `name` in `container`, creating the container if needed.
    async fn put(&self, container: &str, name: &str, data: Bytes) -> Result<(), StoreError>;

    /// Fetch a blob. `Ok(None)` when the blob does not exist.
    async fn get(&self, container: &str, name: &str) -> Result<Option<Bytes>, StoreError>;

    /// Remove a container and everything in it. Missing containers are not an error.
    async fn delete_container(&self, container: &str) -> Result<(), StoreError>;
}

/// Blob host backed by a directory: `{root}/{container}/{name}`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, container: &str, name: &str) -> Result<PathBuf, StoreError> {
        validate_segment(container)?;
        for part in name.split('/') {
            validate_segment(part)?;
        }
        Ok(self.root.join(container).join(name))
    }
}

fn validate_segment(segment: &str) -> Result<(), StoreError> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
        return Err(StoreError::backend(format!("invalid blob path segment: {segment:?}")));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, container: &str, name: &str, data: Bytes) -> Result<(), StoreError> {
        let path = self.blob_path(container, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::backend(format!("create {}: {e}", parent.display())))?;
        }

        // Write-then-rename so readers never observe a half-written blob.
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| StoreError::backend(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::backend(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> Result<Option<Bytes>, StoreError> {
        let path = self.blob_path(container, name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::backend(format!("read {}: {e}", path.display()))),
        }
    }

    async fn delete_container(&self, container: &str) -> Result<(), StoreError> {
        validate_segment(container)?;
        match tokio::fs::remove_dir_all(self.root.join(container)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::backend(format!("delete {container}: {e}"))),
        }
    }
}

/// Blob host reached over HTTP: `PUT|GET {base}/{container}/{name}`,
/// `DELETE {base}/{container}`.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, StoreError> {
        // A trailing slash makes `Url::join` append instead of replacing the last segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| StoreError::backend(format!("invalid blob host url {base_url}: {e}")))?;

        Ok(Self {
            client: Client::new(),
            base_url,
            token,
        })
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        self.base_url
            .join(path)
            .map_err(|e| StoreError::backend(format!("invalid blob path {path}: {e}")))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, container: &str, name: &str, data: Bytes) -> Result<(), StoreError> {
        let url = self.url(&format!("{container}/{name}"))?;
        let resp = self
            .authorize(self.client.put(url.clone()))
            .body(data)
            .send()
            .await
            .map_err(|e| StoreError::backend(format!("PUT {url}: {e}")))?;

        if !resp.status().is_success() {
            return Err(StoreError::backend(format!(
                "PUT {url}: HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> Result<Option<Bytes>, StoreError> {
        let url = self.url(&format!("{container}/{name}"))?;
        let resp = self
            .authorize(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|e| StoreError::backend(format!("GET {url}: {e}")))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => resp
                .bytes()
                .await
                .map(Some)
                .map_err(|e| StoreError::backend(format!("GET {url}: {e}"))),
            status => Err(StoreError::backend(format!(
                "GET {url}: HTTP {}",
                status.as_u16()
            ))),
        }
    }

    async fn delete_container(&self, container: &str) -> Result<(), StoreError> {
        let url = self.url(container)?;
        let resp = self
            .authorize(self.client.delete(url.clone()))
            .send()
            .await
            .map_err(|e| StoreError::backend(format!("DELETE {url}: {e}")))?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(StoreError::backend(format!(
                "DELETE {url}: HTTP {}",
                status.as_u16()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fs_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store
            .put("box", "chunks/abc", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let got = store.get("box", "chunks/abc").await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"hello"[..]));
        assert!(store.get("box", "chunks/missing").await.unwrap().is_none());

        store.delete_container("box").await.unwrap();
        assert!(store.get("box", "chunks/abc").await.unwrap().is_none());
        // Deleting again is fine.
        store.delete_container("box").await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store
            .put("box", "../escape", Bytes::from_static(b"x"))
            .await
            .is_err());
        assert!(store.get("..", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_http_get_maps_404_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blobs/box/manifest.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = HttpBlobStore::new(&format!("{}/blobs", server.uri()), None).unwrap();
        assert!(store.get("box", "manifest.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_http_put_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/box/chunks/abc"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpBlobStore::new(&server.uri(), Some("secret".into())).unwrap();
        store
            .put("box", "chunks/abc", Bytes::from_static(b"data"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_put_failure_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = HttpBlobStore::new(&server.uri(), None).unwrap();
        let err = store
            .put("box", "chunks/abc", Bytes::from_static(b"data"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
