//! Blob store speaking plain HTTP to an S3-compatible endpoint.
//!
//! Objects live at `<endpoint>/<bucket>/<key>` (path-style addressing).
//! Requests carry an optional bearer token; request signing is left to a
//! gateway in front of the bucket.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use super::{BlobError, BlobStore, validate_key};

/// HTTP adapter over a single bucket.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    token: Option<String>,
}

impl HttpBlobStore {
    /// Creates a store for `bucket` at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Transport`] if the endpoint is not an absolute
    /// hierarchical URL.
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        bucket: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, BlobError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| BlobError::Transport(format!("bad endpoint: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(BlobError::Transport(format!(
                "endpoint cannot hold paths: {endpoint}"
            )));
        }
        Ok(Self {
            client,
            endpoint,
            bucket: bucket.into(),
            token,
        })
    }

    /// Full URL of an object.
    pub fn object_url(&self, key: &str) -> Result<Url, BlobError> {
        validate_key(key)?;
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| BlobError::Transport("endpoint cannot hold paths".to_owned()))?
            .pop_if_empty()
            .push(&self.bucket)
            .extend(key.split('/'));
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn transport(err: &reqwest::Error) -> BlobError {
    BlobError::Transport(err.to_string())
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let url = self.object_url(key)?;
        debug!(%url, "fetching object");

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| transport(&e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(BlobError::NotFound(key.to_owned())),
            status if status.is_success() => {
                let body = response.bytes().await.map_err(|e| transport(&e))?;
                Ok(body.to_vec())
            }
            status => Err(BlobError::Transport(format!("GET {key} returned {status}"))),
        }
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<String, BlobError> {
        let url = self.object_url(key)?;
        debug!(%url, size = bytes.len(), "uploading object");

        let response = self
            .request(reqwest::Method::PUT, url.clone())
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if response.status().is_success() {
            Ok(url.to_string())
        } else {
            Err(BlobError::Transport(format!(
                "PUT {key} returned {}",
                response.status()
            )))
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), BlobError> {
        let url = self.object_url(key)?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|e| transport(&e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(BlobError::NotFound(key.to_owned())),
            status if status.is_success() => Ok(()),
            status => {
                warn!(key, %status, "object delete rejected");
                Err(BlobError::Transport(format!("DELETE {key} returned {status}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: &str) -> HttpBlobStore {
        HttpBlobStore::new(reqwest::Client::new(), endpoint, "bucket", None).unwrap()
    }

    #[test]
    fn test_object_url_path_style() {
        let url = store("https://s3.example.com").object_url("sessions/a.session").unwrap();
        assert_eq!(url.as_str(), "https://s3.example.com/bucket/sessions/a.session");
    }

    #[test]
    fn test_object_url_keeps_endpoint_path() {
        let url = store("https://example.com/storage/")
            .object_url("sessions/a.session")
            .unwrap();
        assert_eq!(url.as_str(), "https://example.com/storage/bucket/sessions/a.session");
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        assert!(HttpBlobStore::new(reqwest::Client::new(), "not a url", "b", None).is_err());
        assert!(HttpBlobStore::new(reqwest::Client::new(), "mailto:a@b.c", "b", None).is_err());
    }
}
