//! Google Cloud Storage via the JSON API
//!
//! Listing pages through `storage/v1/b/<bucket>/o`; reads use `alt=media`
//! with an HTTP `Range` header. Writes are single-request media uploads.

use super::{finish_listing, ObjectInfo, ObjectStore};
use crate::adapters::http::{build_client, request_error, status_error};
use crate::config::{ObjectStoreConfig, SecretString};
use crate::domain::SourceError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
    /// The API reports sizes as decimal strings
    #[serde(default)]
    size: Option<String>,
}

pub struct GcsObjectStore {
    client: Client,
    base_url: String,
    bucket: String,
    prefix: String,
    suffix: Option<String>,
    token: Option<SecretString>,
}

impl GcsObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self, SourceError> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| SourceError::fatal("gcs object store requires a bucket"))?;
        Ok(Self {
            client: build_client(config.timeout_seconds)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bucket,
            prefix: config.prefix.clone(),
            suffix: config.suffix.clone(),
            token: config.token.clone(),
        })
    }

    fn objects_url(&self, object: Option<&str>) -> Result<Url, SourceError> {
        self.bucket_url(&["storage", "v1"], object)
    }

    fn bucket_url(&self, api: &[&str], object: Option<&str>) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SourceError::fatal(format!("Invalid GCS base URL: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SourceError::fatal("GCS base URL cannot be a base"))?;
            segments
                .pop_if_empty()
                .extend(api)
                .extend(["b", self.bucket.as_str(), "o"]);
            if let Some(object) = object {
                // '/' inside the object name is escaped as %2F
                segments.push(object);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret().as_str()),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn list(&self) -> Result<Vec<ObjectInfo>, SourceError> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.objects_url(None)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", &self.prefix);
                query.append_pair("fields", "items(name,size),nextPageToken");
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let context = format!("GCS list gs://{}/{}", self.bucket, self.prefix);
            let response = self
                .authorize(self.client.get(url))
                .send()
                .await
                .map_err(|e| request_error(&context, e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(status_error(&context, status, &body));
            }
            let page: ListResponse = response
                .json()
                .await
                .map_err(|e| SourceError::transient(format!("{context}: unreadable listing: {e}")))?;

            for item in page.items {
                if item.name.ends_with('/') {
                    continue;
                }
                let size = item
                    .size
                    .as_deref()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                objects.push(ObjectInfo {
                    path: item.name,
                    size,
                });
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(bucket = %self.bucket, prefix = %self.prefix, objects = objects.len(), "Listed GCS objects");
        Ok(finish_listing(objects, self.suffix.as_deref()))
    }

    async fn read(&self, path: &str, offset: u64, len: u64) -> Result<Bytes, SourceError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let mut url = self.objects_url(Some(path))?;
        url.query_pairs_mut().append_pair("alt", "media");
        let last = offset.saturating_add(len - 1);

        let context = format!("GCS read gs://{}/{}", self.bucket, path);
        let response = self
            .authorize(self.client.get(url))
            .header(reqwest::header::RANGE, format!("bytes={offset}-{last}"))
            .send()
            .await
            .map_err(|e| request_error(&context, e))?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Bytes::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(&context, status, &body));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::transient(format!("{context}: {e}")))?;
        if status == StatusCode::PARTIAL_CONTENT {
            return Ok(body);
        }
        // Range ignored: the whole object came back
        let start = (offset as usize).min(body.len());
        let end = start.saturating_add(len as usize).min(body.len());
        Ok(body.slice(start..end))
    }

    async fn write(&self, path: &str, bytes: Bytes) -> Result<(), SourceError> {
        let mut url = self.bucket_url(&["upload", "storage", "v1"], None)?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", path);

        let context = format!("GCS upload gs://{}/{}", self.bucket, path);
        let size = bytes.len();
        let response = self
            .authorize(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| request_error(&context, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(&context, status, &body));
        }
        tracing::debug!(bucket = %self.bucket, path, bytes = size, "Uploaded GCS object");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.prefix)
    }
}
