//! Storage REST API client
//!
//! Speaks the bucket/object endpoints of a hosted storage service:
//! `POST /storage/v1/object/list/{bucket}`, `HEAD|GET|POST
//! /storage/v1/object/{bucket}/{key}`. Requests carry a bearer token and are
//! throttled client-side with a token bucket.

use super::store::{ObjectMeta, ObjectStore};
use super::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

const LIST_PAGE_SIZE: usize = 1000;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    bucket: String,
    token: Option<String>,
    rate_limiter: DirectLimiter,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
    /// Folders come back without an id
    id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Option<ListedMetadata>,
}

#[derive(Debug, Deserialize)]
struct ListedMetadata {
    size: Option<u64>,
    mimetype: Option<String>,
}

impl HttpObjectStore {
    /// Client for `bucket` at `base_url`, limited to `requests_per_second`
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        token: Option<String>,
        requests_per_second: u32,
    ) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to build HTTP client: {e}")))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            token,
            rate_limiter,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token).header("apikey", token),
            None => request,
        }
    }

    async fn error_for(key: &str, response: reqwest::Response) -> StoreError {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        StoreError::Http {
            status: status.as_u16(),
            key: key.to_string(),
            message,
        }
    }

    async fn list_page(&self, folder: &str, offset: usize) -> StoreResult<Vec<ListedObject>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        let body = serde_json::json!({
            "prefix": folder,
            "limit": LIST_PAGE_SIZE,
            "offset": offset,
            "sortBy": {"column": "name", "order": "asc"},
        });

        let response = self
            .authorized(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(StoreError::from)?;

        if !response.status().is_success() {
            return Err(Self::error_for(folder, response).await);
        }

        response
            .json::<Vec<ListedObject>>()
            .await
            .map_err(|e| StoreError::Transport(format!("failed to parse listing: {e}")))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn uri_for(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, key
        )
    }

    /// Lists one folder level below `prefix`, recursing into sub-folders
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        let mut folders = vec![prefix.trim_end_matches('/').to_string()];

        while let Some(folder) = folders.pop() {
            let mut offset = 0;
            loop {
                let page = self.list_page(&folder, offset).await?;
                let page_len = page.len();

                for item in page {
                    let key = if folder.is_empty() {
                        item.name.clone()
                    } else {
                        format!("{}/{}", folder, item.name)
                    };
                    if item.id.is_none() {
                        folders.push(key);
                        continue;
                    }
                    let metadata = item.metadata.unwrap_or(ListedMetadata {
                        size: None,
                        mimetype: None,
                    });
                    objects.push(ObjectMeta {
                        key,
                        size: metadata.size.unwrap_or(0),
                        content_type: metadata.mimetype,
                        created_at: item.created_at,
                    });
                }

                if page_len < LIST_PAGE_SIZE {
                    break;
                }
                offset += page_len;
            }
        }

        tracing::debug!(bucket = %self.bucket, prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        self.rate_limiter.until_ready().await;

        let response = self
            .authorized(self.client.head(self.object_url(key)))
            .send()
            .await
            .map_err(StoreError::from)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::error_for(key, response).await);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Some(ObjectMeta {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            content_type,
            created_at: None,
        }))
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        self.rate_limiter.until_ready().await;

        let response = self
            .authorized(self.client.get(self.object_url(key)))
            .send()
            .await
            .map_err(StoreError::from)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(Self::error_for(key, response).await);
        }

        response.bytes().await.map_err(StoreError::from)
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StoreResult<()> {
        self.rate_limiter.until_ready().await;

        let response = self
            .authorized(
                self.client
                    .post(self.object_url(key))
                    .header(reqwest::header::CONTENT_TYPE, content_type)
                    .header("x-upsert", "true")
                    .body(data),
            )
            .send()
            .await
            .map_err(StoreError::from)?;

        if !response.status().is_success() {
            return Err(Self::error_for(key, response).await);
        }

        tracing::debug!(bucket = %self.bucket, key, "Uploaded object");
        Ok(())
    }
}
