//! Google Cloud Storage backend talking to the JSON API over HTTPS.
//!
//! Objects live below `{prefix}/` in a single bucket using the shared layout
//! from [`backend_spec::layout`]. Requests carry a bearer token read from the
//! configured credentials file.

mod config;

pub use config::{DEFAULT_ENDPOINT, GsConfig, parse_token};

use config::load_token;

use async_trait::async_trait;
use backend_spec::layout::{kind_prefix, name_from_key, object_path, window};
use backend_spec::{
    Backend, BackendError, BackendResult, Capabilities, FileInfo, FileType, Handle,
};
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
    #[serde(default)]
    size: Option<String>,
}

impl ObjectResource {
    fn size(&self) -> BackendResult<u64> {
        let raw = self.size.as_deref().unwrap_or("0");
        raw.parse()
            .map_err(|_| BackendError::Io(format!("{}: invalid object size {raw:?}", self.name)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

pub struct GsBackend {
    client: Client,
    config: GsConfig,
    token: String,
}

impl GsBackend {
    /// Attaches to an existing bucket without creating anything.
    pub async fn open(config: &GsConfig) -> BackendResult<Self> {
        let token = load_token(&config.credentials).await?;
        Self::with_token(config.clone(), token)
    }

    /// Opens the backend and creates the bucket if it does not exist yet.
    pub async fn create(config: &GsConfig) -> BackendResult<Self> {
        let backend = Self::open(config).await?;
        backend.ensure_bucket().await?;
        Ok(backend)
    }

    fn with_token(config: GsConfig, token: String) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| BackendError::Connectivity(format!("http client: {err}")))?;
        Ok(Self {
            client,
            config,
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.config.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                BackendError::Io(format!(
                    "endpoint {} cannot carry a path",
                    self.config.endpoint
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn bucket_url(&self) -> BackendResult<Url> {
        self.url(&["storage", "v1", "b", self.config.bucket.as_str()])
    }

    fn objects_url(&self) -> BackendResult<Url> {
        self.url(&["storage", "v1", "b", self.config.bucket.as_str(), "o"])
    }

    fn object_url(&self, key: &str) -> BackendResult<Url> {
        self.url(&["storage", "v1", "b", self.config.bucket.as_str(), "o", key])
    }

    fn key(&self, handle: &Handle) -> BackendResult<String> {
        object_path(&self.config.prefix, handle)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.token)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> BackendResult<Response> {
        let response = request.send().await.map_err(transport)?;
        check(response, what).await
    }

    async fn ensure_bucket(&self) -> BackendResult<()> {
        let bucket = self.config.bucket.as_str();
        match self
            .send(self.request(Method::GET, self.bucket_url()?), bucket)
            .await
        {
            Ok(_) => return Ok(()),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let mut url = self.url(&["storage", "v1", "b"])?;
        url.query_pairs_mut()
            .append_pair("project", &self.config.project_id);
        let insert = self
            .request(Method::POST, url)
            .json(&json!({ "name": bucket }));
        match self.send(insert, bucket).await {
            Ok(_) => {
                info!(bucket, project = %self.config.project_id, "bucket created");
                Ok(())
            }
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn metadata(&self, key: &str, what: &str) -> BackendResult<ObjectResource> {
        let response = self
            .send(self.request(Method::GET, self.object_url(key)?), what)
            .await?;
        decode(response, what).await
    }

    async fn list_objects(&self, prefix: &str) -> BackendResult<Vec<ObjectResource>> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.objects_url()?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("prefix", prefix)
                    .append_pair("fields", "items(name,size),nextPageToken");
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let response = self.send(self.request(Method::GET, url), prefix).await?;
            let page: ObjectList = decode(response, prefix).await?;
            objects.extend(page.items);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(objects)
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        let url = self.object_url(key)?;
        match self.send(self.request(Method::DELETE, url), key).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn transport(err: reqwest::Error) -> BackendError {
    BackendError::Connectivity(err.to_string())
}

async fn check(response: Response, what: &str) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify(status, what, &body))
}

fn classify(status: StatusCode, what: &str, body: &str) -> BackendError {
    match status {
        StatusCode::NOT_FOUND => BackendError::not_found(what),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BackendError::PermissionDenied(format!("{what}: {status}"))
        }
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            BackendError::already_exists(what)
        }
        status if status.is_server_error() => {
            BackendError::Connectivity(format!("{what}: {status} {body}"))
        }
        status => BackendError::Io(format!("{what}: {status} {body}")),
    }
}

async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> BackendResult<T> {
    response
        .json()
        .await
        .map_err(|err| BackendError::Io(format!("{what}: undecodable response: {err}")))
}

/// `Range` header value for a `(length, offset)` window, `None` for a full read.
fn byte_range(length: usize, offset: u64) -> Option<String> {
    match (length, offset) {
        (0, 0) => None,
        (0, offset) => Some(format!("bytes={offset}-")),
        (length, offset) => Some(format!("bytes={offset}-{}", offset + length as u64 - 1)),
    }
}

#[async_trait]
impl Backend for GsBackend {
    fn location(&self) -> String {
        self.config.location()
    }

    fn capabilities(&self) -> Capabilities {
        // Without a prefix a bulk delete would empty the whole bucket.
        if self.config.prefix.is_empty() {
            Capabilities::default()
        } else {
            Capabilities::default().with_bulk_delete()
        }
    }

    async fn test(&self, handle: &Handle) -> BackendResult<bool> {
        let key = self.key(handle)?;
        match self.metadata(&key, &handle.to_string()).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn save(&self, handle: &Handle, data: &[u8]) -> BackendResult<()> {
        let key = self.key(handle)?;
        let mut url = self.url(&["upload", "storage", "v1", "b", self.config.bucket.as_str(), "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", &key);
        let upload = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec());
        self.send(upload, &handle.to_string()).await?;
        debug!(%handle, bytes = data.len(), "object uploaded");
        Ok(())
    }

    async fn load(&self, handle: &Handle, length: usize, offset: u64) -> BackendResult<Vec<u8>> {
        let key = self.key(handle)?;
        let what = handle.to_string();
        let mut url = self.object_url(&key)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let mut request = self.request(Method::GET, url);
        let range = byte_range(length, offset);
        if let Some(range) = &range {
            request = request.header(RANGE, range);
        }

        let response = request.send().await.map_err(transport)?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            let size = self.metadata(&key, &what).await?.size()?;
            if offset == size {
                return Ok(Vec::new());
            }
            return Err(BackendError::InvalidRange { what, offset, size });
        }
        let response = check(response, &what).await?;
        let partial = response.status() == StatusCode::PARTIAL_CONTENT;
        let body = response.bytes().await.map_err(transport)?;
        if range.is_some() && !partial {
            // The server ignored the range and sent the whole object.
            return window(handle, &body, length, offset);
        }
        Ok(body.to_vec())
    }

    async fn stat(&self, handle: &Handle) -> BackendResult<FileInfo> {
        let key = self.key(handle)?;
        let object = self.metadata(&key, &handle.to_string()).await?;
        Ok(FileInfo::new(handle.name.clone(), object.size()?))
    }

    async fn remove(&self, handle: &Handle) -> BackendResult<()> {
        let key = self.key(handle)?;
        self.delete_object(&key).await
    }

    async fn list(&self, kind: FileType) -> BackendResult<Vec<FileInfo>> {
        if kind == FileType::Config {
            return match self.stat(&Handle::config()).await {
                Ok(info) => Ok(vec![FileInfo::new("", info.size)]),
                Err(err) if err.is_not_found() => Ok(Vec::new()),
                Err(err) => Err(err),
            };
        }
        let prefix = kind_prefix(&self.config.prefix, kind);
        self.list_objects(&prefix)
            .await?
            .into_iter()
            .map(|object| Ok(FileInfo::new(name_from_key(kind, &object.name), object.size()?)))
            .collect()
    }

    async fn delete_all(&self) -> BackendResult<()> {
        if self.config.prefix.is_empty() {
            return Err(BackendError::Unsupported("bulk delete of a whole bucket"));
        }
        let root = format!("{}/", self.config.prefix);
        let objects = self.list_objects(&root).await?;
        let count = objects.len();
        stream::iter(objects)
            .map(move |object| async move { self.delete_object(&object.name).await })
            .buffer_unordered(self.config.connections)
            .try_collect::<Vec<()>>()
            .await?;
        debug!(count, prefix = %root, "namespace emptied");
        Ok(())
    }
}
