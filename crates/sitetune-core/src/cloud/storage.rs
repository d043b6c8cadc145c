//! Cloud Storage uploads through the JSON API.
//!
//! Objects go up through resumable sessions in fixed-size chunks, so model
//! weights are never held in memory whole and each chunk has its own deadline.

use super::auth::TokenProvider;
use super::{check_response, GcpSettings};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, error, info};
use walkdir::WalkDir;

/// Chunk size for resumable uploads; Cloud Storage wants a multiple of 256 KiB.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 32 * 256 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CHUNK_TIMEOUT: Duration = Duration::from_secs(300);

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Upload one file and return its `gs://` URI.
    async fn upload_file(&self, local_path: &Path, object_name: &str) -> CoreResult<String>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketMetadata {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "storageClass")]
    pub storage_class: Option<String>,
}

pub struct GcsClient {
    client: Client,
    endpoint: String,
    bucket: String,
    tokens: Arc<dyn TokenProvider>,
    chunk_size: usize,
}

impl GcsClient {
    pub fn new(settings: &GcpSettings, tokens: Arc<dyn TokenProvider>) -> CoreResult<Self> {
        // Resumable sessions answer 308 without a Location; never follow it.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoints.storage.clone(),
            bucket: settings.bucket_name.clone(),
            tokens,
            chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
        })
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub async fn bucket_metadata(&self) -> CoreResult<BucketMetadata> {
        let url = format!("{}/storage/v1/b/{}", self.endpoint, urlencoding::encode(&self.bucket));
        let request = self.client.get(&url).timeout(REQUEST_TIMEOUT);
        let response = self.send(request, &url).await?;
        Ok(check_response(response, "bucket lookup").await?.json().await?)
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> CoreResult<Response> {
        let token = self.tokens.access_token().await?;
        request.bearer_auth(token).send().await.map_err(|e| {
            error!(error = %e, url = %url, "failed to reach Cloud Storage");
            CoreError::Http(e)
        })
    }

    /// Open a resumable upload session and return its URI.
    async fn start_session(&self, object_name: &str, total: u64) -> CoreResult<String> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=resumable&name={}",
            self.endpoint,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(object_name)
        );
        let request = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .header("X-Upload-Content-Type", "application/octet-stream")
            .header("X-Upload-Content-Length", total)
            .body(Vec::new());
        let response = check_response(self.send(request, &url).await?, "upload session").await?;
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CoreError::CloudApi {
                status: response.status().as_u16(),
                message: "upload session response has no Location header".to_string(),
            })
    }

    /// PUT one chunk; returns the next offset to send, or `None` once the object is complete.
    async fn put_chunk(&self, session: &str, offset: u64, chunk: Vec<u8>, total: u64) -> CoreResult<Option<u64>> {
        let range = if total == 0 {
            "bytes */0".to_string()
        } else {
            format!("bytes {}-{}/{}", offset, offset + chunk.len() as u64 - 1, total)
        };
        let request = self.client.put(session).timeout(CHUNK_TIMEOUT).header(CONTENT_RANGE, range).body(chunk);
        let response = self.send(request, session).await?;
        if response.status() == StatusCode::PERMANENT_REDIRECT {
            // `Range: bytes=0-N` lists what the server kept; no header means nothing.
            return Ok(Some(persisted_end(&response).map_or(0, |end| end + 1)));
        }
        check_response(response, "object upload").await?;
        Ok(None)
    }
}

fn persisted_end(response: &Response) -> Option<u64> {
    let range = response.headers().get(RANGE)?.to_str().ok()?;
    range.strip_prefix("bytes=")?.split('-').nth(1)?.trim().parse().ok()
}

#[async_trait]
impl ObjectStore for GcsClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload_file(&self, local_path: &Path, object_name: &str) -> CoreResult<String> {
        let mut file = tokio::fs::File::open(local_path).await?;
        let total = file.metadata().await?.len();
        debug!(path = %local_path.display(), bytes = total, object = object_name, "uploading");

        let session = self.start_session(object_name, total).await?;
        let mut offset = 0u64;
        loop {
            file.seek(SeekFrom::Start(offset)).await?;
            let len = (total - offset).min(self.chunk_size as u64);
            let mut chunk = Vec::with_capacity(len as usize);
            (&mut file).take(len).read_to_end(&mut chunk).await?;
            if (chunk.len() as u64) < len {
                return Err(CoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} shrank during upload", local_path.display()),
                )));
            }

            match self.put_chunk(&session, offset, chunk, total).await? {
                None => break,
                Some(next) if next > offset && next <= total => offset = next,
                Some(next) => {
                    return Err(CoreError::CloudApi {
                        status: StatusCode::PERMANENT_REDIRECT.as_u16(),
                        message: format!("upload of {object_name} stalled at byte {next}"),
                    });
                }
            }
        }

        Ok(format!("gs://{}/{}", self.bucket, object_name))
    }
}

/// Upload every file under `local_dir` to `{prefix}/{relative path}`.
pub async fn upload_dir(store: &dyn ObjectStore, local_dir: &Path, prefix: &str) -> CoreResult<Vec<String>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(local_dir) {
        let entry = entry.map_err(|e| {
            error!(dir = %local_dir.display(), error = %e, "cannot walk upload directory");
            CoreError::Io(e.into())
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();

    let mut uris = Vec::with_capacity(files.len());
    for path in files {
        let rel = path.strip_prefix(local_dir).unwrap_or(&path);
        let rel = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
        let object = format!("{}/{}", prefix.trim_end_matches('/'), rel);
        uris.push(store.upload_file(&path, &object).await?);
    }
    info!(count = uris.len(), prefix, "uploaded directory");
    Ok(uris)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Endpoints, StaticToken};
    use mockito::Matcher;
    use tempfile::TempDir;

    fn client(base: &str) -> GcsClient {
        let settings = GcpSettings::new("demo", "site-models").with_endpoints(Endpoints::local(base));
        GcsClient::new(&settings, Arc::new(StaticToken("t".to_string()))).unwrap()
    }

    fn session_mock(server: &mut mockito::ServerGuard, object: &str, total: usize) -> mockito::Mock {
        let location = format!("{}/upload/session/1", server.url());
        server
            .mock("POST", "/upload/storage/v1/b/site-models/o")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("uploadType".into(), "resumable".into()),
                Matcher::UrlEncoded("name".into(), object.into()),
            ]))
            .match_header("authorization", "Bearer t")
            .match_header("x-upload-content-length", total.to_string().as_str())
            .with_status(200)
            .with_header("location", &location)
            .create()
    }

    #[tokio::test]
    async fn test_upload_file_sends_chunks_through_a_session() {
        let mut server = mockito::Server::new_async().await;
        let session = session_mock(&mut server, "models/run/model.safetensors", 10);
        let first = server
            .mock("PUT", "/upload/session/1")
            .match_header("content-range", "bytes 0-3/10")
            .match_body("0123")
            .with_status(308)
            .with_header("range", "bytes=0-3")
            .create();
        // The server kept only two of the next four bytes, so the upload resumes from 6.
        let second = server
            .mock("PUT", "/upload/session/1")
            .match_header("content-range", "bytes 4-7/10")
            .match_body("4567")
            .with_status(308)
            .with_header("range", "bytes=0-5")
            .create();
        let third = server
            .mock("PUT", "/upload/session/1")
            .match_header("content-range", "bytes 6-9/10")
            .match_body("6789")
            .with_status(200)
            .with_body(r#"{"name": "models/run/model.safetensors"}"#)
            .create();

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("model.safetensors");
        std::fs::write(&path, "0123456789").unwrap();

        let uri = client(&server.url())
            .with_chunk_size(4)
            .upload_file(&path, "models/run/model.safetensors")
            .await
            .unwrap();
        assert_eq!(uri, "gs://site-models/models/run/model.safetensors");
        session.assert();
        first.assert();
        second.assert();
        third.assert();
    }

    #[tokio::test]
    async fn test_upload_empty_file() {
        let mut server = mockito::Server::new_async().await;
        let session = session_mock(&mut server, "empty.txt", 0);
        let put = server
            .mock("PUT", "/upload/session/1")
            .match_header("content-range", "bytes */0")
            .with_status(200)
            .with_body("{}")
            .create();

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();

        client(&server.url()).upload_file(&path, "empty.txt").await.unwrap();
        session.assert();
        put.assert();
    }

    #[tokio::test]
    async fn test_upload_without_progress_fails() {
        let mut server = mockito::Server::new_async().await;
        let _session = session_mock(&mut server, "a.txt", 3);
        let _put = server.mock("PUT", "/upload/session/1").with_status(308).create();

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        std::fs::write(&path, "abc").unwrap();

        let err = client(&server.url()).upload_file(&path, "a.txt").await.unwrap_err();
        assert!(matches!(err, CoreError::CloudApi { status: 308, ref message } if message.contains("stalled")));
    }

    #[tokio::test]
    async fn test_upload_error_status_is_cloud_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/upload/storage/v1/b/site-models/o")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("forbidden")
            .create();

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();

        let err = client(&server.url()).upload_file(&path, "a.txt").await.unwrap_err();
        assert!(matches!(err, CoreError::CloudApi { status: 403, ref message } if message == "forbidden"));
    }

    #[tokio::test]
    async fn test_bucket_metadata() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/storage/v1/b/site-models")
            .match_header("authorization", "Bearer t")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "site-models", "location": "US-CENTRAL1", "storageClass": "STANDARD"}"#)
            .create();

        let meta = client(&server.url()).bucket_metadata().await.unwrap();
        assert_eq!(meta.name, "site-models");
        assert_eq!(meta.storage_class.as_deref(), Some("STANDARD"));
        mock.assert();
    }

    #[tokio::test]
    async fn test_upload_dir_keeps_relative_paths() {
        let mut server = mockito::Server::new_async().await;
        let location = format!("{}/upload/session/1", server.url());
        let sessions = server
            .mock("POST", "/upload/storage/v1/b/site-models/o")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("location", &location)
            .expect(2)
            .create();
        let puts = server.mock("PUT", "/upload/session/1").with_status(200).with_body("{}").expect(2).create();

        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.json"), "{}").unwrap();
        std::fs::create_dir_all(temp.path().join("checkpoint-10")).unwrap();
        std::fs::write(temp.path().join("checkpoint-10/model.safetensors"), "w").unwrap();

        let uris = upload_dir(&client(&server.url()), temp.path(), "models/20250101_000000/").await.unwrap();
        assert_eq!(
            uris,
            vec![
                "gs://site-models/models/20250101_000000/checkpoint-10/model.safetensors".to_string(),
                "gs://site-models/models/20250101_000000/config.json".to_string(),
            ]
        );
        sessions.assert();
        puts.assert();
    }

    #[tokio::test]
    async fn test_upload_dir_walk_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let any = server.mock("POST", Matcher::Any).expect(0).create();

        let temp = TempDir::new().unwrap();
        let err = upload_dir(&client(&server.url()), &temp.path().join("missing"), "models/x").await.unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
        any.assert();
    }
}
