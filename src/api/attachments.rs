//! Attachment downloads and uploads.
//!
//! Downloads are streamed to disk chunk by chunk so large files never sit in
//! memory. Uploads go through the issue attachment endpoint as multipart form
//! data.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::client::JiraClient;
use super::error::{ApiError, Result};
use super::types::Attachment;
use super::validation::{sanitize_path_component, validate_issue_key};

/// Header Jira requires on attachment uploads to skip its XSRF check.
pub const NO_CHECK_HEADER: (&str, &str) = ("X-Atlassian-Token", "no-check");

/// Progress of a transfer, reported after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub bytes: u64,
    /// From `Content-Length`, when the server sent one.
    pub total: Option<u64>,
}

fn file_error(path: &Path, operation: &'static str, source: io::Error) -> ApiError {
    ApiError::File {
        path: path.to_path_buf(),
        operation,
        source,
    }
}

/// Metadata for one attachment.
pub async fn metadata(client: &JiraClient, attachment_id: &str) -> Result<Attachment> {
    let id = sanitize_path_component(attachment_id, false)?;
    client.get(&client.endpoints().attachment(&id)).await
}

/// Stream `url` into `path`, returning the number of bytes written.
///
/// `url` is normally relative to the site. Absolute URLs on another origin
/// are fetched without credentials. An existing file is left untouched unless
/// `overwrite` is set, and a partially written file is removed if the
/// transfer fails.
#[instrument(skip(client, progress), fields(path = %path.display()))]
pub async fn download_to_file<P>(
    client: &JiraClient,
    url: &str,
    path: &Path,
    overwrite: bool,
    mut progress: P,
) -> Result<u64>
where
    P: FnMut(Progress),
{
    // Claim the path up front unless overwriting.
    let reserved = if overwrite {
        None
    } else {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| file_error(path, "download", e))?;
        Some(file)
    };

    let url = client.build_url(url);
    let response = match client
        .execute(Method::GET, &url, client.request_timeout(), Ok)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            if let Some(file) = reserved {
                drop(file);
                discard_partial(path).await;
            }
            return Err(e);
        }
    };
    let total = response.content_length();

    let mut file = match reserved {
        Some(file) => file,
        None => fs::File::create(path)
            .await
            .map_err(|e| file_error(path, "download", e))?,
    };

    let mut written = 0u64;
    let mut body = response.bytes_stream();
    let outcome: Result<()> = async {
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| file_error(path, "download", e))?;
            written += chunk.len() as u64;
            progress(Progress {
                bytes: written,
                total,
            });
        }
        file.flush().await.map_err(|e| file_error(path, "download", e))
    }
    .await;

    if let Err(e) = outcome {
        drop(file);
        discard_partial(path).await;
        return Err(e);
    }

    debug!(bytes = written, "Downloaded attachment");
    Ok(written)
}

async fn discard_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!("Failed to remove partial download: {}", e);
    }
}

/// Download an attachment by id into `dir`, named after its filename.
pub async fn download_attachment(
    client: &JiraClient,
    attachment_id: &str,
    dir: &Path,
    overwrite: bool,
) -> Result<PathBuf> {
    let attachment = metadata(client, attachment_id).await?;
    // Only the final component, so a crafted filename cannot escape `dir`.
    let filename = Path::new(&attachment.filename)
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| {
            ApiError::validation("filename", format!("'{}' is not a file name", attachment.filename))
        })?;
    // The `content` link names the site host, which rejects gateway tokens
    // and may point anywhere; the REST content endpoint is always on our origin.
    let id = sanitize_path_component(&attachment.id, false)?;
    let url = client.endpoints().attachment_content(&id);

    let path = dir.join(filename);
    download_to_file(client, &url, &path, overwrite, |_| {}).await?;
    Ok(path)
}

/// Attach a local file to an issue.
#[instrument(skip(client), fields(path = %path.display()))]
pub async fn upload(client: &JiraClient, issue_key: &str, path: &Path) -> Result<Vec<Attachment>> {
    let key = validate_issue_key(issue_key)?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| ApiError::validation("path", "must name a file"))?;
    let data = Bytes::from(
        fs::read(path)
            .await
            .map_err(|e| file_error(path, "upload", e))?,
    );
    let size = data.len();

    let url = client.endpoints().issue_attachments(&key);
    let response = client
        .execute(Method::POST, &url, client.request_timeout(), |request| {
            let part = Part::stream_with_length(data.clone(), size as u64)
                .file_name(filename.clone());
            Ok(request
                .header(NO_CHECK_HEADER.0, NO_CHECK_HEADER.1)
                .multipart(Form::new().part("file", part)))
        })
        .await?;

    let attachments: Vec<Attachment> = response.json().await.map_err(|e| {
        ApiError::InvalidResponse(format!("Failed to parse upload response: {}", e))
    })?;

    info!(issue = %key, bytes = size, "Uploaded attachment");
    Ok(attachments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> JiraClient {
        JiraClient::with_bearer_token(&server.uri(), "tok").unwrap()
    }

    #[tokio::test]
    async fn test_download_streams_to_file_with_progress() {
        let server = MockServer::start().await;
        let body = vec![7u8; 64 * 1024];
        Mock::given(method("GET"))
            .and(url_path("/rest/api/3/attachment/content/10"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("blob.bin");
        let mut last = None;

        let written = download_to_file(
            &client(&server),
            "/rest/api/3/attachment/content/10",
            &target,
            false,
            |p| last = Some(p),
        )
        .await
        .unwrap();

        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&target).unwrap(), body);
        assert_eq!(last.unwrap().bytes, body.len() as u64);
    }

    #[tokio::test]
    async fn test_download_refuses_to_overwrite() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("report.txt");
        std::fs::write(&target, b"old").unwrap();

        let result = download_to_file(&client(&server), "/file", &target, false, |_| {}).await;
        match result {
            Err(ApiError::File { operation, source, .. }) => {
                assert_eq!(operation, "download");
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists);
            }
            other => panic!("expected file error, got {:?}", other),
        }
        assert_eq!(std::fs::read(&target).unwrap(), b"old");

        download_to_file(&client(&server), "/file", &target, true, |_| {})
            .await
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_download_error_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("missing.txt");
        let result = download_to_file(&client(&server), "/file", &target, false, |_| {}).await;

        assert!(matches!(result, Err(ApiError::NotFound(_))));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_download_attachment_uses_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/rest/api/3/attachment/10000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "10000",
                "filename": "notes.txt",
                "size": 5,
                "content": format!("{}/secure/attachment/10000/notes.txt", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/rest/api/3/attachment/content/10000"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let saved = download_attachment(&client(&server), "10000", dir.path(), false)
            .await
            .unwrap();

        assert_eq!(saved, dir.path().join("notes.txt"));
        assert_eq!(std::fs::read_to_string(saved).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_download_attachment_ignores_foreign_content_link() {
        let jira = MockServer::start().await;
        let elsewhere = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/rest/api/3/attachment/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "5",
                "filename": "a.txt",
                "content": format!("{}/secure/attachment/5/a.txt", elsewhere.uri())
            })))
            .mount(&jira)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/rest/api/3/attachment/content/5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("data"))
            .expect(1)
            .mount(&jira)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("stolen"))
            .expect(0)
            .mount(&elsewhere)
            .await;

        let dir = TempDir::new().unwrap();
        let saved = download_attachment(&client(&jira), "5", dir.path(), false)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(saved).unwrap(), "data");
    }

    #[tokio::test]
    async fn test_download_from_foreign_origin_sends_no_credentials() {
        let jira = MockServer::start().await;
        let elsewhere = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/public/file.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("public"))
            .expect(1)
            .mount(&elsewhere)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("file.txt");
        let url = format!("{}/public/file.txt", elsewhere.uri());
        download_to_file(&client(&jira), &url, &target, false, |_| {})
            .await
            .unwrap();

        let requests = elsewhere.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_failed_overwrite_keeps_existing_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("keep.txt");
        std::fs::write(&target, b"old").unwrap();

        let client = client(&server).with_retry(crate::api::RetryConfig::disabled());
        let result = download_to_file(&client, "/file", &target, true, |_| {}).await;
        assert!(result.is_err());
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_download_attachment_strips_directories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/rest/api/3/attachment/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "5",
                "filename": "../../etc/passwd"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/rest/api/3/attachment/content/5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let saved = download_attachment(&client(&server), "5", dir.path(), false)
            .await
            .unwrap();
        assert_eq!(saved, dir.path().join("passwd"));
    }

    #[tokio::test]
    async fn test_upload_sends_multipart_with_no_check_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/rest/api/3/issue/PROJ-7/attachments"))
            .and(header("X-Atlassian-Token", "no-check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "1", "filename": "log.txt", "size": 3}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("log.txt");
        std::fs::write(&file, b"abc").unwrap();

        let uploaded = upload(&client(&server), "proj-7", &file).await.unwrap();
        assert_eq!(uploaded[0].filename, "log.txt");

        let requests = server.received_requests().await.unwrap();
        let content_type = requests[0].headers.get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().starts_with("multipart/form-data"));
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_file_error() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        let result = upload(&client(&server), "PROJ-1", &dir.path().join("nope.txt")).await;
        assert!(matches!(
            result,
            Err(ApiError::File { operation: "upload", .. })
        ));
    }
}
