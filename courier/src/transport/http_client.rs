//! Transport backed by `reqwest`.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{InFlight, Transport, TransportOutcome, TransportRequest};
use crate::config::TransportConfig;
use crate::errors::{ConfigError, TransportError};
use crate::request::{
    HttpMethod, MultipartContent, MultipartFormData, ParameterEncoding, Progress, ProgressHandler,
};
use crate::response::RawResponse;

/// [`Transport`] over a shared `reqwest::Client`.
///
/// Each transfer runs on its own Tokio task; aborting the task is the native
/// cancel. Methods must be called within a Tokio runtime.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl ReqwestTransport {
    /// Builds a client from `config`.
    pub fn new(config: TransportConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: TransportConfig) -> Self {
        Self { client, config }
    }

    /// The transport configuration.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn request_builder(&self, request: &TransportRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(to_reqwest_method(request.method), &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        if request.parameters.is_empty() {
            return builder;
        }
        match request.encoding {
            ParameterEncoding::Query => builder.query(&request.parameter_pairs()),
            ParameterEncoding::Url if request.method.encodes_parameters_in_url() => {
                builder.query(&request.parameter_pairs())
            }
            ParameterEncoding::Url => builder.form(&request.parameter_pairs()),
            ParameterEncoding::Json => builder.json(&request.parameters),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn send(&self, request: TransportRequest) -> InFlight {
        let builder = self.request_builder(&request);
        let error_for_status = self.config.error_for_status;
        InFlight::spawn(async move {
            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => return TransportOutcome::failure(map_reqwest_error(&e)),
            };
            let raw = raw_response(&response);
            if let Some(error) = status_error(&raw, error_for_status) {
                return TransportOutcome::failure(error);
            }
            match response.bytes().await {
                Ok(body) => TransportOutcome::success(raw, body),
                Err(e) => TransportOutcome {
                    response: Some(raw),
                    error: Some(map_reqwest_error(&e)),
                    ..Default::default()
                },
            }
        })
    }

    fn download(&self, request: TransportRequest, destination: PathBuf) -> InFlight {
        let builder = self.request_builder(&request);
        let error_for_status = self.config.error_for_status;
        let progress = request.progress.clone();
        InFlight::spawn(async move {
            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => return TransportOutcome::failure(map_reqwest_error(&e)),
            };
            let raw = raw_response(&response);
            if let Some(error) = status_error(&raw, error_for_status) {
                return TransportOutcome::failure(error);
            }
            let total = response.content_length();
            match write_body(response, &destination, total, progress.as_ref()).await {
                Ok(written) => {
                    debug!(path = %destination.display(), written, "Download written");
                    TransportOutcome::downloaded(raw, destination)
                }
                Err(error) => TransportOutcome {
                    response: Some(raw),
                    error: Some(error),
                    ..Default::default()
                },
            }
        })
    }

    async fn upload_multipart(
        &self,
        form: MultipartFormData,
        request: TransportRequest,
    ) -> Result<InFlight, TransportError> {
        let mut upload = request;
        let mut form = form;
        // Query parameters stay in the URL, all others become text fields
        if upload.encoding != ParameterEncoding::Query {
            for (key, value) in upload.parameter_pairs() {
                form = form.text(key, value);
            }
            upload.parameters.clear();
        }
        let form = encode_form(form).await?;
        let builder = self.request_builder(&upload).multipart(form);
        let error_for_status = self.config.error_for_status;
        Ok(InFlight::spawn(async move {
            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => return TransportOutcome::failure(map_reqwest_error(&e)),
            };
            let raw = raw_response(&response);
            if let Some(error) = status_error(&raw, error_for_status) {
                return TransportOutcome::failure(error);
            }
            match response.bytes().await {
                Ok(body) => TransportOutcome::success(raw, body),
                Err(e) => TransportOutcome {
                    response: Some(raw),
                    error: Some(map_reqwest_error(&e)),
                    ..Default::default()
                },
            }
        }))
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
    }
}

fn raw_response(response: &reqwest::Response) -> RawResponse {
    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    RawResponse {
        status: response.status().as_u16(),
        url: response.url().to_string(),
        headers,
    }
}

fn status_error(raw: &RawResponse, error_for_status: bool) -> Option<TransportError> {
    (error_for_status && raw.status >= 400).then(|| TransportError::http_status(raw.status))
}

fn map_reqwest_error(error: &reqwest::Error) -> TransportError {
    let code = if error.is_timeout() {
        TransportError::TIMED_OUT
    } else if error.is_connect() {
        TransportError::CANNOT_CONNECT_TO_HOST
    } else if let Some(status) = error.status() {
        i32::from(status.as_u16())
    } else if error.is_body() || error.is_decode() {
        TransportError::NETWORK_CONNECTION_LOST
    } else {
        TransportError::UNKNOWN
    };
    TransportError::new(code, error.to_string())
}

/// Streams the body into a temporary sibling of `destination` and renames
/// it into place once complete. The temporary file is removed if the
/// transfer fails or its task is aborted.
async fn write_body(
    response: reqwest::Response,
    destination: &Path,
    total: Option<u64>,
    progress: Option<&ProgressHandler>,
) -> Result<u64, TransportError> {
    let write_error = |e: std::io::Error| {
        TransportError::new(
            TransportError::CANNOT_WRITE_TO_FILE,
            format!("{}: {e}", destination.display()),
        )
    };

    let parent = match destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
            parent.to_path_buf()
        }
        None => PathBuf::from("."),
    };
    let (staging, staging_path) = tempfile::NamedTempFile::new_in(&parent)
        .map_err(write_error)?
        .into_parts();
    let mut file = tokio::fs::File::from_std(staging);

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| map_reqwest_error(&e))?;
        file.write_all(&chunk).await.map_err(write_error)?;
        written += chunk.len() as u64;
        if let Some(progress) = progress {
            progress(Progress::new(written, total));
        }
    }
    file.flush().await.map_err(write_error)?;
    drop(file);

    staging_path
        .persist(destination)
        .map_err(|e| write_error(e.error))?;
    Ok(written)
}

async fn encode_form(form: MultipartFormData) -> Result<reqwest::multipart::Form, TransportError> {
    let mut encoded = reqwest::multipart::Form::new();
    for part in form.parts() {
        let data = match &part.content {
            MultipartContent::Bytes(bytes) => bytes.to_vec(),
            MultipartContent::File(path) => tokio::fs::read(path).await.map_err(|e| {
                TransportError::encoding_failed(format!("{}: {e}", path.display()))
            })?,
        };
        let mut encoded_part = reqwest::multipart::Part::bytes(data);
        if let Some(file_name) = &part.file_name {
            encoded_part = encoded_part.file_name(file_name.clone());
        }
        if let Some(mime_type) = &part.mime_type {
            encoded_part = encoded_part
                .mime_str(mime_type)
                .map_err(|e| TransportError::encoding_failed(format!("{}: {e}", part.name)))?;
        }
        encoded = encoded.part(part.name.clone(), encoded_part);
    }
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::MultipartPart;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serves one canned HTTP/1.1 response and returns the raw request text.
    async fn serve_once(body: &'static str, status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut chunk = vec![0u8; 16 * 1024];
            // The client keeps the connection open until it gets a response
            while let Ok(Ok(n)) =
                tokio::time::timeout(std::time::Duration::from_millis(200), socket.read(&mut chunk)).await
            {
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
            }
            let request = String::from_utf8_lossy(&received).into_owned();
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\ncontent-type: text/plain\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (format!("http://{addr}"), handle)
    }

    /// Declares `declared` body bytes, sends `sent`, then holds or closes.
    async fn serve_truncated(sent: &'static [u8], declared: usize, hold: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut chunk = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut chunk).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {declared}\r\ncontent-type: application/octet-stream\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(sent).await.unwrap();
            socket.flush().await.unwrap();
            if hold {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
        });
        format!("http://{addr}")
    }

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(TransportConfig::new().with_timeout(5.0)).unwrap()
    }

    #[tokio::test]
    async fn test_send_returns_body_and_query() {
        let (base, server) = serve_once("hello", "200 OK").await;
        let mut request = TransportRequest::new(HttpMethod::Get, format!("{base}/greet"));
        request.parameters.insert("name".to_string(), serde_json::json!("ada"));

        let outcome = transport().send(request).completion.await;
        let raw = outcome.response.unwrap();
        assert_eq!(raw.status, 200);
        assert_eq!(raw.header("content-type"), Some("text/plain"));
        assert_eq!(outcome.body.unwrap().as_ref(), b"hello");

        let seen = server.await.unwrap();
        assert!(seen.starts_with("GET /greet?name=ada HTTP/1.1"), "{seen}");
    }

    #[tokio::test]
    async fn test_error_status_is_response_by_default() {
        let (base, _server) = serve_once("nope", "401 Unauthorized").await;
        let outcome = transport()
            .send(TransportRequest::new(HttpMethod::Get, base))
            .completion
            .await;
        assert_eq!(outcome.response.unwrap().status, 401);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_error_for_status_reports_code() {
        let (base, _server) = serve_once("boom", "500 Internal Server Error").await;
        let transport =
            ReqwestTransport::new(TransportConfig::new().with_error_for_status(true)).unwrap();
        let outcome = transport
            .send(TransportRequest::new(HttpMethod::Post, base))
            .completion
            .await;
        assert_eq!(outcome.error, Some(TransportError::http_status(500)));
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_connect_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = transport()
            .send(TransportRequest::new(HttpMethod::Get, format!("http://{addr}/")))
            .completion
            .await;
        assert_eq!(outcome.error.unwrap().code, TransportError::CANNOT_CONNECT_TO_HOST);
    }

    #[tokio::test]
    async fn test_download_writes_file_and_reports_progress() {
        let (base, _server) = serve_once("file-contents", "200 OK").await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested").join("out.txt");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut request = TransportRequest::new(HttpMethod::Get, format!("{base}/file"));
        request.progress = Some(Arc::new(move |p: Progress| seen_clone.lock().push(p)));

        let outcome = transport().download(request, destination.clone()).completion.await;
        assert_eq!(outcome.file, Some(destination.clone()));
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "file-contents");

        let last = *seen.lock().last().unwrap();
        assert_eq!(last, Progress::new(13, Some(13)));
    }

    #[tokio::test]
    async fn test_upload_encodes_parts() {
        let (base, server) = serve_once("stored", "201 Created").await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.txt");
        std::fs::write(&file, "from-disk").unwrap();

        let form = MultipartFormData::new()
            .text("title", "hello")
            .part(MultipartPart::file("attachment", &file).with_mime_type("text/plain"));
        let in_flight = transport()
            .upload_multipart(form, TransportRequest::new(HttpMethod::Post, format!("{base}/upload")))
            .await
            .unwrap();
        let outcome = in_flight.completion.await;
        assert_eq!(outcome.response.unwrap().status, 201);

        let seen = server.await.unwrap();
        assert!(seen.contains("multipart/form-data"), "{seen}");
        assert!(seen.contains("name=\"title\""), "{seen}");
        assert!(seen.contains("filename=\"note.txt\""), "{seen}");
    }

    #[tokio::test]
    async fn test_cancelled_download_leaves_no_file() {
        let base = serve_truncated(b"partial-bytes", 1_000_000, true).await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("big.bin");

        let started = Arc::new(tokio::sync::Notify::new());
        let notify = started.clone();
        let mut request = TransportRequest::new(HttpMethod::Get, format!("{base}/big"));
        request.progress = Some(Arc::new(move |_p: Progress| notify.notify_one()));

        let in_flight = transport().download(request, destination.clone());
        started.notified().await;
        in_flight.handle.cancel();

        let outcome = in_flight.completion.await;
        assert_eq!(outcome.error, Some(TransportError::cancelled()));
        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_truncated_download_leaves_no_file() {
        let base = serve_truncated(b"partial-bytes", 1_000_000, false).await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("big.bin");

        let outcome = transport()
            .download(TransportRequest::new(HttpMethod::Get, format!("{base}/big")), destination.clone())
            .completion
            .await;
        assert!(outcome.error.is_some());
        assert!(outcome.file.is_none());
        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_replaces_existing_file() {
        let (base, _server) = serve_once("fresh", "200 OK").await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.txt");
        std::fs::write(&destination, "stale contents").unwrap();

        let outcome = transport()
            .download(TransportRequest::new(HttpMethod::Get, base), destination.clone())
            .completion
            .await;
        assert!(outcome.error.is_none());
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_upload_keeps_query_parameters_in_url() {
        let (base, server) = serve_once("stored", "201 Created").await;
        let mut request = TransportRequest::new(HttpMethod::Post, format!("{base}/upload"));
        request.encoding = ParameterEncoding::Query;
        request.parameters.insert("album".to_string(), serde_json::json!("holiday"));

        let form = MultipartFormData::new().text("title", "beach");
        let outcome = transport()
            .upload_multipart(form, request)
            .await
            .unwrap()
            .completion
            .await;
        assert_eq!(outcome.response.unwrap().status, 201);

        let seen = server.await.unwrap();
        assert!(seen.starts_with("POST /upload?album=holiday HTTP/1.1"), "{seen}");
        assert!(seen.contains("name=\"title\""), "{seen}");
    }

    #[tokio::test]
    async fn test_upload_moves_body_parameters_into_form() {
        let (base, server) = serve_once("stored", "201 Created").await;
        let mut request = TransportRequest::new(HttpMethod::Post, format!("{base}/upload"));
        request.encoding = ParameterEncoding::Url;
        request.parameters.insert("album".to_string(), serde_json::json!("holiday"));

        let form = MultipartFormData::new().text("title", "beach");
        let outcome = transport()
            .upload_multipart(form, request)
            .await
            .unwrap()
            .completion
            .await;
        assert_eq!(outcome.response.unwrap().status, 201);

        let seen = server.await.unwrap();
        assert!(seen.starts_with("POST /upload HTTP/1.1"), "{seen}");
        assert!(seen.contains("name=\"album\""), "{seen}");
        assert!(seen.contains("holiday"), "{seen}");
        assert!(seen.contains("multipart/form-data"), "{seen}");
    }

    #[tokio::test]
    async fn test_upload_missing_file_fails_encoding() {
        let form = MultipartFormData::new().part(MultipartPart::file("f", "/definitely/not/here.bin"));
        let err = transport()
            .upload_multipart(form, TransportRequest::new(HttpMethod::Post, "http://127.0.0.1:9/"))
            .await
            .unwrap_err();
        assert_eq!(err.code, TransportError::ENCODING_FAILED);
    }

    #[tokio::test]
    async fn test_cancel_aborts_transfer() {
        // Accepts but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        });

        let in_flight = transport().send(TransportRequest::new(HttpMethod::Get, format!("http://{addr}/")));
        in_flight.handle.cancel();
        let outcome = in_flight.completion.await;
        assert_eq!(outcome.error, Some(TransportError::cancelled()));
    }
}
