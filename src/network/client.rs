//! HTTP Client
//!
//! Executes requests against the configured base URL with bearer auth,
//! one-shot token refresh on 401, bounded exponential retry for transient
//! failures, and error classification.
//!
//! ```text
//! Issued ──► (Retrying)* ──► Succeeded | Failed(kind)
//!    │
//!    └─ 401 ──► Refreshing ──► Issued'   (at most once per request)
//! ```

use crate::config::ResilienceConfig;
use crate::credentials::CredentialStore;
use crate::error::{Error, NetworkError, Result};
use crate::network::auth::AuthInterceptor;
use crate::network::classify::{classify_status, classify_transport};
use crate::network::connectivity::ConnectivityMonitor;
use crate::network::retry::RetryPolicy;
use crate::network::types::{
    ApiRequest, ApiResponse, HttpMethod, Progress, ProgressFn, UploadRequest,
};
use crate::telemetry::Telemetry;
use futures::StreamExt;
use std::future::Future;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retrying, authenticating HTTP client
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    auth: AuthInterceptor,
    retry: RetryPolicy,
    connectivity: ConnectivityMonitor,
    telemetry: Telemetry,
}

impl HttpClient {
    pub fn new(
        config: &ResilienceConfig,
        credentials: CredentialStore,
        connectivity: ConnectivityMonitor,
        telemetry: Telemetry,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.http.connect_timeout())
            .read_timeout(config.http.receive_timeout())
            .timeout(config.http.request_deadline())
            .user_agent(config.http.user_agent.clone())
            .build()
            .map_err(|e| Error::Configuration(format!("Cannot build HTTP client: {}", e)))?;

        let base_url = config.http.base_url.trim_end_matches('/').to_string();
        let auth = AuthInterceptor::new(
            credentials,
            http.clone(),
            join_url(&base_url, &config.http.refresh_path),
            config.http.request_deadline(),
            telemetry.clone(),
        );

        Ok(Self {
            http,
            base_url,
            auth,
            retry: RetryPolicy::from(&config.retry),
            connectivity,
            telemetry,
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn credentials(&self) -> &CredentialStore {
        self.auth.credentials()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Absolute URL for a path; absolute URLs pass through unchanged
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    // =========================================================================
    // JSON Requests
    // =========================================================================

    /// Execute a JSON request
    pub async fn request(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, NetworkError> {
        let url = self.url(&request.path);
        self.execute(
            request.method,
            &request.path,
            |token| {
                let mut builder = self
                    .http
                    .request(request.method.to_reqwest(), &url)
                    .query(&request.query);
                if let Some(body) = &request.body {
                    builder = builder.json(body);
                }
                std::future::ready(Ok(with_bearer(builder, token)))
            },
            read_response,
        )
        .await
    }

    /// Execute a request, giving up with `Cancelled` when `cancel` fires
    pub async fn request_cancellable(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<ApiResponse, NetworkError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(method = %request.method, path = %request.path, "Request cancelled");
                self.telemetry.record_request(request.method.as_str(), "cancelled");
                Err(NetworkError::Cancelled)
            }
            result = self.request(request) => result,
        }
    }

    pub async fn get(&self, path: &str) -> std::result::Result<ApiResponse, NetworkError> {
        self.request(&ApiRequest::get(path)).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> std::result::Result<ApiResponse, NetworkError> {
        self.request(&ApiRequest::post(path, body)).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> std::result::Result<ApiResponse, NetworkError> {
        self.request(&ApiRequest::put(path, body)).await
    }

    pub async fn delete(&self, path: &str) -> std::result::Result<ApiResponse, NetworkError> {
        self.request(&ApiRequest::delete(path)).await
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    /// Multipart upload of one file, streamed from disk
    ///
    /// The file is reopened on every attempt so retries resend it whole.
    pub async fn upload(
        &self,
        upload: &UploadRequest,
        progress: Option<ProgressFn>,
    ) -> std::result::Result<ApiResponse, NetworkError> {
        let url = self.url(&upload.path);
        self.execute(
            HttpMethod::Post,
            &upload.path,
            |token| {
                let builder = self.http.post(&url);
                let progress = progress.clone();
                async move {
                    let form = multipart_form(upload, progress).await?;
                    Ok::<_, NetworkError>(with_bearer(builder.multipart(form), token))
                }
            },
            read_response,
        )
        .await
    }

    /// Stream a GET response body into `dest`, returning bytes written
    pub async fn download(
        &self,
        path: &str,
        dest: &Path,
        progress: Option<ProgressFn>,
    ) -> std::result::Result<u64, NetworkError> {
        let url = self.url(path);
        self.execute(
            HttpMethod::Get,
            path,
            |token| std::future::ready(Ok(with_bearer(self.http.get(&url), token))),
            |response| write_body(response, dest, progress.clone()),
        )
        .await
    }

    // =========================================================================
    // Execution
    // =========================================================================

    async fn execute<B, BF, H, HF, T>(
        &self,
        method: HttpMethod,
        path: &str,
        build: B,
        handle: H,
    ) -> std::result::Result<T, NetworkError>
    where
        B: Fn(Option<String>) -> BF,
        BF: Future<Output = std::result::Result<reqwest::RequestBuilder, NetworkError>>,
        H: Fn(reqwest::Response) -> HF,
        HF: Future<Output = std::result::Result<T, NetworkError>>,
    {
        let mut schedule = self.retry.schedule();
        let mut attempt = 1;
        let mut refreshed = false;

        let result = loop {
            let token = self.auth.access_token().await;
            let builder = match build(token.clone()).await {
                Ok(builder) => builder,
                Err(e) => break Err(e),
            };

            debug!(method = %method, path, attempt, "Sending request");
            let outcome = match builder.send().await {
                Ok(response) if response.status().is_success() => handle(response).await,
                Ok(response) => Err(error_from_response(response).await),
                Err(e) => Err(classify_transport(&e)),
            };

            match outcome {
                Ok(value) => break Ok(value),
                Err(NetworkError::Unauthorized(message)) if !refreshed => {
                    refreshed = true;
                    match self.auth.refresh(token.as_deref()).await {
                        Ok(_) => {
                            debug!(method = %method, path, "Replaying request with refreshed token");
                            continue;
                        }
                        Err(refresh_error) => {
                            debug!(error = %refresh_error, "Refresh failed, surfacing original 401");
                            break Err(NetworkError::Unauthorized(message));
                        }
                    }
                }
                Err(e) if self.retry.should_retry(attempt, &e) => {
                    let delay = schedule.next_delay(&e);
                    warn!(
                        method = %method,
                        path,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient error"
                    );
                    self.telemetry.record_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        self.observe(method, &result);
        result
    }

    /// Record the final outcome and feed the connectivity signal
    fn observe<T>(&self, method: HttpMethod, result: &std::result::Result<T, NetworkError>) {
        match result {
            Ok(_) => {
                self.telemetry.record_request(method.as_str(), "success");
                self.connectivity.set_online(true);
            }
            Err(e) => {
                self.telemetry
                    .record_request(method.as_str(), &e.kind().to_string());
                if e.is_offline() {
                    self.connectivity.set_online(false);
                } else if e.status().is_some() {
                    self.connectivity.set_online(true);
                }
            }
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn with_bearer(builder: reqwest::RequestBuilder, token: Option<String>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

async fn read_response(
    response: reqwest::Response,
) -> std::result::Result<ApiResponse, NetworkError> {
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(|e| classify_transport(&e))?;
    Ok(ApiResponse { status, body })
}

async fn error_from_response(response: reqwest::Response) -> NetworkError {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.bytes().await.unwrap_or_default();
    classify_status(status, &headers, &body)
}

fn io_error(context: &str, e: std::io::Error) -> NetworkError {
    NetworkError::Unknown(format!("{}: {}", context, e))
}

async fn multipart_form(
    upload: &UploadRequest,
    progress: Option<ProgressFn>,
) -> std::result::Result<reqwest::multipart::Form, NetworkError> {
    let file = tokio::fs::File::open(&upload.file)
        .await
        .map_err(|e| io_error("Cannot open upload", e))?;
    let total = file.metadata().await.ok().map(|m| m.len());

    let mut sent = 0u64;
    let stream = ReaderStream::new(file).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            sent += bytes.len() as u64;
            if let Some(callback) = &progress {
                callback(Progress {
                    transferred: sent,
                    total,
                });
            }
        }
        chunk
    });

    let body = reqwest::Body::wrap_stream(stream);
    let mut part = match total {
        Some(len) => reqwest::multipart::Part::stream_with_length(body, len),
        None => reqwest::multipart::Part::stream(body),
    }
    .file_name(upload.resolved_file_name());
    if let Some(mime) = &upload.mime_type {
        part = part
            .mime_str(mime)
            .map_err(|e| NetworkError::Unknown(format!("Invalid MIME type {}: {}", mime, e)))?;
    }

    let mut form = reqwest::multipart::Form::new();
    for (name, value) in &upload.fields {
        form = form.text(name.clone(), value.clone());
    }
    Ok(form.part(upload.field_name.clone(), part))
}

async fn write_body(
    response: reqwest::Response,
    dest: &Path,
    progress: Option<ProgressFn>,
) -> std::result::Result<u64, NetworkError> {
    let total = response.content_length();
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error("Cannot create download directory", e))?;
    }
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| io_error("Cannot create download file", e))?;

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| classify_transport(&e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| io_error("Cannot write download", e))?;
        written += chunk.len() as u64;
        if let Some(callback) = &progress {
            callback(Progress {
                transferred: written,
                total,
            });
        }
    }
    file.flush()
        .await
        .map_err(|e| io_error("Cannot flush download", e))?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::TokenKind;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> ResilienceConfig {
        let mut config = ResilienceConfig::default();
        config.http.base_url = server.uri();
        config.retry.initial_delay_ms = 10;
        config.retry.max_delay_ms = 40;
        config
    }

    fn client(server: &MockServer, credentials: CredentialStore) -> HttpClient {
        HttpClient::new(
            &test_config(server),
            credentials,
            ConnectivityMonitor::default(),
            Telemetry::new().unwrap(),
        )
        .unwrap()
    }

    async fn requests_to(server: &MockServer, route: &str) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == route)
            .count()
    }

    #[tokio::test]
    async fn test_server_error_is_attempted_three_times() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client(&server, CredentialStore::in_memory());
        let result = client.get("/flaky").await;

        assert_matches!(result, Err(NetworkError::ServerError { status: 503, .. }));
        assert_eq!(client.telemetry().retries(), 2);
        assert_eq!(client.telemetry().requests("GET", "server_error"), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eventually"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/eventually"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = client(&server, CredentialStore::in_memory());
        let response = client.get("/eventually").await.unwrap();
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(requests_to(&server, "/eventually").await, 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(serde_json::json!({"detail": "title is required"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, CredentialStore::in_memory());
        let result = client.post("/items", serde_json::json!({})).await;
        assert_matches!(
            result,
            Err(NetworkError::BadRequest { status: 422, message }) if message == "title is required"
        );
        assert_eq!(client.telemetry().retries(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_honours_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client(&server, CredentialStore::in_memory());
        assert_eq!(client.get("/limited").await.unwrap().status, 200);
        assert_eq!(client.telemetry().retries(), 1);
    }

    #[tokio::test]
    async fn test_single_refresh_and_replay() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .and(header("Authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .and(header("Authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("me"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({"refreshToken": "refresh"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "new"})))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = CredentialStore::in_memory();
        credentials.save(TokenKind::Access, "old", None).await.unwrap();
        credentials.save(TokenKind::Refresh, "refresh", None).await.unwrap();

        let client = client(&server, credentials.clone());
        let response = client.get("/profile").await.unwrap();
        assert_eq!(response.text().unwrap(), "me");
        assert_eq!(credentials.access_token().await.unwrap().as_deref(), Some("new"));
        assert_eq!(client.telemetry().retries(), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_returns_original_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secret"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"detail": "expired"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = CredentialStore::in_memory();
        credentials.save(TokenKind::Access, "old", None).await.unwrap();
        credentials.save(TokenKind::Refresh, "refresh", None).await.unwrap();

        let client = client(&server, credentials);
        assert_matches!(
            client.get("/secret").await,
            Err(NetworkError::Unauthorized(message)) if message == "expired"
        );
    }

    #[tokio::test]
    async fn test_replay_401_does_not_refresh_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "new"})))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = CredentialStore::in_memory();
        credentials.save(TokenKind::Access, "old", None).await.unwrap();
        credentials.save(TokenKind::Refresh, "refresh", None).await.unwrap();

        let client = client(&server, credentials);
        assert_matches!(client.get("/admin").await, Err(NetworkError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_query_and_body_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/notes/7"))
            .and(query_param("draft", "true"))
            .and(body_json(serde_json::json!({"text": "hello"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, CredentialStore::in_memory());
        let request = ApiRequest::put("/notes/7", serde_json::json!({"text": "hello"}))
            .with_query("draft", "true");
        let response = client.request(&request).await.unwrap();
        assert_eq!(response.status, 204);
        assert!(response.json::<Option<serde_json::Value>>().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let mut config = ResilienceConfig::default();
        config.http.base_url = "http://127.0.0.1:9".to_string();
        let connectivity = ConnectivityMonitor::new(true);
        let client = HttpClient::new(
            &config,
            CredentialStore::in_memory(),
            connectivity.clone(),
            Telemetry::new().unwrap(),
        )
        .unwrap()
        .with_retry(RetryPolicy::disabled());

        assert_matches!(client.get("/anything").await, Err(NetworkError::Network(_)));
        assert!(!connectivity.is_online());
    }

    #[tokio::test]
    async fn test_cancellation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = client(&server, CredentialStore::in_memory());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = client
            .request_cancellable(&ApiRequest::get("/slow"), &cancel)
            .await;
        assert_matches!(result, Err(NetworkError::Cancelled));
    }

    #[tokio::test]
    async fn test_upload_streams_file_with_progress() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/documents"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "d1"})))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("notes.txt");
        let content = "quarterly notes ".repeat(64);
        std::fs::write(&file, &content).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |p: Progress| sink.lock().push(p));

        let client = client(&server, CredentialStore::in_memory());
        let upload = UploadRequest::new("/documents", &file)
            .mime_type("text/plain")
            .with_field("title", "Notes");
        let response = client.upload(&upload, Some(progress)).await.unwrap();
        assert_eq!(response.status, 201);

        let last = *seen.lock().last().unwrap();
        assert_eq!(last.transferred, content.len() as u64);
        assert_eq!(last.total, Some(content.len() as u64));

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("name=\"file\"; filename=\"notes.txt\""));
        assert!(body.contains("name=\"title\""));
        assert!(body.contains("quarterly notes"));
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = MockServer::start().await;
        let payload = vec![7u8; 4096];
        Mock::given(method("GET"))
            .and(path("/exports/report.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out").join("report.bin");
        let last = Arc::new(Mutex::new(None));
        let sink = last.clone();
        let progress: ProgressFn = Arc::new(move |p: Progress| *sink.lock() = Some(p));

        let client = client(&server, CredentialStore::in_memory());
        let written = client
            .download("/exports/report.bin", &dest, Some(progress))
            .await
            .unwrap();

        assert_eq!(written, 4096);
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
        assert_eq!(last.lock().unwrap().transferred, 4096);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://h:1/", "/a/b"), "http://h:1/a/b");
        assert_eq!(join_url("http://h:1", "a"), "http://h:1/a");
        assert_eq!(join_url("http://h:1", "https://other/x"), "https://other/x");
    }
}
