//! Request and response types of the network client

use crate::error::NetworkError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// HTTP method supported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// True for methods that change server state
    pub fn is_mutating(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("Unsupported HTTP method: {}", other)),
        }
    }
}

/// A JSON request against the configured base URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    /// Decode the body as JSON
    ///
    /// An empty body decodes as JSON `null`, so `Option<T>` and `()` work for
    /// 204 responses.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, NetworkError> {
        let raw: &[u8] = if self.body.is_empty() { b"null" } else { &self.body };
        serde_json::from_slice(raw).map_err(|e| NetworkError::ParseError(e.to_string()))
    }

    /// Body as UTF-8 text
    pub fn text(&self) -> Result<String, NetworkError> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| NetworkError::ParseError(format!("Body is not UTF-8: {}", e)))
    }
}

/// Bytes moved so far by an upload or download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub transferred: u64,
    pub total: Option<u64>,
}

impl Progress {
    /// Completed fraction, when the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(self.transferred as f64 / total as f64),
            None => None,
        }
    }
}

/// Progress callback invoked once per transferred chunk
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Multipart upload of one file plus text fields
#[derive(Clone)]
pub struct UploadRequest {
    pub path: String,
    pub file: PathBuf,
    pub field_name: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl UploadRequest {
    pub fn new(path: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: file.into(),
            field_name: "file".to_string(),
            file_name: None,
            mime_type: None,
            fields: Vec::new(),
        }
    }

    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// File name sent in the part's content disposition
    pub fn resolved_file_name(&self) -> String {
        self.file_name.clone().unwrap_or_else(|| {
            self.file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string())
        })
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("path", &self.path)
            .field("file", &self.file)
            .field("field_name", &self.field_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_method_roundtrip() {
        for method in [HttpMethod::Get, HttpMethod::Post, HttpMethod::Put, HttpMethod::Delete] {
            assert_eq!(method.as_str().parse::<HttpMethod>().unwrap(), method);
        }
        assert!("PATCH".parse::<HttpMethod>().is_err());
        assert!(!HttpMethod::Get.is_mutating());
        assert!(HttpMethod::Delete.is_mutating());
    }

    #[test]
    fn test_response_json() {
        let response = ApiResponse {
            status: 200,
            body: Bytes::from_static(br#"{"answer":42}"#),
        };
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["answer"], 42);

        let empty = ApiResponse {
            status: 204,
            body: Bytes::new(),
        };
        let nothing: Option<u32> = empty.json().unwrap();
        assert!(nothing.is_none());

        let broken = ApiResponse {
            status: 200,
            body: Bytes::from_static(b"{not json"),
        };
        assert_matches!(broken.json::<serde_json::Value>(), Err(NetworkError::ParseError(_)));
    }

    #[test]
    fn test_progress_fraction() {
        let half = Progress {
            transferred: 5,
            total: Some(10),
        };
        assert_eq!(half.fraction(), Some(0.5));
        assert_eq!(
            Progress {
                transferred: 3,
                total: None
            }
            .fraction(),
            None
        );
    }

    #[test]
    fn test_upload_file_name() {
        let upload = UploadRequest::new("/files", "/tmp/report.pdf");
        assert_eq!(upload.resolved_file_name(), "report.pdf");
    }
}
