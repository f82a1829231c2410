//! Network Client
//!
//! JSON-over-HTTP client with bearer authentication, a single token refresh
//! per 401, bounded exponential retry and a closed error taxonomy.
//!
//! # Usage
//!
//! ```ignore
//! use client_resilience::network::{ApiRequest, HttpClient};
//!
//! let client = HttpClient::new(&config, credentials, connectivity, telemetry)?;
//! let response = client.request(&ApiRequest::get("/reports").with_query("page", "2")).await?;
//! let reports: Vec<Report> = response.json()?;
//! ```

pub mod auth;
pub mod classify;
pub mod client;
pub mod connectivity;
pub mod retry;
pub mod types;

pub use auth::AuthInterceptor;
pub use client::HttpClient;
pub use connectivity::{ConnectivityMonitor, ConnectivitySubscription};
pub use retry::{RetryPolicy, RetrySchedule};
pub use types::{
    ApiRequest, ApiResponse, HttpMethod, Progress, ProgressFn, UploadRequest,
};
