//! Resilience Layer
//!
//! Wires the credential store, cache engine, network client and offline
//! queue together and exposes the caller-facing surface. Reads go through
//! the cache; writes that fail for connectivity reasons are queued instead
//! of failing.

use crate::cache::{CacheEngine, CacheStats, CacheTier, SaveOptions, SweepReport};
use crate::config::ResilienceConfig;
use crate::credentials::{CredentialStore, TokenKind};
use crate::db::Database;
use crate::error::{NetworkError, Recovery, Result};
use crate::network::{
    ApiResponse, ConnectivityMonitor, HttpClient, HttpMethod, ProgressFn, UploadRequest,
};
use crate::queue::{
    DrainReport, OfflineQueue, OperationKind, PendingOperation, QueueStats, QueueStore,
};
use crate::telemetry::Telemetry;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Result of a caller-facing write
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// The server accepted the write
    Delivered(ApiResponse),
    /// The write was persisted and will sync when the server is reachable
    QueuedOffline(PendingOperation),
}

impl WriteOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::QueuedOffline(_))
    }
}

/// The assembled client resilience layer
pub struct ResilienceLayer {
    config: ResilienceConfig,
    credentials: CredentialStore,
    cache: Arc<CacheEngine>,
    client: Arc<HttpClient>,
    queue: Arc<OfflineQueue>,
    connectivity: ConnectivityMonitor,
    telemetry: Telemetry,
}

impl ResilienceLayer {
    /// Open every component under the configured data directory and start
    /// the background tasks
    ///
    /// The credential master key is read from the configured environment
    /// variable.
    pub async fn open(config: ResilienceConfig) -> Result<Self> {
        let credentials = CredentialStore::open(&config)?;
        Self::open_with_credentials(config, credentials).await
    }

    /// Like [`open`](Self::open) with an explicit credential store
    pub async fn open_with_credentials(
        config: ResilienceConfig,
        credentials: CredentialStore,
    ) -> Result<Self> {
        config.validate()?;
        let db = Database::open(config.database_path())?;
        let cache = CacheEngine::open(&config, db.clone()).await?;
        let layer = Self::from_parts(config, credentials, cache, db).await?;
        layer.start();
        Ok(layer)
    }

    /// Wire injected components without starting background tasks
    pub async fn from_parts(
        config: ResilienceConfig,
        credentials: CredentialStore,
        cache: Arc<CacheEngine>,
        db: Database,
    ) -> Result<Self> {
        let telemetry = Telemetry::new()?;
        let connectivity = ConnectivityMonitor::new(true);
        let client = Arc::new(HttpClient::new(
            &config,
            credentials.clone(),
            connectivity.clone(),
            telemetry.clone(),
        )?);
        let queue = OfflineQueue::new(
            config.queue.clone(),
            QueueStore::new(db).await?,
            client.clone(),
            cache.clone(),
            connectivity.clone(),
            telemetry.clone(),
        );

        info!(
            base_url = %client.base_url(),
            data_dir = %config.resolved_data_dir().display(),
            "Resilience layer initialized"
        );

        Ok(Self {
            config,
            credentials,
            cache,
            client,
            queue,
            connectivity,
            telemetry,
        })
    }

    /// Start the cache sweep and the queue drain loop
    pub fn start(&self) {
        self.cache.start_cleanup();
        self.queue.start();
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    pub fn client(&self) -> &Arc<HttpClient> {
        &self.client
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    // =========================================================================
    // Cache
    // =========================================================================

    pub async fn cache_get<V>(&self, id: &str) -> Option<V>
    where
        V: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.cache.get(id, CacheTier::ALL).await
    }

    pub async fn cache_save<V>(&self, id: &str, value: V, options: SaveOptions) -> bool
    where
        V: Serialize + Send + Sync + 'static,
    {
        self.cache.save(id, value, options).await
    }

    pub async fn cache_delete(&self, id: &str) -> bool {
        self.cache.delete(id).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn cleanup(&self) -> SweepReport {
        self.cache.cleanup_expired().await
    }

    /// Read-through GET: cache first, then the server, then write back
    pub async fn fetch<V>(&self, path: &str, ttl: Option<Duration>) -> Result<V>
    where
        V: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
    {
        let id = fetch_cache_id(path);
        if let Some(cached) = self.cache.get::<V>(&id, CacheTier::ALL).await {
            debug!(path, "Served from cache");
            return Ok(cached);
        }

        let value: V = self.client.get(path).await?.json()?;
        let options = match ttl {
            Some(ttl) => SaveOptions::default().ttl(ttl),
            None => SaveOptions::default(),
        };
        self.cache.save(&id, value.clone(), options).await;
        Ok(value)
    }

    // =========================================================================
    // HTTP
    // =========================================================================

    pub async fn http_get(&self, path: &str) -> std::result::Result<ApiResponse, NetworkError> {
        self.client.get(path).await
    }

    pub async fn http_post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> std::result::Result<ApiResponse, NetworkError> {
        self.client.post(path, body).await
    }

    pub async fn http_put(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> std::result::Result<ApiResponse, NetworkError> {
        self.client.put(path, body).await
    }

    pub async fn http_delete(&self, path: &str) -> std::result::Result<ApiResponse, NetworkError> {
        self.client.delete(path).await
    }

    pub async fn http_upload(
        &self,
        upload: &UploadRequest,
        progress: Option<ProgressFn>,
    ) -> std::result::Result<ApiResponse, NetworkError> {
        self.client.upload(upload, progress).await
    }

    pub async fn http_download(
        &self,
        path: &str,
        dest: &Path,
        progress: Option<ProgressFn>,
    ) -> std::result::Result<u64, NetworkError> {
        self.client.download(path, dest, progress).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Deliver a mutation now, or queue it if the server is unreachable
    ///
    /// While offline the operation is queued without a network attempt.
    /// Validation, auth and other permanent failures are returned as errors.
    pub async fn submit(&self, op: PendingOperation) -> Result<WriteOutcome> {
        if !self.connectivity.is_online() {
            debug!(kind = %op.kind, "Offline, queueing without a network attempt");
            return Ok(WriteOutcome::QueuedOffline(self.queue.enqueue(op).await?));
        }

        match self.client.request(&op.to_request()).await {
            Ok(response) => {
                for id in &op.invalidates {
                    self.cache.delete(id).await;
                }
                Ok(WriteOutcome::Delivered(response))
            }
            Err(e) => match e.recovery(op.method.is_mutating()) {
                Recovery::QueueOffline => {
                    info!(kind = %op.kind, error = %e, "Write deferred to offline queue");
                    Ok(WriteOutcome::QueuedOffline(self.queue.enqueue(op).await?))
                }
                Recovery::Retry | Recovery::Surface => Err(e.into()),
            },
        }
    }

    /// Send a chat message
    pub async fn send_message(&self, body: serde_json::Value) -> Result<WriteOutcome> {
        let op = PendingOperation::new(
            OperationKind::Message,
            HttpMethod::Post,
            self.config.queue.message_path.clone(),
            body,
        );
        self.submit(op).await
    }

    /// Submit a document for ingestion
    pub async fn ingest_document(&self, body: serde_json::Value) -> Result<WriteOutcome> {
        let op = PendingOperation::new(
            OperationKind::Ingest,
            HttpMethod::Post,
            self.config.queue.ingest_path.clone(),
            body,
        );
        self.submit(op).await
    }

    // =========================================================================
    // Queue and Connectivity
    // =========================================================================

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub async fn drain(&self) -> Result<DrainReport> {
        self.queue.drain().await
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Forward a platform connectivity notification
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    // =========================================================================
    // Session
    // =========================================================================

    pub async fn sign_in(
        &self,
        access_token: &str,
        refresh_token: &str,
        access_expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.credentials
            .save(TokenKind::Access, access_token, access_expires_at)
            .await?;
        self.credentials
            .save(TokenKind::Refresh, refresh_token, None)
            .await?;
        info!("Signed in");
        Ok(())
    }

    /// Remove every credential and this layer's cache namespace
    pub async fn sign_out(&self) -> Result<()> {
        self.credentials.clear_all().await?;
        self.cache.clear().await;
        info!("Signed out");
        Ok(())
    }

    /// Render metrics in the Prometheus text format
    pub fn metrics(&self) -> Result<String> {
        self.telemetry.encode()
    }

    /// Stop background tasks and release storage handles
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        self.cache.shutdown().await;
        info!("Resilience layer stopped");
    }
}

impl std::fmt::Debug for ResilienceLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceLayer")
            .field("client", &self.client)
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

/// Cache id under which `fetch` stores a GET response
pub fn fetch_cache_id(path: &str) -> String {
    format!("http:GET:{}", path)
}
