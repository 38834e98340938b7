pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::infrastructure::host::Platform;
use crate::models::{
    DownloadRequest, OsOutcome, RequestId, SessionKind, SessionRequest, SessionSnapshot,
    SessionState, SharedItem, SurfaceId,
};
use crate::services::completion::Completion;
use crate::services::dispatcher::Dispatchers;
use crate::services::download::DownloadFinalizer;
use crate::services::permission::{PermissionCheck, PermissionGate};
use crate::services::session::{SessionHandle, SessionManager};
use crate::services::staging::StagingStore;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Entry point for the native core and the host adapter.
///
/// Must be built inside a tokio runtime; staging and download finalization run
/// on that runtime no matter which thread the OS callback arrives on.
#[derive(Clone)]
pub struct Bridge {
    config: BridgeConfig,
    sessions: SessionManager,
    permissions: PermissionGate,
    staging: Arc<StagingStore>,
    finalizer: Arc<DownloadFinalizer>,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        platform: Platform,
        dispatchers: Dispatchers,
    ) -> Result<Self, BridgeError> {
        let runtime = Handle::try_current().map_err(|_| BridgeError::NoRuntime)?;

        let staging = Arc::new(StagingStore::from_config(&config));
        let finalizer = Arc::new(DownloadFinalizer::from_config(
            &config,
            platform.downloads.clone(),
        ));
        let completion = Completion::new(staging.clone(), platform.content.clone(), dispatchers);
        let sessions = SessionManager::new(
            platform.surfaces.clone(),
            platform.os.clone(),
            completion,
            finalizer.clone(),
            runtime,
        );
        let permissions = PermissionGate::new(platform.permissions.clone(), sessions.clone());

        tracing::info!(
            "🌉 Bridge ready: cache={}, downloads={}, buffer={}KiB",
            config.cache_dir.display(),
            config.downloads_dir.display(),
            config.transfer_buffer_size / 1024
        );

        Ok(Self {
            config,
            sessions,
            permissions,
            staging,
            finalizer,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Starts an OS-mediated interaction. Returns as soon as the session is
    /// recorded; the result arrives through the matching dispatcher.
    pub fn begin(&self, request: SessionRequest) -> Result<SessionHandle, BridgeError> {
        self.sessions.begin(request)
    }

    /// `begin` for string-typed callers, e.g. `("request-permission", Some("CAMERA"))`.
    pub fn begin_named(
        &self,
        kind: &str,
        argument: Option<&str>,
    ) -> Result<SessionHandle, BridgeError> {
        let kind: SessionKind = kind.parse()?;
        self.begin(SessionRequest::from_kind(kind, argument)?)
    }

    pub fn ensure_permission(&self, permission: &str) -> Result<PermissionCheck, BridgeError> {
        self.permissions.ensure(permission)
    }

    pub fn ensure_permissions<S: AsRef<str>>(
        &self,
        permissions: &[S],
    ) -> Result<PermissionCheck, BridgeError> {
        self.permissions.ensure_all(permissions)
    }

    /// Publishes a finished native file in the downloads area. The session is
    /// discarded only after the copy, registration and source removal are done.
    pub fn register_download(
        &self,
        request: DownloadRequest,
    ) -> Result<SessionHandle, BridgeError> {
        self.begin(SessionRequest::RegisterDownload(request))
    }

    /// Routes an OS outcome by its echoed request id.
    pub fn deliver(&self, request_id: RequestId, outcome: OsOutcome) {
        self.sessions.deliver(request_id, outcome);
    }

    /// Hands an inbound share to the native core, opening a receive-share
    /// session for it when none is outstanding.
    pub fn deliver_share(&self, item: SharedItem) -> bool {
        self.sessions.deliver_share(item)
    }

    /// The host tore `surface` down; its undelivered sessions are discarded.
    pub fn surface_destroyed(&self, surface: SurfaceId) -> Vec<RequestId> {
        self.sessions.surface_destroyed(surface)
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.sessions.snapshot()
    }

    pub fn state_of(&self, request_id: RequestId) -> Option<SessionState> {
        self.sessions.state_of(request_id)
    }

    pub async fn wait_idle(&self) {
        self.sessions.wait_idle().await;
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    pub fn finalizer(&self) -> &DownloadFinalizer {
        &self.finalizer
    }

    /// Removes staged files older than the configured retention.
    pub async fn purge_stale_staging(&self) -> std::io::Result<usize> {
        self.staging
            .purge_older_than(self.config.staging_max_age())
            .await
    }
}
