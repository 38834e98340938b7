//! Contracts the bridge consumes from the host UI framework and OS services.
//!
//! Everything behind these traits is opaque: the real platform adapter lives
//! outside this crate, and `infrastructure::simulated` provides an in-process
//! stand-in for tests and the CLI.

use crate::models::{ContentRef, OsRequest, RequestId, SurfaceId};
use crate::services::session::LifecycleHandle;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub type ContentStream = Pin<Box<dyn AsyncRead + Send>>;

pub trait SurfaceProvider: Send + Sync {
    /// The surface currently in the foreground, if any
    fn active_surface(&self) -> Option<Arc<dyn UiSurface>>;
}

/// A UI surface that can host transient lifecycle objects.
pub trait UiSurface: Send + Sync {
    fn id(&self) -> SurfaceId;

    /// Attaches a lifecycle object. May be called from any thread; the
    /// implementation must perform the attachment on its UI-owning thread and
    /// call [`LifecycleHandle::attached`] once the object is live.
    fn attach(&self, lifecycle: LifecycleHandle);

    /// Removes the lifecycle object. No callback for `request_id` may be
    /// routed to the bridge afterwards.
    fn detach(&self, request_id: RequestId);
}

/// Document picker, share target, scanner and permission prompt.
pub trait OsServices: Send + Sync {
    /// Starts one OS interaction. Must not block; the outcome is reported later
    /// through [`LifecycleHandle::on_result`] with the same request id.
    fn launch(&self, request: OsRequest);
}

/// Resolves platform content references to readable bytes.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn open(&self, reference: &ContentRef) -> io::Result<ContentStream>;
    async fn display_name(&self, reference: &ContentRef) -> Option<String>;
    async fn mime_type(&self, reference: &ContentRef) -> Option<String>;
    async fn size(&self, reference: &ContentRef) -> Option<u64>;
}

pub trait PermissionStore: Send + Sync {
    fn is_granted(&self, permission: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedDownload {
    pub name: String,
    pub mime_type: String,
    pub path: PathBuf,
    pub size: u64,
}

/// OS download index ("register completed file").
#[async_trait]
pub trait DownloadIndex: Send + Sync {
    /// Returns an opaque record id, which the bridge ignores
    async fn register_completed(&self, download: &CompletedDownload) -> anyhow::Result<String>;
}

/// The full set of host services a bridge is built on.
#[derive(Clone)]
pub struct Platform {
    pub surfaces: Arc<dyn SurfaceProvider>,
    pub os: Arc<dyn OsServices>,
    pub content: Arc<dyn ContentResolver>,
    pub permissions: Arc<dyn PermissionStore>,
    pub downloads: Arc<dyn DownloadIndex>,
}
