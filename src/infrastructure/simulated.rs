//! In-process stand-in for the host UI framework and OS services.
//!
//! Attachments run on a dedicated "sim-ui" thread, OS outcomes are fed back
//! from short-lived plain threads, and content, permissions and the download
//! index are kept in memory. Used by the integration tests and `bridge-sim`.

use crate::infrastructure::host::{
    CompletedDownload, ContentResolver, ContentStream, DownloadIndex, OsServices,
    PermissionStore, Platform, SurfaceProvider, UiSurface,
};
use crate::models::{ContentRef, OsOutcome, OsRequest, RequestId, SurfaceId};
use crate::services::session::LifecycleHandle;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::task::{Context, Poll};
use std::thread;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{Notify, oneshot};

const UI_THREAD_NAME: &str = "sim-ui";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type UiTask = Box<dyn FnOnce() + Send>;

/// Serial executor standing in for the host's UI-owning thread.
#[derive(Clone)]
struct UiThread {
    tx: mpsc::Sender<UiTask>,
}

impl UiThread {
    fn spawn() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<UiTask>();
        thread::Builder::new()
            .name(UI_THREAD_NAME.to_string())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
                tracing::debug!("UI thread stopped");
            })?;
        Ok(Self { tx })
    }

    fn post(&self, task: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(task)).is_err() {
            tracing::warn!("UI thread is gone; task dropped");
        }
    }

    /// Resolves once every task posted before this call has run.
    async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.post(move || {
            let _ = done.send(());
        });
        let _ = wait.await;
    }
}

/// A simulated activity/window.
pub struct SimulatedSurface {
    id: SurfaceId,
    ui: UiThread,
    auto_attach: Arc<AtomicBool>,
    live: Arc<Mutex<HashMap<RequestId, LifecycleHandle>>>,
    held: Mutex<Vec<LifecycleHandle>>,
    detached: Mutex<Vec<RequestId>>,
}

impl SimulatedSurface {
    fn make_live(&self, lifecycle: LifecycleHandle) {
        let live = self.live.clone();
        self.ui.post(move || {
            lock(&live).insert(lifecycle.request_id(), lifecycle.clone());
            lifecycle.attached();
        });
    }

    fn lifecycle(&self, request_id: RequestId) -> Option<LifecycleHandle> {
        lock(&self.live).get(&request_id).cloned()
    }

    fn release_held(&self) -> usize {
        let held: Vec<LifecycleHandle> = lock(&self.held).drain(..).collect();
        let count = held.len();
        for lifecycle in held {
            self.make_live(lifecycle);
        }
        count
    }
}

impl UiSurface for SimulatedSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn attach(&self, lifecycle: LifecycleHandle) {
        if self.auto_attach.load(Ordering::SeqCst) {
            self.make_live(lifecycle);
        } else {
            tracing::debug!("Holding attachment for {}", lifecycle.request_id());
            lock(&self.held).push(lifecycle);
        }
    }

    fn detach(&self, request_id: RequestId) {
        lock(&self.live).remove(&request_id);
        lock(&self.detached).push(request_id);
    }
}

#[derive(Clone)]
enum SimContent {
    Bytes(Vec<u8>),
    File(PathBuf),
    Failing { data: Vec<u8>, fail_after: usize },
}

struct SimEntry {
    content: SimContent,
    display_name: Option<String>,
    mime_type: Option<String>,
}

struct HostState {
    ui: UiThread,
    surface: Mutex<Option<Arc<SimulatedSurface>>>,
    next_surface: AtomicU64,
    auto_attach: Arc<AtomicBool>,
    launches: Mutex<VecDeque<OsRequest>>,
    launch_log: Mutex<Vec<OsRequest>>,
    launched: Notify,
    content: DashMap<ContentRef, SimEntry>,
    next_content: AtomicU64,
    granted: DashSet<String>,
    registrations: Mutex<Vec<CompletedDownload>>,
    fail_registration: AtomicBool,
}

/// Cheap to clone; every clone drives the same simulated device.
#[derive(Clone)]
pub struct SimulatedHost {
    state: Arc<HostState>,
}

impl SimulatedHost {
    /// Starts the UI thread and opens one foreground surface.
    pub fn new() -> io::Result<Self> {
        let host = Self {
            state: Arc::new(HostState {
                ui: UiThread::spawn()?,
                surface: Mutex::new(None),
                next_surface: AtomicU64::new(1),
                auto_attach: Arc::new(AtomicBool::new(true)),
                launches: Mutex::new(VecDeque::new()),
                launch_log: Mutex::new(Vec::new()),
                launched: Notify::new(),
                content: DashMap::new(),
                next_content: AtomicU64::new(1),
                granted: DashSet::new(),
                registrations: Mutex::new(Vec::new()),
                fail_registration: AtomicBool::new(false),
            }),
        };
        host.open_surface();
        Ok(host)
    }

    pub fn platform(&self) -> Platform {
        let host = Arc::new(self.clone());
        Platform {
            surfaces: host.clone(),
            os: host.clone(),
            content: host.clone(),
            permissions: host.clone(),
            downloads: host,
        }
    }

    /// Replaces the foreground surface with a fresh one and returns its id.
    pub fn open_surface(&self) -> SurfaceId {
        let id = self.state.next_surface.fetch_add(1, Ordering::Relaxed);
        let surface = Arc::new(SimulatedSurface {
            id,
            ui: self.state.ui.clone(),
            auto_attach: self.state.auto_attach.clone(),
            live: Arc::new(Mutex::new(HashMap::new())),
            held: Mutex::new(Vec::new()),
            detached: Mutex::new(Vec::new()),
        });
        *lock(&self.state.surface) = Some(surface);
        id
    }

    /// Tears down the foreground surface and its lifecycle objects, leaving
    /// no active surface. Returns the destroyed surface's id.
    pub fn destroy_surface(&self) -> Option<SurfaceId> {
        let surface = lock(&self.state.surface).take()?;
        lock(&surface.live).clear();
        lock(&surface.held).clear();
        Some(surface.id)
    }

    pub fn surface_id(&self) -> Option<SurfaceId> {
        lock(&self.state.surface).as_ref().map(|s| s.id)
    }

    /// When off, attachments are held until [`release_attachments`](Self::release_attachments).
    pub fn set_auto_attach(&self, enabled: bool) {
        self.state.auto_attach.store(enabled, Ordering::SeqCst);
    }

    pub fn release_attachments(&self) -> usize {
        match lock(&self.state.surface).as_ref() {
            Some(surface) => surface.release_held(),
            None => 0,
        }
    }

    /// Waits for the UI thread to drain everything posted so far.
    pub async fn settle_ui(&self) {
        self.state.ui.flush().await;
    }

    /// The live lifecycle object for `request_id` on the foreground surface.
    pub fn lifecycle(&self, request_id: RequestId) -> Option<LifecycleHandle> {
        lock(&self.state.surface)
            .as_ref()
            .and_then(|s| s.lifecycle(request_id))
    }

    pub fn detached(&self) -> Vec<RequestId> {
        lock(&self.state.surface)
            .as_ref()
            .map(|s| lock(&s.detached).clone())
            .unwrap_or_default()
    }

    /// Waits for the next OS launch.
    pub async fn next_launch(&self) -> OsRequest {
        loop {
            let launched = self.state.launched.notified();
            if let Some(request) = lock(&self.state.launches).pop_front() {
                return request;
            }
            launched.await;
        }
    }

    pub fn launch_count(&self) -> usize {
        lock(&self.state.launch_log).len()
    }

    /// Reports `outcome` from a fresh non-UI thread, the way OS callbacks
    /// arrive. Returns false when no lifecycle object is live for the request.
    pub fn respond(&self, request_id: RequestId, outcome: OsOutcome) -> bool {
        let Some(lifecycle) = self.lifecycle(request_id) else {
            tracing::debug!("No live lifecycle object for {}; outcome dropped", request_id);
            return false;
        };
        let callback = thread::Builder::new()
            .name("sim-os-callback".to_string())
            .spawn(move || lifecycle.on_result(request_id, outcome));
        match callback {
            Ok(handle) => handle.join().is_ok(),
            Err(e) => {
                tracing::error!("Could not start callback thread: {}", e);
                false
            }
        }
    }

    pub fn add_content(
        &self,
        display_name: Option<&str>,
        mime_type: Option<&str>,
        data: impl Into<Vec<u8>>,
    ) -> ContentRef {
        self.insert_content(SimEntry {
            content: SimContent::Bytes(data.into()),
            display_name: display_name.map(str::to_string),
            mime_type: mime_type.map(str::to_string),
        })
    }

    /// Exposes a real file; the display name is its file name.
    pub fn add_file_content(&self, path: impl AsRef<Path>) -> ContentRef {
        let path = path.as_ref();
        self.insert_content(SimEntry {
            display_name: path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string),
            mime_type: guess_mime(path),
            content: SimContent::File(path.to_path_buf()),
        })
    }

    /// Content whose stream errors after `fail_after` bytes.
    pub fn add_failing_content(&self, data: impl Into<Vec<u8>>, fail_after: usize) -> ContentRef {
        self.insert_content(SimEntry {
            content: SimContent::Failing {
                data: data.into(),
                fail_after,
            },
            display_name: Some("unstable.bin".to_string()),
            mime_type: None,
        })
    }

    fn insert_content(&self, entry: SimEntry) -> ContentRef {
        let n = self.state.next_content.fetch_add(1, Ordering::Relaxed);
        let reference = ContentRef::new(format!("content://sim/{}", n));
        self.state.content.insert(reference.clone(), entry);
        reference
    }

    pub fn grant(&self, permission: &str) {
        self.state.granted.insert(permission.to_string());
    }

    /// Every registration attempt, including rejected ones.
    pub fn registrations(&self) -> Vec<CompletedDownload> {
        lock(&self.state.registrations).clone()
    }

    pub fn fail_registration(&self, fail: bool) {
        self.state.fail_registration.store(fail, Ordering::SeqCst);
    }
}

fn guess_mime(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let guessed = match ext.as_str() {
        "txt" => mime::TEXT_PLAIN,
        "pdf" => mime::APPLICATION_PDF,
        "json" => mime::APPLICATION_JSON,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        _ => return None,
    };
    Some(guessed.to_string())
}

impl SurfaceProvider for SimulatedHost {
    fn active_surface(&self) -> Option<Arc<dyn UiSurface>> {
        lock(&self.state.surface)
            .clone()
            .map(|s| s as Arc<dyn UiSurface>)
    }
}

impl OsServices for SimulatedHost {
    fn launch(&self, request: OsRequest) {
        tracing::debug!("OS launch {:?}", request);
        lock(&self.state.launch_log).push(request.clone());
        lock(&self.state.launches).push_back(request);
        self.state.launched.notify_one();
    }
}

#[async_trait]
impl ContentResolver for SimulatedHost {
    async fn open(&self, reference: &ContentRef) -> io::Result<ContentStream> {
        let content = self
            .state
            .content
            .get(reference)
            .map(|entry| entry.content.clone())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("{} not found", reference))
            })?;
        let stream: ContentStream = match content {
            SimContent::Bytes(data) => Box::pin(io::Cursor::new(data)),
            SimContent::File(path) => Box::pin(tokio::fs::File::open(path).await?),
            SimContent::Failing { data, fail_after } => {
                Box::pin(FailingReader::new(data, fail_after))
            }
        };
        Ok(stream)
    }

    async fn display_name(&self, reference: &ContentRef) -> Option<String> {
        self.state
            .content
            .get(reference)
            .and_then(|e| e.display_name.clone())
    }

    async fn mime_type(&self, reference: &ContentRef) -> Option<String> {
        self.state
            .content
            .get(reference)
            .and_then(|e| e.mime_type.clone())
    }

    async fn size(&self, reference: &ContentRef) -> Option<u64> {
        let path = {
            let entry = self.state.content.get(reference)?;
            match &entry.content {
                SimContent::Bytes(data) => return Some(data.len() as u64),
                SimContent::Failing { data, .. } => return Some(data.len() as u64),
                SimContent::File(path) => path.clone(),
            }
        };
        tokio::fs::metadata(path).await.ok().map(|m| m.len())
    }
}

impl PermissionStore for SimulatedHost {
    fn is_granted(&self, permission: &str) -> bool {
        self.state.granted.contains(permission)
    }
}

#[async_trait]
impl DownloadIndex for SimulatedHost {
    async fn register_completed(&self, download: &CompletedDownload) -> anyhow::Result<String> {
        let record = {
            let mut registrations = lock(&self.state.registrations);
            registrations.push(download.clone());
            registrations.len()
        };
        if self.state.fail_registration.load(Ordering::SeqCst) {
            anyhow::bail!("download index unavailable");
        }
        Ok(format!("download-{}", record))
    }
}

/// Yields `data` but fails with an I/O error once `fail_after` bytes are read.
pub struct FailingReader {
    data: Vec<u8>,
    pos: usize,
    fail_after: usize,
}

impl FailingReader {
    pub fn new(data: Vec<u8>, fail_after: usize) -> Self {
        Self {
            data,
            pos: 0,
            fail_after,
        }
    }
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos >= self.fail_after {
            return Poll::Ready(Err(io::Error::other("simulated read failure")));
        }
        let end = self
            .data
            .len()
            .min(self.fail_after)
            .min(self.pos + buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..end]);
        self.pos = end;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_failing_reader_errors_mid_stream() {
        let mut reader = FailingReader::new(vec![7u8; 100], 30);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[tokio::test]
    async fn test_destroyed_surface_is_not_active() {
        let host = SimulatedHost::new().unwrap();
        let first = host.surface_id().unwrap();
        assert_eq!(host.destroy_surface(), Some(first));
        assert!(host.active_surface().is_none());
        let second = host.open_surface();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_registration_attempts_are_recorded_even_when_rejected() {
        let host = SimulatedHost::new().unwrap();
        host.fail_registration(true);
        let download = CompletedDownload {
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            path: PathBuf::from("/tmp/a.txt"),
            size: 1,
        };
        assert!(host.register_completed(&download).await.is_err());
        assert_eq!(host.registrations(), vec![download]);
    }
}
