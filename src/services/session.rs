//! Interaction sessions: one OS-mediated request, one result.
//!
//! `begin` allocates a request id, records the session as `Created` and asks
//! the active surface to attach a lifecycle object. The host calls back into
//! the [`LifecycleHandle`] twice: once when the object is live (`attached`,
//! on the UI thread) and once with the OS outcome (`on_result`, on any
//! thread). The first accepted outcome is resolved on the tokio runtime,
//! dispatched, and only then is the lifecycle object detached and the
//! session dropped.

use crate::error::BridgeError;
use crate::infrastructure::host::{OsServices, SurfaceProvider, UiSurface};
use crate::models::{
    Launch, OsOutcome, OsRequest, RequestId, SessionKind, SessionRequest, SessionSnapshot,
    SessionState, SharedItem, SurfaceId,
};
use crate::services::completion::Completion;
use crate::services::download::DownloadFinalizer;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::Instrument;

struct SessionEntry {
    request: SessionRequest,
    surface: Arc<dyn UiSurface>,
    state: SessionState,
    /// Set once an outcome has been taken; later callbacks are ignored and
    /// surface teardown no longer discards the session
    accepted: bool,
    /// A lifecycle object is live on `surface` and must be detached
    attached: bool,
    created_at: DateTime<Utc>,
}

impl SessionEntry {
    fn kind(&self) -> SessionKind {
        self.request.kind()
    }
}

struct Inner {
    sessions: DashMap<RequestId, SessionEntry>,
    /// At most one live session per kind
    outstanding: DashMap<SessionKind, RequestId>,
    next_id: AtomicU64,
    surfaces: Arc<dyn SurfaceProvider>,
    os: Arc<dyn OsServices>,
    completion: Completion,
    finalizer: Arc<DownloadFinalizer>,
    runtime: Handle,
    finished: Notify,
}

/// Returned by `begin`; results never come back through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    request_id: RequestId,
    kind: SessionKind,
}

impl SessionHandle {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }
}

/// The host-side lifecycle object's view of its session. Forwards exactly
/// two events into the bridge: "attached" and "result received".
#[derive(Clone)]
pub struct LifecycleHandle {
    request_id: RequestId,
    kind: SessionKind,
    manager: Weak<Inner>,
}

impl LifecycleHandle {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// The lifecycle object is live on its surface.
    pub fn attached(&self) {
        if let Some(inner) = self.manager.upgrade() {
            inner.on_attached(self.request_id);
        }
    }

    /// An OS callback arrived at this lifecycle object. Callbacks carrying a
    /// different request id belong to someone else and are ignored.
    pub fn on_result(&self, echoed: RequestId, outcome: OsOutcome) {
        if echoed != self.request_id {
            tracing::debug!(
                request_id = %self.request_id,
                "Ignoring callback for unrelated request {}",
                echoed
            );
            return;
        }
        if let Some(inner) = self.manager.upgrade() {
            inner.deliver(echoed, outcome);
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        surfaces: Arc<dyn SurfaceProvider>,
        os: Arc<dyn OsServices>,
        completion: Completion,
        finalizer: Arc<DownloadFinalizer>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                outstanding: DashMap::new(),
                next_id: AtomicU64::new(0),
                surfaces,
                os,
                completion,
                finalizer,
                runtime,
                finished: Notify::new(),
            }),
        }
    }

    /// Starts a session and returns immediately. Safe to call from any thread.
    pub fn begin(&self, request: SessionRequest) -> Result<SessionHandle, BridgeError> {
        self.inner.begin(request)
    }

    /// Routes an OS outcome by request id, for hosts whose callbacks are not
    /// tied to a lifecycle object.
    pub fn deliver(&self, request_id: RequestId, outcome: OsOutcome) {
        self.inner.deliver(request_id, outcome);
    }

    /// Hands an inbound share to the outstanding receive-share session. Shares
    /// the native core never asked for get a session of their own, which
    /// starts out awaiting its result. Returns false only when there is no
    /// surface to receive on.
    pub fn deliver_share(&self, item: SharedItem) -> bool {
        let outstanding = self
            .inner
            .outstanding
            .get(&SessionKind::ReceiveShare)
            .map(|id| *id);
        let request_id = match outstanding {
            Some(request_id) => request_id,
            None => match self.inner.open_inbound(SessionRequest::ReceiveShare) {
                Ok(request_id) => request_id,
                Err(e) => {
                    tracing::warn!("Inbound share dropped: {}", e);
                    return false;
                }
            },
        };
        self.inner.deliver(request_id, OsOutcome::Shared(item));
        true
    }

    /// Discards every session on `surface` that has not taken an OS outcome
    /// yet. Discarded sessions end `Cancelled` and dispatch nothing.
    pub fn surface_destroyed(&self, surface: SurfaceId) -> Vec<RequestId> {
        self.inner.surface_destroyed(surface)
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> = self
            .inner
            .sessions
            .iter()
            .map(|entry| SessionSnapshot {
                request_id: *entry.key(),
                kind: entry.kind(),
                state: entry.state,
                surface: entry.surface.id(),
                created_at: entry.created_at,
            })
            .collect();
        sessions.sort_by_key(|s| s.request_id);
        sessions
    }

    pub fn state_of(&self, request_id: RequestId) -> Option<SessionState> {
        self.inner.sessions.get(&request_id).map(|entry| entry.state)
    }

    pub fn is_idle(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Resolves once no session is live.
    pub async fn wait_idle(&self) {
        loop {
            let finished = self.inner.finished.notified();
            if self.inner.sessions.is_empty() {
                return;
            }
            finished.await;
        }
    }
}

impl Inner {
    fn allocate_id(&self) -> RequestId {
        RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn begin(self: &Arc<Self>, request: SessionRequest) -> Result<SessionHandle, BridgeError> {
        request.validate()?;
        let kind = request.kind();

        let surface = self
            .surfaces
            .active_surface()
            .ok_or(BridgeError::NoActiveSurface)?;

        let request_id = self.allocate_id();
        match self.outstanding.entry(kind) {
            Entry::Occupied(existing) => {
                tracing::warn!(
                    "Rejecting {} request: {} is still outstanding",
                    kind,
                    existing.get()
                );
                return Err(BridgeError::SessionOutstanding(kind));
            }
            Entry::Vacant(slot) => {
                slot.insert(request_id);
            }
        }

        self.sessions.insert(
            request_id,
            SessionEntry {
                request,
                surface: surface.clone(),
                state: SessionState::Created,
                accepted: false,
                attached: false,
                created_at: Utc::now(),
            },
        );
        tracing::info!(%request_id, %kind, surface = surface.id(), "Session created");

        surface.attach(LifecycleHandle {
            request_id,
            kind,
            manager: Arc::downgrade(self),
        });

        Ok(SessionHandle { request_id, kind })
    }

    /// Records a session for an OS event that arrived unrequested. Nothing is
    /// attached or launched; the session waits for the event's outcome.
    fn open_inbound(&self, request: SessionRequest) -> Result<RequestId, BridgeError> {
        let kind = request.kind();
        let surface = self
            .surfaces
            .active_surface()
            .ok_or(BridgeError::NoActiveSurface)?;

        let request_id = self.allocate_id();
        match self.outstanding.entry(kind) {
            // Lost a race with another opener; share its session
            Entry::Occupied(existing) => return Ok(*existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(request_id);
            }
        }

        self.sessions.insert(
            request_id,
            SessionEntry {
                request,
                surface: surface.clone(),
                state: SessionState::AwaitingOsResult,
                accepted: false,
                attached: false,
                created_at: Utc::now(),
            },
        );
        tracing::info!(
            %request_id,
            %kind,
            surface = surface.id(),
            "📨 Inbound session opened without a native request"
        );
        Ok(request_id)
    }

    fn on_attached(self: &Arc<Self>, request_id: RequestId) {
        let (request, surface) = {
            let Some(mut entry) = self.sessions.get_mut(&request_id) else {
                tracing::debug!(%request_id, "Attach for a session that no longer exists");
                return;
            };
            if entry.state != SessionState::Created {
                tracing::warn!(%request_id, state = ?entry.state, "Duplicate attach ignored");
                return;
            }
            entry.state = SessionState::Attached;
            entry.attached = true;
            tracing::debug!(%request_id, "Lifecycle object attached");

            // The single OS request is issued right after this guard is released
            entry.state = SessionState::AwaitingOsResult;
            if let SessionRequest::RegisterDownload(_) = entry.request {
                entry.accepted = true;
            }
            (entry.request.clone(), entry.surface.clone())
        };

        match request {
            SessionRequest::RegisterDownload(download) => {
                let inner = self.clone();
                let span =
                    tracing::info_span!("session", %request_id, kind = "register-download");
                self.runtime.spawn(
                    async move {
                        let state = match inner.finalizer.finalize(&download).await {
                            Ok(report) => {
                                tracing::info!(
                                    "✅ Published {} ({} bytes)",
                                    report.destination.display(),
                                    report.size
                                );
                                SessionState::Completed
                            }
                            Err(_) => SessionState::Failed,
                        };
                        inner.finish(request_id, state, surface);
                    }
                    .instrument(span),
                );
            }
            other => match Launch::for_request(&other) {
                Some(launch) => {
                    tracing::info!(%request_id, "Launching {:?}", launch);
                    self.os.launch(OsRequest {
                        request_id,
                        surface: surface.id(),
                        launch,
                    });
                }
                None => tracing::error!(%request_id, "Nothing to launch for {:?}", other),
            },
        }
    }

    fn deliver(self: &Arc<Self>, request_id: RequestId, outcome: OsOutcome) {
        let accepted = {
            let Some(mut entry) = self.sessions.get_mut(&request_id) else {
                tracing::debug!(%request_id, "Callback for unknown or finished session ignored");
                return;
            };
            if entry.accepted {
                tracing::warn!(%request_id, "Session already has its outcome; redelivery ignored");
                None
            } else if entry.state != SessionState::AwaitingOsResult {
                tracing::warn!(
                    %request_id,
                    state = ?entry.state,
                    "Callback before the OS request was issued; ignored"
                );
                None
            } else if !outcome.applies_to(entry.kind()) {
                tracing::warn!(
                    %request_id,
                    kind = %entry.kind(),
                    "Outcome {:?} does not belong to this session; ignored",
                    outcome
                );
                None
            } else {
                entry.accepted = true;
                Some((entry.request.clone(), entry.surface.clone()))
            }
        };
        let Some((request, surface)) = accepted else {
            return;
        };

        let inner = self.clone();
        let span = tracing::info_span!("session", %request_id, kind = %request.kind());
        self.runtime.spawn(
            async move {
                let state = inner
                    .completion
                    .resolve(request_id, &request, outcome)
                    .await;
                inner.finish(request_id, state, surface);
            }
            .instrument(span),
        );
    }

    /// Records the terminal state, detaches, then drops the session.
    fn finish(&self, request_id: RequestId, state: SessionState, surface: Arc<dyn UiSurface>) {
        let (kind, attached) = match self.sessions.get_mut(&request_id) {
            Some(mut entry) => {
                entry.state = state;
                (entry.kind(), entry.attached)
            }
            None => {
                tracing::error!(%request_id, "Finished session missing from table");
                return;
            }
        };

        if attached {
            surface.detach(request_id);
        }

        self.sessions.remove(&request_id);
        self.outstanding.remove_if(&kind, |_, id| *id == request_id);
        tracing::info!(%request_id, %kind, ?state, "Session finished");
        self.finished.notify_waiters();
    }

    fn surface_destroyed(&self, surface: SurfaceId) -> Vec<RequestId> {
        let candidates: Vec<RequestId> = self
            .sessions
            .iter()
            .filter(|entry| entry.surface.id() == surface && !entry.accepted)
            .map(|entry| *entry.key())
            .collect();

        let mut discarded = Vec::new();
        for request_id in candidates {
            if let Some((_, entry)) = self
                .sessions
                .remove_if(&request_id, |_, entry| !entry.accepted)
            {
                if entry.attached {
                    entry.surface.detach(request_id);
                }
                let kind = entry.kind();
                self.outstanding.remove_if(&kind, |_, id| *id == request_id);
                tracing::info!(
                    %request_id,
                    %kind,
                    state = ?SessionState::Cancelled,
                    "Surface {} destroyed; session discarded without dispatch",
                    surface
                );
                discarded.push(request_id);
            }
        }

        if !discarded.is_empty() {
            self.finished.notify_waiters();
        }
        discarded
    }
}
