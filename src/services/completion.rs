use crate::infrastructure::host::ContentResolver;
use crate::models::{
    ContentRef, ErrorCode, FileResult, OsOutcome, PermissionOutcome, RequestId, SessionKind,
    SessionRequest, SessionState, SharedItem,
};
use crate::services::dispatcher::Dispatchers;
use crate::services::staging::StagingStore;
use std::sync::Arc;

/// Turns an accepted OS outcome into the single native dispatch for its
/// session, staging referenced content first.
#[derive(Clone)]
pub struct Completion {
    staging: Arc<StagingStore>,
    content: Arc<dyn ContentResolver>,
    dispatchers: Dispatchers,
}

impl Completion {
    pub fn new(
        staging: Arc<StagingStore>,
        content: Arc<dyn ContentResolver>,
        dispatchers: Dispatchers,
    ) -> Self {
        Self {
            staging,
            content,
            dispatchers,
        }
    }

    /// Dispatches at most once and returns the terminal state to record.
    pub async fn resolve(
        &self,
        request_id: RequestId,
        request: &SessionRequest,
        outcome: OsOutcome,
    ) -> SessionState {
        match (request.kind(), outcome) {
            (SessionKind::PickFile, OsOutcome::Picked(reference)) => {
                let result = self.stage_result(request_id, &reference).await;
                let state = terminal_for(&result);
                self.dispatchers.pick.picker_result(result);
                state
            }
            (SessionKind::PickFile, OsOutcome::Cancelled) => {
                self.dispatchers.pick.picker_result(FileResult::cancelled());
                SessionState::Cancelled
            }
            (SessionKind::PickFile, OsOutcome::Failed(reason)) => {
                tracing::warn!(%request_id, "Document picker failed: {}", reason);
                self.dispatchers
                    .pick
                    .picker_result(FileResult::failed(ErrorCode::OsError));
                SessionState::Failed
            }

            (SessionKind::ReceiveShare, OsOutcome::Shared(SharedItem::File(reference))) => {
                let result = self.stage_result(request_id, &reference).await;
                let state = terminal_for(&result);
                self.dispatchers.share.share_result(result);
                state
            }
            (SessionKind::ReceiveShare, OsOutcome::Shared(SharedItem::Text(text))) => {
                self.dispatchers.share.shared_text(text);
                SessionState::Completed
            }
            (SessionKind::ReceiveShare, OsOutcome::Cancelled) => {
                self.dispatchers.share.share_result(FileResult::cancelled());
                SessionState::Cancelled
            }
            (SessionKind::ReceiveShare, OsOutcome::Failed(reason)) => {
                tracing::warn!(%request_id, "Share intent failed: {}", reason);
                self.dispatchers
                    .share
                    .share_result(FileResult::failed(ErrorCode::OsError));
                SessionState::Failed
            }

            (SessionKind::ScanCode, OsOutcome::Scanned(Some(contents))) => {
                tracing::debug!(%request_id, "Scan produced {} bytes", contents.len());
                self.dispatchers.scan.scan_result(contents);
                SessionState::Completed
            }
            (SessionKind::ScanCode, OsOutcome::Scanned(None) | OsOutcome::Cancelled) => {
                tracing::info!(%request_id, "Scan produced no result; nothing dispatched");
                SessionState::Cancelled
            }
            (SessionKind::ScanCode, OsOutcome::Failed(reason)) => {
                tracing::warn!(%request_id, "Scanner failed: {}; nothing dispatched", reason);
                SessionState::Failed
            }

            (SessionKind::RequestPermission, outcome) => {
                let permission = match request {
                    SessionRequest::RequestPermission { permissions } => permissions.join(","),
                    _ => String::new(),
                };
                let (granted, state) = match outcome {
                    // An interrupted prompt reports no grants at all; that is a denial
                    OsOutcome::PermissionsResult(grants) => (
                        !grants.is_empty() && grants.iter().all(|(_, granted)| *granted),
                        SessionState::Completed,
                    ),
                    OsOutcome::Cancelled => (false, SessionState::Cancelled),
                    other => {
                        tracing::warn!(%request_id, "Permission prompt failed: {:?}", other);
                        (false, SessionState::Failed)
                    }
                };
                if granted {
                    tracing::info!(%request_id, "Permission {} granted", permission);
                } else {
                    tracing::info!(%request_id, "Permission {} not granted", permission);
                }
                self.dispatchers
                    .permission
                    .permission_result(PermissionOutcome {
                        permission,
                        granted,
                    });
                state
            }

            (kind, outcome) => {
                tracing::error!(
                    %request_id,
                    "Outcome {:?} cannot complete a {} session",
                    outcome,
                    kind
                );
                SessionState::Failed
            }
        }
    }

    async fn stage_result(&self, request_id: RequestId, reference: &ContentRef) -> FileResult {
        match self
            .staging
            .stage_reference(self.content.as_ref(), reference)
            .await
        {
            Ok(staged) => FileResult::staged(&staged),
            Err(e) => {
                tracing::error!(%request_id, "Could not stage {}: {}", reference, e);
                FileResult::failed(ErrorCode::ReadError)
            }
        }
    }
}

fn terminal_for(result: &FileResult) -> SessionState {
    if result.is_success() {
        SessionState::Completed
    } else {
        SessionState::Failed
    }
}
