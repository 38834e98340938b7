use crate::error::BridgeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The five OS-mediated interactions the bridge knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    PickFile,
    ReceiveShare,
    ScanCode,
    RequestPermission,
    RegisterDownload,
}

impl SessionKind {
    pub const ALL: [SessionKind; 5] = [
        SessionKind::PickFile,
        SessionKind::ReceiveShare,
        SessionKind::ScanCode,
        SessionKind::RequestPermission,
        SessionKind::RegisterDownload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::PickFile => "pick-file",
            SessionKind::ReceiveShare => "receive-share",
            SessionKind::ScanCode => "scan-code",
            SessionKind::RequestPermission => "request-permission",
            SessionKind::RegisterDownload => "register-download",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| BridgeError::UnknownKind(s.to_string()))
    }
}

/// Lifecycle of a single interaction session.
///
/// `Created -> Attached -> AwaitingOsResult -> {Completed, Cancelled, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Attached,
    AwaitingOsResult,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// Correlates an OS callback with the session that issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

pub type SurfaceId = u64;

/// Opaque platform reference to external content (e.g. a `content://` URI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef(String);

impl ContentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cache-resident copy of externally referenced content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedFile {
    pub local_path: PathBuf,
    /// Best-effort; absent when the content service declines to report it
    pub original_name: Option<String>,
    /// Bytes actually written, never the size hint
    pub size: u64,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOutcome {
    pub permission: String,
    pub granted: bool,
}

/// A file fully written by the native core, to be published in the downloads area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub source_path: PathBuf,
    pub display_name: String,
    pub mime_type: String,
    pub size: u64,
}

impl DownloadRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        display_name: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            display_name: display_name.into(),
            mime_type: mime_type.into(),
            size,
        }
    }
}

/// Stable short error codes handed to the native core instead of raw OS messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UserCancelled,
    ReadError,
    OsError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UserCancelled => "user_cancelled",
            ErrorCode::ReadError => "read_error",
            ErrorCode::OsError => "os_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(path, displayName, error)` as delivered for pick-file and receive-share.
/// Exactly one of `path` and `error` is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileResult {
    path: Option<PathBuf>,
    display_name: Option<String>,
    error: Option<ErrorCode>,
}

impl FileResult {
    pub fn staged(file: &StagedFile) -> Self {
        Self {
            path: Some(file.local_path.clone()),
            display_name: file.original_name.clone(),
            error: None,
        }
    }

    pub fn failed(code: ErrorCode) -> Self {
        Self {
            path: None,
            display_name: None,
            error: Some(code),
        }
    }

    pub fn cancelled() -> Self {
        Self::failed(ErrorCode::UserCancelled)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn error(&self) -> Option<ErrorCode> {
        self.error
    }

    pub fn is_success(&self) -> bool {
        self.path.is_some()
    }
}

/// Payload of an inbound share intent. Only single items are supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedItem {
    File(ContentRef),
    Text(String),
}

/// Kind-specific parameters for `begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    PickFile { mime_filter: String },
    ReceiveShare,
    ScanCode { prompt: String },
    RequestPermission { permissions: Vec<String> },
    RegisterDownload(DownloadRequest),
}

impl SessionRequest {
    pub fn pick_file() -> Self {
        SessionRequest::PickFile {
            mime_filter: "*/*".to_string(),
        }
    }

    pub fn scan_code() -> Self {
        SessionRequest::ScanCode {
            prompt: "Scan".to_string(),
        }
    }

    pub fn permission(permission: impl Into<String>) -> Self {
        SessionRequest::RequestPermission {
            permissions: vec![permission.into()],
        }
    }

    pub fn kind(&self) -> SessionKind {
        match self {
            SessionRequest::PickFile { .. } => SessionKind::PickFile,
            SessionRequest::ReceiveShare => SessionKind::ReceiveShare,
            SessionRequest::ScanCode { .. } => SessionKind::ScanCode,
            SessionRequest::RequestPermission { .. } => SessionKind::RequestPermission,
            SessionRequest::RegisterDownload(_) => SessionKind::RegisterDownload,
        }
    }

    /// Builds the request for a string-typed native boundary.
    /// `argument` is the permission name or the scan prompt; other kinds ignore it.
    pub fn from_kind(kind: SessionKind, argument: Option<&str>) -> Result<Self, BridgeError> {
        match kind {
            SessionKind::PickFile => Ok(Self::pick_file()),
            SessionKind::ReceiveShare => Ok(SessionRequest::ReceiveShare),
            SessionKind::ScanCode => Ok(match argument {
                Some(prompt) => SessionRequest::ScanCode {
                    prompt: prompt.to_string(),
                },
                None => Self::scan_code(),
            }),
            SessionKind::RequestPermission => argument
                .map(Self::permission)
                .ok_or_else(|| BridgeError::InvalidRequest("permission name required".into())),
            SessionKind::RegisterDownload => Err(BridgeError::InvalidRequest(
                "register-download needs a DownloadRequest".into(),
            )),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), BridgeError> {
        match self {
            SessionRequest::RequestPermission { permissions } if permissions.is_empty() => Err(
                BridgeError::InvalidRequest("no permission requested".into()),
            ),
            SessionRequest::RegisterDownload(req) if req.display_name.trim().is_empty() => Err(
                BridgeError::InvalidRequest("download needs a display name".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// What the bridge asks the OS to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    DocumentPicker { mime_filter: String },
    ShareTarget,
    Scanner { prompt: String },
    PermissionPrompt { permissions: Vec<String> },
}

impl Launch {
    pub(crate) fn for_request(request: &SessionRequest) -> Option<Self> {
        match request {
            SessionRequest::PickFile { mime_filter } => Some(Launch::DocumentPicker {
                mime_filter: mime_filter.clone(),
            }),
            SessionRequest::ReceiveShare => Some(Launch::ShareTarget),
            SessionRequest::ScanCode { prompt } => Some(Launch::Scanner {
                prompt: prompt.clone(),
            }),
            SessionRequest::RequestPermission { permissions } => Some(Launch::PermissionPrompt {
                permissions: permissions.clone(),
            }),
            SessionRequest::RegisterDownload(_) => None,
        }
    }
}

/// A single OS launch. The OS must echo `request_id` back with its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRequest {
    pub request_id: RequestId,
    pub surface: SurfaceId,
    pub launch: Launch,
}

/// Outcome reported by an OS service for one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsOutcome {
    Picked(ContentRef),
    Shared(SharedItem),
    Scanned(Option<String>),
    /// One entry per bundled sub-permission
    PermissionsResult(Vec<(String, bool)>),
    Cancelled,
    Failed(String),
}

impl OsOutcome {
    /// Whether this outcome can terminate a session of `kind`.
    pub fn applies_to(&self, kind: SessionKind) -> bool {
        match self {
            OsOutcome::Picked(_) => kind == SessionKind::PickFile,
            OsOutcome::Shared(_) => kind == SessionKind::ReceiveShare,
            OsOutcome::Scanned(_) => kind == SessionKind::ScanCode,
            OsOutcome::PermissionsResult(_) => kind == SessionKind::RequestPermission,
            OsOutcome::Cancelled | OsOutcome::Failed(_) => kind != SessionKind::RegisterDownload,
        }
    }
}

/// Diagnostic view of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub request_id: RequestId,
    pub kind: SessionKind,
    pub state: SessionState,
    pub surface: SurfaceId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_names() {
        for kind in SessionKind::ALL {
            assert_eq!(kind.as_str().parse::<SessionKind>().unwrap(), kind);
        }
        assert!(matches!(
            "open-camera".parse::<SessionKind>(),
            Err(BridgeError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_file_result_populates_exactly_one_side() {
        let staged = StagedFile {
            local_path: PathBuf::from("/cache/1-0"),
            original_name: Some("a.txt".into()),
            size: 3,
            mime_type: None,
        };
        let ok = FileResult::staged(&staged);
        assert!(ok.is_success());
        assert!(ok.error().is_none());
        assert_eq!(ok.display_name(), Some("a.txt"));

        let cancelled = FileResult::cancelled();
        assert!(cancelled.path().is_none());
        assert!(cancelled.display_name().is_none());
        assert_eq!(cancelled.error(), Some(ErrorCode::UserCancelled));
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorCode::UserCancelled.as_str(), "user_cancelled");
        assert_eq!(ErrorCode::ReadError.as_str(), "read_error");
        assert_eq!(
            serde_json::to_string(&ErrorCode::UserCancelled).unwrap(),
            "\"user_cancelled\""
        );
    }

    #[test]
    fn test_outcome_kind_matching() {
        assert!(OsOutcome::Cancelled.applies_to(SessionKind::PickFile));
        assert!(!OsOutcome::Cancelled.applies_to(SessionKind::RegisterDownload));
        assert!(!OsOutcome::Scanned(None).applies_to(SessionKind::PickFile));
        assert!(OsOutcome::PermissionsResult(vec![]).applies_to(SessionKind::RequestPermission));
    }

    #[test]
    fn test_request_validation() {
        let empty = SessionRequest::RequestPermission {
            permissions: vec![],
        };
        assert!(empty.validate().is_err());
        assert!(SessionRequest::permission("WRITE_STORAGE").validate().is_ok());
        assert!(SessionRequest::from_kind(SessionKind::RequestPermission, None).is_err());
        assert_eq!(
            SessionRequest::from_kind(SessionKind::PickFile, None).unwrap(),
            SessionRequest::pick_file()
        );
    }
}
