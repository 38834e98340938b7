use crate::error::BridgeError;
use crate::infrastructure::host::PermissionStore;
use crate::models::{PermissionOutcome, SessionRequest};
use crate::services::session::{SessionHandle, SessionManager};
use std::sync::Arc;

/// Result of asking for a permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    /// Already held. Nothing was prompted and nothing will be dispatched.
    Granted(PermissionOutcome),
    /// A prompt session was opened; the outcome arrives through the
    /// permission dispatcher.
    Requested(SessionHandle),
}

impl PermissionCheck {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionCheck::Granted(_))
    }
}

#[derive(Clone)]
pub struct PermissionGate {
    store: Arc<dyn PermissionStore>,
    sessions: SessionManager,
}

impl PermissionGate {
    pub fn new(store: Arc<dyn PermissionStore>, sessions: SessionManager) -> Self {
        Self { store, sessions }
    }

    pub fn ensure(&self, permission: &str) -> Result<PermissionCheck, BridgeError> {
        self.ensure_all(&[permission])
    }

    /// Prompts for the whole bundle unless every member is already held.
    /// The dispatched outcome is granted only if all members are.
    pub fn ensure_all<S: AsRef<str>>(
        &self,
        permissions: &[S],
    ) -> Result<PermissionCheck, BridgeError> {
        let permissions: Vec<String> = permissions
            .iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if permissions.is_empty() {
            return Err(BridgeError::InvalidRequest("no permission requested".into()));
        }

        let missing: Vec<&str> = permissions
            .iter()
            .map(String::as_str)
            .filter(|p| !self.store.is_granted(p))
            .collect();

        if missing.is_empty() {
            tracing::debug!("Permission {} already held", permissions.join(","));
            return Ok(PermissionCheck::Granted(PermissionOutcome {
                permission: permissions.join(","),
                granted: true,
            }));
        }

        tracing::info!(
            "🔐 Requesting permission {} (missing: {})",
            permissions.join(","),
            missing.join(",")
        );
        let handle = self
            .sessions
            .begin(SessionRequest::RequestPermission { permissions })?;
        Ok(PermissionCheck::Requested(handle))
    }
}
