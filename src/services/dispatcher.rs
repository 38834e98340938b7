use crate::models::{FileResult, PermissionOutcome};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

pub trait PickDispatcher: Send + Sync {
    fn picker_result(&self, result: FileResult);
}

pub trait ShareDispatcher: Send + Sync {
    fn share_result(&self, result: FileResult);
    fn shared_text(&self, text: String);
}

/// Scans that produce nothing are never dispatched.
pub trait ScanDispatcher: Send + Sync {
    fn scan_result(&self, contents: String);
}

pub trait PermissionDispatcher: Send + Sync {
    fn permission_result(&self, outcome: PermissionOutcome);
}

/// One native-facing sink per session kind. Register-download has none: its
/// side effect is the result.
#[derive(Clone)]
pub struct Dispatchers {
    pub pick: Arc<dyn PickDispatcher>,
    pub share: Arc<dyn ShareDispatcher>,
    pub scan: Arc<dyn ScanDispatcher>,
    pub permission: Arc<dyn PermissionDispatcher>,
}

impl Dispatchers {
    /// Routes every kind into the same channel.
    pub fn from_channel(channel: Arc<ChannelDispatcher>) -> Self {
        Self {
            pick: channel.clone(),
            share: channel.clone(),
            scan: channel.clone(),
            permission: channel,
        }
    }
}

/// Message carried across the native boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NativeEvent {
    PickerResult(FileResult),
    SharedFile(FileResult),
    SharedText { text: String },
    ScanResult { contents: String },
    PermissionResult(PermissionOutcome),
}

impl NativeEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Fire-and-forget dispatch over an unbounded channel. The native core drains
/// the receiver from a single task, so events reach it one at a time and it
/// never has to be reentrant.
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<NativeEvent>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NativeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: NativeEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Native receiver is gone; dropping event");
        }
    }
}

impl PickDispatcher for ChannelDispatcher {
    fn picker_result(&self, result: FileResult) {
        self.send(NativeEvent::PickerResult(result));
    }
}

impl ShareDispatcher for ChannelDispatcher {
    fn share_result(&self, result: FileResult) {
        self.send(NativeEvent::SharedFile(result));
    }

    fn shared_text(&self, text: String) {
        self.send(NativeEvent::SharedText { text });
    }
}

impl ScanDispatcher for ChannelDispatcher {
    fn scan_result(&self, contents: String) {
        self.send(NativeEvent::ScanResult { contents });
    }
}

impl PermissionDispatcher for ChannelDispatcher {
    fn permission_result(&self, outcome: PermissionOutcome) {
        self.send(NativeEvent::PermissionResult(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorCode;

    #[tokio::test]
    async fn test_channel_preserves_order() {
        let (dispatcher, mut rx) = ChannelDispatcher::new();
        let dispatchers = Dispatchers::from_channel(Arc::new(dispatcher));

        dispatchers.scan.scan_result("wormhole:1-foo-bar".into());
        dispatchers.pick.picker_result(FileResult::cancelled());

        assert_eq!(
            rx.recv().await.unwrap(),
            NativeEvent::ScanResult {
                contents: "wormhole:1-foo-bar".into()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            NativeEvent::PickerResult(FileResult::cancelled())
        );
    }

    #[test]
    fn test_cancelled_pick_serializes_with_null_path() {
        let json = NativeEvent::PickerResult(FileResult::failed(ErrorCode::UserCancelled))
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "picker_result");
        assert!(value["path"].is_null());
        assert!(value["display_name"].is_null());
        assert_eq!(value["error"], "user_cancelled");
    }

    #[test]
    fn test_send_after_receiver_dropped_does_not_panic() {
        let (dispatcher, rx) = ChannelDispatcher::new();
        drop(rx);
        dispatcher.permission_result(PermissionOutcome {
            permission: "CAMERA".into(),
            granted: false,
        });
    }
}
