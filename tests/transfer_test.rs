use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use wormhole_bridge::Bridge;
use wormhole_bridge::config::BridgeConfig;
use wormhole_bridge::infrastructure::simulated::SimulatedHost;
use wormhole_bridge::models::{DownloadRequest, SessionRequest, SharedItem};
use wormhole_bridge::services::dispatcher::{ChannelDispatcher, Dispatchers, NativeEvent};
use wormhole_bridge::services::staging::StageSource;

fn setup() -> (TempDir, SimulatedHost, Bridge, UnboundedReceiver<NativeEvent>) {
    let dir = tempfile::tempdir().unwrap();
    let host = SimulatedHost::new().unwrap();
    let (dispatcher, events) = ChannelDispatcher::new();
    let mut config =
        BridgeConfig::with_dirs(dir.path().join("cache"), dir.path().join("downloads"));
    config.transfer_buffer_size = 8 * 1024;
    let bridge = Bridge::new(
        config,
        host.platform(),
        Dispatchers::from_channel(Arc::new(dispatcher)),
    )
    .unwrap();
    (dir, host, bridge, events)
}

async fn settle(bridge: &Bridge) {
    tokio::time::timeout(Duration::from_secs(10), bridge.wait_idle())
        .await
        .expect("sessions did not finish");
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_ten_megabyte_stream_is_staged_intact() {
    let (_dir, _host, bridge, _events) = setup();
    let data = pattern(10_000_000);

    let staged = bridge
        .staging()
        .stage(StageSource::new(Box::pin(std::io::Cursor::new(data.clone()))))
        .await
        .unwrap();

    assert_eq!(staged.size, 10_000_000);
    assert_eq!(tokio::fs::read(&staged.local_path).await.unwrap(), data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_staging_never_collides() {
    let (_dir, _host, bridge, _events) = setup();

    let tasks = (0..64u8).map(|i| {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            let body = vec![i; 2048 + i as usize];
            let staged = bridge
                .staging()
                .stage(StageSource::new(Box::pin(std::io::Cursor::new(body.clone()))))
                .await
                .unwrap();
            (staged, body)
        })
    });

    let results = join_all(tasks).await;
    let mut paths = HashSet::new();
    for result in results {
        let (staged, body) = result.unwrap();
        assert_eq!(std::fs::read(&staged.local_path).unwrap(), body);
        assert!(paths.insert(staged.local_path));
    }
    assert_eq!(paths.len(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_text_is_dispatched_without_staging() {
    let (dir, host, bridge, mut events) = setup();

    let handle = bridge.begin(SessionRequest::ReceiveShare).unwrap();
    host.next_launch().await;
    assert!(bridge.deliver_share(SharedItem::Text("wormhole:3-x-y".into())));
    settle(&bridge).await;

    assert_eq!(
        events.recv().await.unwrap(),
        NativeEvent::SharedText {
            text: "wormhole:3-x-y".into()
        }
    );
    assert!(bridge.state_of(handle.request_id()).is_none());
    assert!(!dir.path().join("cache").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_file_is_staged() {
    let (dir, host, bridge, mut events) = setup();
    let source = dir.path().join("photo.png");
    std::fs::write(&source, pattern(3000)).unwrap();
    let reference = host.add_file_content(&source);

    bridge.begin(SessionRequest::ReceiveShare).unwrap();
    host.next_launch().await;
    assert!(bridge.deliver_share(SharedItem::File(reference)));
    settle(&bridge).await;

    let NativeEvent::SharedFile(result) = events.recv().await.unwrap() else {
        panic!("expected a shared file");
    };
    assert_eq!(result.display_name(), Some("photo.png"));
    assert_eq!(std::fs::read(result.path().unwrap()).unwrap(), pattern(3000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrequested_share_is_staged_and_dispatched() {
    let (dir, host, bridge, mut events) = setup();
    let reference = host.add_content(Some("ticket.txt"), None, b"wormhole:9-c-d".to_vec());

    assert!(bridge.deliver_share(SharedItem::File(reference)));
    settle(&bridge).await;

    let NativeEvent::SharedFile(result) = events.recv().await.unwrap() else {
        panic!("expected a shared file");
    };
    assert_eq!(result.display_name(), Some("ticket.txt"));
    let path = result.path().unwrap();
    assert!(path.starts_with(dir.path().join("cache")));
    assert_eq!(std::fs::read(path).unwrap(), b"wormhole:9-c-d");

    // Nothing was launched or attached for it, and the slot is free again
    assert_eq!(host.launch_count(), 0);
    assert!(host.detached().is_empty());
    assert!(bridge.snapshot().is_empty());

    assert!(bridge.deliver_share(SharedItem::Text("second".into())));
    settle(&bridge).await;
    assert_eq!(
        events.recv().await.unwrap(),
        NativeEvent::SharedText {
            text: "second".into()
        }
    );
}

#[tokio::test]
async fn test_share_without_surface_is_dropped() {
    let (_dir, host, bridge, mut events) = setup();
    host.destroy_surface();

    assert!(!bridge.deliver_share(SharedItem::Text("ignored".into())));
    assert!(bridge.snapshot().is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_download_is_published_and_source_removed() {
    let (dir, host, bridge, mut events) = setup();
    let source = dir.path().join("export.tmp");
    std::fs::write(&source, pattern(500)).unwrap();

    bridge
        .register_download(DownloadRequest::new(
            &source,
            "report.pdf",
            "application/pdf",
            500,
        ))
        .unwrap();
    settle(&bridge).await;

    let destination = dir.path().join("downloads").join("report.pdf");
    assert_eq!(std::fs::read(&destination).unwrap(), pattern(500));
    assert!(!source.exists());

    let registrations = host.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].name, "report.pdf");
    assert_eq!(registrations[0].mime_type, "application/pdf");
    assert_eq!(registrations[0].size, 500);
    assert_eq!(registrations[0].path, destination);

    assert_eq!(host.launch_count(), 0);
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_finalize_keeps_source() {
    let (dir, host, bridge, _events) = setup();
    // A plain file where the downloads directory should be
    std::fs::write(dir.path().join("downloads"), b"in the way").unwrap();
    let source = dir.path().join("export.tmp");
    std::fs::write(&source, pattern(500)).unwrap();

    bridge
        .register_download(DownloadRequest::new(&source, "report.pdf", "", 500))
        .unwrap();
    settle(&bridge).await;

    assert_eq!(std::fs::read(&source).unwrap(), pattern(500));
    assert!(host.registrations().is_empty());
}

#[tokio::test]
async fn test_copy_failure_removes_destination_and_keeps_source() {
    let (dir, host, bridge, _events) = setup();
    // Opening a directory succeeds; reading from it does not
    let source = dir.path().join("half-written");
    std::fs::create_dir(&source).unwrap();
    std::fs::write(source.join("inner"), b"keep me").unwrap();

    let err = bridge
        .finalizer()
        .finalize(&DownloadRequest::new(&source, "x.bin", "", 7))
        .await
        .unwrap_err();

    let destination = dir.path().join("downloads").join("x.bin");
    assert_eq!(err.source_path, source);
    assert_eq!(err.destination.as_deref(), Some(destination.as_path()));
    assert!(!destination.exists());
    assert_eq!(std::fs::read(source.join("inner")).unwrap(), b"keep me");
    assert!(host.registrations().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registration_failure_is_not_fatal() {
    let (dir, host, bridge, _events) = setup();
    host.fail_registration(true);
    let source = dir.path().join("export.tmp");
    std::fs::write(&source, pattern(64)).unwrap();

    let report = bridge
        .finalizer()
        .finalize(&DownloadRequest::new(&source, "../../etc/notes.txt", "text/plain", 64))
        .await
        .unwrap();

    assert!(!report.registered);
    assert_eq!(report.destination, dir.path().join("downloads").join("notes.txt"));
    assert_eq!(std::fs::read(&report.destination).unwrap(), pattern(64));
    assert!(!source.exists());
    assert_eq!(host.registrations().len(), 1);
}

#[tokio::test]
async fn test_purge_respects_retention() {
    let (_dir, _host, bridge, _events) = setup();
    bridge
        .staging()
        .stage(StageSource::new(Box::pin(std::io::Cursor::new(pattern(10)))))
        .await
        .unwrap();

    assert_eq!(bridge.purge_stale_staging().await.unwrap(), 0);
}
