use std::time::{Duration, Instant};

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[test]
fn bridge_reports_events_for_a_subscribed_directory() {
    use file_tree_cache::watch::{PathEvent, WatchBridge, WatchConfig};

    let temp = tempfile::tempdir().expect("temp dir");
    let root = temp.path().to_path_buf();

    let mut bridge = WatchBridge::new(WatchConfig::default()).expect("create bridge");
    bridge.subscribe(&root).expect("subscribe root");
    assert!(bridge.is_subscribed(&root));

    std::thread::sleep(Duration::from_millis(500));
    std::fs::write(root.join("touch.txt"), "hello").expect("write file");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut saw_change = false;

    while Instant::now() < deadline {
        match bridge.events.recv_timeout(Duration::from_millis(200)) {
            Ok(PathEvent::Error { message, .. }) => panic!("watch error: {message}"),
            Ok(_) => {
                saw_change = true;
                break;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(err) => panic!("watch channel error: {err}"),
        }
    }

    assert!(saw_change, "expected the bridge to emit a change event");

    bridge.unsubscribe(&root);
    assert!(!bridge.is_subscribed(&root));
    assert_eq!(bridge.subscription_count(), 0);
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
#[test]
fn bridge_reports_events_for_a_subscribed_directory() {
    eprintln!("watcher smoke test skipped: unsupported OS for automated verification");
}
