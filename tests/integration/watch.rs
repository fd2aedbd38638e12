//! Watcher behavior end to end: echo suppression and explicitly
//! watched files.

use std::time::Duration;

use crate::*;
use ferryd::commands::{FileRef, Intent};

#[tokio::test(flavor = "multi_thread")]
async fn received_files_are_not_echoed_back() {
    let (host, peer) = paired_nodes("echo").await;

    std::fs::write(host.folder.join("once.txt"), b"exactly one crossing").unwrap();
    wait_for_file(&peer.folder.join("once.txt"), b"exactly one crossing", 10).await;

    // If suppression failed, the peer's watcher would upload the file
    // straight back and the host copy would be rewritten. Its mtime
    // staying put proves no echo arrived.
    let before = std::fs::metadata(host.folder.join("once.txt"))
        .unwrap()
        .modified()
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    let after = std::fs::metadata(host.folder.join("once.txt"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(before, after, "host copy was rewritten by an echo");

    // And both sides still agree on the content.
    assert_eq!(
        std::fs::read(peer.folder.join("once.txt")).unwrap(),
        b"exactly one crossing"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn watched_outside_file_syncs_on_change() {
    let (host, peer) = paired_nodes("watchcmd").await;

    let outside = std::env::temp_dir().join(format!("ferry-w-{}.log", std::process::id()));
    std::fs::write(&outside, b"rev 1").unwrap();

    host.intents
        .send(Intent::Watch(FileRef::Path(outside.clone())))
        .await
        .unwrap();
    // Let the watch registration land before touching the file.
    tokio::time::sleep(Duration::from_millis(300)).await;

    std::fs::write(&outside, b"rev 2").unwrap();
    wait_for_file(
        &peer.folder.join(outside.file_name().unwrap()),
        b"rev 2",
        10,
    )
    .await;
    let _ = std::fs::remove_file(&outside);
}

#[tokio::test(flavor = "multi_thread")]
async fn editor_scratch_files_never_cross() {
    let (host, peer) = paired_nodes("scratch").await;

    std::fs::write(host.folder.join("draft.txt~"), b"backup").unwrap();
    std::fs::write(host.folder.join("download.part"), b"partial").unwrap();
    std::fs::write(host.folder.join("real.txt"), b"the real one").unwrap();

    wait_for_file(&peer.folder.join("real.txt"), b"the real one", 10).await;
    assert!(!peer.folder.join("draft.txt~").exists());
    assert!(!peer.folder.join("download.part").exists());
}
