//! File movement between paired nodes: whole-file syncs, chunked
//! transfers, command-driven uploads, and deletes.

use crate::*;
use ferry_core::limits::CHUNK_SIZE;
use ferryd::commands::FileRef;

#[tokio::test(flavor = "multi_thread")]
async fn small_file_reaches_the_peer() {
    let (host, peer) = paired_nodes("small").await;

    std::fs::write(host.folder.join("note.txt"), b"see you on the other side").unwrap();
    wait_for_file(
        &peer.folder.join("note.txt"),
        b"see you on the other side",
        10,
    )
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn large_file_survives_chunking() {
    let (host, peer) = paired_nodes("large").await;

    // 2.5 chunks of patterned, non-repeating data.
    let contents: Vec<u8> = (0..CHUNK_SIZE * 5 / 2)
        .map(|i| ((i * 31 + i / 257) % 251) as u8)
        .collect();
    std::fs::write(host.folder.join("blob.bin"), &contents).unwrap();

    wait_for_file(&peer.folder.join("blob.bin"), &contents, 30).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn nested_paths_are_recreated() {
    let (host, peer) = paired_nodes("nested").await;

    std::fs::create_dir_all(host.folder.join("a/b")).unwrap();
    std::fs::write(host.folder.join("a/b/deep.txt"), b"nested").unwrap();
    wait_for_file(&peer.folder.join("a/b/deep.txt"), b"nested", 10).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_command_sends_a_file_from_outside_the_folder() {
    let (host, peer) = paired_nodes("upload").await;

    // A file that lives outside the shared folder entirely.
    let outside = std::env::temp_dir().join(format!("ferry-up-{}.dat", std::process::id()));
    std::fs::write(&outside, b"explicitly uploaded").unwrap();

    host.intents
        .send(ferryd::commands::Intent::Upload(FileRef::Path(
            outside.clone(),
        )))
        .await
        .unwrap();

    // Travels under its bare file name.
    wait_for_file(
        &peer.folder.join(outside.file_name().unwrap()),
        b"explicitly uploaded",
        10,
    )
    .await;
    let _ = std::fs::remove_file(&outside);
}

#[tokio::test(flavor = "multi_thread")]
async fn deletes_propagate() {
    let (host, peer) = paired_nodes("delete").await;

    std::fs::write(host.folder.join("doomed.txt"), b"short lived").unwrap();
    wait_for_file(&peer.folder.join("doomed.txt"), b"short lived", 10).await;

    std::fs::remove_file(host.folder.join("doomed.txt")).unwrap();
    let gone = peer.folder.join("doomed.txt");
    wait_for("peer copy to disappear", 10, || async {
        !gone.exists()
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_writes_flow_back_to_the_host() {
    let (host, peer) = paired_nodes("reverse").await;

    std::fs::write(peer.folder.join("from-peer.txt"), b"uphill both ways").unwrap();
    wait_for_file(&host.folder.join("from-peer.txt"), b"uphill both ways", 10).await;
    drop(peer);
}
