//! Per-connection session — the fixed task set that serves one
//! authenticated peer link: inbound reader, command executor,
//! watch-event loop, and (dialing side only) the heartbeat monitor.
//!
//! All tasks select on the connection's shared cancellation signal.
//! The inbound reader is the authoritative end: when it exits, the
//! whole set is cancelled and the connection slot is cleared.

pub mod dialer;
pub mod listener;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ferry_core::wire::Message;
use tokio::sync::{mpsc, Mutex};

use crate::channel::{ChannelError, MessageReader, MessageWriter};
use crate::commands::{FileTracker, Intent};
use crate::connection::{ActiveConnection, PeerHandle};
use crate::heartbeat::Heartbeat;
use crate::transfer::{send, RateLimiter, Reassembler};
use crate::watcher::{FolderWatcher, FsChange};

/// A receiver that outlives any single connection. Sessions take the
/// lock for their lifetime; the next session picks it up afterwards.
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

pub fn shared_receiver<T>(rx: mpsc::Receiver<T>) -> SharedReceiver<T> {
    Arc::new(Mutex::new(rx))
}

/// Everything a session needs beyond its own socket. All members are
/// process-lived and cheap to clone.
#[derive(Clone)]
pub struct SessionDeps {
    pub active: ActiveConnection,
    pub reassembler: Reassembler,
    pub limiter: RateLimiter,
    pub tracker: FileTracker,
    pub watcher: Arc<FolderWatcher>,
    pub changes: SharedReceiver<FsChange>,
    pub intents: SharedReceiver<Intent>,
    pub folder: PathBuf,
}

pub struct Session {
    deps: SessionDeps,
    handle: PeerHandle,
    reader: MessageReader,
    monitor_liveness: bool,
}

impl Session {
    pub fn new(
        deps: SessionDeps,
        handle: PeerHandle,
        reader: MessageReader,
        monitor_liveness: bool,
    ) -> Self {
        Self {
            deps,
            handle,
            reader,
            monitor_liveness,
        }
    }

    pub async fn run(self) {
        let Session {
            deps,
            handle,
            reader,
            monitor_liveness,
        } = self;
        let addr = handle.addr;
        let (pong_tx, pong_rx) = mpsc::channel(4);

        let inbound = tokio::spawn(inbound_loop(deps.clone(), handle.clone(), reader, pong_tx));
        let commands = tokio::spawn(command_loop(deps.clone(), handle.clone()));
        let changes = tokio::spawn(change_loop(deps.clone(), handle.clone()));
        let heartbeat = monitor_liveness.then(|| {
            let active = deps.active.clone();
            let monitor = Heartbeat::new(handle.writer.clone(), pong_rx, handle.cancelled());
            tokio::spawn(async move {
                if let Err(e) = monitor.run().await {
                    tracing::warn!(error = %e, "liveness check failed");
                    active.force_close().await;
                }
            })
        });

        let _ = inbound.await;
        handle.cancel();
        let _ = commands.await;
        let _ = changes.await;
        if let Some(task) = heartbeat {
            let _ = task.await;
        }
        deps.active.clear(addr).await;
        tracing::info!(%addr, "session ended");
    }
}

async fn inbound_loop(
    deps: SessionDeps,
    handle: PeerHandle,
    mut reader: MessageReader,
    pong_tx: mpsc::Sender<()>,
) {
    let mut cancel = handle.cancelled();
    let writer = handle.writer.clone();
    loop {
        let received = tokio::select! {
            _ = cancel.recv() => return,
            received = reader.receive() => received,
        };
        match received {
            Ok(message) => {
                if let Err(e) = dispatch(&deps, &writer, &pong_tx, message).await {
                    tracing::warn!(error = %e, "failed to handle peer message");
                }
            }
            // One bad frame is dropped; the stream stays in sync.
            Err(ChannelError::Decode(e)) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
            }
            Err(ChannelError::FrameTooLarge(size)) => {
                tracing::warn!(size, "dropping oversized frame");
            }
            Err(e) => {
                tracing::info!(addr = %handle.addr, error = %e, "peer link closed");
                return;
            }
        }
    }
}

async fn dispatch(
    deps: &SessionDeps,
    writer: &MessageWriter,
    pong_tx: &mpsc::Sender<()>,
    message: Message,
) -> Result<()> {
    match message {
        Message::Notification { text, busy } => {
            if busy {
                tracing::warn!(text, "remote side is busy");
            } else {
                tracing::info!(text, "notification from peer");
            }
        }
        Message::Ping => writer
            .send(&Message::Pong)
            .await
            .context("failed to answer ping")?,
        Message::Pong => {
            let _ = pong_tx.try_send(());
        }
        Message::Sync { path, content } => deps.reassembler.handle_sync(path, content)?,
        Message::Delete { path } => deps.reassembler.handle_delete(path)?,
        Message::FileChunk {
            path,
            content,
            chunk_num,
            total_size,
            checksum,
        } => {
            deps.reassembler
                .handle_chunk(writer, path, content, chunk_num, total_size, checksum)
                .await?
        }
        Message::RetryChunk {
            path,
            chunk_num,
            retry,
        } => {
            let Some(source) = resolve_source(deps, &path) else {
                tracing::warn!(path, chunk_num, "retry request for an unknown file");
                return Ok(());
            };
            let writer = writer.clone();
            let limiter = deps.limiter.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    send::resend_chunk(writer, limiter, &source, &path, chunk_num, retry).await
                {
                    tracing::warn!(error = %e, "chunk retransmit failed");
                }
            });
        }
        Message::AuthRequest { .. } | Message::AuthResponse { .. } => {
            tracing::warn!("unexpected handshake message mid-session, ignoring");
        }
    }
    Ok(())
}

/// Where the bytes for a wire path live on this side: inside the
/// shared folder, or among the explicitly tracked files. A path that
/// tries to climb out of the folder resolves to nothing; the peer only
/// ever gets what the folder or the tracked list already offers.
fn resolve_source(deps: &SessionDeps, rel_path: &str) -> Option<PathBuf> {
    let mut local = deps.folder.clone();
    for component in Path::new(rel_path).components() {
        match component {
            std::path::Component::Normal(part) => local.push(part),
            std::path::Component::CurDir
            | std::path::Component::RootDir
            | std::path::Component::Prefix(_) => {}
            std::path::Component::ParentDir => {
                tracing::warn!(path = rel_path, "rejecting path with a parent component");
                return None;
            }
        }
    }
    if local != deps.folder && local.is_file() {
        return Some(local);
    }
    deps.tracker.source_for_name(rel_path)
}

async fn command_loop(deps: SessionDeps, handle: PeerHandle) {
    let mut cancel = handle.cancelled();
    let mut intents = deps.intents.lock().await;
    loop {
        let intent = tokio::select! {
            _ = cancel.recv() => return,
            intent = intents.recv() => match intent {
                Some(intent) => intent,
                None => return,
            },
        };
        match execute(&deps, &handle, intent).await {
            Ok(output) if !output.is_empty() => println!("{output}"),
            Ok(_) => {}
            Err(e) => println!("{e:#}"),
        }
    }
}

async fn execute(deps: &SessionDeps, handle: &PeerHandle, intent: Intent) -> Result<String> {
    match intent {
        Intent::Add(path) => {
            let size = deps.tracker.add(&path)?;
            Ok(format!("Added {} ({size} bytes)", path.display()))
        }
        Intent::List => Ok(deps.tracker.render_list()),
        Intent::Upload(file_ref) => {
            let source = deps.tracker.resolve(&file_ref)?;
            let rel_path = wire_name(&deps.folder, &source)?;
            send::send_file(
                handle.writer.clone(),
                deps.limiter.clone(),
                &source,
                &rel_path,
            )
            .await?;
            Ok(format!("Uploaded {}", source.display()))
        }
        Intent::Watch(file_ref) => {
            let source = deps.tracker.resolve(&file_ref)?;
            let name = deps.watcher.watch_file(&source)?;
            deps.tracker.set_watched(&source, true);
            Ok(format!("Now watching {} as {name}", source.display()))
        }
        Intent::Unwatch(file_ref) => {
            let source = deps.tracker.resolve(&file_ref)?;
            deps.watcher.unwatch_file(&source)?;
            deps.tracker.set_watched(&source, false);
            Ok(format!("Stopped watching {}", source.display()))
        }
        Intent::Clear => Ok("\x1b[2J\x1b[1;1H".to_string()),
    }
}

/// The name a local file travels under: its path relative to the
/// shared folder when inside it, its bare file name otherwise.
fn wire_name(folder: &Path, source: &Path) -> Result<String> {
    let canonical = source
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", source.display()))?;
    let folder = folder
        .canonicalize()
        .unwrap_or_else(|_| folder.to_path_buf());
    if let Ok(rel) = canonical.strip_prefix(&folder) {
        return Ok(rel.to_string_lossy().replace('\\', "/"));
    }
    Ok(canonical
        .file_name()
        .context("source path has no file name")?
        .to_string_lossy()
        .into_owned())
}

async fn change_loop(deps: SessionDeps, handle: PeerHandle) {
    let mut cancel = handle.cancelled();
    let mut changes = deps.changes.lock().await;
    loop {
        let change = tokio::select! {
            _ = cancel.recv() => return,
            change = changes.recv() => match change {
                Some(change) => change,
                None => return,
            },
        };
        match change {
            FsChange::Modified { source, rel_path } => {
                if let Err(e) = send::send_file(
                    handle.writer.clone(),
                    deps.limiter.clone(),
                    &source,
                    &rel_path,
                )
                .await
                {
                    tracing::warn!(error = %e, path = rel_path, "auto-upload failed");
                }
            }
            FsChange::Removed { rel_path } => {
                if let Err(e) = handle
                    .writer
                    .send(&Message::Delete {
                        path: rel_path.clone(),
                    })
                    .await
                {
                    tracing::warn!(error = %e, path = rel_path, "delete notification failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel;
    use crate::suppress::SuppressionSet;
    use ferry_core::limits::CHUNK_SIZE;
    use ferry_core::wire::decode_content;
    use tokio::net::{TcpListener, TcpStream};

    async fn channel_pair() -> (MessageWriter, MessageReader) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let (_, writer) = channel::split(client);
        let (reader, _) = channel::split(server);
        (writer, reader)
    }

    fn deps_for_test(tag: &str) -> SessionDeps {
        let folder = std::env::temp_dir().join(format!("ferry-sess-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&folder);
        std::fs::create_dir_all(&folder).unwrap();
        let suppress = SuppressionSet::new();
        let (watcher, changes) = FolderWatcher::spawn(&folder, suppress.clone()).unwrap();
        let (_intent_tx, intent_rx) = mpsc::channel(8);
        SessionDeps {
            active: ActiveConnection::new(),
            reassembler: Reassembler::new(folder.clone(), suppress),
            limiter: RateLimiter::new(),
            tracker: FileTracker::new(),
            watcher: Arc::new(watcher),
            changes: shared_receiver(changes),
            intents: shared_receiver(intent_rx),
            folder,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_is_answered_with_pong() {
        let deps = deps_for_test("ping");
        let (writer, mut remote) = channel_pair().await;
        let (pong_tx, _pong_rx) = mpsc::channel(1);

        dispatch(&deps, &writer, &pong_tx, Message::Ping)
            .await
            .unwrap();
        assert_eq!(remote.receive().await.unwrap(), Message::Pong);
        let _ = std::fs::remove_dir_all(&deps.folder);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_request_resends_the_chunk_from_the_folder() {
        let deps = deps_for_test("retry");
        let (writer, mut remote) = channel_pair().await;
        let (pong_tx, _pong_rx) = mpsc::channel(1);

        let contents: Vec<u8> = (0..CHUNK_SIZE + 500).map(|i| (i % 7) as u8).collect();
        std::fs::write(deps.folder.join("data.bin"), &contents).unwrap();

        dispatch(
            &deps,
            &writer,
            &pong_tx,
            Message::RetryChunk {
                path: "data.bin".into(),
                chunk_num: 1,
                retry: 1,
            },
        )
        .await
        .unwrap();

        match remote.receive().await.unwrap() {
            Message::FileChunk {
                chunk_num, content, ..
            } => {
                assert_eq!(chunk_num, 1);
                assert_eq!(decode_content(&content).unwrap(), &contents[CHUNK_SIZE..]);
            }
            other => panic!("expected chunk, got {other:?}"),
        }
        let _ = std::fs::remove_dir_all(&deps.folder);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_request_cannot_reach_outside_the_folder() {
        let deps = deps_for_test("escape");
        let (writer, mut remote) = channel_pair().await;
        let (pong_tx, _pong_rx) = mpsc::channel(1);

        // A file next to the shared folder, not inside it.
        let secret = deps.folder.parent().unwrap().join("ferry-sess-secret.bin");
        std::fs::write(&secret, b"not yours").unwrap();

        dispatch(
            &deps,
            &writer,
            &pong_tx,
            Message::RetryChunk {
                path: "../ferry-sess-secret.bin".into(),
                chunk_num: 0,
                retry: 1,
            },
        )
        .await
        .unwrap();

        // No chunk may come back for a path that climbs out.
        let reply = tokio::time::timeout(
            std::time::Duration::from_millis(300),
            remote.receive(),
        )
        .await;
        assert!(reply.is_err(), "outside file was sent: {reply:?}");

        let _ = std::fs::remove_file(&secret);
        let _ = std::fs::remove_dir_all(&deps.folder);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wire_names_stay_relative_inside_the_folder() {
        let deps = deps_for_test("names");
        std::fs::create_dir_all(deps.folder.join("sub")).unwrap();
        std::fs::write(deps.folder.join("sub/inner.txt"), b"x").unwrap();
        assert_eq!(
            wire_name(&deps.folder, &deps.folder.join("sub/inner.txt")).unwrap(),
            "sub/inner.txt"
        );

        let outside = std::env::temp_dir().join(format!("ferry-out-{}.txt", std::process::id()));
        std::fs::write(&outside, b"y").unwrap();
        assert_eq!(
            wire_name(&deps.folder, &outside).unwrap(),
            outside.file_name().unwrap().to_string_lossy()
        );
        let _ = std::fs::remove_file(&outside);
        let _ = std::fs::remove_dir_all(&deps.folder);
    }
}
