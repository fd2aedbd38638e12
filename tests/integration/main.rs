//! Ferry integration test harness.
//!
//! Tests drive complete host and peer nodes in-process, talking over
//! real loopback TCP sockets. Every test gets its own shared folders
//! and its own port, so tests are independent and can run in parallel.

mod sessions;
mod transfer;
mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use ferry_core::config::{FerryConfig, Mode};
use ferry_core::wire::Message;
use ferryd::channel;
use ferryd::commands::{FileTracker, Intent};
use ferryd::connection::ActiveConnection;
use ferryd::guard::AccessGuard;
use ferryd::session::dialer::SessionDialer;
use ferryd::session::listener::SessionListener;
use ferryd::session::{shared_receiver, SessionDeps};
use ferryd::suppress::SuppressionSet;
use ferryd::transfer::{RateLimiter, Reassembler};
use ferryd::watcher::FolderWatcher;

// ── Harness ──────────────────────────────────────────────────────────────────

/// One in-process ferry node. Dropping the struct leaves its tasks
/// running until the shutdown signal fires.
pub struct TestNode {
    pub folder: PathBuf,
    pub deps: SessionDeps,
    pub intents: mpsc::Sender<Intent>,
    pub shutdown: broadcast::Sender<()>,
}

impl TestNode {
    pub async fn connected(&self) -> bool {
        self.deps.active.is_connected().await
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        let _ = std::fs::remove_dir_all(&self.folder);
    }
}

/// A loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    probe.local_addr().expect("probe addr").port()
}

fn fresh_folder(tag: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let folder = std::env::temp_dir().join(format!(
        "ferry-it-{tag}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = std::fs::remove_dir_all(&folder);
    std::fs::create_dir_all(&folder).expect("create test folder");
    folder
}

async fn start_node(mode: Mode, port: u16, password: &str, tag: &str) -> TestNode {
    let folder = fresh_folder(tag);
    let suppress = SuppressionSet::new();
    let (watcher, change_rx) =
        FolderWatcher::spawn(&folder, suppress.clone()).expect("watcher start");
    let (intent_tx, intent_rx) = mpsc::channel(16);

    let deps = SessionDeps {
        active: ActiveConnection::new(),
        reassembler: Reassembler::new(folder.clone(), suppress),
        limiter: RateLimiter::new(),
        tracker: FileTracker::new(),
        watcher: Arc::new(watcher),
        changes: shared_receiver(change_rx),
        intents: shared_receiver(intent_rx),
        folder: folder.clone(),
    };
    let config = FerryConfig {
        mode,
        address: "127.0.0.1".into(),
        port,
        folder: folder.clone(),
        password: password.into(),
        allowed_peer: None,
    };
    let (shutdown_tx, _) = broadcast::channel(1);

    match mode {
        Mode::Host => {
            let listener = SessionListener::new(
                &config,
                deps.clone(),
                AccessGuard::new(),
                shutdown_tx.subscribe(),
            );
            tokio::spawn(listener.run());
        }
        Mode::Peer => {
            let dialer = SessionDialer::new(&config, deps.clone(), shutdown_tx.subscribe());
            tokio::spawn(dialer.run());
        }
    }

    TestNode {
        folder,
        deps,
        intents: intent_tx,
        shutdown: shutdown_tx,
    }
}

pub async fn start_host(port: u16, password: &str, tag: &str) -> TestNode {
    start_node(Mode::Host, port, password, tag).await
}

pub async fn start_peer(port: u16, password: &str, tag: &str) -> TestNode {
    start_node(Mode::Peer, port, password, tag).await
}

/// Host and peer on a fresh port, already authenticated with each other.
pub async fn paired_nodes(tag: &str) -> (TestNode, TestNode) {
    let port = free_port();
    let host = start_host(port, "open-sesame", tag).await;
    let peer = start_peer(port, "open-sesame", tag).await;
    wait_for("nodes to pair", 10, || async {
        host.connected().await && peer.connected().await
    })
    .await;
    (host, peer)
}

/// Poll `check` until it holds or the deadline passes.
pub async fn wait_for<F, Fut>(what: &str, secs: u64, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(secs);
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn wait_for_file(path: &Path, contents: &[u8], secs: u64) {
    let shown = path.display().to_string();
    wait_for(&shown, secs, || async {
        std::fs::read(path).map(|got| got == contents).unwrap_or(false)
    })
    .await;
}

/// Connect to a host like a peer would and attempt one handshake.
/// Returns the first frame the host sends back.
pub async fn raw_handshake(port: u16, password: &str) -> Result<Message> {
    let stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
    let (mut reader, writer) = channel::split(stream);
    writer
        .send(&Message::AuthRequest {
            password: password.into(),
        })
        .await?;
    Ok(reader.receive().await?)
}
