//! The single active peer connection.
//!
//! At most one connection exists process-wide. Only the connection
//! manager (listener/dialer) may install or replace the handle; every
//! other component just queries it or borrows the writer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, RwLock};

use crate::channel::MessageWriter;

/// Live connection state shared with the per-connection tasks.
#[derive(Clone)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub established_at: Instant,
    pub writer: MessageWriter,
    cancel: broadcast::Sender<()>,
}

impl PeerHandle {
    pub fn new(addr: SocketAddr, writer: MessageWriter) -> Self {
        let (cancel, _) = broadcast::channel(1);
        Self {
            addr,
            established_at: Instant::now(),
            writer,
            cancel,
        }
    }

    /// Subscribe to the shared cancellation signal for this connection.
    pub fn cancelled(&self) -> broadcast::Receiver<()> {
        self.cancel.subscribe()
    }

    /// Fire the cancellation signal, stopping the task set.
    pub fn cancel(&self) {
        let _ = self.cancel.send(());
    }
}

/// Guarded owner of the one live connection.
pub struct ActiveConnection {
    slot: Arc<RwLock<Option<PeerHandle>>>,
}

impl Default for ActiveConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveConnection {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
        }
    }

    /// Whether a peer connection currently exists. Gates reconnect
    /// loops and command-driven uploads.
    pub async fn is_connected(&self) -> bool {
        self.slot.read().await.is_some()
    }

    pub async fn current(&self) -> Option<PeerHandle> {
        self.slot.read().await.clone()
    }

    pub async fn writer(&self) -> Option<MessageWriter> {
        self.slot.read().await.as_ref().map(|h| h.writer.clone())
    }

    /// Install a new handle, cancelling any prior connection under the
    /// same lock so two connections never coexist.
    pub async fn install(&self, handle: PeerHandle) {
        let mut slot = self.slot.write().await;
        if let Some(prior) = slot.take() {
            tracing::warn!(addr = %prior.addr, "closing superseded connection");
            prior.cancel();
        }
        tracing::info!(addr = %handle.addr, "peer connection installed");
        *slot = Some(handle);
    }

    /// Clear the slot when a connection's task set exits. A newer
    /// connection installed in the meantime is left in place.
    pub async fn clear(&self, addr: SocketAddr) {
        let mut slot = self.slot.write().await;
        if slot.as_ref().is_some_and(|h| h.addr == addr) {
            *slot = None;
            tracing::info!(%addr, "peer connection cleared");
        }
    }

    /// Force-close the live connection (heartbeat timeout path).
    pub async fn force_close(&self) {
        let mut slot = self.slot.write().await;
        if let Some(handle) = slot.take() {
            tracing::warn!(addr = %handle.addr, "force-closing peer connection");
            handle.cancel();
        }
    }
}

impl Clone for ActiveConnection {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}
