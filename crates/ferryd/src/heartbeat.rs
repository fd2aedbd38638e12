//! Liveness monitor — ping on an interval, expect pongs, force-close
//! a silently dead connection.
//!
//! Runs on the dialing side only. The stream itself reports no error
//! when the remote host vanishes mid-connection; this watchdog is what
//! turns that silence into a disconnect.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use ferry_core::limits::{HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT};
use ferry_core::wire::Message;
use tokio::sync::{broadcast, mpsc};

use crate::channel::MessageWriter;

pub struct Heartbeat {
    writer: MessageWriter,
    pong_rx: mpsc::Receiver<()>,
    cancel: broadcast::Receiver<()>,
    interval: Duration,
    timeout: Duration,
}

impl Heartbeat {
    pub fn new(
        writer: MessageWriter,
        pong_rx: mpsc::Receiver<()>,
        cancel: broadcast::Receiver<()>,
    ) -> Self {
        Self::with_timing(writer, pong_rx, cancel, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT)
    }

    /// Shrunk timings for tests.
    pub fn with_timing(
        writer: MessageWriter,
        pong_rx: mpsc::Receiver<()>,
        cancel: broadcast::Receiver<()>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            writer,
            pong_rx,
            cancel,
            interval,
            timeout,
        }
    }

    /// Run until cancelled. Returns Err when the pong window elapses,
    /// at which point the caller force-closes the connection.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        // Treat the connection as alive at start.
        let mut alive_at = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.recv() => {
                    tracing::debug!("heartbeat stopping, connection closed");
                    return Ok(());
                }

                _ = ticker.tick() => {
                    if alive_at.elapsed() > self.timeout {
                        bail!(
                            "no pong for {}s, connection presumed dead",
                            self.timeout.as_secs()
                        );
                    }
                    if let Err(e) = self.writer.send(&Message::Ping).await {
                        // The reader task will observe the same failure;
                        // let it drive the teardown.
                        tracing::debug!(error = %e, "ping write failed");
                    }
                }

                pong = self.pong_rx.recv() => {
                    match pong {
                        Some(()) => {
                            tracing::trace!("pong observed");
                            alive_at = Instant::now();
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}
