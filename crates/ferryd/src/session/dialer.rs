//! Peer-mode dial loop.
//!
//! Keeps trying the host on a fixed backoff, authenticates, runs the
//! session, and redials when it ends. A rejected password is fatal:
//! retrying a wrong password would only walk this side into the jail.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use ferry_core::config::FerryConfig;
use ferry_core::limits::{AUTH_IO_BACKOFF, AUTH_TIMEOUT, DIAL_BACKOFF, REDIAL_DELAY};
use ferry_core::wire::{AuthStatus, Message};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::channel;
use crate::connection::PeerHandle;

use super::{Session, SessionDeps};

pub struct SessionDialer {
    target: String,
    password: String,
    deps: SessionDeps,
    shutdown: broadcast::Receiver<()>,
}

impl SessionDialer {
    pub fn new(config: &FerryConfig, deps: SessionDeps, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            target: format!("{}:{}", config.address, config.port),
            password: config.password.clone(),
            deps,
            shutdown,
        }
    }

    pub async fn run(self) -> Result<()> {
        let mut shutdown = self.shutdown.resubscribe();
        loop {
            let connected = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("dialer shutting down");
                    return Ok(());
                }
                connected = TcpStream::connect(&self.target) => connected,
            };

            let stream = match connected {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::info!(target = %self.target, error = %e, "host not reachable, retrying");
                    if !pause(&mut shutdown, DIAL_BACKOFF).await {
                        return Ok(());
                    }
                    continue;
                }
            };
            let addr = stream.peer_addr().context("connected stream has no peer address")?;
            let (mut reader, writer) = channel::split(stream);

            if let Err(e) = writer
                .send(&Message::AuthRequest {
                    password: self.password.clone(),
                })
                .await
            {
                tracing::warn!(error = %e, "failed to send auth request");
                if !pause(&mut shutdown, AUTH_IO_BACKOFF).await {
                    return Ok(());
                }
                continue;
            }

            match tokio::time::timeout(AUTH_TIMEOUT, reader.receive()).await {
                Ok(Ok(Message::AuthResponse {
                    status: AuthStatus::Ok,
                })) => {}
                Ok(Ok(Message::AuthResponse {
                    status: AuthStatus::Failed,
                })) => {
                    bail!("host rejected the password; check the configuration")
                }
                Ok(Ok(Message::Notification { text, busy: true })) => {
                    tracing::warn!(text, "host is busy with another peer");
                    if !pause(&mut shutdown, DIAL_BACKOFF).await {
                        return Ok(());
                    }
                    continue;
                }
                Ok(Ok(other)) => {
                    tracing::warn!(message = ?other, "unexpected reply to auth request");
                    if !pause(&mut shutdown, AUTH_IO_BACKOFF).await {
                        return Ok(());
                    }
                    continue;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "link failed while awaiting auth response");
                    if !pause(&mut shutdown, AUTH_IO_BACKOFF).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(_) => {
                    tracing::warn!("auth response timed out");
                    if !pause(&mut shutdown, AUTH_IO_BACKOFF).await {
                        return Ok(());
                    }
                    continue;
                }
            }

            tracing::info!(%addr, "authenticated with host");
            let handle = PeerHandle::new(addr, writer);
            self.deps.active.install(handle.clone()).await;
            Session::new(self.deps.clone(), handle, reader, true).run().await;

            if !pause(&mut shutdown, REDIAL_DELAY).await {
                return Ok(());
            }
        }
    }
}

/// Sleep unless shutdown fires first. Returns false on shutdown.
async fn pause(shutdown: &mut broadcast::Receiver<()>, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.recv() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
