//! Host-mode accept loop.
//!
//! One peer at a time: while a connection is active every newcomer is
//! turned away with a busy notification before any handshake. Jailed
//! sources are dropped without a reply.

use std::net::{IpAddr, SocketAddr};

use anyhow::{bail, Context, Result};
use ferry_core::config::FerryConfig;
use ferry_core::limits::AUTH_TIMEOUT;
use ferry_core::wire::{AuthStatus, Message};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::channel::{self, MessageReader, MessageWriter};
use crate::connection::PeerHandle;
use crate::guard::AccessGuard;

use super::{Session, SessionDeps};

pub struct SessionListener {
    bind_addr: String,
    port: u16,
    password: String,
    allowed_peer: Option<IpAddr>,
    deps: SessionDeps,
    guard: AccessGuard,
    shutdown: broadcast::Receiver<()>,
}

impl SessionListener {
    pub fn new(
        config: &FerryConfig,
        deps: SessionDeps,
        guard: AccessGuard,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            bind_addr: config.address.clone(),
            port: config.port,
            password: config.password.clone(),
            allowed_peer: config.allowed_peer,
            deps,
            guard,
            shutdown,
        }
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind((self.bind_addr.as_str(), self.port))
            .await
            .with_context(|| format!("failed to listen on {}:{}", self.bind_addr, self.port))?;
        tracing::info!(addr = %listener.local_addr()?, "hosting, waiting for a peer");

        let mut shutdown = self.shutdown.resubscribe();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("listener shutting down");
                    return Ok(());
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.admit(stream, addr).await,
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
    }

    async fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        if self.deps.active.is_connected().await {
            tracing::info!(%addr, "turning away a second peer");
            let (_reader, writer) = channel::split(stream);
            let _ = writer
                .send(&Message::Notification {
                    text: "Host is busy with another peer.".into(),
                    busy: true,
                })
                .await;
            return;
        }

        let source = addr.ip();
        if self.guard.is_jailed(source) {
            tracing::info!(%source, "dropping connection from jailed source");
            return;
        }
        if let Some(allowed) = self.allowed_peer {
            if source != allowed {
                tracing::warn!(%source, %allowed, "source is not the allowed peer");
                self.guard.record_failure(source);
                return;
            }
        }

        let (mut reader, writer) = channel::split(stream);
        let outcome = tokio::time::timeout(AUTH_TIMEOUT, self.authenticate(&mut reader, &writer));
        match outcome.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(%source, error = %e, "authentication failed");
                self.guard.record_failure(source);
                return;
            }
            Err(_) => {
                tracing::warn!(%source, "authentication timed out");
                self.guard.record_failure(source);
                return;
            }
        }

        self.guard.clear(source);
        let _ = writer
            .send(&Message::Notification {
                text: "Connected!".into(),
                busy: false,
            })
            .await;

        let handle = PeerHandle::new(addr, writer);
        self.deps.active.install(handle.clone()).await;
        tokio::spawn(Session::new(self.deps.clone(), handle, reader, false).run());
    }

    async fn authenticate(
        &self,
        reader: &mut MessageReader,
        writer: &MessageWriter,
    ) -> Result<()> {
        match reader.receive().await? {
            Message::AuthRequest { password } if password == self.password => {
                writer
                    .send(&Message::AuthResponse {
                        status: AuthStatus::Ok,
                    })
                    .await?;
                Ok(())
            }
            Message::AuthRequest { .. } => {
                let _ = writer
                    .send(&Message::AuthResponse {
                        status: AuthStatus::Failed,
                    })
                    .await;
                bail!("wrong password")
            }
            other => bail!("expected an auth request, got {other:?}"),
        }
    }
}
