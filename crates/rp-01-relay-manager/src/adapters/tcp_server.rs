//! # Template Server
//!
//! TCP listener for relay connections.
//!
//! ## Per-Connection Flow
//!
//! 1. Handshake under `handshake_timeout`: `Hello` → `Challenge` →
//!    `AuthResponse` → `Welcome` or `AuthRejected` + close.
//! 2. Register with the manager; a writer task drains the bounded outbound
//!    queue into the socket.
//! 3. The reader loop forwards heartbeats and acks to the manager and
//!    submits forwarded blocks through the primary's own node.
//! 4. On EOF, eviction or shutdown the connection deregisters.

use crate::config::ManagerConfig;
use crate::error::{ManagerError, Result};
use crate::metrics::Metrics;
use crate::service::RelayManagerHandle;
use pool_telemetry::log_relay_event;
use shared_types::wire::{read_frame, write_frame, PrimaryFrame, RelayFrame, PROTOCOL_VERSION};
use shared_types::{display_hash, BlockSubmitter, Region, RelayCredential, RelayId, WireError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const COMPONENT: &str = "template_server";

/// Accepts and serves relay connections.
#[derive(Clone)]
pub struct TemplateServer {
    handle: RelayManagerHandle,
    credential: RelayCredential,
    submitter: Arc<dyn BlockSubmitter>,
    config: ManagerConfig,
}

impl TemplateServer {
    pub fn new(
        handle: RelayManagerHandle,
        credential: RelayCredential,
        submitter: Arc<dyn BlockSubmitter>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            handle,
            credential,
            submitter,
            config,
        }
    }

    /// Accept relays until `shutdown` flips to `true`.
    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        info!(addr = ?listener.local_addr().ok(), "Template server listening");
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        let conn_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, peer, conn_shutdown).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Relay accept failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Template server shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_connection(
        self,
        stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();

        let handshake = tokio::time::timeout(
            self.config.handshake_timeout,
            self.authenticate(&mut reader, &mut writer),
        )
        .await
        .unwrap_or(Err(ManagerError::HandshakeTimeout));

        let (relay_id, region) = match handshake {
            Ok(ids) => ids,
            Err(e) => {
                warn!(%peer, error = %e, "Relay handshake failed; closing connection");
                return;
            }
        };

        let welcome = PrimaryFrame::Welcome {
            heartbeat_interval_ms: self.config.heartbeat_interval.as_millis() as u64,
        };
        if let Err(e) = write_frame(&mut writer, &welcome).await {
            debug!(%peer, error = %e, "Relay dropped before welcome");
            return;
        }

        let (out_tx, mut out_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let ticket = match self
            .handle
            .register(relay_id.clone(), region, out_tx.clone())
            .await
        {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(%peer, error = %e, "Could not register relay");
                return;
            }
        };
        let connection_id = ticket.connection_id;
        let mut evicted = ticket.evicted;

        let writer_relay = relay_id.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    debug!(relay_id = %writer_relay, error = %e, "Relay write failed");
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                frame = read_frame::<_, RelayFrame>(&mut reader) => match frame {
                    Ok(frame) => self.on_frame(&relay_id, connection_id, frame, &out_tx).await,
                    Err(WireError::Malformed(e)) => {
                        log_relay_event!(warn, COMPONENT, "Malformed frame discarded", relay_id, error = %e);
                    }
                    Err(WireError::Closed) => {
                        log_relay_event!(info, COMPONENT, "Relay closed connection", relay_id);
                        break;
                    }
                    Err(e) => {
                        log_relay_event!(info, COMPONENT, "Relay connection lost", relay_id, error = %e);
                        break;
                    }
                },
                _ = &mut evicted => {
                    log_relay_event!(info, COMPONENT, "Connection evicted by manager", relay_id);
                    break;
                }
                _ = shutdown.changed() => break,
            }
        }

        writer_task.abort();
        let _ = self.handle.disconnected(relay_id, connection_id).await;
    }

    async fn on_frame(
        &self,
        relay_id: &RelayId,
        connection_id: u64,
        frame: RelayFrame,
        out_tx: &mpsc::Sender<PrimaryFrame>,
    ) {
        match frame {
            RelayFrame::Heartbeat { nonce } => {
                let _ = self.handle.heartbeat(relay_id.clone(), connection_id).await;
                if out_tx.try_send(PrimaryFrame::HeartbeatAck { nonce }).is_err() {
                    debug!(relay_id = %relay_id, "Outbound queue full; heartbeat ack dropped");
                }
            }
            RelayFrame::TemplateAck { sequence } => {
                let _ = self.handle.ack(relay_id.clone(), connection_id, sequence).await;
            }
            RelayFrame::SubmitBlock {
                request_id,
                candidate,
            } => {
                Metrics::incr(&self.handle.metrics().submissions_forwarded);
                let submitter = Arc::clone(&self.submitter);
                let out_tx = out_tx.clone();
                let relay_id = relay_id.clone();
                tokio::spawn(async move {
                    let block_hash = display_hash(&candidate.block_hash());
                    let result = submitter.submit(&candidate).await;
                    match &result {
                        Ok(_) => log_relay_event!(
                            info,
                            COMPONENT,
                            "Forwarded block accepted by primary node",
                            relay_id,
                            block_hash = %block_hash
                        ),
                        Err(e) => log_relay_event!(
                            warn,
                            COMPONENT,
                            "Forwarded block not accepted by primary node",
                            relay_id,
                            block_hash = %block_hash,
                            error = %e
                        ),
                    }
                    let _ = out_tx
                        .send(PrimaryFrame::SubmitResult { request_id, result })
                        .await;
                });
            }
            other => {
                log_relay_event!(
                    warn,
                    COMPONENT,
                    "Unexpected frame after handshake; discarded",
                    relay_id,
                    kind = other.kind()
                );
            }
        }
    }

    async fn authenticate(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(RelayId, Region)> {
        let (relay_id, region) = match read_frame::<_, RelayFrame>(reader).await? {
            RelayFrame::Hello {
                protocol_version,
                relay_id,
                region,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    let reason = format!("protocol version {protocol_version} not supported");
                    let _ = write_frame(writer, &PrimaryFrame::AuthRejected { reason }).await;
                    return Err(ManagerError::ProtocolVersion {
                        received: protocol_version,
                        expected: PROTOCOL_VERSION,
                    });
                }
                (relay_id, region)
            }
            other => return Err(ManagerError::UnexpectedFrame(other.kind().to_string())),
        };

        let challenge = RelayCredential::generate_challenge();
        write_frame(writer, &PrimaryFrame::Challenge { challenge }).await?;

        match read_frame::<_, RelayFrame>(reader).await? {
            RelayFrame::AuthResponse { mac }
                if self.credential.verify(&challenge, &relay_id, &region, &mac) =>
            {
                Ok((relay_id, region))
            }
            RelayFrame::AuthResponse { .. } => {
                Metrics::incr(&self.handle.metrics().auth_failures);
                let reason = "invalid credential".to_string();
                let _ = write_frame(writer, &PrimaryFrame::AuthRejected { reason }).await;
                Err(ManagerError::AuthenticationFailed { relay_id })
            }
            other => Err(ManagerError::UnexpectedFrame(other.kind().to_string())),
        }
    }
}
