//! # TCP Publish Bridge
//!
//! Lets regional publishers in other processes publish into the
//! collector's channel. Framing reuses the length-prefixed `bincode`
//! frames of the template channel.
//!
//! Only the publish side is bridged; durable consumers live next to the
//! channel in the collector process.
//!
//! ## Authentication
//!
//! Same challenge/response as the template channel. On accept the server
//! sends a fresh challenge; the publisher answers with its relay ID, region
//! and `RelayCredential::sign` over them. Nothing is published on a
//! connection before that proof verifies, and a failed proof closes it.

use crate::channel::{ChannelError, PublishAck, ReplicationChannel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::wire::{read_frame, write_frame};
use shared_types::{Region, RelayCredential, RelayId, WireError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// How long an accepted connection may take to authenticate.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
enum BridgeRequest {
    Authenticate {
        relay_id: RelayId,
        region: Region,
        response: Vec<u8>,
    },
    Publish {
        subject: String,
        payload: Vec<u8>,
        dedup_key: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
enum BridgeResponse {
    Challenge(Vec<u8>),
    Authenticated,
    Published(PublishAck),
    Failed(ChannelError),
}

/// Identity a publisher proves to the bridge.
#[derive(Debug, Clone)]
pub struct BridgeIdentity {
    pub relay_id: RelayId,
    pub region: Region,
    pub credential: RelayCredential,
}

// =============================================================================
// SERVER
// =============================================================================

/// Accepts bridge connections, authenticates them and forwards publishes
/// to a local channel.
pub struct ReplicationServer {
    channel: Arc<dyn ReplicationChannel>,
    credential: Arc<RelayCredential>,
}

impl ReplicationServer {
    pub fn new(channel: Arc<dyn ReplicationChannel>, credential: RelayCredential) -> Self {
        Self {
            channel,
            credential: Arc::new(credential),
        }
    }

    /// Serve until `shutdown` flips to `true`.
    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        let local = listener.local_addr().ok();
        info!(addr = ?local, "Replication bridge listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let channel = Arc::clone(&self.channel);
                        let credential = Arc::clone(&self.credential);
                        let conn_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            Self::handle_connection(channel, credential, stream, peer, conn_shutdown).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Replication bridge accept failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Replication bridge shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Challenge the peer and check its answer. `None` means the
    /// connection must be dropped.
    async fn authenticate(
        credential: &RelayCredential,
        stream: &mut TcpStream,
        peer: SocketAddr,
    ) -> Option<(RelayId, Region)> {
        let challenge = RelayCredential::generate_challenge();
        let exchange = async {
            write_frame(stream, &BridgeResponse::Challenge(challenge.to_vec())).await?;
            read_frame::<_, BridgeRequest>(stream).await
        };

        let outcome = tokio::time::timeout(AUTH_TIMEOUT, exchange).await;
        let (relay_id, region, response) = match outcome {
            Ok(Ok(BridgeRequest::Authenticate {
                relay_id,
                region,
                response,
            })) => (relay_id, region, response),
            Ok(Ok(BridgeRequest::Publish { .. })) => {
                warn!(%peer, "Bridge publish before authentication; closing");
                let refusal = BridgeResponse::Failed(ChannelError::Rejected("not authenticated".to_string()));
                let _ = write_frame(stream, &refusal).await;
                return None;
            }
            Ok(Err(e)) => {
                debug!(%peer, error = %e, "Bridge handshake failed");
                return None;
            }
            Err(_) => {
                warn!(%peer, "Bridge handshake timed out");
                return None;
            }
        };

        if !credential.verify(&challenge, &relay_id, &region, &response) {
            warn!(%peer, relay_id = %relay_id, region = %region, "Bridge publisher failed authentication");
            let refusal = BridgeResponse::Failed(ChannelError::Rejected("invalid credential".to_string()));
            let _ = write_frame(stream, &refusal).await;
            return None;
        }

        if let Err(e) = write_frame(stream, &BridgeResponse::Authenticated).await {
            debug!(%peer, error = %e, "Bridge handshake reply failed");
            return None;
        }
        Some((relay_id, region))
    }

    async fn handle_connection(
        channel: Arc<dyn ReplicationChannel>,
        credential: Arc<RelayCredential>,
        mut stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some((relay_id, region)) = Self::authenticate(&credential, &mut stream, peer).await else {
            return;
        };
        debug!(%peer, relay_id = %relay_id, region = %region, "Bridge publisher authenticated");
        loop {
            let request = tokio::select! {
                frame = read_frame::<_, BridgeRequest>(&mut stream) => frame,
                _ = shutdown.changed() => break,
            };

            let response = match request {
                Ok(BridgeRequest::Publish {
                    subject,
                    payload,
                    dedup_key,
                }) => match channel.publish(&subject, payload, &dedup_key).await {
                    Ok(ack) => BridgeResponse::Published(ack),
                    Err(e) => BridgeResponse::Failed(e),
                },
                Ok(BridgeRequest::Authenticate { .. }) => {
                    BridgeResponse::Failed(ChannelError::Rejected("already authenticated".to_string()))
                }
                Err(WireError::Closed) => break,
                Err(e) => {
                    warn!(%peer, error = %e, "Dropping bridge connection");
                    break;
                }
            };

            if let Err(e) = write_frame(&mut stream, &response).await {
                warn!(%peer, error = %e, "Bridge response failed");
                break;
            }
        }
        debug!(%peer, "Bridge publisher disconnected");
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// `ReplicationChannel` that publishes through a remote `ReplicationServer`.
///
/// Connects lazily, authenticates each new connection and drops it on any
/// transport error, so the next publish reconnects. Transport failures and
/// refused credentials surface as `ChannelError::Unavailable`, which keeps
/// the caller's events buffered.
pub struct TcpReplicationChannel {
    addr: String,
    timeout: Duration,
    identity: BridgeIdentity,
    connection: Mutex<Option<TcpStream>>,
}

impl TcpReplicationChannel {
    pub fn new(addr: impl Into<String>, timeout: Duration, identity: BridgeIdentity) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            identity,
            connection: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream, ChannelError> {
        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ChannelError::Unavailable(format!("connect to {} timed out", self.addr)))?
            .map_err(|e| ChannelError::Unavailable(format!("connect to {}: {e}", self.addr)))?;

        let identity = &self.identity;
        let handshake = async {
            let BridgeResponse::Challenge(challenge) = read_frame::<_, BridgeResponse>(&mut stream).await? else {
                return Err(WireError::Malformed("expected bridge challenge".to_string()));
            };
            let response = identity
                .credential
                .sign(&challenge, &identity.relay_id, &identity.region);
            let request = BridgeRequest::Authenticate {
                relay_id: identity.relay_id.clone(),
                region: identity.region.clone(),
                response,
            };
            write_frame(&mut stream, &request).await?;
            read_frame::<_, BridgeResponse>(&mut stream).await
        };

        let outcome = tokio::time::timeout(self.timeout, handshake).await;
        match outcome {
            Ok(Ok(BridgeResponse::Authenticated)) => {
                debug!(addr = %self.addr, "Bridge connected");
                Ok(stream)
            }
            Ok(Ok(BridgeResponse::Failed(e))) => {
                error!(addr = %self.addr, relay_id = %identity.relay_id, error = %e, "Bridge refused relay credential");
                Err(ChannelError::Unavailable(format!("bridge authentication: {e}")))
            }
            Ok(Ok(other)) => Err(ChannelError::Unavailable(format!(
                "unexpected bridge handshake reply {other:?}"
            ))),
            Ok(Err(e)) => Err(ChannelError::Unavailable(e.to_string())),
            Err(_) => Err(ChannelError::Unavailable("bridge handshake timed out".to_string())),
        }
    }

    async fn round_trip(
        &self,
        stream: &mut TcpStream,
        request: &BridgeRequest,
    ) -> Result<BridgeResponse, ChannelError> {
        let exchange = async {
            write_frame(stream, request).await?;
            read_frame::<_, BridgeResponse>(stream).await
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ChannelError::Unavailable(e.to_string())),
            Err(_) => Err(ChannelError::Unavailable("bridge request timed out".to_string())),
        }
    }
}

#[async_trait]
impl ReplicationChannel for TcpReplicationChannel {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        dedup_key: &str,
    ) -> Result<PublishAck, ChannelError> {
        let mut guard = self.connection.lock().await;

        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }

        let Some(stream) = guard.as_mut() else {
            return Err(ChannelError::Unavailable("no bridge connection".to_string()));
        };

        let request = BridgeRequest::Publish {
            subject: subject.to_string(),
            payload,
            dedup_key: dedup_key.to_string(),
        };

        match self.round_trip(stream, &request).await {
            Ok(BridgeResponse::Published(ack)) => Ok(ack),
            Ok(BridgeResponse::Failed(e)) => Err(e),
            Ok(other) => {
                *guard = None;
                Err(ChannelError::Unavailable(format!("unexpected bridge reply {other:?}")))
            }
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryReplicationChannel;
    use crate::subject::SubjectFilter;

    const SECRET: &[u8] = b"collector-bridge-secret";

    fn identity(secret: &[u8]) -> BridgeIdentity {
        BridgeIdentity {
            relay_id: RelayId::new("relay-eu-1"),
            region: Region::new("eu-west"),
            credential: RelayCredential::new(secret),
        }
    }

    fn client(addr: SocketAddr, timeout: Duration) -> TcpReplicationChannel {
        TcpReplicationChannel::new(addr.to_string(), timeout, identity(SECRET))
    }

    async fn start_server(
        channel: InMemoryReplicationChannel,
    ) -> (SocketAddr, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = ReplicationServer::new(Arc::new(channel), RelayCredential::new(SECRET));
        tokio::spawn(server.serve(listener, rx));
        (addr, tx)
    }

    #[tokio::test]
    async fn test_publish_through_bridge() {
        let channel = InMemoryReplicationChannel::default();
        let (addr, _shutdown) = start_server(channel.clone()).await;

        let client = client(addr, Duration::from_secs(2));
        let ack = client
            .publish("events.eu.block_found", b"payload".to_vec(), "k1")
            .await
            .unwrap();
        assert_eq!(ack, PublishAck::Stored { sequence: 1 });

        let dup = client
            .publish("events.eu.block_found", b"payload".to_vec(), "k1")
            .await
            .unwrap();
        assert_eq!(dup, PublishAck::Duplicate { sequence: 1 });

        let retained = channel.retained(&SubjectFilter::all());
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].payload, b"payload".to_vec());
    }

    #[tokio::test]
    async fn test_remote_unavailability_is_forwarded() {
        let channel = InMemoryReplicationChannel::default();
        let (addr, _shutdown) = start_server(channel.clone()).await;
        channel.set_available(false);

        let client = client(addr, Duration::from_secs(2));
        let result = client.publish("events.eu.x", Vec::new(), "k").await;
        assert!(matches!(result, Err(ChannelError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_unavailable() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(addr, Duration::from_millis(500));
        let result = client.publish("events.eu.x", Vec::new(), "k").await;
        assert!(matches!(result, Err(ChannelError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_wrong_credential_cannot_publish() {
        let channel = InMemoryReplicationChannel::default();
        let (addr, _shutdown) = start_server(channel.clone()).await;

        let impostor = TcpReplicationChannel::new(
            addr.to_string(),
            Duration::from_secs(2),
            identity(b"guessed-secret"),
        );
        let result = impostor.publish("events.eu.block_found", b"forged".to_vec(), "k").await;
        assert!(matches!(result, Err(ChannelError::Unavailable(_))));
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn test_unauthenticated_publish_is_refused() {
        let channel = InMemoryReplicationChannel::default();
        let (addr, _shutdown) = start_server(channel.clone()).await;

        // A raw peer that skips the handshake and publishes straight away.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let challenge: BridgeResponse = read_frame(&mut stream).await.unwrap();
        assert!(matches!(challenge, BridgeResponse::Challenge(ref c) if c.len() == 32));
        let forged = BridgeRequest::Publish {
            subject: "events.eu.block_found".to_string(),
            payload: b"forged".to_vec(),
            dedup_key: "k".to_string(),
        };
        write_frame(&mut stream, &forged).await.unwrap();

        let reply: BridgeResponse = read_frame(&mut stream).await.unwrap();
        assert!(matches!(reply, BridgeResponse::Failed(ChannelError::Rejected(_))));
        assert!(matches!(
            read_frame::<_, BridgeResponse>(&mut stream).await,
            Err(WireError::Closed)
        ));
        assert!(channel.is_empty());
    }
}
