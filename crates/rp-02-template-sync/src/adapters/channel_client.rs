//! # Template Channel Client
//!
//! Persistent, authenticated connection from a relay to the primary.
//!
//! The client reports what it sees as [`ChannelEvent`]s and takes no
//! decisions: applying templates and failing over belong to the failover
//! controller.
//!
//! ## Session
//!
//! 1. Connect and handshake under `connect_timeout`.
//! 2. A reader task turns the socket into a frame stream; a writer task
//!    drains the outbound queue.
//! 3. Every `heartbeat_interval` a heartbeat is sent; if the previous one
//!    is still unanswered, `HeartbeatMissed` is reported first.
//! 4. Every pushed template is acked and forwarded.
//!
//! Events raised inside a session go through a local backlog that the
//! session loop drains whenever the controller has room. A controller busy
//! on a slow node RPC therefore never stops frames from being read or
//! heartbeats from being sent. Consecutive identical heartbeat events are
//! collapsed in the backlog.
//! 5. On any transport failure the session ends, pending forwarded
//!    submissions fail, and the client reconnects with capped exponential
//!    backoff.

use super::remote_submitter::{ClientLink, RemoteSubmitter};
use crate::config::ChannelClientConfig;
use crate::error::{Result, TemplateSyncError};
use crate::events::ChannelEvent;
use pool_telemetry::log_relay_event;
use shared_types::wire::{read_frame, write_frame, PrimaryFrame, RelayFrame, PROTOCOL_VERSION};
use shared_types::{RelayCredential, WireError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

const COMPONENT: &str = "channel_client";

/// Session events held for a busy controller before the oldest is dropped.
const EVENT_BACKLOG_LIMIT: usize = 1024;

/// Why a session ended.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Session events not yet taken by the controller.
#[derive(Default)]
struct EventBacklog {
    events: VecDeque<ChannelEvent>,
}

impl EventBacklog {
    fn push(&mut self, event: ChannelEvent) {
        let liveness = matches!(event, ChannelEvent::HeartbeatAcked | ChannelEvent::HeartbeatMissed);
        if liveness && self.events.back() == Some(&event) {
            return;
        }
        if self.events.len() >= EVENT_BACKLOG_LIMIT {
            if let Some(dropped) = self.events.pop_front() {
                warn!(component = COMPONENT, event = ?dropped, "Channel event backlog full; oldest event dropped");
            }
        }
        self.events.push_back(event);
    }

    fn pop(&mut self) -> Option<ChannelEvent> {
        self.events.pop_front()
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}

/// Relay end of the template channel.
pub struct TemplateChannelClient {
    config: ChannelClientConfig,
    credential: RelayCredential,
    events: mpsc::Sender<ChannelEvent>,
    link: Arc<ClientLink>,
}

impl TemplateChannelClient {
    pub fn new(
        config: ChannelClientConfig,
        credential: RelayCredential,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Self {
        Self {
            config,
            credential,
            events,
            link: Arc::new(ClientLink::default()),
        }
    }

    /// Block submitter that forwards candidates to the primary over this
    /// channel.
    pub fn remote_submitter(&self) -> RemoteSubmitter {
        RemoteSubmitter::new(Arc::clone(&self.link))
    }

    /// Keep a session to the primary alive until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.config.reconnect_initial_backoff;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let connect = tokio::time::timeout(self.config.connect_timeout, self.connect())
                .await
                .unwrap_or(Err(TemplateSyncError::ConnectTimeout));

            match connect {
                Ok((reader, writer)) => {
                    backoff = self.config.reconnect_initial_backoff;
                    log_relay_event!(info, COMPONENT, "Connected to primary", self.config.relay_id, addr = %self.config.primary_addr);
                    self.emit(ChannelEvent::Connected).await;

                    let end = self.session(reader, writer, &mut shutdown).await;
                    self.link.close();
                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            log_relay_event!(warn, COMPONENT, "Template channel lost", self.config.relay_id, reason = %reason);
                            self.emit(ChannelEvent::Disconnected { reason }).await;
                        }
                    }
                }
                Err(TemplateSyncError::AuthRejected(reason)) => {
                    log_relay_event!(error, COMPONENT, "Primary rejected relay credential", self.config.relay_id, reason = %reason);
                    self.emit(ChannelEvent::AuthRejected { reason }).await;
                }
                Err(e) => {
                    log_relay_event!(debug, COMPONENT, "Connect to primary failed", self.config.relay_id, error = %e, retry_in = ?backoff);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            backoff = (backoff * 2).min(self.config.reconnect_max_backoff);
        }

        self.link.close();
        debug!(component = COMPONENT, "Template channel client stopped");
    }

    async fn connect(&self) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
        let stream = TcpStream::connect(&self.config.primary_addr)
            .await
            .map_err(WireError::from)?;
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();

        write_frame(
            &mut writer,
            &RelayFrame::Hello {
                protocol_version: PROTOCOL_VERSION,
                relay_id: self.config.relay_id.clone(),
                region: self.config.region.clone(),
            },
        )
        .await?;

        let challenge = match read_frame::<_, PrimaryFrame>(&mut reader).await? {
            PrimaryFrame::Challenge { challenge } => challenge,
            PrimaryFrame::AuthRejected { reason } => {
                return Err(TemplateSyncError::AuthRejected(reason))
            }
            other => {
                return Err(TemplateSyncError::Protocol(format!(
                    "expected challenge, got {}",
                    other.kind()
                )))
            }
        };

        let mac = self
            .credential
            .sign(&challenge, &self.config.relay_id, &self.config.region);
        write_frame(&mut writer, &RelayFrame::AuthResponse { mac }).await?;

        match read_frame::<_, PrimaryFrame>(&mut reader).await? {
            PrimaryFrame::Welcome { .. } => Ok((reader, writer)),
            PrimaryFrame::AuthRejected { reason } => Err(TemplateSyncError::AuthRejected(reason)),
            other => Err(TemplateSyncError::Protocol(format!(
                "expected welcome, got {}",
                other.kind()
            ))),
        }
    }

    async fn session(
        &self,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (out_tx, mut out_rx) = mpsc::channel::<RelayFrame>(self.config.outbound_queue.max(1));
        let (in_tx, mut in_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        self.link.open(out_tx.clone());

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    debug!(component = COMPONENT, error = %e, "Write to primary failed");
                    break;
                }
            }
        });

        // read_frame is not cancel safe, so it runs in its own task.
        let reader_task = tokio::spawn(async move {
            loop {
                let frame = read_frame::<_, PrimaryFrame>(&mut reader).await;
                let fatal = matches!(&frame, Err(e) if e.is_fatal());
                if in_tx.send(frame).await.is_err() || fatal {
                    break;
                }
            }
        });

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut nonce: u64 = 0;
        let mut awaiting: Option<u64> = None;
        let mut backlog = EventBacklog::default();

        let end = loop {
            tokio::select! {
                permit = self.events.reserve(), if !backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(event) = backlog.pop() {
                            permit.send(event);
                        }
                    }
                    Err(_) => {
                        debug!(component = COMPONENT, "Channel event receiver dropped");
                        backlog = EventBacklog::default();
                    }
                },
                frame = in_rx.recv() => match frame {
                    Some(Ok(frame)) => {
                        if let Some(nonce) = awaiting {
                            if matches!(frame, PrimaryFrame::HeartbeatAck { nonce: acked } if acked == nonce) {
                                awaiting = None;
                            }
                        }
                        self.on_frame(frame, &out_tx, &mut backlog);
                    }
                    Some(Err(WireError::Malformed(e))) => {
                        log_relay_event!(warn, COMPONENT, "Malformed frame from primary discarded", self.config.relay_id, error = %e);
                    }
                    Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                    None => break SessionEnd::Lost("reader stopped".to_string()),
                },
                _ = heartbeat.tick() => {
                    if awaiting.is_some() {
                        backlog.push(ChannelEvent::HeartbeatMissed);
                    }
                    nonce = nonce.wrapping_add(1);
                    awaiting = Some(nonce);
                    if out_tx.try_send(RelayFrame::Heartbeat { nonce }).is_err() {
                        debug!(component = COMPONENT, "Outbound queue full; heartbeat skipped");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break SessionEnd::Shutdown;
                    }
                }
            }
        };

        reader_task.abort();
        writer_task.abort();

        // What the session saw must reach the controller before the
        // disconnect does.
        if matches!(end, SessionEnd::Lost(_)) {
            if !backlog.is_empty() {
                debug!(component = COMPONENT, pending = backlog.len(), "Flushing channel events of the lost session");
            }
            while let Some(event) = backlog.pop() {
                self.emit(event).await;
            }
        }
        end
    }

    fn on_frame(&self, frame: PrimaryFrame, out_tx: &mpsc::Sender<RelayFrame>, backlog: &mut EventBacklog) {
        match frame {
            PrimaryFrame::Template(template) => {
                let sequence = template.sequence;
                if out_tx.try_send(RelayFrame::TemplateAck { sequence }).is_err() {
                    debug!(component = COMPONENT, sequence, "Outbound queue full; ack deferred to resend");
                }
                backlog.push(ChannelEvent::Template(template));
            }
            PrimaryFrame::HeartbeatAck { .. } => backlog.push(ChannelEvent::HeartbeatAcked),
            PrimaryFrame::SubmitResult { request_id, result } => {
                self.link.resolve(request_id, result);
            }
            other => {
                debug!(component = COMPONENT, frame = other.kind(), "Unexpected frame from primary ignored");
            }
        }
    }

    async fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).await.is_err() {
            debug!(component = COMPONENT, "Channel event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{
        BlockCandidate, BlockHeader, BlockSubmitter, BlockTemplate, Region, RelayId,
        SubmitAccepted, SubmitRejected, TemplateId, TemplateSource,
    };
    use std::time::Duration;
    use tokio::net::TcpListener;

    const SECRET: &[u8] = b"relay-secret";

    fn template(sequence: u64) -> BlockTemplate {
        BlockTemplate {
            sequence,
            source: TemplateSource::Primary,
            height: 900_000,
            prev_block_hash: [3; 32],
            coinbase_value: 312_500_000,
            tx_commitment: [4; 32],
            bits: 0x1703_a30c,
            created_at_ms: 0,
        }
    }

    fn candidate() -> BlockCandidate {
        BlockCandidate {
            header: BlockHeader::default(),
            block_data: vec![1, 2, 3],
            relay_id: RelayId::new("relay-eu-1"),
            worker: "bc1qworker.rig1".to_string(),
            template: TemplateId::new(0, 1),
            height: 900_000,
            discovered_at_ms: 0,
        }
    }

    async fn fake_primary() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    /// Accept one relay and run the primary side of the handshake.
    async fn accept_and_authenticate(
        listener: &TcpListener,
        secret: &[u8],
    ) -> Option<(OwnedReadHalf, OwnedWriteHalf)> {
        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        let (relay_id, region) = match read_frame::<_, RelayFrame>(&mut reader).await.unwrap() {
            RelayFrame::Hello { relay_id, region, .. } => (relay_id, region),
            other => panic!("expected hello, got {}", other.kind()),
        };
        let challenge = RelayCredential::generate_challenge();
        write_frame(&mut writer, &PrimaryFrame::Challenge { challenge }).await.unwrap();
        let mac = match read_frame::<_, RelayFrame>(&mut reader).await.unwrap() {
            RelayFrame::AuthResponse { mac } => mac,
            other => panic!("expected auth response, got {}", other.kind()),
        };
        if RelayCredential::new(secret).verify(&challenge, &relay_id, &region, &mac) {
            write_frame(&mut writer, &PrimaryFrame::Welcome { heartbeat_interval_ms: 2000 })
                .await
                .unwrap();
            Some((reader, writer))
        } else {
            write_frame(&mut writer, &PrimaryFrame::AuthRejected { reason: "bad mac".into() })
                .await
                .unwrap();
            None
        }
    }

    fn client(
        addr: String,
        secret: &[u8],
    ) -> (TemplateChannelClient, mpsc::Receiver<ChannelEvent>) {
        client_with_queue(addr, secret, 32)
    }

    fn client_with_queue(
        addr: String,
        secret: &[u8],
        queue: usize,
    ) -> (TemplateChannelClient, mpsc::Receiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::channel(queue);
        let mut config =
            ChannelClientConfig::new(addr, RelayId::new("relay-eu-1"), Region::new("eu-west"));
        config.heartbeat_interval = Duration::from_millis(50);
        config.reconnect_initial_backoff = Duration::from_millis(20);
        let client = TemplateChannelClient::new(config, RelayCredential::new(secret), events_tx);
        (client, events_rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_template_forwarded_and_acked() {
        let (listener, addr) = fake_primary().await;
        let (client, mut events) = client(addr, SECRET);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(client.run(shutdown_rx));

        let (mut reader, mut writer) = accept_and_authenticate(&listener, SECRET).await.unwrap();
        assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);

        write_frame(&mut writer, &PrimaryFrame::Template(template(7))).await.unwrap();

        let ack = loop {
            match read_frame::<_, RelayFrame>(&mut reader).await.unwrap() {
                RelayFrame::TemplateAck { sequence } => break sequence,
                _ => continue,
            }
        };
        assert_eq!(ack, 7);

        loop {
            if let ChannelEvent::Template(t) = next_event(&mut events).await {
                assert_eq!(t.sequence, 7);
                break;
            }
        }

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_credential_reports_auth_rejected() {
        let (listener, addr) = fake_primary().await;
        let (client, mut events) = client(addr, b"wrong");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(client.run(shutdown_rx));

        assert!(accept_and_authenticate(&listener, SECRET).await.is_none());
        assert!(matches!(
            next_event(&mut events).await,
            ChannelEvent::AuthRejected { .. }
        ));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unanswered_heartbeats_reported_missed() {
        let (listener, addr) = fake_primary().await;
        let (client, mut events) = client(addr, SECRET);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(client.run(shutdown_rx));

        let _conn = accept_and_authenticate(&listener, SECRET).await.unwrap();
        loop {
            if next_event(&mut events).await == ChannelEvent::HeartbeatMissed {
                break;
            }
        }

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_busy_controller_does_not_stall_heartbeats() {
        let (listener, addr) = fake_primary().await;
        let (client, mut events) = client_with_queue(addr, SECRET, 1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(client.run(shutdown_rx));

        let (mut reader, mut writer) = accept_and_authenticate(&listener, SECRET).await.unwrap();
        assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);

        // More templates than the controller queue holds, then a primary
        // that answers every heartbeat.
        for sequence in 1..=3 {
            write_frame(&mut writer, &PrimaryFrame::Template(template(sequence))).await.unwrap();
        }
        let heartbeats = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let primary = tokio::spawn({
            let heartbeats = Arc::clone(&heartbeats);
            async move {
                while let Ok(frame) = read_frame::<_, RelayFrame>(&mut reader).await {
                    if let RelayFrame::Heartbeat { nonce } = frame {
                        heartbeats.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        if write_frame(&mut writer, &PrimaryFrame::HeartbeatAck { nonce }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // The controller takes nothing for a dozen heartbeat intervals.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(heartbeats.load(std::sync::atomic::Ordering::SeqCst) >= 5);

        let mut templates = Vec::new();
        while templates.len() < 3 {
            match next_event(&mut events).await {
                ChannelEvent::Template(t) => templates.push(t.sequence),
                ChannelEvent::HeartbeatMissed => panic!("heartbeat reported missed while answered"),
                _ => {}
            }
        }
        assert_eq!(templates, vec![1, 2, 3]);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        primary.abort();
    }

    #[test]
    fn test_backlog_collapses_repeated_liveness_events() {
        let mut backlog = EventBacklog::default();
        backlog.push(ChannelEvent::HeartbeatAcked);
        backlog.push(ChannelEvent::HeartbeatAcked);
        backlog.push(ChannelEvent::Template(template(1)));
        backlog.push(ChannelEvent::HeartbeatAcked);
        backlog.push(ChannelEvent::HeartbeatMissed);
        backlog.push(ChannelEvent::HeartbeatMissed);

        let drained: Vec<ChannelEvent> = std::iter::from_fn(|| backlog.pop()).collect();
        assert_eq!(
            drained,
            vec![
                ChannelEvent::HeartbeatAcked,
                ChannelEvent::Template(template(1)),
                ChannelEvent::HeartbeatAcked,
                ChannelEvent::HeartbeatMissed,
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_reported_and_reconnects() {
        let (listener, addr) = fake_primary().await;
        let (client, mut events) = client(addr, SECRET);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(client.run(shutdown_rx));

        let conn = accept_and_authenticate(&listener, SECRET).await.unwrap();
        assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
        drop(conn);

        loop {
            if matches!(next_event(&mut events).await, ChannelEvent::Disconnected { .. }) {
                break;
            }
        }
        let _again = accept_and_authenticate(&listener, SECRET).await.unwrap();
        loop {
            if next_event(&mut events).await == ChannelEvent::Connected {
                break;
            }
        }

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_submission_round_trip() {
        let (listener, addr) = fake_primary().await;
        let (client, mut events) = client(addr, SECRET);
        let submitter = client.remote_submitter();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(client.run(shutdown_rx));

        let (mut reader, mut writer) = accept_and_authenticate(&listener, SECRET).await.unwrap();
        assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
        tokio::spawn(async move { while events.recv().await.is_some() {} });

        let primary = tokio::spawn(async move {
            loop {
                if let RelayFrame::SubmitBlock { request_id, candidate } =
                    read_frame::<_, RelayFrame>(&mut reader).await.unwrap()
                {
                    let result = Ok(SubmitAccepted {
                        block_hash: candidate.block_hash(),
                    });
                    write_frame(&mut writer, &PrimaryFrame::SubmitResult { request_id, result })
                        .await
                        .unwrap();
                    return (reader, writer);
                }
            }
        });

        let accepted = submitter.submit(&candidate()).await.unwrap();
        assert_eq!(accepted.block_hash, candidate().block_hash());
        let _conn = primary.await.unwrap();

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert!(matches!(
            submitter.submit(&candidate()).await,
            Err(SubmitRejected::Unreachable { .. })
        ));
    }
}
