//! Remote submission path: forwards a block candidate to the primary over
//! the template channel.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::wire::RelayFrame;
use shared_types::{BlockCandidate, BlockSubmitter, SubmitAccepted, SubmitRejected};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

type SubmitReply = oneshot::Sender<Result<SubmitAccepted, SubmitRejected>>;

/// State shared between the channel client and its submitters.
#[derive(Default)]
pub(crate) struct ClientLink {
    outbound: Mutex<Option<mpsc::Sender<RelayFrame>>>,
    pending: Mutex<HashMap<Uuid, SubmitReply>>,
}

impl ClientLink {
    pub(crate) fn open(&self, outbound: mpsc::Sender<RelayFrame>) {
        *self.outbound.lock() = Some(outbound);
    }

    /// Drop the session and fail every in-flight submission.
    pub(crate) fn close(&self) {
        self.outbound.lock().take();
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, reply) in pending {
            let _ = reply.send(Err(SubmitRejected::Unreachable {
                reason: "template channel closed".to_string(),
            }));
        }
    }

    pub(crate) fn resolve(&self, request_id: Uuid, result: Result<SubmitAccepted, SubmitRejected>) {
        if let Some(reply) = self.pending.lock().remove(&request_id) {
            let _ = reply.send(result);
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<RelayFrame>> {
        self.outbound.lock().clone()
    }
}

/// Removes a pending request when the submitting future is dropped.
struct PendingGuard<'a> {
    link: &'a ClientLink,
    request_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.link.pending.lock().remove(&self.request_id);
    }
}

/// [`BlockSubmitter`] over the template channel.
#[derive(Clone)]
pub struct RemoteSubmitter {
    link: Arc<ClientLink>,
}

impl RemoteSubmitter {
    pub(crate) fn new(link: Arc<ClientLink>) -> Self {
        Self { link }
    }

    /// Whether a session to the primary is currently up.
    pub fn is_connected(&self) -> bool {
        self.link.outbound.lock().is_some()
    }
}

#[async_trait]
impl BlockSubmitter for RemoteSubmitter {
    async fn submit(&self, candidate: &BlockCandidate) -> Result<SubmitAccepted, SubmitRejected> {
        let outbound = self.link.sender().ok_or_else(|| SubmitRejected::Unreachable {
            reason: "template channel not connected".to_string(),
        })?;

        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.link.pending.lock().insert(request_id, tx);
        let _guard = PendingGuard {
            link: &self.link,
            request_id,
        };

        let frame = RelayFrame::SubmitBlock {
            request_id,
            candidate: candidate.clone(),
        };
        outbound
            .send(frame)
            .await
            .map_err(|_| SubmitRejected::Unreachable {
                reason: "template channel closed".to_string(),
            })?;

        rx.await.unwrap_or_else(|_| {
            Err(SubmitRejected::Unreachable {
                reason: "template channel closed".to_string(),
            })
        })
    }
}
