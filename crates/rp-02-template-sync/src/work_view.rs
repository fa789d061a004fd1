//! Reader handle for the current work.

use crate::domain::{ActiveWork, ShareSubmission, ShareVerdict};
use crate::metrics::Metrics;
use shared_types::{BlockTemplate, TemplateId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cloneable, non-blocking view of the applier's output.
#[derive(Clone)]
pub struct WorkView {
    rx: watch::Receiver<Option<Arc<ActiveWork>>>,
    grace: Duration,
    metrics: Arc<Metrics>,
}

impl WorkView {
    pub(crate) fn new(
        rx: watch::Receiver<Option<Arc<ActiveWork>>>,
        grace: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { rx, grace, metrics }
    }

    /// Current snapshot, `None` before the first template.
    pub fn snapshot(&self) -> Option<Arc<ActiveWork>> {
        self.rx.borrow().clone()
    }

    /// Current work identity and template.
    pub fn current(&self) -> Option<(TemplateId, Arc<BlockTemplate>)> {
        self.snapshot().map(|w| (w.id, Arc::clone(&w.template)))
    }

    /// Wait for the next install and return it. Used to notify miners.
    /// Returns `None` once the applier is gone.
    pub async fn changed(&mut self) -> Option<Arc<ActiveWork>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(work) = self.rx.borrow_and_update().clone() {
                return Some(work);
            }
        }
    }

    /// Judge a share against the work it was mined on.
    pub fn check_share(&self, share: &ShareSubmission) -> ShareVerdict {
        let verdict = match self.snapshot() {
            Some(work) if work.lookup(share.template, Instant::now(), self.grace).is_some() => {
                if share.meets_share_target {
                    ShareVerdict::Accepted
                } else {
                    ShareVerdict::Invalid
                }
            }
            _ => ShareVerdict::Stale,
        };

        let counter = match verdict {
            ShareVerdict::Accepted => &self.metrics.shares_accepted,
            ShareVerdict::Stale => &self.metrics.shares_stale,
            ShareVerdict::Invalid => &self.metrics.shares_invalid,
        };
        Metrics::incr(counter);
        verdict
    }

    /// Template a share or candidate was mined on, if still valid.
    pub fn template_for(&self, id: TemplateId) -> Option<Arc<BlockTemplate>> {
        self.snapshot()
            .and_then(|w| w.lookup(id, Instant::now(), self.grace).cloned())
    }
}
