//! Immutable snapshot of a relay's work.
//!
//! Every install produces a new `ActiveWork`; nothing is mutated in place.

use shared_types::{BlockTemplate, TemplateId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A superseded template still inside its grace window.
#[derive(Debug, Clone)]
pub struct RetainedTemplate {
    pub id: TemplateId,
    pub template: Arc<BlockTemplate>,
    pub superseded_at: Instant,
}

/// Current work plus recently superseded work.
#[derive(Debug, Clone)]
pub struct ActiveWork {
    pub id: TemplateId,
    pub template: Arc<BlockTemplate>,
    pub installed_at: Instant,
    retained: Vec<RetainedTemplate>,
}

impl ActiveWork {
    pub fn first(id: TemplateId, template: BlockTemplate, now: Instant) -> Self {
        Self {
            id,
            template: Arc::new(template),
            installed_at: now,
            retained: Vec::new(),
        }
    }

    /// Successor snapshot with `template` current and this snapshot's
    /// current work retained. Entries past `grace` are pruned and at most
    /// `max_retained` (newest first) are kept.
    pub fn supersede(
        &self,
        id: TemplateId,
        template: BlockTemplate,
        now: Instant,
        grace: Duration,
        max_retained: usize,
    ) -> Self {
        let mut retained = Vec::with_capacity(self.retained.len() + 1);
        retained.push(RetainedTemplate {
            id: self.id,
            template: Arc::clone(&self.template),
            superseded_at: now,
        });
        retained.extend(
            self.retained
                .iter()
                .filter(|r| now.saturating_duration_since(r.superseded_at) < grace)
                .cloned(),
        );
        retained.truncate(max_retained);

        Self {
            id,
            template: Arc::new(template),
            installed_at: now,
            retained,
        }
    }

    /// Template for `id` if it is current or retained within `grace`.
    pub fn lookup(&self, id: TemplateId, now: Instant, grace: Duration) -> Option<&Arc<BlockTemplate>> {
        if id == self.id {
            return Some(&self.template);
        }
        self.retained
            .iter()
            .find(|r| r.id == id && now.saturating_duration_since(r.superseded_at) < grace)
            .map(|r| &r.template)
    }

    /// Superseded templates, newest first.
    pub fn retained(&self) -> &[RetainedTemplate] {
        &self.retained
    }
}
