//! # Template Applier
//!
//! Single writer of a relay's current work. Templates from the primary go
//! through [`TemplateApplier::apply_template`]; failover transitions go
//! through [`TemplateApplier::switch_authority`].

use crate::config::ApplierConfig;
use crate::domain::ActiveWork;
use crate::error::{Result, TemplateSyncError};
use crate::metrics::Metrics;
use crate::work_view::WorkView;
use parking_lot::Mutex;
use pool_telemetry::log_template_event;
use shared_types::{BlockTemplate, TemplateId};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::warn;

const COMPONENT: &str = "template_applier";

/// Installs templates atomically and enforces monotonicity.
pub struct TemplateApplier {
    tx: watch::Sender<Option<Arc<ActiveWork>>>,
    // Serializes installs; readers never touch it.
    epoch: Mutex<u32>,
    config: ApplierConfig,
    metrics: Arc<Metrics>,
}

impl TemplateApplier {
    pub fn new(config: ApplierConfig) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            epoch: Mutex::new(0),
            config,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Reader handle for share processing and miner notification.
    pub fn work_view(&self) -> WorkView {
        WorkView::new(
            self.tx.subscribe(),
            self.config.grace_window,
            Arc::clone(&self.metrics),
        )
    }

    /// Identity of the current work.
    pub fn current_id(&self) -> Option<TemplateId> {
        self.tx.borrow().as_ref().map(|w| w.id)
    }

    /// Current authority epoch.
    pub fn epoch(&self) -> u32 {
        *self.epoch.lock()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Install `template` if it advances the current authority's sequence.
    ///
    /// # Errors
    ///
    /// - `MalformedTemplate` when structural checks fail
    /// - `StaleTemplate` when the sequence does not advance; current work is
    ///   left untouched
    pub fn apply_template(&self, template: BlockTemplate) -> Result<TemplateId> {
        let epoch = self.epoch.lock();

        if !template.is_well_formed() {
            Metrics::incr(&self.metrics.templates_discarded);
            warn!(
                component = COMPONENT,
                sequence = template.sequence,
                "Malformed template discarded"
            );
            return Err(TemplateSyncError::MalformedTemplate {
                sequence: template.sequence,
            });
        }

        if let Some(current) = self.current_id() {
            if current.epoch == *epoch && template.sequence <= current.sequence {
                Metrics::incr(&self.metrics.templates_discarded);
                log_template_event!(
                    warn,
                    COMPONENT,
                    "Stale template discarded",
                    current,
                    received = template.sequence
                );
                return Err(TemplateSyncError::StaleTemplate {
                    received: template.sequence,
                    current,
                });
            }
        }

        let id = TemplateId::new(*epoch, template.sequence);
        self.install(id, template);
        Ok(id)
    }

    /// Start a new authority epoch and install `template` unconditionally.
    ///
    /// Work from the previous authority stays in the grace window.
    pub fn switch_authority(&self, template: BlockTemplate) -> Result<TemplateId> {
        let mut epoch = self.epoch.lock();

        if !template.is_well_formed() {
            Metrics::incr(&self.metrics.templates_discarded);
            return Err(TemplateSyncError::MalformedTemplate {
                sequence: template.sequence,
            });
        }

        *epoch = epoch.wrapping_add(1);
        let id = TemplateId::new(*epoch, template.sequence);
        Metrics::incr(&self.metrics.authority_switches);
        log_template_event!(
            info,
            COMPONENT,
            "Authority switched",
            id,
            source = ?template.source
        );
        self.install(id, template);
        Ok(id)
    }

    // Caller holds the epoch lock.
    fn install(&self, id: TemplateId, template: BlockTemplate) {
        let now = Instant::now();
        let next = match self.tx.borrow().as_deref() {
            Some(current) => current.supersede(
                id,
                template,
                now,
                self.config.grace_window,
                self.config.max_retained,
            ),
            None => ActiveWork::first(id, template, now),
        };
        self.tx.send_replace(Some(Arc::new(next)));
        Metrics::incr(&self.metrics.templates_applied);
        log_template_event!(debug, COMPONENT, "Template applied", id);
    }
}
