//! # Template Generator
//!
//! Turns node work descriptors into sequenced templates. The primary runs
//! one against its archival node; a relay runs one against its own node
//! while independent.

use crate::error::Result;
use shared_types::{BlockTemplate, LocalNode, NodeTemplate, TemplateSource, TimeSource};
use std::sync::Arc;

/// Sequenced template producer over a [`LocalNode`].
pub struct TemplateGenerator {
    node: Arc<dyn LocalNode>,
    time: Arc<dyn TimeSource>,
    source: TemplateSource,
    next_sequence: u64,
    last: Option<NodeTemplate>,
}

impl TemplateGenerator {
    pub fn new(node: Arc<dyn LocalNode>, time: Arc<dyn TimeSource>, source: TemplateSource) -> Self {
        Self {
            node,
            time,
            source,
            next_sequence: 1,
            last: None,
        }
    }

    /// Sequence the next generated template will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Continue numbering after `last_applied` and forget the last work seen,
    /// so the next poll always yields a template.
    pub fn continue_from(&mut self, last_applied: u64) {
        self.next_sequence = last_applied.saturating_add(1).max(self.next_sequence);
        self.last = None;
    }

    /// Fetch node work and return a new template only if the work changed.
    ///
    /// A `curtime` bump alone is not new work.
    pub async fn poll(&mut self) -> Result<Option<BlockTemplate>> {
        let work = self.node.get_block_template().await?;
        if self.last.as_ref().is_some_and(|last| last.same_work(&work)) {
            return Ok(None);
        }
        Ok(Some(self.sequence(work)))
    }

    /// Fetch node work and always return a template for it.
    pub async fn generate(&mut self) -> Result<BlockTemplate> {
        let work = self.node.get_block_template().await?;
        Ok(self.sequence(work))
    }

    fn sequence(&mut self, work: NodeTemplate) -> BlockTemplate {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.last = Some(work.clone());
        BlockTemplate::from_node(work, sequence, self.source, self.time.now_ms())
    }
}
