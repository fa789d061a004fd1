//! Inbound port used by the primary's template source.

use crate::error::Result;
use async_trait::async_trait;
use shared_types::BlockTemplate;

/// Accepts newly generated templates for distribution to relays.
#[async_trait]
pub trait TemplateBroadcaster: Send + Sync {
    /// Queue `template` for every broadcast-eligible relay.
    ///
    /// Returns once the template is handed to the manager; delivery to each
    /// relay proceeds independently.
    async fn broadcast_template(&self, template: BlockTemplate) -> Result<()>;
}
