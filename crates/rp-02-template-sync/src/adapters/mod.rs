//! Adapters: the relay's end of the template channel.

mod channel_client;
mod remote_submitter;

pub use channel_client::TemplateChannelClient;
pub use remote_submitter::RemoteSubmitter;
