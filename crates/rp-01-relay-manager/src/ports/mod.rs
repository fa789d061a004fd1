//! Ports for the relay connection manager.

mod inbound;

pub use inbound::TemplateBroadcaster;
