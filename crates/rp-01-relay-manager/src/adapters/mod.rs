//! Adapters for the relay connection manager.

mod tcp_server;

pub use tcp_server::TemplateServer;
