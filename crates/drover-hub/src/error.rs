//! Hub errors

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("hub task stopped")]
    HubGone,
}
