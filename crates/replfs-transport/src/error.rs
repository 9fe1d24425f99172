use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open UDP socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind to port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("failed to join multicast group {group}: {source}")]
    Join { group: std::net::Ipv4Addr, source: io::Error },

    #[error("failed to set multicast TTL: {0}")]
    Ttl(#[source] io::Error),
}
