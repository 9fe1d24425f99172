//! Errors surfaced while decoding a datagram into a [`crate::Record`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown record tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("datagram too short for tag 0x{tag:02x}: got {got} bytes, need {want}")]
    Truncated { tag: u8, got: usize, want: usize },

    #[error("datagram too long for tag 0x{tag:02x}: got {got} bytes, want {want}")]
    Oversized { tag: u8, got: usize, want: usize },

    #[error("malformed body for tag 0x{tag:02x}: {source}")]
    Malformed {
        tag: u8,
        #[source]
        source: binrw::Error,
    },
}
