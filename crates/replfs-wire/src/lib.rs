//! Wire codec for the ReplFS replication protocol.
//!
//! Thirteen tagged, fixed-layout records (`spec.md` §4.1). This crate only
//! knows how to turn a [`Record`] into bytes and back; protocol state
//! machines live in `replfs-server` and `replfs-client`.

mod bitmap;
mod error;
mod record;
mod types;

pub use bitmap::{Bitset128, BITS as BITMAP_BITS};
pub use error::WireError;
pub use record::{
    decode_filename, encode_filename, AbortAckBody, AbortBody, CommitAckBody, CommitBody,
    CommitRequestBody, OpenFileAckBody, OpenFileBody, ReadyToCommitBody, Record,
    RollCallAckBody, WriteBlockBody, WriteResendRequestBody, MAX_FILENAME_SIZE, MAX_WRITE_SIZE,
};
pub use types::{FileId, ServerId};
