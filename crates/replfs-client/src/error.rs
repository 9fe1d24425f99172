use thiserror::Error;

/// The four user-visible failure kinds (`spec.md` §7). Local errors
/// (send failures, allocation) are logged at their call site and folded
/// into whichever of these kinds is in progress - the client never
/// exposes a raw I/O error to callers.
#[derive(Debug, Error)]
pub enum ReplFsError {
    #[error("failed to set up the multicast transport: {0}")]
    Transport(#[from] replfs_transport::TransportError),

    #[error("roll call did not converge on the expected quorum")]
    Initialization,

    #[error("one or more replicas did not acknowledge OpenFile")]
    Open,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("commit did not complete: {0}")]
    Commit(&'static str),
}
