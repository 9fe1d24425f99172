//! Small newtypes shared by the client and server state machines
//! (`spec.md` §3). Kept here, alongside the wire records, since both
//! peers need them and neither owns the other.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ServerId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<u32> for FileId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}
