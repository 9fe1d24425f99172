use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("mount path {0:?} already exists - machine already in use")]
    MountInUse(PathBuf),

    #[error("failed to create mount path {path:?}: {source}")]
    CreateMount { path: PathBuf, source: io::Error },
}
