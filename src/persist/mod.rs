pub mod file;

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read datastore file {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write datastore file {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("datastore file {path:?} is empty")]
    Empty { path: PathBuf },
    #[error("datastore file {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type PersistResult<T> = Result<T, PersistError>;
