use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde_json::Value;
use tempfile::NamedTempFile;

use super::{PersistError, PersistResult};

pub const DATASTORE_FILENAME: &str = "psicashdatastore";

pub fn datastore_path(root: &Path, suffix: &str) -> PathBuf {
    root.join(format!("{DATASTORE_FILENAME}{suffix}"))
}

/// Reads and parses the document at `path`. `Ok(None)` means the file does
/// not exist yet.
pub fn load_document(path: &Path) -> PersistResult<Option<Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if bytes.is_empty() {
        return Err(PersistError::Empty {
            path: path.to_path_buf(),
        });
    }

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Replaces the file at `path` with `contents`. The new content is written
/// and synced to a sibling temp file first, then renamed over the target, so
/// a crash leaves either the old or the new document.
pub fn store_document(path: &Path, contents: &str) -> PersistResult<()> {
    let write_err = |source: io::Error| PersistError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
