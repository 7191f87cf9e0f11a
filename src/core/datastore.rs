use std::{
    path::{Path, PathBuf},
    thread::{self, ThreadId},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::{
    error::{Error, Result, ResultExt},
    persist::file,
};

use super::path;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GetError {
    #[error("datastore path {0:?} not found")]
    NotFound(String),
    #[error("datastore value at {path:?} has the wrong type: {reason}")]
    TypeMismatch { path: String, reason: String },
    #[error("datastore is not initialized")]
    Uninitialized,
}

#[derive(Debug)]
struct Snapshot {
    doc: Value,
    dirty: bool,
}

#[derive(Debug, Default)]
struct State {
    file_path: Option<PathBuf>,
    initialized: bool,
    doc: Value,
    dirty: bool,
    paused: bool,
    last_written: Option<String>,
    owner: Option<ThreadId>,
    depth: usize,
    snapshot: Option<Snapshot>,
}

impl State {
    fn writes_suppressed(&self) -> bool {
        self.paused || self.depth > 0
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty || self.writes_suppressed() {
            return Ok(());
        }

        let serialized = serde_json::to_string(&self.doc).context("failed to serialize datastore")?;
        if self.last_written.as_deref() == Some(serialized.as_str()) {
            debug!("datastore unchanged since last write; skipping");
            self.dirty = false;
            return Ok(());
        }

        let Some(file_path) = self.file_path.as_deref() else {
            return Err(Error::critical("datastore has no file path"));
        };
        file::store_document(file_path, &serialized).context("failed to write datastore")?;
        debug!(path = %file_path.display(), bytes = serialized.len(), "datastore written");

        self.last_written = Some(serialized);
        self.dirty = false;
        Ok(())
    }

    fn store_wholesale(&mut self, doc: Value) -> Result<()> {
        let Some(file_path) = self.file_path.as_deref() else {
            return Err(Error::critical("datastore has no file path"));
        };
        let serialized = serde_json::to_string(&doc).context("failed to serialize datastore")?;
        file::store_document(file_path, &serialized).context("failed to reset datastore file")?;

        self.last_written = Some(serialized);
        self.dirty = false;
        if self.depth > 0 {
            self.snapshot = Some(Snapshot {
                doc: doc.clone(),
                dirty: false,
            });
        }
        self.doc = doc;
        Ok(())
    }
}

/// File-backed JSON document addressed by JSON-pointer paths.
///
/// Every call takes the internal mutex for its duration. A transaction
/// opened with [`Datastore::begin_transaction`] additionally makes the
/// calling thread the owner of the store until the outermost
/// [`Datastore::end_transaction`]; calls from any other thread wait until
/// then, so nobody observes a half-applied group of writes.
#[derive(Debug, Default)]
pub struct Datastore {
    state: Mutex<State>,
    released: Condvar,
}

impl Datastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        while st.owner.is_some_and(|owner| owner != me) {
            self.released.wait(&mut st);
        }
        st
    }

    /// Loads `<root>/psicashdatastore<suffix>`, creating it with an empty
    /// document if it does not exist.
    pub fn init(&self, root: &Path, suffix: &str) -> Result<()> {
        let file_path = file::datastore_path(root, suffix);
        let mut st = self.lock();
        if st.depth > 0 {
            return Err(Error::critical("cannot initialize datastore inside a transaction"));
        }

        let doc = match file::load_document(&file_path).context("failed to load datastore")? {
            Some(doc) => doc,
            None => {
                let doc = Value::Object(Map::new());
                file::store_document(&file_path, &doc.to_string())
                    .context("failed to create datastore file")?;
                debug!(path = %file_path.display(), "created empty datastore");
                doc
            }
        };

        st.last_written = Some(serde_json::to_string(&doc).context("failed to serialize datastore")?);
        st.doc = doc;
        st.file_path = Some(file_path);
        st.dirty = false;
        st.paused = false;
        st.initialized = true;
        Ok(())
    }

    /// Points the store at `<root>/psicashdatastore<suffix>` and overwrites
    /// both memory and file with `doc`.
    pub fn reset_at(&self, root: &Path, suffix: &str, doc: Value) -> Result<()> {
        let mut st = self.lock();
        st.file_path = Some(file::datastore_path(root, suffix));
        st.store_wholesale(doc)
    }

    /// Overwrites both memory and file with `doc`.
    pub fn reset(&self, doc: Value) -> Result<()> {
        let mut st = self.lock();
        if !st.initialized {
            return Err(Error::critical("datastore reset before initialization"));
        }
        st.store_wholesale(doc)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.lock().file_path.clone()
    }

    /// The whole document.
    pub fn document(&self) -> Result<Value> {
        let st = self.lock();
        if !st.initialized {
            return Err(Error::critical("datastore is not initialized"));
        }
        Ok(st.doc.clone())
    }

    /// Typed read. A stored boolean also satisfies integer reads.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> std::result::Result<T, GetError> {
        let st = self.lock();
        if !st.initialized {
            return Err(GetError::Uninitialized);
        }
        let value = path::lookup(&st.doc, path).ok_or_else(|| GetError::NotFound(path.to_string()))?;
        convert(path, value)
    }

    /// Writes `value` at `path`. The file is written only when `should_write`
    /// is set, writes are not paused and the document actually changed.
    pub fn set<V: Serialize>(&self, path: &str, value: V, should_write: bool) -> Result<()> {
        let value = serde_json::to_value(value).context("failed to serialize datastore value")?;

        let mut st = self.lock();
        if !st.initialized {
            return Err(Error::critical("datastore is not initialized"));
        }

        let changed = path::assign(&mut st.doc, path, value)
            .map_err(|e| Error::critical(e.to_string()))?;
        if changed {
            st.dirty = true;
        }

        if should_write {
            st.flush().context("datastore set failed")?;
        }
        Ok(())
    }

    /// Suspends file writes. Returns false when writes were already paused.
    pub fn pause_writes(&self) -> bool {
        let mut st = self.lock();
        let was_paused = st.paused;
        st.paused = true;
        !was_paused
    }

    /// Resumes file writes and flushes anything that changed meanwhile.
    pub fn unpause_writes(&self) -> Result<()> {
        let mut st = self.lock();
        st.paused = false;
        st.flush().context("failed to flush after unpausing writes")
    }

    pub fn begin_transaction(&self) -> Result<()> {
        let mut st = self.lock();
        if !st.initialized {
            return Err(Error::critical("datastore is not initialized"));
        }
        if st.depth == 0 {
            st.owner = Some(thread::current().id());
            st.snapshot = Some(Snapshot {
                doc: st.doc.clone(),
                dirty: st.dirty,
            });
        }
        st.depth += 1;
        Ok(())
    }

    /// Ends one level of transaction. Only the outermost call commits or
    /// rolls back; inner calls only unwind the depth.
    pub fn end_transaction(&self, commit: bool) -> Result<()> {
        let mut st = self.lock();
        if st.depth == 0 {
            return Err(Error::critical("no datastore transaction in progress"));
        }
        st.depth -= 1;
        if st.depth > 0 {
            return Ok(());
        }

        let snapshot = st.snapshot.take();
        st.owner = None;
        let result = if commit {
            st.flush().context("failed to commit datastore transaction")
        } else {
            if let Some(snapshot) = snapshot {
                st.doc = snapshot.doc;
                st.dirty = snapshot.dirty;
            }
            debug!("datastore transaction rolled back");
            Ok(())
        };

        drop(st);
        self.released.notify_all();
        result
    }

    pub fn transaction_depth(&self) -> usize {
        self.lock().depth
    }
}

fn convert<T: DeserializeOwned>(path: &str, value: &Value) -> std::result::Result<T, GetError> {
    match T::deserialize(value) {
        Ok(v) => Ok(v),
        Err(err) => {
            if let Value::Bool(b) = value {
                if let Ok(v) = T::deserialize(&Value::from(i64::from(*b))) {
                    return Ok(v);
                }
            }
            Err(GetError::TypeMismatch {
                path: path.to_string(),
                reason: err.to_string(),
            })
        }
    }
}
