use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, ThreadId};

use tracing::debug;

use crate::error::KvError;
use crate::tx::{ReadTx, WriteTx};

pub(crate) type Snapshot = Arc<BTreeMap<Vec<u8>, Vec<u8>>>;

/// Staged mutations of the active write transaction. `None` marks an erase.
pub(crate) type Staged = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

#[derive(Default)]
pub(crate) struct WriterState {
    pub owner: Option<ThreadId>,
    pub depth: usize,
    pub staged: Staged,
    pub aborted: bool,
}

/// Store environment: one on-disk database holding any number of named
/// sub-databases. Dropping the environment flushes sled.
pub struct KvEnv {
    db: sled::Db,
    path: PathBuf,
    subdbs: Mutex<BTreeMap<String, Arc<SubDb>>>,
    // serializes final application of staged writes across all sub-databases
    commit_latch: Arc<Mutex<()>>,
}

impl KvEnv {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        debug!(path = %path.display(), "kv environment opened");
        Ok(Self {
            db,
            path,
            subdbs: Mutex::new(BTreeMap::new()),
            commit_latch: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens (or creates) a named sub-database and loads its committed state.
    pub fn open_subdb(&self, name: &str) -> Result<Arc<SubDb>, KvError> {
        let mut subdbs = self.subdbs.lock().expect("subdb registry poisoned");
        if let Some(subdb) = subdbs.get(name) {
            return Ok(subdb.clone());
        }

        let tree = self.db.open_tree(name.as_bytes())?;
        let mut committed = BTreeMap::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            committed.insert(key.to_vec(), value.to_vec());
        }
        let subdb = Arc::new(SubDb {
            name: name.to_string(),
            tree,
            committed: RwLock::new(Arc::new(committed)),
            writer: Mutex::new(WriterState::default()),
            writer_released: Condvar::new(),
            commit_latch: self.commit_latch.clone(),
        });
        subdbs.insert(name.to_string(), subdb.clone());
        Ok(subdb)
    }

    pub fn subdb(&self, name: &str) -> Result<Arc<SubDb>, KvError> {
        let subdbs = self.subdbs.lock().expect("subdb registry poisoned");
        subdbs
            .get(name)
            .cloned()
            .ok_or_else(|| KvError::UnknownSubDb(name.to_string()))
    }

    pub fn subdb_names(&self) -> Vec<String> {
        let subdbs = self.subdbs.lock().expect("subdb registry poisoned");
        subdbs.keys().cloned().collect()
    }

    /// Drops a sub-database's tree and registry entry. The caller is
    /// responsible for making sure no transaction is live on it.
    pub fn drop_subdb(&self, name: &str) -> Result<(), KvError> {
        let mut subdbs = self.subdbs.lock().expect("subdb registry poisoned");
        subdbs.remove(name);
        self.db.drop_tree(name.as_bytes())?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), KvError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn close(self) -> Result<(), KvError> {
        self.db.flush()?;
        debug!(path = %self.path.display(), "kv environment closed");
        Ok(())
    }
}

/// A named sub-database. All access goes through transactions.
pub struct SubDb {
    name: String,
    tree: sled::Tree,
    committed: RwLock<Snapshot>,
    pub(crate) writer: Mutex<WriterState>,
    pub(crate) writer_released: Condvar,
    commit_latch: Arc<Mutex<()>>,
}

impl SubDb {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_count(&self) -> usize {
        self.snapshot().len()
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.committed.read().expect("snapshot lock poisoned").clone()
    }

    /// Begins a read transaction. On the thread that holds this
    /// sub-database's write transaction the view includes staged changes.
    pub fn begin_read(self: &Arc<Self>) -> ReadTx {
        let writer = self.writer.lock().expect("writer state poisoned");
        let view = if writer.owner == Some(thread::current().id()) {
            Arc::new(Self::merged_view(&self.snapshot(), &writer.staged))
        } else {
            self.snapshot()
        };
        drop(writer);
        ReadTx::new(view)
    }

    /// Begins (or joins, on the owning thread) a write transaction. Blocks
    /// while another thread writes to this sub-database.
    pub fn begin_write(self: &Arc<Self>) -> WriteTx {
        let current = thread::current().id();
        let mut writer = self.writer.lock().expect("writer state poisoned");
        loop {
            match writer.owner {
                None => {
                    writer.owner = Some(current);
                    writer.depth = 1;
                    writer.aborted = false;
                    writer.staged.clear();
                    break;
                }
                Some(owner) if owner == current => {
                    writer.depth += 1;
                    break;
                }
                Some(_) => {
                    writer = self
                        .writer_released
                        .wait(writer)
                        .expect("writer state poisoned");
                }
            }
        }
        drop(writer);
        WriteTx::new(self.clone())
    }

    pub(crate) fn merged_view(
        committed: &BTreeMap<Vec<u8>, Vec<u8>>,
        staged: &Staged,
    ) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut view = committed.clone();
        for (key, op) in staged {
            match op {
                Some(value) => {
                    view.insert(key.clone(), value.clone());
                }
                None => {
                    view.remove(key);
                }
            }
        }
        view
    }

    /// Applies the staged set to sled and publishes a new snapshot. Called
    /// with the writer state already drained by the outermost guard.
    pub(crate) fn apply(&self, staged: Staged) -> Result<(), KvError> {
        let _latch = self.commit_latch.lock().expect("commit latch poisoned");
        for (key, op) in &staged {
            match op {
                Some(value) => {
                    self.tree.insert(key.as_slice(), value.as_slice())?;
                }
                None => {
                    self.tree.remove(key.as_slice())?;
                }
            }
        }
        self.tree.flush()?;

        let mut committed = self.committed.write().expect("snapshot lock poisoned");
        let view = Self::merged_view(committed.as_ref(), &staged);
        *committed = Arc::new(view);
        Ok(())
    }
}
