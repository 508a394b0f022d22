use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use crate::env::{Snapshot, SubDb};
use crate::error::KvError;

/// Immutable view over a sub-database. Cheap to take; the snapshot it holds
/// is never invalidated by later commits.
pub struct ReadTx {
    view: Snapshot,
}

impl ReadTx {
    pub(crate) fn new(view: Snapshot) -> Self {
        Self { view }
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.view.get(key).map(|value| value.as_slice())
    }

    pub fn iter(&self) -> KvIterator<'_> {
        KvIterator::over(&self.view, &[])
    }

    pub fn iter_from(&self, prefix: &[u8]) -> KvIterator<'_> {
        KvIterator::over(&self.view, prefix)
    }

    pub fn entry_count(&self) -> usize {
        self.view.len()
    }
}

/// Scoped write transaction. Staged mutations become visible to other
/// threads only when the outermost guard commits; dropping any guard without
/// committing aborts the whole stack.
pub struct WriteTx {
    subdb: Arc<SubDb>,
    done: bool,
}

impl WriteTx {
    pub(crate) fn new(subdb: Arc<SubDb>) -> Self {
        Self { subdb, done: false }
    }

    pub fn subdb_name(&self) -> &str {
        self.subdb.name()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let writer = self.subdb.writer.lock().expect("writer state poisoned");
        if let Some(op) = writer.staged.get(key) {
            return op.clone();
        }
        drop(writer);
        self.subdb.snapshot().get(key).cloned()
    }

    pub fn put(&self, key: &[u8], value: &[u8]) {
        let mut writer = self.subdb.writer.lock().expect("writer state poisoned");
        debug_assert_eq!(writer.owner, Some(thread::current().id()));
        writer.staged.insert(key.to_vec(), Some(value.to_vec()));
    }

    pub fn erase(&self, key: &[u8]) {
        let mut writer = self.subdb.writer.lock().expect("writer state poisoned");
        debug_assert_eq!(writer.owner, Some(thread::current().id()));
        writer.staged.insert(key.to_vec(), None);
    }

    /// Materialized view of committed + staged state, byte-ordered.
    pub fn view(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let writer = self.subdb.writer.lock().expect("writer state poisoned");
        SubDb::merged_view(&self.subdb.snapshot(), &writer.staged)
    }

    pub fn commit(mut self) -> Result<(), KvError> {
        self.done = true;
        let mut writer = self.subdb.writer.lock().expect("writer state poisoned");
        debug_assert_eq!(writer.owner, Some(thread::current().id()));
        writer.depth -= 1;
        if writer.depth > 0 {
            return Ok(());
        }

        let aborted = writer.aborted;
        let staged = std::mem::take(&mut writer.staged);
        writer.owner = None;
        drop(writer);
        self.subdb.writer_released.notify_all();

        if aborted {
            return Err(KvError::TxAborted);
        }
        self.subdb.apply(staged)
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut writer = self.subdb.writer.lock().expect("writer state poisoned");
        writer.aborted = true;
        writer.depth -= 1;
        if writer.depth == 0 {
            writer.staged.clear();
            writer.owner = None;
            drop(writer);
            self.subdb.writer_released.notify_all();
        }
    }
}

/// Forward iterator over a snapshot, starting at the first key >= prefix.
pub struct KvIterator<'a> {
    inner: std::collections::btree_map::Range<'a, Vec<u8>, Vec<u8>>,
}

impl<'a> KvIterator<'a> {
    fn over(view: &'a BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> Self {
        let inner = view.range(prefix.to_vec()..);
        Self { inner }
    }
}

impl<'a> Iterator for KvIterator<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use crate::env::KvEnv;
    use crate::error::KvError;

    #[test]
    fn staged_writes_invisible_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let env = KvEnv::open(dir.path().join("db")).unwrap();
        let subdb = env.open_subdb("main").unwrap();

        let tx = subdb.begin_write();
        tx.put(b"key", b"value");

        // a reader thread sees nothing before commit
        let outside = {
            let subdb = subdb.clone();
            std::thread::spawn(move || subdb.begin_read().get(b"key").map(|v| v.to_vec()))
                .join()
                .unwrap()
        };
        assert_eq!(outside, None);

        // the writing thread sees its own staged data
        assert_eq!(subdb.begin_read().get(b"key"), Some(b"value".as_ref()));

        tx.commit().unwrap();
        assert_eq!(subdb.begin_read().get(b"key"), Some(b"value".as_ref()));
    }

    #[test]
    fn nested_scopes_share_staging() {
        let dir = tempfile::tempdir().unwrap();
        let env = KvEnv::open(dir.path().join("db")).unwrap();
        let subdb = env.open_subdb("main").unwrap();

        let outer = subdb.begin_write();
        outer.put(b"a", b"1");
        {
            let inner = subdb.begin_write();
            assert_eq!(inner.get(b"a"), Some(b"1".to_vec()));
            inner.put(b"b", b"2");
            inner.commit().unwrap();
        }
        // nothing committed yet
        assert_eq!(subdb.entry_count(), 0);
        outer.commit().unwrap();
        assert_eq!(subdb.entry_count(), 2);
    }

    #[test]
    fn dropped_scope_aborts_stack() {
        let dir = tempfile::tempdir().unwrap();
        let env = KvEnv::open(dir.path().join("db")).unwrap();
        let subdb = env.open_subdb("main").unwrap();

        let outer = subdb.begin_write();
        outer.put(b"a", b"1");
        {
            let inner = subdb.begin_write();
            inner.put(b"b", b"2");
            // dropped without commit
            drop(inner);
        }
        assert!(matches!(outer.commit(), Err(KvError::TxAborted)));
        assert_eq!(subdb.entry_count(), 0);

        // the latch is released for the next writer
        let tx = subdb.begin_write();
        tx.put(b"c", b"3");
        tx.commit().unwrap();
        assert_eq!(subdb.entry_count(), 1);
    }

    #[test]
    fn iteration_is_byte_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let env = KvEnv::open(dir.path().join("db")).unwrap();
        let subdb = env.open_subdb("main").unwrap();

        let tx = subdb.begin_write();
        for byte in [3u8, 1, 2, 0xff, 0] {
            tx.put(&[byte], &[byte]);
        }
        tx.commit().unwrap();

        let read = subdb.begin_read();
        let keys: Vec<Vec<u8>> = read.iter().map(|(k, _)| k.to_vec()).collect();
        assert_eq!(keys, vec![vec![0], vec![1], vec![2], vec![3], vec![0xff]]);

        let from_two: Vec<Vec<u8>> = read.iter_from(&[2]).map(|(k, _)| k.to_vec()).collect();
        assert_eq!(from_two, vec![vec![2], vec![3], vec![0xff]]);
    }

    #[test]
    fn reopen_preserves_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let env = KvEnv::open(&path).unwrap();
            let subdb = env.open_subdb("main").unwrap();
            let tx = subdb.begin_write();
            tx.put(b"persisted", b"yes");
            tx.commit().unwrap();
            env.close().unwrap();
        }

        let env = KvEnv::open(&path).unwrap();
        let subdb = env.open_subdb("main").unwrap();
        assert_eq!(subdb.begin_read().get(b"persisted"), Some(b"yes".as_ref()));
    }
}
