pub mod encrypted_db;
pub mod header;
pub mod interface;

pub use encrypted_db::{EncReadTx, EncWriteTx, EncryptedDb};
pub use header::{ControlHeader, HeaderType, WalletHeader};
pub use interface::{WalletDbInterface, CONTROL_DB_NAME};

use std::sync::Arc;

use hdwallet_kv::SubDb;

use crate::error::WalletError;

/// Storage seam shared by the raw control database and the envelope-encrypted
/// wallet databases. Writes open (or join, on the writing thread) a scoped
/// transaction on the backing store.
pub trait RecordStore: Send + Sync {
    fn get_record(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put_record(&self, key: &[u8], value: &[u8]) -> Result<(), WalletError>;
    fn erase_record(&self, key: &[u8]) -> Result<(), WalletError>;
    fn records_with_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    /// Key-material rotation hint. Envelope-encrypted stores append a fresh
    /// cycle marker; cleartext stores have nothing to do.
    fn cycle(&self) -> Result<(), WalletError> {
        Ok(())
    }
}

/// Cleartext record store over a raw sub-database; only the control database
/// uses this directly.
pub struct RawStore {
    subdb: Arc<SubDb>,
}

impl RawStore {
    pub fn new(subdb: Arc<SubDb>) -> Self {
        Self { subdb }
    }
}

impl RecordStore for RawStore {
    fn get_record(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.subdb.begin_read().get(key).map(|value| value.to_vec())
    }

    fn put_record(&self, key: &[u8], value: &[u8]) -> Result<(), WalletError> {
        let tx = self.subdb.begin_write();
        tx.put(key, value);
        tx.commit()?;
        Ok(())
    }

    fn erase_record(&self, key: &[u8]) -> Result<(), WalletError> {
        let tx = self.subdb.begin_write();
        tx.erase(key);
        tx.commit()?;
        Ok(())
    }

    fn records_with_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.subdb
            .begin_read()
            .iter_from(prefix)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.to_vec(), value.to_vec()))
            .collect()
    }
}
