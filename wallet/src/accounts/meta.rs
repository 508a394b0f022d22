//! Meta accounts: non-key data rides along in the wallet's sub-database.
//! Comments attach notes to arbitrary keys (addresses, transactions);
//! authorized peers bind names to public keys.

use std::collections::BTreeMap;

use crate::dbkeys::{prefixed_key, META_ACCOUNT_PREFIX};
use crate::encode::{Reader, Writer};
use crate::error::WalletError;
use crate::io::encrypted_db::EncWriteTx;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MetaAccountType {
    Comments,
    AuthPeers,
}

impl MetaAccountType {
    fn to_u8(self) -> u8 {
        match self {
            MetaAccountType::Comments => 0x01,
            MetaAccountType::AuthPeers => 0x02,
        }
    }
}

pub struct MetaAccount {
    mtype: MetaAccountType,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MetaAccount {
    pub fn new(mtype: MetaAccountType) -> Self {
        Self {
            mtype,
            entries: BTreeMap::new(),
        }
    }

    pub fn account_type(&self) -> MetaAccountType {
        self.mtype
    }

    fn entry_db_key(&self, key: &[u8]) -> Vec<u8> {
        let mut suffix = Vec::with_capacity(1 + key.len());
        suffix.push(self.mtype.to_u8());
        suffix.extend_from_slice(key);
        prefixed_key(META_ACCOUNT_PREFIX, &suffix)
    }

    pub fn set_entry(&mut self, tx: &EncWriteTx, key: &[u8], value: &[u8]) {
        let mut writer = Writer::new();
        writer.put_var_bytes(key);
        writer.put_var_bytes(value);
        tx.put(&self.entry_db_key(key), writer.as_slice());
        self.entries.insert(key.to_vec(), value.to_vec());
    }

    pub fn get_entry(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(|value| value.as_slice())
    }

    pub fn delete_entry(&mut self, tx: &EncWriteTx, key: &[u8]) {
        tx.erase(&self.entry_db_key(key));
        self.entries.remove(key);
    }

    pub fn entries(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.entries
    }

    /// Loads every entry of this account's family from the logical view.
    pub fn load(
        view: &BTreeMap<Vec<u8>, Vec<u8>>,
        mtype: MetaAccountType,
    ) -> Result<Self, WalletError> {
        let mut account = Self::new(mtype);
        let prefix = prefixed_key(META_ACCOUNT_PREFIX, &[mtype.to_u8()]);
        for (key, value) in view.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let mut reader = Reader::new(value);
            let entry_key = reader.get_var_bytes()?.to_vec();
            let entry_value = reader.get_var_bytes()?.to_vec();
            account.entries.insert(entry_key, entry_value);
        }
        Ok(account)
    }
}
