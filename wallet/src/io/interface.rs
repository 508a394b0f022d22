//! Orchestration of one wallet file: the control sub-database, the wallet
//! headers it carries, and the envelope-encrypted sub-database per header.
//!
//! The control passphrase gates opening. It unwraps the control root, the
//! master secret feeding every sub-database's record key schedule.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

use hdwallet_crypto::kdf::KdfParams;
use hdwallet_crypto::SecretBytes;

use crate::dbkeys::{CONTROL_HEADER_KEY, CONTROL_SEED_KEY, DB_COUNT_KEY, HEADER_PREFIX};
use crate::decrypted_data::{DecryptedDataContainer, PassphrasePrompt};
use crate::encode::{Reader, Writer};
use crate::encryption::CipherData;
use crate::error::WalletError;
use crate::io::encrypted_db::{EncReadTx, EncWriteTx, EncryptedDb};
use crate::io::header::{init_master_key, ControlHeader, HeaderType, WalletHeader};
use crate::io::{RawStore, RecordStore};

pub const CONTROL_DB_NAME: &str = "control_db";

const DEFAULT_DB_COUNT: u32 = 3;

pub struct WalletDbInterface {
    env: hdwallet_kv::KvEnv,
    path: PathBuf,
    control_store: Arc<RawStore>,
    control_container: Arc<DecryptedDataContainer>,
    control_header: ControlHeader,
    control_seed: CipherData,
    control_root: Mutex<Option<SecretBytes>>,
    headers: Mutex<BTreeMap<String, WalletHeader>>,
    dbs: Mutex<BTreeMap<String, Arc<EncryptedDb>>>,
    db_count: Mutex<u32>,
}

impl WalletDbInterface {
    /// Opens an existing wallet file or creates a fresh one. The prompt
    /// supplies the control passphrase in both cases; creation accepts an
    /// empty passphrase (default key).
    pub fn setup_env(
        path: impl AsRef<Path>,
        prompt: PassphrasePrompt,
    ) -> Result<Arc<Self>, WalletError> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();
        let env = hdwallet_kv::KvEnv::open(&path)?;
        let control_subdb = env.open_subdb(CONTROL_DB_NAME)?;
        let control_store = Arc::new(RawStore::new(control_subdb));

        if exists && control_store.get_record(&[CONTROL_HEADER_KEY]).is_some() {
            Self::open_existing(env, path, control_store, prompt)
        } else {
            Self::create(env, path, control_store, prompt)
        }
    }

    fn create(
        env: hdwallet_kv::KvEnv,
        path: PathBuf,
        control_store: Arc<RawStore>,
        prompt: PassphrasePrompt,
    ) -> Result<Arc<Self>, WalletError> {
        info!(path = %path.display(), "creating wallet environment");

        let passphrase = prompt(&Default::default());

        let mut kdf_salt = [0u8; 32];
        OsRng.fill_bytes(&mut kdf_salt);
        let kdf = KdfParams::standard(kdf_salt);

        let material = init_master_key(&passphrase, kdf.clone())?;

        let mut control_salt = [0u8; 32];
        OsRng.fill_bytes(&mut control_salt);
        let control_header = ControlHeader {
            salt: control_salt,
            kdf_id: crate::encryption::KdfId::of(&kdf),
            master_key_id: material.master_key.id,
        };

        let container = Arc::new(DecryptedDataContainer::new(control_store.clone()));
        container.add_kdf(kdf);
        container.add_encryption_key(material.master_key.clone());

        // control root, encrypted under the control master key
        let control_root = SecretBytes::random(32);
        let seed_cipher = material.cipher_template.fresh_copy();
        let encrypt_result = {
            let passphrase = passphrase.clone();
            container.set_passphrase_prompt(Arc::new(move |_| passphrase.clone()));
            container
                .lock()
                .and_then(|_guard| container.encrypt_data(&seed_cipher, &control_root))
        };
        container.clear_passphrase_prompt();
        let control_seed = CipherData::new(seed_cipher, encrypt_result?);

        // persist the control records
        control_store.put_record(&[CONTROL_HEADER_KEY], &control_header.serialize())?;
        let mut seed_writer = Writer::new();
        control_seed.serialize(&mut seed_writer);
        control_store.put_record(&[CONTROL_SEED_KEY], seed_writer.as_slice())?;
        control_store.put_record(&[DB_COUNT_KEY], &DEFAULT_DB_COUNT.to_be_bytes())?;
        container.update_on_disk()?;

        let iface = Arc::new(Self {
            env,
            path,
            control_store,
            control_container: container,
            control_header,
            control_seed,
            control_root: Mutex::new(None),
            headers: Mutex::new(BTreeMap::new()),
            dbs: Mutex::new(BTreeMap::new()),
            db_count: Mutex::new(DEFAULT_DB_COUNT),
        });
        Ok(iface)
    }

    fn open_existing(
        env: hdwallet_kv::KvEnv,
        path: PathBuf,
        control_store: Arc<RawStore>,
        prompt: PassphrasePrompt,
    ) -> Result<Arc<Self>, WalletError> {
        debug!(path = %path.display(), "opening wallet environment");

        let header_bytes = control_store
            .get_record(&[CONTROL_HEADER_KEY])
            .ok_or_else(|| WalletError::wallet("missing control header"))?;
        let control_header = ControlHeader::deserialize(&header_bytes)?;

        let seed_bytes = control_store
            .get_record(&[CONTROL_SEED_KEY])
            .ok_or_else(|| WalletError::wallet("missing control seed"))?;
        let control_seed = CipherData::deserialize(&mut Reader::new(&seed_bytes))?;

        let db_count_bytes = control_store
            .get_record(&[DB_COUNT_KEY])
            .ok_or_else(|| WalletError::wallet("missing db count"))?;
        if db_count_bytes.len() != 4 {
            return Err(WalletError::Deser("db count width"));
        }
        let db_count = u32::from_be_bytes([
            db_count_bytes[0],
            db_count_bytes[1],
            db_count_bytes[2],
            db_count_bytes[3],
        ]);

        let container = Arc::new(DecryptedDataContainer::new(control_store.clone()));
        container.read_from_disk()?;

        let mut headers = BTreeMap::new();
        for (_, value) in control_store.records_with_prefix(&[HEADER_PREFIX]) {
            let header = WalletHeader::deserialize(&value)?;
            headers.insert(header.db_name.clone(), header);
        }

        let iface = Arc::new(Self {
            env,
            path,
            control_store,
            control_container: container,
            control_header,
            control_seed,
            control_root: Mutex::new(None),
            headers: Mutex::new(headers),
            dbs: Mutex::new(BTreeMap::new()),
            db_count: Mutex::new(db_count),
        });

        // unwrap the control root and open every known sub-database
        iface.lock_control_container(prompt)?;
        let open_result = iface.open_known_dbs();
        iface.unlock_control_container();
        open_result?;

        Ok(iface)
    }

    fn open_known_dbs(&self) -> Result<(), WalletError> {
        let root_guard = self.control_root.lock().expect("control root poisoned");
        let root = root_guard
            .as_ref()
            .ok_or(WalletError::ControlNotLocked)?
            .clone();
        drop(root_guard);

        let headers = self.headers.lock().expect("headers poisoned").clone();
        for header in headers.values() {
            if header.htype == HeaderType::Control {
                continue;
            }
            let subdb = self.env.open_subdb(&header.db_name)?;
            let db = EncryptedDb::open(subdb, &root, &header.control_salt)?;
            self.dbs
                .lock()
                .expect("db registry poisoned")
                .insert(header.db_name.clone(), db);
        }
        Ok(())
    }

    // ---- control container --------------------------------------------------

    /// Decrypts the control root into memory. Must be paired with
    /// [`Self::unlock_control_container`].
    pub fn lock_control_container(&self, prompt: PassphrasePrompt) -> Result<(), WalletError> {
        self.control_container.set_passphrase_prompt(prompt);
        let root = self.control_container.lock().and_then(|_guard| {
            self.control_container
                .get_clear_text_data(&[CONTROL_SEED_KEY], &self.control_seed)
        });
        self.control_container.clear_passphrase_prompt();
        *self.control_root.lock().expect("control root poisoned") = Some(root?);
        Ok(())
    }

    pub fn unlock_control_container(&self) {
        *self.control_root.lock().expect("control root poisoned") = None;
    }

    // ---- headers ------------------------------------------------------------

    /// Registers a new sub-database under `header` and opens it. Requires the
    /// control container to be locked and a free pre-allocated slot.
    pub fn add_header(&self, header: WalletHeader) -> Result<Arc<EncryptedDb>, WalletError> {
        if self.free_db_count() == 0 {
            return Err(WalletError::NoFreeDbSlot);
        }

        let root_guard = self.control_root.lock().expect("control root poisoned");
        let root = root_guard
            .as_ref()
            .ok_or(WalletError::ControlNotLocked)?
            .clone();
        drop(root_guard);

        {
            let headers = self.headers.lock().expect("headers poisoned");
            if headers.contains_key(&header.db_name) {
                return Err(WalletError::wallet("header name already in use"));
            }
        }

        let subdb = self.env.open_subdb(&header.db_name)?;
        let db = EncryptedDb::open(subdb, &root, &header.control_salt)?;

        let key = crate::dbkeys::prefixed_key(HEADER_PREFIX, header.db_name.as_bytes());
        self.control_store.put_record(&key, &header.serialize())?;

        self.headers
            .lock()
            .expect("headers poisoned")
            .insert(header.db_name.clone(), header);
        self.dbs
            .lock()
            .expect("db registry poisoned")
            .insert(db.name().to_string(), db.clone());
        Ok(db)
    }

    pub fn get_header(&self, db_name: &str) -> Result<WalletHeader, WalletError> {
        self.headers
            .lock()
            .expect("headers poisoned")
            .get(db_name)
            .cloned()
            .ok_or_else(|| WalletError::UnknownHeader(db_name.to_string()))
    }

    pub fn header_names(&self) -> Vec<String> {
        self.headers
            .lock()
            .expect("headers poisoned")
            .keys()
            .cloned()
            .collect()
    }

    // ---- db count -----------------------------------------------------------

    pub fn db_count(&self) -> u32 {
        *self.db_count.lock().expect("db count poisoned")
    }

    pub fn free_db_count(&self) -> u32 {
        let used = self.headers.lock().expect("headers poisoned").len() as u32 + 1;
        self.db_count().saturating_sub(used)
    }

    /// Grows the pre-allocated sub-database budget. Shrinking is refused, as
    /// is resizing while a write transaction is live anywhere.
    pub fn set_db_count(&self, count: u32) -> Result<(), WalletError> {
        if count <= self.db_count() {
            return Err(WalletError::DbCountShrink);
        }
        {
            let dbs = self.dbs.lock().expect("db registry poisoned");
            if dbs.values().any(|db| db.has_live_writer()) {
                return Err(WalletError::TxLive);
            }
        }
        self.control_store
            .put_record(&[DB_COUNT_KEY], &count.to_be_bytes())?;
        *self.db_count.lock().expect("db count poisoned") = count;
        Ok(())
    }

    // ---- transactions -------------------------------------------------------

    pub fn database(&self, db_name: &str) -> Result<Arc<EncryptedDb>, WalletError> {
        self.dbs
            .lock()
            .expect("db registry poisoned")
            .get(db_name)
            .cloned()
            .ok_or_else(|| WalletError::UnknownHeader(db_name.to_string()))
    }

    pub fn begin_read_transaction(&self, db_name: &str) -> Result<EncReadTx, WalletError> {
        Ok(self.database(db_name)?.begin_read())
    }

    pub fn begin_write_transaction(&self, db_name: &str) -> Result<EncWriteTx, WalletError> {
        let db = self.database(db_name)?;
        Ok(EncWriteTx::begin(&db))
    }

    // ---- control passphrase -------------------------------------------------

    /// Swaps the control passphrase for a new one.
    pub fn change_control_passphrase(
        &self,
        new_passphrase: &SecretBytes,
        prompt: PassphrasePrompt,
    ) -> Result<(), WalletError> {
        self.control_container.set_passphrase_prompt(prompt);
        let result = (|| {
            let _guard = self.control_container.lock()?;
            self.control_container.encrypt_encryption_key(
                &self.control_header.master_key_id,
                &self.control_header.kdf_id,
                new_passphrase,
                true,
            )
        })();
        self.control_container.clear_passphrase_prompt();
        result
    }

    /// Drops the control passphrase, leaving the control root wrapped under
    /// the default key.
    pub fn erase_control_passphrase(&self, prompt: PassphrasePrompt) -> Result<(), WalletError> {
        self.control_container.set_passphrase_prompt(prompt);
        let result = (|| {
            let _guard = self.control_container.lock()?;
            let master = self
                .control_container
                .get_encryption_key(&self.control_header.master_key_id)?;
            let envelope_ids: Vec<_> = master.envelopes.keys().copied().collect();
            for envelope_id in envelope_ids {
                self.control_container.erase_encryption_key(
                    &self.control_header.master_key_id,
                    &envelope_id,
                    &self.control_header.kdf_id,
                )?;
            }
            Ok(())
        })();
        self.control_container.clear_passphrase_prompt();
        result
    }

    // ---- control metadata ---------------------------------------------------

    /// Stores a cleartext singleton record in the control database (e.g. the
    /// main wallet's name).
    pub fn set_control_meta(&self, key: u32, value: &[u8]) -> Result<(), WalletError> {
        self.control_store
            .put_record(&crate::dbkeys::singleton_key(key), value)
    }

    pub fn get_control_meta(&self, key: u32) -> Result<Option<Vec<u8>>, WalletError> {
        Ok(self
            .control_store
            .get_record(&crate::dbkeys::singleton_key(key)))
    }

    // ---- lifecycle ----------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> Result<(), WalletError> {
        self.env.flush()?;
        Ok(())
    }

    /// Flushes the raw store. Cleartext never survives this call: the control
    /// root cache is dropped with the interface.
    pub fn shutdown(&self) -> Result<(), WalletError> {
        self.unlock_control_container();
        self.env.flush()?;
        Ok(())
    }

    /// Overwrites every record of every sub-database, then removes the store
    /// from disk.
    pub fn erase_from_disk(&self) -> Result<(), WalletError> {
        self.unlock_control_container();
        for name in self.env.subdb_names() {
            let subdb = self.env.subdb(&name)?;
            let doomed: Vec<Vec<u8>> = {
                let read = subdb.begin_read();
                read.iter().map(|(key, _)| key.to_vec()).collect()
            };
            // overwrite first so the payloads never linger, then drop
            let tx = subdb.begin_write();
            for key in &doomed {
                tx.put(key, &[0u8; 64]);
            }
            tx.commit()?;
            let tx = subdb.begin_write();
            for key in &doomed {
                tx.erase(key);
            }
            tx.commit()?;
        }
        self.env.flush()?;
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path)
                .map_err(|_| WalletError::wallet("failed to remove wallet file"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass_prompt(pass: &'static [u8]) -> PassphrasePrompt {
        Arc::new(move |_ids| SecretBytes::from_slice(pass))
    }

    #[test]
    fn create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet");

        {
            let iface = WalletDbInterface::setup_env(&path, pass_prompt(b"control")).unwrap();
            iface.lock_control_container(pass_prompt(b"control")).unwrap();
            let header = WalletHeader::new(HeaderType::Single, "main");
            let db = iface.add_header(header).unwrap();
            iface.unlock_control_container();

            let tx = EncWriteTx::begin(&db);
            tx.put(b"record", b"payload");
            tx.commit().unwrap();
            iface.shutdown().unwrap();
        }

        let iface = WalletDbInterface::setup_env(&path, pass_prompt(b"control")).unwrap();
        let read = iface.begin_read_transaction("main").unwrap();
        assert_eq!(read.get(b"record"), Some(b"payload".as_ref()));
    }

    #[test]
    fn wrong_control_passphrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet");
        {
            let iface = WalletDbInterface::setup_env(&path, pass_prompt(b"control")).unwrap();
            iface.shutdown().unwrap();
        }
        assert!(WalletDbInterface::setup_env(&path, pass_prompt(b"wrong")).is_err());
    }

    #[test]
    fn db_count_gates_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet");
        let iface = WalletDbInterface::setup_env(&path, pass_prompt(b"control")).unwrap();
        iface.lock_control_container(pass_prompt(b"control")).unwrap();

        // default budget: control + two more
        iface
            .add_header(WalletHeader::new(HeaderType::Single, "one"))
            .unwrap();
        iface
            .add_header(WalletHeader::new(HeaderType::Custom, "two"))
            .unwrap();
        assert!(matches!(
            iface.add_header(WalletHeader::new(HeaderType::Custom, "three")),
            Err(WalletError::NoFreeDbSlot)
        ));

        // grow-only
        assert!(matches!(
            iface.set_db_count(2),
            Err(WalletError::DbCountShrink)
        ));
        iface.set_db_count(4).unwrap();
        iface
            .add_header(WalletHeader::new(HeaderType::Custom, "three"))
            .unwrap();
        iface.unlock_control_container();
    }

    #[test]
    fn change_control_passphrase_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet");
        {
            let iface = WalletDbInterface::setup_env(&path, pass_prompt(b"old")).unwrap();
            iface
                .change_control_passphrase(&SecretBytes::from_slice(b"new"), pass_prompt(b"old"))
                .unwrap();
            iface.shutdown().unwrap();
        }

        assert!(WalletDbInterface::setup_env(&path, pass_prompt(b"old")).is_err());
        let iface = WalletDbInterface::setup_env(&path, pass_prompt(b"new")).unwrap();
        iface.shutdown().unwrap();
    }

    #[test]
    fn erase_control_passphrase_unlocks_with_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet");
        {
            let iface = WalletDbInterface::setup_env(&path, pass_prompt(b"secret")).unwrap();
            iface.erase_control_passphrase(pass_prompt(b"secret")).unwrap();
            iface.shutdown().unwrap();
        }

        // default key decrypts without any passphrase material
        let iface = WalletDbInterface::setup_env(&path, pass_prompt(b"")).unwrap();
        iface.shutdown().unwrap();
    }
}
