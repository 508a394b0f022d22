//! The decrypted-data container: single authority over cleartext key
//! material. Everything that needs a private key or an encryption key in the
//! clear goes through a held container lock; unlocking wipes the caches.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use tracing::{debug, warn};

use hdwallet_crypto::cipher::{aes_cbc_decrypt, aes_cbc_encrypt};
use hdwallet_crypto::hashes::hash256;
use hdwallet_crypto::kdf::KdfParams;
use hdwallet_crypto::SecretBytes;

use crate::dbkeys::{
    prefixed_key, ENCRYPTIONKEY_PREFIX, ENCRYPTIONKEY_TEMP_PREFIX, KDF_PREFIX,
};
use crate::encryption::{
    deserialize_kdf, serialize_kdf, CipherData, CipherSpec, ClearEncryptionKey, EncryptionKey,
    EncryptionKeyId, KdfId,
};
use crate::error::WalletError;
use crate::io::RecordStore;

/// Prompt seam: given the set of key ids the container is willing to unlock,
/// return a passphrase. An empty return aborts the operation.
pub type PassphrasePrompt =
    Arc<dyn Fn(&BTreeSet<EncryptionKeyId>) -> SecretBytes + Send + Sync>;

const MAX_PROMPT_ATTEMPTS: u32 = 3;

#[derive(Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: u32,
}

#[derive(Default)]
struct ClearCaches {
    keys: HashMap<EncryptionKeyId, ClearEncryptionKey>,
    assets: HashMap<Vec<u8>, SecretBytes>,
}

pub struct DecryptedDataContainer {
    store: Arc<dyn RecordStore>,
    lock_state: Mutex<LockState>,
    caches: Mutex<ClearCaches>,
    // encrypted registry, survives unlock
    encrypted_keys: Mutex<HashMap<EncryptionKeyId, EncryptionKey>>,
    kdfs: Mutex<HashMap<KdfId, KdfParams>>,
    prompt: Mutex<Option<PassphrasePrompt>>,
}

/// Scoped lock over the container. Re-entrant on the owning thread; the
/// caches are wiped when the outermost guard drops.
pub struct ContainerLock<'a> {
    container: &'a DecryptedDataContainer,
}

impl Drop for ContainerLock<'_> {
    fn drop(&mut self) {
        let mut state = self
            .container
            .lock_state
            .lock()
            .expect("lock state poisoned");
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.container.wipe_caches();
        }
    }
}

impl DecryptedDataContainer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            lock_state: Mutex::new(LockState::default()),
            caches: Mutex::new(ClearCaches::default()),
            encrypted_keys: Mutex::new(HashMap::new()),
            kdfs: Mutex::new(HashMap::new()),
            prompt: Mutex::new(None),
        }
    }

    /// Acquires the container lock. Re-entrant from the owning thread, fails
    /// with `AlreadyLocked` if any other thread holds it.
    pub fn lock(&self) -> Result<ContainerLock<'_>, WalletError> {
        let current = thread::current().id();
        let mut state = self.lock_state.lock().expect("lock state poisoned");
        match state.owner {
            None => {
                state.owner = Some(current);
                state.depth = 1;
            }
            Some(owner) if owner == current => {
                state.depth += 1;
            }
            Some(_) => return Err(WalletError::AlreadyLocked),
        }
        Ok(ContainerLock { container: self })
    }

    pub fn is_locked_by_current_thread(&self) -> bool {
        let state = self.lock_state.lock().expect("lock state poisoned");
        state.owner == Some(thread::current().id())
    }

    fn assert_locked(&self) -> Result<(), WalletError> {
        if self.is_locked_by_current_thread() {
            Ok(())
        } else {
            Err(WalletError::LockNotHeld)
        }
    }

    fn wipe_caches(&self) {
        let mut caches = self.caches.lock().expect("cache lock poisoned");
        caches.keys.clear();
        caches.assets.clear();
    }

    pub fn set_passphrase_prompt(&self, prompt: PassphrasePrompt) {
        *self.prompt.lock().expect("prompt lock poisoned") = Some(prompt);
    }

    pub fn clear_passphrase_prompt(&self) {
        *self.prompt.lock().expect("prompt lock poisoned") = None;
    }

    // ---- registry management ------------------------------------------------

    pub fn add_kdf(&self, params: KdfParams) {
        self.kdfs
            .lock()
            .expect("kdf lock poisoned")
            .insert(KdfId::of(&params), params);
    }

    pub fn get_kdf(&self, id: &KdfId) -> Result<KdfParams, WalletError> {
        self.kdfs
            .lock()
            .expect("kdf lock poisoned")
            .get(id)
            .cloned()
            .ok_or(WalletError::UnknownKdf)
    }

    pub fn add_encryption_key(&self, key: EncryptionKey) {
        self.encrypted_keys
            .lock()
            .expect("key registry poisoned")
            .insert(key.id, key);
    }

    pub fn has_encryption_key(&self, id: &EncryptionKeyId) -> bool {
        self.encrypted_keys
            .lock()
            .expect("key registry poisoned")
            .contains_key(id)
    }

    pub fn encryption_key_ids(&self) -> Vec<EncryptionKeyId> {
        self.encrypted_keys
            .lock()
            .expect("key registry poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn get_encryption_key(
        &self,
        id: &EncryptionKeyId,
    ) -> Result<EncryptionKey, WalletError> {
        self.encrypted_keys
            .lock()
            .expect("key registry poisoned")
            .get(id)
            .cloned()
            .ok_or(WalletError::UnknownEncryptionKey)
    }

    // ---- cleartext access ---------------------------------------------------

    /// Decrypts `data`, walking the encryption-key chain as needed. The
    /// result is cached under `cache_key` until unlock.
    pub fn get_clear_text_data(
        &self,
        cache_key: &[u8],
        data: &CipherData,
    ) -> Result<SecretBytes, WalletError> {
        self.assert_locked()?;

        if let Some(cached) = self
            .caches
            .lock()
            .expect("cache lock poisoned")
            .assets
            .get(cache_key)
        {
            return Ok(cached.clone());
        }

        let aes_key = self.derived_key_for_cipher(&data.cipher)?;
        let clear = aes_cbc_decrypt(aes_key.as_slice(), &data.cipher.iv, &data.ciphertext)
            .map_err(|_| WalletError::DecryptionFailed("asset data"))?;

        self.caches
            .lock()
            .expect("cache lock poisoned")
            .assets
            .insert(cache_key.to_vec(), clear.clone());
        Ok(clear)
    }

    /// Encrypts `plaintext` under the cipher's key schedule.
    pub fn encrypt_data(
        &self,
        cipher: &CipherSpec,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, WalletError> {
        self.assert_locked()?;
        let aes_key = self.derived_key_for_cipher(cipher)?;
        Ok(aes_cbc_encrypt(aes_key.as_slice(), &cipher.iv, plaintext)?)
    }

    fn derived_key_for_cipher(&self, cipher: &CipherSpec) -> Result<SecretBytes, WalletError> {
        self.populate_encryption_key(&cipher.encryption_key_id, &cipher.kdf_id)?;
        let caches = self.caches.lock().expect("cache lock poisoned");
        let clear = caches
            .keys
            .get(&cipher.encryption_key_id)
            .ok_or(WalletError::UnknownEncryptionKey)?;
        clear
            .derived_for(&cipher.kdf_id)
            .cloned()
            .ok_or(WalletError::UnknownKdf)
    }

    /// Makes sure the cleartext of `key_id` is cached, with its
    /// `kdf_id`-derived variant computed. Walks envelope chains recursively
    /// and falls back to the passphrase prompt for keys that are not in the
    /// registry (i.e. passphrase-derived keys).
    pub fn populate_encryption_key(
        &self,
        key_id: &EncryptionKeyId,
        kdf_id: &KdfId,
    ) -> Result<(), WalletError> {
        self.assert_locked()?;
        let kdf = self.get_kdf(kdf_id)?;

        {
            let mut caches = self.caches.lock().expect("cache lock poisoned");
            if let Some(clear) = caches.keys.get_mut(key_id) {
                clear.derive_for(&kdf);
                return Ok(());
            }
        }

        if key_id.is_default() {
            let mut clear = ClearEncryptionKey::default_key();
            clear.derive_for(&kdf);
            self.caches
                .lock()
                .expect("cache lock poisoned")
                .keys
                .insert(*key_id, clear);
            return Ok(());
        }

        // registered key: try each envelope, recursing into its wrapping key
        let registered = self
            .encrypted_keys
            .lock()
            .expect("key registry poisoned")
            .get(key_id)
            .cloned();
        if let Some(encrypted) = registered {
            let mut last_error = WalletError::DecryptionFailed("encryption key envelopes");
            for envelope in encrypted.envelopes.values() {
                match self.populate_encryption_key(
                    &envelope.cipher.encryption_key_id,
                    &envelope.cipher.kdf_id,
                ) {
                    Ok(()) => {}
                    // a cancelled prompt aborts the whole walk
                    Err(WalletError::EmptyPassphrase) => {
                        return Err(WalletError::EmptyPassphrase)
                    }
                    Err(error) => {
                        last_error = error;
                        continue;
                    }
                }
                let outer = self.derived_key_for_cipher(&envelope.cipher)?;
                let raw = match aes_cbc_decrypt(
                    outer.as_slice(),
                    &envelope.cipher.iv,
                    &envelope.ciphertext,
                ) {
                    Ok(raw) => raw,
                    Err(_) => {
                        last_error = WalletError::DecryptionFailed("encryption key envelope");
                        continue;
                    }
                };
                let mut clear = ClearEncryptionKey::new(raw);
                clear.derive_for(&kdf);
                self.caches
                    .lock()
                    .expect("cache lock poisoned")
                    .keys
                    .insert(*key_id, clear);
                return Ok(());
            }
            return Err(last_error);
        }

        // unknown key: it must come from a passphrase
        self.prompt_for_key(key_id, &kdf)
    }

    fn prompt_for_key(
        &self,
        key_id: &EncryptionKeyId,
        kdf: &KdfParams,
    ) -> Result<(), WalletError> {
        let prompt = self
            .prompt
            .lock()
            .expect("prompt lock poisoned")
            .clone()
            .ok_or(WalletError::DecryptionFailed("no passphrase prompt set"))?;

        let mut wanted = BTreeSet::new();
        wanted.insert(*key_id);

        for _attempt in 0..MAX_PROMPT_ATTEMPTS {
            let passphrase = prompt(&wanted);
            if passphrase.is_empty() {
                return Err(WalletError::EmptyPassphrase);
            }

            let mut candidate = ClearEncryptionKey::new(passphrase);
            let candidate_id = candidate.derived_id(kdf);
            if candidate_id == *key_id {
                self.caches
                    .lock()
                    .expect("cache lock poisoned")
                    .keys
                    .insert(*key_id, candidate);
                return Ok(());
            }
            warn!("passphrase did not match any requested key");
        }
        Err(WalletError::PassphraseMismatch(MAX_PROMPT_ATTEMPTS))
    }

    /// Decrypted master-key lookup for factories that need the raw key.
    pub fn get_clear_encryption_key(
        &self,
        key_id: &EncryptionKeyId,
        kdf_id: &KdfId,
    ) -> Result<SecretBytes, WalletError> {
        self.populate_encryption_key(key_id, kdf_id)?;
        let caches = self.caches.lock().expect("cache lock poisoned");
        caches
            .keys
            .get(key_id)
            .map(|clear| clear.raw().clone())
            .ok_or(WalletError::UnknownEncryptionKey)
    }

    // ---- passphrase management ---------------------------------------------

    /// Adds (or swaps, with `replace`) a passphrase envelope on a stored
    /// encryption key. Two-phase on disk: the amended record is written under
    /// a TEMP key, the PERM record is erased, then rewritten and the TEMP
    /// record dropped, so a crash mid-rotation loses nothing.
    pub fn encrypt_encryption_key(
        &self,
        key_id: &EncryptionKeyId,
        kdf_id: &KdfId,
        new_passphrase: &SecretBytes,
        replace: bool,
    ) -> Result<(), WalletError> {
        self.assert_locked()?;
        if new_passphrase.is_empty() {
            return Err(WalletError::EmptyPassphrase);
        }

        let kdf = self.get_kdf(kdf_id)?;
        let mut encrypted = self.get_encryption_key(key_id)?;

        // need the cleartext of the key being re-wrapped
        self.populate_encryption_key(key_id, kdf_id)?;
        let raw = {
            let caches = self.caches.lock().expect("cache lock poisoned");
            caches
                .keys
                .get(key_id)
                .map(|clear| clear.raw().clone())
                .ok_or(WalletError::UnknownEncryptionKey)?
        };

        let mut new_outer = ClearEncryptionKey::new(new_passphrase.clone());
        let new_outer_id = new_outer.derived_id(&kdf);
        let derived = new_outer
            .derived_for(kdf_id)
            .cloned()
            .ok_or(WalletError::UnknownKdf)?;

        if replace {
            encrypted.envelopes.clear();
        } else if encrypted.envelopes.contains_key(&new_outer_id) {
            return Err(WalletError::wallet("passphrase already in use"));
        }

        let cipher = CipherSpec::new(*kdf_id, new_outer_id);
        let ciphertext = aes_cbc_encrypt(derived.as_slice(), &cipher.iv, &raw)?;
        encrypted.add_envelope(CipherData::new(cipher, ciphertext));

        self.two_phase_update(&encrypted)?;
        self.store.cycle()?;
        self.add_encryption_key(encrypted);
        debug!("encryption key envelope updated");
        Ok(())
    }

    /// Removes one passphrase envelope. Dropping the last envelope re-wraps
    /// the key under the default (unencrypted) identity.
    pub fn erase_encryption_key(
        &self,
        key_id: &EncryptionKeyId,
        envelope_key_id: &EncryptionKeyId,
        kdf_id: &KdfId,
    ) -> Result<(), WalletError> {
        self.assert_locked()?;
        let kdf = self.get_kdf(kdf_id)?;
        let mut encrypted = self.get_encryption_key(key_id)?;

        self.populate_encryption_key(key_id, kdf_id)?;
        let raw = {
            let caches = self.caches.lock().expect("cache lock poisoned");
            caches
                .keys
                .get(key_id)
                .map(|clear| clear.raw().clone())
                .ok_or(WalletError::UnknownEncryptionKey)?
        };

        if encrypted.envelopes.remove(envelope_key_id).is_none() {
            return Err(WalletError::wallet("no such passphrase envelope"));
        }

        if encrypted.envelopes.is_empty() {
            let mut default_key = ClearEncryptionKey::default_key();
            let derived = default_key.derive_for(&kdf).clone();
            let cipher = CipherSpec::new(*kdf_id, EncryptionKeyId::default_key());
            let ciphertext = aes_cbc_encrypt(derived.as_slice(), &cipher.iv, &raw)?;
            encrypted.add_envelope(CipherData::new(cipher, ciphertext));
        }

        self.two_phase_update(&encrypted)?;
        self.add_encryption_key(encrypted);
        Ok(())
    }

    fn two_phase_update(&self, key: &EncryptionKey) -> Result<(), WalletError> {
        let perm_key = prefixed_key(ENCRYPTIONKEY_PREFIX, &key.id.0);
        let temp_key = prefixed_key(ENCRYPTIONKEY_TEMP_PREFIX, &key.id.0);
        let serialized = key.serialize();

        self.store.put_record(&temp_key, &serialized)?;
        self.store.erase_record(&perm_key)?;
        self.store.put_record(&perm_key, &serialized)?;
        self.store.erase_record(&temp_key)?;
        Ok(())
    }

    // ---- persistence --------------------------------------------------------

    /// Writes the registry (KDFs and encrypted keys) to the record store.
    pub fn update_on_disk(&self) -> Result<(), WalletError> {
        for params in self.kdfs.lock().expect("kdf lock poisoned").values() {
            let key = prefixed_key(KDF_PREFIX, &params.id());
            self.store.put_record(&key, &serialize_kdf(params))?;
        }
        for encrypted in self
            .encrypted_keys
            .lock()
            .expect("key registry poisoned")
            .values()
        {
            let key = prefixed_key(ENCRYPTIONKEY_PREFIX, &encrypted.id.0);
            self.store.put_record(&key, &encrypted.serialize())?;
        }
        Ok(())
    }

    /// Loads the registry, recovering from an interrupted two-phase rotation:
    /// a surviving TEMP record whose PERM record is absent gets promoted.
    pub fn read_from_disk(&self) -> Result<(), WalletError> {
        for (_, value) in self.store.records_with_prefix(&[KDF_PREFIX]) {
            let params = deserialize_kdf(&value)?;
            self.add_kdf(params);
        }

        for (raw_key, value) in self.store.records_with_prefix(&[ENCRYPTIONKEY_TEMP_PREFIX]) {
            let key = EncryptionKey::deserialize(&value)?;
            let perm_key = prefixed_key(ENCRYPTIONKEY_PREFIX, &key.id.0);
            if self.store.get_record(&perm_key).is_none() {
                warn!("recovering encryption key from interrupted rotation");
                self.store.put_record(&perm_key, &value)?;
            }
            self.store.erase_record(&raw_key)?;
        }

        for (_, value) in self.store.records_with_prefix(&[ENCRYPTIONKEY_PREFIX]) {
            let key = EncryptionKey::deserialize(&value)?;
            self.add_encryption_key(key);
        }
        Ok(())
    }

    /// Id of the derived key a passphrase would unlock for `kdf_id`.
    pub fn derived_passphrase_id(
        &self,
        passphrase: &SecretBytes,
        kdf_id: &KdfId,
    ) -> Result<EncryptionKeyId, WalletError> {
        let kdf = self.get_kdf(kdf_id)?;
        Ok(EncryptionKeyId(hash256(&kdf.derive(passphrase))))
    }
}
