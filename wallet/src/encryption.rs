//! Encryption-key and cipher envelopes. Every secret persisted by the wallet
//! is a `CipherData`: ciphertext plus the `CipherSpec` describing which
//! encryption key and KDF reproduce the AES key that opens it.

use std::collections::BTreeMap;
use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;

use hdwallet_crypto::hashes::{hash256, hmac_sha256};
use hdwallet_crypto::kdf::KdfParams;
use hdwallet_crypto::SecretBytes;

use crate::encode::{Reader, Writer};
use crate::error::WalletError;

pub const AES_IV_LEN: usize = 16;
pub const KEY_ID_LEN: usize = 32;

/// Identifier of the default "no passphrase" key. Wallets without a user
/// passphrase wrap their master key under this well-known identity.
pub const DEFAULT_ENCRYPTION_KEY_ID: [u8; KEY_ID_LEN] = [0u8; KEY_ID_LEN];

const DEFAULT_ENCRYPTION_KEY: [u8; 32] = [0u8; 32];
const KEY_ID_DOMAIN: &[u8] = b"EncryptionKeyId";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncryptionKeyId(pub [u8; KEY_ID_LEN]);

impl EncryptionKeyId {
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_ENCRYPTION_KEY_ID
    }

    pub fn default_key() -> Self {
        Self(DEFAULT_ENCRYPTION_KEY_ID)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKeyId({})", hex::encode(&self.0[..8]))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KdfId(pub [u8; 32]);

impl KdfId {
    pub fn of(params: &KdfParams) -> Self {
        Self(params.id())
    }
}

impl fmt::Debug for KdfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KdfId({})", hex::encode(&self.0[..8]))
    }
}

/// How a piece of ciphertext was produced: which stored encryption key, which
/// KDF stretches it, and the record's IV. Cipher type is pinned to
/// AES-256-CBC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherSpec {
    pub kdf_id: KdfId,
    pub encryption_key_id: EncryptionKeyId,
    pub iv: [u8; AES_IV_LEN],
}

const CIPHER_TYPE_AES_CBC: u8 = 0x01;

impl CipherSpec {
    pub fn new(kdf_id: KdfId, encryption_key_id: EncryptionKeyId) -> Self {
        let mut iv = [0u8; AES_IV_LEN];
        OsRng.fill_bytes(&mut iv);
        Self {
            kdf_id,
            encryption_key_id,
            iv,
        }
    }

    /// Same key schedule, fresh IV.
    pub fn fresh_copy(&self) -> Self {
        Self::new(self.kdf_id, self.encryption_key_id)
    }

    /// Fresh IV pointed at a different encryption key.
    pub fn copy_for_key(&self, encryption_key_id: EncryptionKeyId) -> Self {
        Self::new(self.kdf_id, encryption_key_id)
    }

    pub fn serialize(&self, writer: &mut Writer) {
        writer.put_u8(CIPHER_TYPE_AES_CBC);
        writer.put_bytes(&self.kdf_id.0);
        writer.put_bytes(&self.encryption_key_id.0);
        writer.put_bytes(&self.iv);
    }

    pub fn deserialize(reader: &mut Reader) -> Result<Self, WalletError> {
        let cipher_type = reader.get_u8()?;
        if cipher_type != CIPHER_TYPE_AES_CBC {
            return Err(WalletError::Deser("unknown cipher type"));
        }
        let kdf_id = KdfId(reader.get_array::<32>()?);
        let encryption_key_id = EncryptionKeyId(reader.get_array::<32>()?);
        let iv = reader.get_array::<AES_IV_LEN>()?;
        Ok(Self {
            kdf_id,
            encryption_key_id,
            iv,
        })
    }
}

/// Ciphertext plus its spec; the unit every encrypted field is stored as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherData {
    pub cipher: CipherSpec,
    pub ciphertext: Vec<u8>,
}

impl CipherData {
    pub fn new(cipher: CipherSpec, ciphertext: Vec<u8>) -> Self {
        Self { cipher, ciphertext }
    }

    pub fn serialize(&self, writer: &mut Writer) {
        self.cipher.serialize(writer);
        writer.put_var_bytes(&self.ciphertext);
    }

    pub fn deserialize(reader: &mut Reader) -> Result<Self, WalletError> {
        let cipher = CipherSpec::deserialize(reader)?;
        let ciphertext = reader.get_var_bytes()?.to_vec();
        Ok(Self { cipher, ciphertext })
    }
}

/// A stored encryption key: one logical key, one envelope per passphrase it
/// is wrapped under. Envelopes are keyed by the wrapping key's id.
#[derive(Clone, Debug)]
pub struct EncryptionKey {
    pub id: EncryptionKeyId,
    pub envelopes: BTreeMap<EncryptionKeyId, CipherData>,
}

impl EncryptionKey {
    pub fn new(id: EncryptionKeyId) -> Self {
        Self {
            id,
            envelopes: BTreeMap::new(),
        }
    }

    /// Stable identity of a raw key.
    pub fn compute_id(raw_key: &[u8]) -> EncryptionKeyId {
        EncryptionKeyId(hmac_sha256(KEY_ID_DOMAIN, raw_key))
    }

    pub fn add_envelope(&mut self, envelope: CipherData) {
        self.envelopes
            .insert(envelope.cipher.encryption_key_id, envelope);
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.put_bytes(&self.id.0);
        writer.put_var_int(self.envelopes.len() as u64);
        for envelope in self.envelopes.values() {
            envelope.serialize(&mut writer);
        }
        writer.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, WalletError> {
        let mut reader = Reader::new(data);
        let id = EncryptionKeyId(reader.get_array::<32>()?);
        let count = reader.get_var_int()?;
        let mut key = Self::new(id);
        for _ in 0..count {
            key.add_envelope(CipherData::deserialize(&mut reader)?);
        }
        Ok(key)
    }
}

/// Cleartext form of an encryption key while the container is unlocked: the
/// raw key plus its KDF-stretched variants, cached per KDF.
pub struct ClearEncryptionKey {
    raw: SecretBytes,
    derived: BTreeMap<KdfId, SecretBytes>,
}

impl ClearEncryptionKey {
    pub fn new(raw: SecretBytes) -> Self {
        Self {
            raw,
            derived: BTreeMap::new(),
        }
    }

    pub fn default_key() -> Self {
        Self::new(SecretBytes::from_slice(&DEFAULT_ENCRYPTION_KEY))
    }

    pub fn raw(&self) -> &SecretBytes {
        &self.raw
    }

    pub fn derive_for(&mut self, params: &KdfParams) -> &SecretBytes {
        let kdf_id = KdfId::of(params);
        self.derived
            .entry(kdf_id)
            .or_insert_with(|| params.derive(&self.raw))
    }

    pub fn derived_for(&self, kdf_id: &KdfId) -> Option<&SecretBytes> {
        self.derived.get(kdf_id)
    }

    /// Identity of the KDF-stretched variant: the hash of the derived key.
    /// This is the id a passphrase-derived key is looked up under.
    pub fn derived_id(&mut self, params: &KdfParams) -> EncryptionKeyId {
        let derived = self.derive_for(params);
        EncryptionKeyId(hash256(derived))
    }
}

/// Serialized KDF descriptor, stored next to the keys it stretches.
pub fn serialize_kdf(params: &KdfParams) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.put_u32(params.memory_target());
    writer.put_u32(params.iterations());
    writer.put_bytes(params.salt());
    writer.into_vec()
}

pub fn deserialize_kdf(data: &[u8]) -> Result<KdfParams, WalletError> {
    let mut reader = Reader::new(data);
    let memory_target = reader.get_u32()?;
    let iterations = reader.get_u32()?;
    let salt = reader.get_array::<32>()?;
    KdfParams::new(memory_target, iterations, salt).map_err(WalletError::from)
}
