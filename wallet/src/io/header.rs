//! Sub-database headers and the master-key bootstrap material shared by the
//! control database and wallet factories.

use hdwallet_crypto::cipher::aes_cbc_encrypt;
use hdwallet_crypto::kdf::KdfParams;
use hdwallet_crypto::SecretBytes;

use crate::encode::{Reader, Writer};
use crate::encryption::{
    CipherData, CipherSpec, ClearEncryptionKey, EncryptionKey, EncryptionKeyId, KdfId,
};
use crate::error::WalletError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderType {
    Control,
    Single,
    Custom,
}

impl HeaderType {
    fn to_u8(self) -> u8 {
        match self {
            HeaderType::Control => 0x01,
            HeaderType::Single => 0x02,
            HeaderType::Custom => 0x03,
        }
    }

    fn from_u8(value: u8) -> Result<Self, WalletError> {
        match value {
            0x01 => Ok(HeaderType::Control),
            0x02 => Ok(HeaderType::Single),
            0x03 => Ok(HeaderType::Custom),
            _ => Err(WalletError::Deser("unknown header type")),
        }
    }
}

/// One header per sub-database: its name and the salt folded into the
/// control root for that database's record keys.
#[derive(Clone, Debug)]
pub struct WalletHeader {
    pub htype: HeaderType,
    pub db_name: String,
    pub control_salt: [u8; 32],
}

impl WalletHeader {
    pub fn new(htype: HeaderType, db_name: impl Into<String>) -> Self {
        let salt = SecretBytes::random(32);
        let mut control_salt = [0u8; 32];
        control_salt.copy_from_slice(salt.as_slice());
        Self {
            htype,
            db_name: db_name.into(),
            control_salt,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.put_u8(self.htype.to_u8());
        writer.put_var_str(&self.db_name);
        writer.put_bytes(&self.control_salt);
        writer.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, WalletError> {
        let mut reader = Reader::new(data);
        let htype = HeaderType::from_u8(reader.get_u8()?)?;
        let db_name = reader.get_var_str()?;
        let control_salt = reader.get_array::<32>()?;
        Ok(Self {
            htype,
            db_name,
            control_salt,
        })
    }
}

/// Control-database bootstrap: everything needed before any decryption can
/// happen, stored in the clear.
#[derive(Clone, Debug)]
pub struct ControlHeader {
    pub salt: [u8; 32],
    pub kdf_id: KdfId,
    pub master_key_id: EncryptionKeyId,
}

impl ControlHeader {
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.put_bytes(&self.salt);
        writer.put_bytes(&self.kdf_id.0);
        writer.put_bytes(&self.master_key_id.0);
        writer.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, WalletError> {
        let mut reader = Reader::new(data);
        let salt = reader.get_array::<32>()?;
        let kdf_id = KdfId(reader.get_array::<32>()?);
        let master_key_id = EncryptionKeyId(reader.get_array::<32>()?);
        Ok(Self {
            salt,
            kdf_id,
            master_key_id,
        })
    }
}

/// Output of the master-key bootstrap: the wrapped master key, its cleartext
/// (for immediate use by the caller), and a cipher template pointed at it.
pub struct MasterKeyMaterial {
    pub kdf: KdfParams,
    pub master_key: EncryptionKey,
    pub clear_master: SecretBytes,
    pub cipher_template: CipherSpec,
}

/// Generates a fresh master encryption key and wraps it under the
/// passphrase-derived key (or the default key when the passphrase is empty).
pub fn init_master_key(
    passphrase: &SecretBytes,
    kdf: KdfParams,
) -> Result<MasterKeyMaterial, WalletError> {
    let kdf_id = KdfId::of(&kdf);
    let clear_master = SecretBytes::random(32);
    let master_id = EncryptionKey::compute_id(&clear_master);

    let (outer_id, outer_derived) = if passphrase.is_empty() {
        let mut outer = ClearEncryptionKey::default_key();
        let derived = outer.derive_for(&kdf).clone();
        (EncryptionKeyId::default_key(), derived)
    } else {
        let mut outer = ClearEncryptionKey::new(passphrase.clone());
        let outer_id = outer.derived_id(&kdf);
        let derived = outer.derive_for(&kdf).clone();
        (outer_id, derived)
    };

    let envelope_cipher = CipherSpec::new(kdf_id, outer_id);
    let ciphertext = aes_cbc_encrypt(
        outer_derived.as_slice(),
        &envelope_cipher.iv,
        &clear_master,
    )?;

    let mut master_key = EncryptionKey::new(master_id);
    master_key.add_envelope(CipherData::new(envelope_cipher, ciphertext));

    Ok(MasterKeyMaterial {
        kdf,
        master_key,
        clear_master,
        cipher_template: CipherSpec::new(kdf_id, master_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = WalletHeader::new(HeaderType::Single, "wallet-db");
        let parsed = WalletHeader::deserialize(&header.serialize()).unwrap();
        assert_eq!(parsed.htype, header.htype);
        assert_eq!(parsed.db_name, header.db_name);
        assert_eq!(parsed.control_salt, header.control_salt);
    }

    #[test]
    fn master_key_wrap_uses_default_when_passphrase_empty() {
        let material =
            init_master_key(&SecretBytes::empty(), KdfParams::fast([1u8; 32])).unwrap();
        let envelope = material.master_key.envelopes.values().next().unwrap();
        assert!(envelope.cipher.encryption_key_id.is_default());
    }

    #[test]
    fn master_key_wrap_uses_derived_passphrase_key() {
        let material = init_master_key(
            &SecretBytes::from_slice(b"passphrase"),
            KdfParams::fast([1u8; 32]),
        )
        .unwrap();
        let envelope = material.master_key.envelopes.values().next().unwrap();
        assert!(!envelope.cipher.encryption_key_id.is_default());
        assert_eq!(
            material.cipher_template.encryption_key_id,
            material.master_key.id
        );
    }
}
