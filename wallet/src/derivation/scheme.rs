//! The four ways an asset account turns its root into a chain of keys.

use std::collections::BTreeMap;

use hdwallet_crypto::ecc;
use hdwallet_crypto::SecretBytes;

use crate::derivation::bip32::Bip32Node;
use crate::encode::{Reader, Writer};
use crate::error::WalletError;

const SCHEME_TAG_ARMORY_LEGACY: u8 = 0x01;
const SCHEME_TAG_BIP32: u8 = 0x02;
const SCHEME_TAG_BIP32_SALTED: u8 = 0x03;
const SCHEME_TAG_ECDH: u8 = 0x04;

#[derive(Clone, Debug)]
pub enum DerivationScheme {
    /// Chained multiplication against a fixed per-wallet chaincode; each key
    /// derives from its predecessor.
    ArmoryLegacy { chaincode: [u8; 32] },

    /// Soft BIP32 children of the account root, one index per asset.
    Bip32 { chaincode: [u8; 32] },

    /// BIP32 children post-multiplied by a fixed account salt.
    Bip32Salted {
        chaincode: [u8; 32],
        salt: [u8; 32],
    },

    /// Per-index salts multiplied into a fixed base key pair. Salts are
    /// registered explicitly and persist with the account.
    Ecdh { salts: BTreeMap<u32, [u8; 32]> },
}

impl DerivationScheme {
    /// Next public key for `index`, derived from the account root and (for
    /// chained schemes) the previous asset's key.
    pub fn compute_next_pubkey(
        &self,
        root_pubkey: &[u8; 33],
        previous_pubkey: Option<&[u8; 33]>,
        index: u32,
    ) -> Result<[u8; 33], WalletError> {
        match self {
            DerivationScheme::ArmoryLegacy { chaincode } => {
                let previous = previous_pubkey.unwrap_or(root_pubkey);
                let uncompressed = ecc::uncompress_pubkey(previous)?;
                let chained = ecc::chained_pubkey(&uncompressed, chaincode)?;
                Ok(ecc::compress_pubkey(&chained)?)
            }
            DerivationScheme::Bip32 { chaincode } => {
                let node = Bip32Node::from_public(*root_pubkey, *chaincode, 0, 0, 0)?;
                Ok(*node.derive_public(index)?.public_key())
            }
            DerivationScheme::Bip32Salted { chaincode, salt } => {
                let node = Bip32Node::from_public(*root_pubkey, *chaincode, 0, 0, 0)?;
                let derived = node.derive_public(index)?;
                Ok(ecc::pubkey_mul(derived.public_key(), salt)?)
            }
            DerivationScheme::Ecdh { salts } => {
                let salt = salts.get(&index).ok_or(WalletError::NoAsset)?;
                Ok(ecc::pubkey_mul(root_pubkey, salt)?)
            }
        }
    }

    /// Private-side mirror of [`Self::compute_next_pubkey`].
    pub fn compute_next_privkey(
        &self,
        root_privkey: &SecretBytes,
        previous_privkey: Option<&SecretBytes>,
        index: u32,
    ) -> Result<SecretBytes, WalletError> {
        match self {
            DerivationScheme::ArmoryLegacy { chaincode } => {
                let previous = previous_privkey.unwrap_or(root_privkey);
                Ok(ecc::chained_privkey(previous, chaincode)?)
            }
            DerivationScheme::Bip32 { chaincode } => {
                let node =
                    Bip32Node::from_private(root_privkey.clone(), *chaincode, 0, 0, 0)?;
                let child = node.derive_private(index)?;
                Ok(child
                    .private_key()
                    .cloned()
                    .ok_or(WalletError::EncryptedDataMissing)?)
            }
            DerivationScheme::Bip32Salted { chaincode, salt } => {
                let node =
                    Bip32Node::from_private(root_privkey.clone(), *chaincode, 0, 0, 0)?;
                let child = node.derive_private(index)?;
                let privkey = child
                    .private_key()
                    .ok_or(WalletError::EncryptedDataMissing)?;
                Ok(ecc::privkey_mul(privkey, salt)?)
            }
            DerivationScheme::Ecdh { salts } => {
                let salt = salts.get(&index).ok_or(WalletError::NoAsset)?;
                Ok(ecc::privkey_mul(root_privkey, salt)?)
            }
        }
    }

    /// Chained schemes walk asset to asset; the others jump straight to an
    /// index from the root.
    pub fn is_chained(&self) -> bool {
        matches!(self, DerivationScheme::ArmoryLegacy { .. })
    }

    /// For ECDH accounts: the count of registered salts bounds the chain.
    pub fn derivable_count(&self) -> Option<u32> {
        match self {
            DerivationScheme::Ecdh { salts } => Some(salts.len() as u32),
            _ => None,
        }
    }

    /// Registers `salt`, returning its index; re-adding is idempotent.
    pub fn add_salt(&mut self, salt: [u8; 32]) -> Result<u32, WalletError> {
        match self {
            DerivationScheme::Ecdh { salts } => {
                if let Some((index, _)) = salts.iter().find(|(_, known)| **known == salt) {
                    return Ok(*index);
                }
                let index = salts.len() as u32;
                salts.insert(index, salt);
                Ok(index)
            }
            _ => Err(WalletError::WrongAssetType),
        }
    }

    pub fn salt_index(&self, salt: &[u8; 32]) -> Option<u32> {
        match self {
            DerivationScheme::Ecdh { salts } => salts
                .iter()
                .find(|(_, known)| *known == salt)
                .map(|(index, _)| *index),
            _ => None,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        match self {
            DerivationScheme::ArmoryLegacy { chaincode } => {
                writer.put_u8(SCHEME_TAG_ARMORY_LEGACY);
                writer.put_bytes(chaincode);
            }
            DerivationScheme::Bip32 { chaincode } => {
                writer.put_u8(SCHEME_TAG_BIP32);
                writer.put_bytes(chaincode);
            }
            DerivationScheme::Bip32Salted { chaincode, salt } => {
                writer.put_u8(SCHEME_TAG_BIP32_SALTED);
                writer.put_bytes(chaincode);
                writer.put_bytes(salt);
            }
            DerivationScheme::Ecdh { salts } => {
                writer.put_u8(SCHEME_TAG_ECDH);
                writer.put_var_int(salts.len() as u64);
                for (index, salt) in salts {
                    writer.put_u32(*index);
                    writer.put_bytes(salt);
                }
            }
        }
        writer.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, WalletError> {
        let mut reader = Reader::new(data);
        let tag = reader.get_u8()?;
        let scheme = match tag {
            SCHEME_TAG_ARMORY_LEGACY => DerivationScheme::ArmoryLegacy {
                chaincode: reader.get_array::<32>()?,
            },
            SCHEME_TAG_BIP32 => DerivationScheme::Bip32 {
                chaincode: reader.get_array::<32>()?,
            },
            SCHEME_TAG_BIP32_SALTED => DerivationScheme::Bip32Salted {
                chaincode: reader.get_array::<32>()?,
                salt: reader.get_array::<32>()?,
            },
            SCHEME_TAG_ECDH => {
                let count = reader.get_var_int()?;
                let mut salts = BTreeMap::new();
                for _ in 0..count {
                    let index = reader.get_u32()?;
                    salts.insert(index, reader.get_array::<32>()?);
                }
                DerivationScheme::Ecdh { salts }
            }
            _ => return Err(WalletError::Deser("unknown derivation scheme")),
        };
        Ok(scheme)
    }
}
