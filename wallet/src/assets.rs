//! In-wallet key objects. Public keys are stored in the clear; private keys
//! only ever exist on disk as cipher envelopes.

use std::collections::BTreeMap;

use hdwallet_crypto::ecc;

use crate::dbkeys::{prefixed_key, ASSET_PREFIX};
use crate::encode::{Reader, Writer};
use crate::encryption::CipherData;
use crate::error::WalletError;

pub const ROOT_ACCOUNT_ID: u32 = 0xffff_ffff;
pub const ROOT_ASSET_INDEX: u32 = 0xffff_ffff;

/// `(account, asset-account, index)`, twelve bytes total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId {
    pub account: u32,
    pub asset_account: u32,
    pub index: u32,
}

impl AssetId {
    pub fn new(account: u32, asset_account: u32, index: u32) -> Self {
        Self {
            account,
            asset_account,
            index,
        }
    }

    pub fn root_asset_id() -> Self {
        Self::new(ROOT_ACCOUNT_ID, ROOT_ACCOUNT_ID, ROOT_ASSET_INDEX)
    }

    pub fn serialize(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..4].copy_from_slice(&self.account.to_be_bytes());
        out[4..8].copy_from_slice(&self.asset_account.to_be_bytes());
        out[8..].copy_from_slice(&self.index.to_be_bytes());
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, WalletError> {
        if data.len() != 12 {
            return Err(WalletError::Deser("asset id width"));
        }
        Ok(Self {
            account: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            asset_account: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            index: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }

    /// Record key of this asset within its sub-database.
    pub fn db_key(&self) -> Vec<u8> {
        prefixed_key(ASSET_PREFIX, &self.serialize())
    }
}

/// One public key with an optional encrypted private half.
#[derive(Clone, Debug)]
pub struct AssetSingle {
    pub id: AssetId,
    pub pubkey: [u8; 33],
    pub encrypted_privkey: Option<CipherData>,
}

impl AssetSingle {
    pub fn new(id: AssetId, pubkey: [u8; 33], encrypted_privkey: Option<CipherData>) -> Self {
        Self {
            id,
            pubkey,
            encrypted_privkey,
        }
    }

    pub fn pubkey_uncompressed(&self) -> Result<[u8; 65], WalletError> {
        Ok(ecc::uncompress_pubkey(&self.pubkey)?)
    }

    pub fn has_private_key(&self) -> bool {
        self.encrypted_privkey.is_some()
    }

    fn serialize_into(&self, writer: &mut Writer) {
        writer.put_bytes(&self.id.serialize());
        writer.put_bytes(&self.pubkey);
        match &self.encrypted_privkey {
            Some(envelope) => {
                writer.put_u8(1);
                envelope.serialize(writer);
            }
            None => writer.put_u8(0),
        }
    }

    fn deserialize_from(reader: &mut Reader) -> Result<Self, WalletError> {
        let id = AssetId::deserialize(reader.get_bytes(12)?)?;
        let pubkey = reader.get_array::<33>()?;
        let encrypted_privkey = match reader.get_u8()? {
            0 => None,
            1 => Some(CipherData::deserialize(reader)?),
            _ => return Err(WalletError::Deser("bad private key flag")),
        };
        Ok(Self {
            id,
            pubkey,
            encrypted_privkey,
        })
    }
}

/// Root single for legacy chained accounts: carries the account chaincode.
#[derive(Clone, Debug)]
pub struct AssetLegacyRoot {
    pub base: AssetSingle,
    pub chaincode: [u8; 32],
}

/// Root single for BIP32 accounts, extended with tree position and the
/// derivation path from the seed.
#[derive(Clone, Debug)]
pub struct AssetBip32Root {
    pub base: AssetSingle,
    pub chaincode: [u8; 32],
    pub depth: u8,
    pub leaf_id: u32,
    pub parent_fingerprint: u32,
    pub seed_fingerprint: u32,
    pub path: Vec<u32>,
}

impl AssetBip32Root {
    /// Fingerprint of this node itself.
    pub fn fingerprint(&self) -> u32 {
        let digest = hdwallet_crypto::hashes::hash160(&self.base.pubkey);
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// The seed fingerprint, falling back to this node's own for roots that
    /// are their own provenance.
    pub fn seed_fingerprint(&self) -> u32 {
        if self.seed_fingerprint != 0 {
            self.seed_fingerprint
        } else {
            self.fingerprint()
        }
    }
}

const ASSET_TAG_SINGLE: u8 = 0x01;
const ASSET_TAG_LEGACY_ROOT: u8 = 0x02;
const ASSET_TAG_BIP32_ROOT: u8 = 0x03;
const ASSET_TAG_MULTISIG: u8 = 0x04;

/// Tagged asset record.
#[derive(Clone, Debug)]
pub enum Asset {
    Single(AssetSingle),
    LegacyRoot(AssetLegacyRoot),
    Bip32Root(AssetBip32Root),
    Multisig {
        id: AssetId,
        required: u8,
        members: BTreeMap<u32, AssetSingle>,
    },
}

impl Asset {
    pub fn id(&self) -> AssetId {
        match self {
            Asset::Single(single) => single.id,
            Asset::LegacyRoot(root) => root.base.id,
            Asset::Bip32Root(root) => root.base.id,
            Asset::Multisig { id, .. } => *id,
        }
    }

    /// The underlying single for non-multisig assets.
    pub fn as_single(&self) -> Result<&AssetSingle, WalletError> {
        match self {
            Asset::Single(single) => Ok(single),
            Asset::LegacyRoot(root) => Ok(&root.base),
            Asset::Bip32Root(root) => Ok(&root.base),
            Asset::Multisig { .. } => Err(WalletError::WrongAssetType),
        }
    }

    pub fn has_private_key(&self) -> bool {
        match self {
            Asset::Single(single) => single.has_private_key(),
            Asset::LegacyRoot(root) => root.base.has_private_key(),
            Asset::Bip32Root(root) => root.base.has_private_key(),
            Asset::Multisig { members, .. } => {
                members.values().any(|member| member.has_private_key())
            }
        }
    }

    /// Copy with every private envelope stripped, for watching-only forks.
    pub fn public_copy(&self) -> Asset {
        let mut copy = self.clone();
        match &mut copy {
            Asset::Single(single) => single.encrypted_privkey = None,
            Asset::LegacyRoot(root) => root.base.encrypted_privkey = None,
            Asset::Bip32Root(root) => root.base.encrypted_privkey = None,
            Asset::Multisig { members, .. } => {
                for member in members.values_mut() {
                    member.encrypted_privkey = None;
                }
            }
        }
        copy
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        match self {
            Asset::Single(single) => {
                writer.put_u8(ASSET_TAG_SINGLE);
                single.serialize_into(&mut writer);
            }
            Asset::LegacyRoot(root) => {
                writer.put_u8(ASSET_TAG_LEGACY_ROOT);
                root.base.serialize_into(&mut writer);
                writer.put_bytes(&root.chaincode);
            }
            Asset::Bip32Root(root) => {
                writer.put_u8(ASSET_TAG_BIP32_ROOT);
                root.base.serialize_into(&mut writer);
                writer.put_bytes(&root.chaincode);
                writer.put_u8(root.depth);
                writer.put_u32(root.leaf_id);
                writer.put_u32(root.parent_fingerprint);
                writer.put_u32(root.seed_fingerprint);
                writer.put_var_int(root.path.len() as u64);
                for step in &root.path {
                    writer.put_u32(*step);
                }
            }
            Asset::Multisig {
                id,
                required,
                members,
            } => {
                writer.put_u8(ASSET_TAG_MULTISIG);
                writer.put_bytes(&id.serialize());
                writer.put_u8(*required);
                writer.put_var_int(members.len() as u64);
                for (slot, member) in members {
                    writer.put_u32(*slot);
                    member.serialize_into(&mut writer);
                }
            }
        }
        writer.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, WalletError> {
        let mut reader = Reader::new(data);
        let tag = reader.get_u8()?;
        let asset = match tag {
            ASSET_TAG_SINGLE => Asset::Single(AssetSingle::deserialize_from(&mut reader)?),
            ASSET_TAG_LEGACY_ROOT => {
                let base = AssetSingle::deserialize_from(&mut reader)?;
                let chaincode = reader.get_array::<32>()?;
                Asset::LegacyRoot(AssetLegacyRoot { base, chaincode })
            }
            ASSET_TAG_BIP32_ROOT => {
                let base = AssetSingle::deserialize_from(&mut reader)?;
                let chaincode = reader.get_array::<32>()?;
                let depth = reader.get_u8()?;
                let leaf_id = reader.get_u32()?;
                let parent_fingerprint = reader.get_u32()?;
                let seed_fingerprint = reader.get_u32()?;
                let step_count = reader.get_var_int()?;
                let mut path = Vec::with_capacity(step_count as usize);
                for _ in 0..step_count {
                    path.push(reader.get_u32()?);
                }
                Asset::Bip32Root(AssetBip32Root {
                    base,
                    chaincode,
                    depth,
                    leaf_id,
                    parent_fingerprint,
                    seed_fingerprint,
                    path,
                })
            }
            ASSET_TAG_MULTISIG => {
                let id = AssetId::deserialize(reader.get_bytes(12)?)?;
                let required = reader.get_u8()?;
                let member_count = reader.get_var_int()?;
                let mut members = BTreeMap::new();
                for _ in 0..member_count {
                    let slot = reader.get_u32()?;
                    members.insert(slot, AssetSingle::deserialize_from(&mut reader)?);
                }
                Asset::Multisig {
                    id,
                    required,
                    members,
                }
            }
            _ => return Err(WalletError::Deser("unknown asset tag")),
        };
        Ok(asset)
    }
}
