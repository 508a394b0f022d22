//! Address entries: the concrete scriptPubKey forms an asset can take,
//! selected by a compact type bitfield.

use bech32::{segwit, Hrp};

use hdwallet_crypto::hashes::{hash160, sha256};

use crate::assets::{Asset, AssetId};
use crate::error::WalletError;
use crate::network::NetworkConfig;

// scrAddr prefixes for the two witness programs; base types use the
// network's own prefixes
pub const WITNESS_SHORT_PREFIX: u8 = 0x90;
pub const WITNESS_LONG_PREFIX: u8 = 0x95;

/// Base address form plus modifiers, packed into 16 bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AddressType(u16);

impl AddressType {
    pub const P2PKH: AddressType = AddressType(0x0001);
    pub const P2PK: AddressType = AddressType(0x0002);
    pub const P2WPKH: AddressType = AddressType(0x0004);
    pub const MULTISIG: AddressType = AddressType(0x0008);

    pub const MOD_UNCOMPRESSED: AddressType = AddressType(0x0100);
    pub const MOD_P2SH: AddressType = AddressType(0x0200);
    pub const MOD_P2WSH: AddressType = AddressType(0x0400);

    const BASE_MASK: u16 = 0x00ff;
    const MOD_MASK: u16 = 0xff00;

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn from_bits(bits: u16) -> Result<Self, WalletError> {
        let atype = AddressType(bits);
        if atype.is_legal() {
            Ok(atype)
        } else {
            Err(WalletError::AccountSetup("illegal address type"))
        }
    }

    pub fn with(self, modifier: AddressType) -> AddressType {
        AddressType(self.0 | modifier.0)
    }

    pub fn base(self) -> AddressType {
        AddressType(self.0 & Self::BASE_MASK)
    }

    pub fn has(self, modifier: AddressType) -> bool {
        self.0 & modifier.0 == modifier.0
    }

    fn modifiers(self) -> u16 {
        self.0 & Self::MOD_MASK
    }

    /// The enumerated legal combinations; anything else rejects at account
    /// creation.
    pub fn is_legal(self) -> bool {
        let base = self.base();
        let mods = self.modifiers();
        match base {
            Self::P2PKH | Self::P2PK => {
                mods == 0 || mods == Self::MOD_UNCOMPRESSED.0
            }
            Self::P2WPKH => mods == 0 || mods == Self::MOD_P2SH.0,
            Self::MULTISIG => mods == Self::MOD_P2SH.0 || mods == Self::MOD_P2WSH.0,
            _ => false,
        }
    }
}

/// Materialized view of an asset as one scriptPubKey form.
#[derive(Clone, Debug)]
pub enum AddressEntry {
    P2Pkh {
        asset_id: AssetId,
        pubkey: Vec<u8>,
    },
    P2Pk {
        asset_id: AssetId,
        pubkey: Vec<u8>,
    },
    P2Wpkh {
        asset_id: AssetId,
        pubkey: [u8; 33],
    },
    Multisig {
        asset_id: AssetId,
        script: Vec<u8>,
    },
    P2Sh(Box<AddressEntry>),
    P2Wsh(Box<AddressEntry>),
}

impl AddressEntry {
    /// Builds the entry for `asset` in form `atype`.
    pub fn for_asset(asset: &Asset, atype: AddressType) -> Result<Self, WalletError> {
        if !atype.is_legal() {
            return Err(WalletError::AccountSetup("illegal address type"));
        }
        let asset_id = asset.id();
        let entry = match atype.base() {
            AddressType::P2PKH => {
                let single = asset.as_single()?;
                let pubkey = if atype.has(AddressType::MOD_UNCOMPRESSED) {
                    single.pubkey_uncompressed()?.to_vec()
                } else {
                    single.pubkey.to_vec()
                };
                AddressEntry::P2Pkh { asset_id, pubkey }
            }
            AddressType::P2PK => {
                let single = asset.as_single()?;
                let pubkey = if atype.has(AddressType::MOD_UNCOMPRESSED) {
                    single.pubkey_uncompressed()?.to_vec()
                } else {
                    single.pubkey.to_vec()
                };
                AddressEntry::P2Pk { asset_id, pubkey }
            }
            AddressType::P2WPKH => {
                let single = asset.as_single()?;
                let inner = AddressEntry::P2Wpkh {
                    asset_id,
                    pubkey: single.pubkey,
                };
                if atype.has(AddressType::MOD_P2SH) {
                    AddressEntry::P2Sh(Box::new(inner))
                } else {
                    inner
                }
            }
            AddressType::MULTISIG => {
                let (required, members) = match asset {
                    Asset::Multisig {
                        required, members, ..
                    } => (*required, members),
                    _ => return Err(WalletError::WrongAssetType),
                };
                let mut script = Vec::new();
                script.push(0x50 + required);
                for member in members.values() {
                    script.push(33);
                    script.extend_from_slice(&member.pubkey);
                }
                script.push(0x50 + members.len() as u8);
                script.push(0xae);
                let inner = AddressEntry::Multisig { asset_id, script };
                if atype.has(AddressType::MOD_P2SH) {
                    AddressEntry::P2Sh(Box::new(inner))
                } else {
                    AddressEntry::P2Wsh(Box::new(inner))
                }
            }
            _ => return Err(WalletError::AccountSetup("illegal address type")),
        };
        Ok(entry)
    }

    pub fn asset_id(&self) -> AssetId {
        match self {
            AddressEntry::P2Pkh { asset_id, .. }
            | AddressEntry::P2Pk { asset_id, .. }
            | AddressEntry::P2Wpkh { asset_id, .. }
            | AddressEntry::Multisig { asset_id, .. } => *asset_id,
            AddressEntry::P2Sh(inner) | AddressEntry::P2Wsh(inner) => inner.asset_id(),
        }
    }

    pub fn address_type(&self) -> AddressType {
        match self {
            AddressEntry::P2Pkh { pubkey, .. } => {
                if pubkey.len() == 65 {
                    AddressType::P2PKH.with(AddressType::MOD_UNCOMPRESSED)
                } else {
                    AddressType::P2PKH
                }
            }
            AddressEntry::P2Pk { pubkey, .. } => {
                if pubkey.len() == 65 {
                    AddressType::P2PK.with(AddressType::MOD_UNCOMPRESSED)
                } else {
                    AddressType::P2PK
                }
            }
            AddressEntry::P2Wpkh { .. } => AddressType::P2WPKH,
            AddressEntry::Multisig { .. } => AddressType::MULTISIG,
            AddressEntry::P2Sh(inner) => inner.address_type().with(AddressType::MOD_P2SH),
            AddressEntry::P2Wsh(inner) => inner.address_type().with(AddressType::MOD_P2WSH),
        }
    }

    /// The bytes whose hash this entry's script commits to: the public key
    /// for key-hash forms, the embedded script for script-hash forms.
    pub fn preimage(&self) -> Vec<u8> {
        match self {
            AddressEntry::P2Pkh { pubkey, .. }
            | AddressEntry::P2Pk { pubkey, .. } => pubkey.clone(),
            AddressEntry::P2Wpkh { pubkey, .. } => pubkey.to_vec(),
            AddressEntry::Multisig { script, .. } => script.clone(),
            AddressEntry::P2Sh(inner) | AddressEntry::P2Wsh(inner) => inner.script_pubkey(),
        }
    }

    pub fn hash(&self) -> Vec<u8> {
        match self {
            AddressEntry::P2Pkh { pubkey, .. }
            | AddressEntry::P2Pk { pubkey, .. } => hash160(pubkey).to_vec(),
            AddressEntry::P2Wpkh { pubkey, .. } => hash160(pubkey).to_vec(),
            AddressEntry::Multisig { script, .. } => hash160(script).to_vec(),
            AddressEntry::P2Sh(inner) => hash160(&inner.script_pubkey()).to_vec(),
            AddressEntry::P2Wsh(inner) => sha256(&inner.script_pubkey()).to_vec(),
        }
    }

    fn hash_prefix(&self, config: &NetworkConfig) -> u8 {
        match self {
            AddressEntry::P2Pkh { .. } | AddressEntry::P2Pk { .. } => {
                config.pubkey_hash_prefix
            }
            AddressEntry::P2Wpkh { .. } => WITNESS_SHORT_PREFIX,
            AddressEntry::Multisig { .. } => config.script_hash_prefix,
            AddressEntry::P2Sh(_) => config.script_hash_prefix,
            AddressEntry::P2Wsh(_) => WITNESS_LONG_PREFIX,
        }
    }

    /// Prefix byte plus hash, the universal feed key.
    pub fn prefixed_hash(&self, config: &NetworkConfig) -> Vec<u8> {
        let mut out = vec![self.hash_prefix(config)];
        out.extend_from_slice(&self.hash());
        out
    }

    pub fn script_pubkey(&self) -> Vec<u8> {
        match self {
            AddressEntry::P2Pkh { pubkey, .. } => {
                let digest = hash160(pubkey);
                let mut script = vec![0x76, 0xa9, 0x14];
                script.extend_from_slice(&digest);
                script.extend_from_slice(&[0x88, 0xac]);
                script
            }
            AddressEntry::P2Pk { pubkey, .. } => {
                let mut script = vec![pubkey.len() as u8];
                script.extend_from_slice(pubkey);
                script.push(0xac);
                script
            }
            AddressEntry::P2Wpkh { pubkey, .. } => {
                let digest = hash160(pubkey);
                let mut script = vec![0x00, 0x14];
                script.extend_from_slice(&digest);
                script
            }
            AddressEntry::Multisig { script, .. } => script.clone(),
            AddressEntry::P2Sh(inner) => {
                let digest = hash160(&inner.script_pubkey());
                let mut script = vec![0xa9, 0x14];
                script.extend_from_slice(&digest);
                script.push(0x87);
                script
            }
            AddressEntry::P2Wsh(inner) => {
                let digest = sha256(&inner.script_pubkey());
                let mut script = vec![0x00, 0x20];
                script.extend_from_slice(&digest);
                script
            }
        }
    }

    /// Human-readable address. Key- and script-hash forms use Base58Check,
    /// witness forms bech32.
    pub fn address_string(&self, config: &NetworkConfig) -> Result<String, WalletError> {
        match self {
            AddressEntry::P2Pkh { .. } | AddressEntry::P2Pk { .. } => {
                let mut data = vec![config.pubkey_hash_prefix];
                data.extend_from_slice(&self.hash());
                Ok(bs58::encode(data).with_check().into_string())
            }
            AddressEntry::Multisig { .. } | AddressEntry::P2Sh(_) => {
                let mut data = vec![config.script_hash_prefix];
                data.extend_from_slice(&self.hash());
                Ok(bs58::encode(data).with_check().into_string())
            }
            AddressEntry::P2Wpkh { .. } | AddressEntry::P2Wsh(_) => {
                let hrp = Hrp::parse(config.bech32_hrp)
                    .map_err(|_| WalletError::wallet("bad bech32 hrp"))?;
                segwit::encode_v0(hrp, &self.hash())
                    .map_err(|_| WalletError::wallet("bech32 encoding failed"))
            }
        }
    }
}
