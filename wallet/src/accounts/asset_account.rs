//! An ordered chain of assets produced by one derivation scheme from one
//! root. Tracks how far the chain has been computed and which index was last
//! vended.

use std::collections::BTreeMap;

use hdwallet_crypto::ecc;
use hdwallet_crypto::SecretBytes;

use crate::assets::{Asset, AssetId, AssetSingle, ROOT_ASSET_INDEX};
use crate::dbkeys::{prefixed_key, ASSET_ACCOUNT_PREFIX, ASSET_PREFIX};
use crate::decrypted_data::DecryptedDataContainer;
use crate::derivation::scheme::DerivationScheme;
use crate::encode::{Reader, Writer};
use crate::encryption::CipherData;
use crate::error::WalletError;
use crate::io::encrypted_db::EncWriteTx;

const NO_INDEX: u32 = 0xffff_ffff;

pub struct AssetAccount {
    id: u32,
    parent_id: u32,
    root: Asset,
    scheme: DerivationScheme,
    assets: BTreeMap<u32, Asset>,
    highest_used_index: Option<u32>,
}

impl AssetAccount {
    pub fn new(parent_id: u32, id: u32, root: Asset, scheme: DerivationScheme) -> Self {
        Self {
            id,
            parent_id,
            root,
            scheme,
            assets: BTreeMap::new(),
            highest_used_index: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn parent_id(&self) -> u32 {
        self.parent_id
    }

    pub fn root(&self) -> &Asset {
        &self.root
    }

    pub fn scheme(&self) -> &DerivationScheme {
        &self.scheme
    }

    pub fn asset_count(&self) -> u32 {
        self.assets.len() as u32
    }

    pub fn highest_used_index(&self) -> Option<u32> {
        self.highest_used_index
    }

    pub fn get_asset(&self, index: u32) -> Result<&Asset, WalletError> {
        self.assets.get(&index).ok_or(WalletError::NoAsset)
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    fn root_pubkey(&self) -> Result<[u8; 33], WalletError> {
        Ok(self.root.as_single()?.pubkey)
    }

    fn meta_db_key(&self) -> Vec<u8> {
        let mut suffix = Vec::with_capacity(8);
        suffix.extend_from_slice(&self.parent_id.to_be_bytes());
        suffix.extend_from_slice(&self.id.to_be_bytes());
        prefixed_key(ASSET_ACCOUNT_PREFIX, &suffix)
    }

    /// Grows the public chain by `count`, staging each new asset and the
    /// account metadata into `tx`. ECDH chains are bounded by their salt
    /// count.
    pub fn extend_public_chain(
        &mut self,
        tx: &EncWriteTx,
        count: u32,
    ) -> Result<(), WalletError> {
        let start = self.asset_count();
        let mut target = start + count;
        if let Some(bound) = self.scheme.derivable_count() {
            target = target.min(bound);
        }
        if target <= start {
            return Ok(());
        }

        let root_pubkey = self.root_pubkey()?;
        for index in start..target {
            let previous = if index == 0 {
                None
            } else {
                Some(self.get_asset(index - 1)?.as_single()?.pubkey)
            };
            let pubkey =
                self.scheme
                    .compute_next_pubkey(&root_pubkey, previous.as_ref(), index)?;
            let asset = Asset::Single(AssetSingle::new(
                AssetId::new(self.parent_id, self.id, index),
                pubkey,
                None,
            ));
            tx.put(&asset.id().db_key(), &asset.serialize());
            self.assets.insert(index, asset);
        }
        self.commit_meta(tx);
        Ok(())
    }

    /// Extends the chain with private material: the public side grows as
    /// needed and every asset up to the target gets its encrypted private
    /// key. Requires the container lock.
    pub fn extend_private_chain(
        &mut self,
        container: &DecryptedDataContainer,
        tx: &EncWriteTx,
        count: u32,
    ) -> Result<(), WalletError> {
        self.extend_public_chain(tx, count)?;

        let root_single = self.root.as_single()?;
        let root_envelope = root_single
            .encrypted_privkey
            .as_ref()
            .ok_or(WalletError::EncryptedDataMissing)?;
        let root_privkey = container
            .get_clear_text_data(&self.root.id().db_key(), root_envelope)?;

        let mut chained_privkey: Option<SecretBytes> = None;
        let target = self.asset_count();
        for index in 0..target {
            let privkey = self.scheme.compute_next_privkey(
                &root_privkey,
                chained_privkey.as_ref(),
                index,
            )?;
            if self.scheme.is_chained() {
                chained_privkey = Some(privkey.clone());
            }

            let asset = self.assets.get_mut(&index).ok_or(WalletError::NoAsset)?;
            let single = match asset {
                Asset::Single(single) => single,
                _ => return Err(WalletError::WrongAssetType),
            };
            if single.encrypted_privkey.is_some() {
                continue;
            }
            debug_assert_eq!(
                ecc::compute_pubkey(privkey.as_slice())?,
                single.pubkey,
                "private chain diverged from public chain"
            );

            let cipher = root_envelope.cipher.fresh_copy();
            let ciphertext = container.encrypt_data(&cipher, &privkey)?;
            single.encrypted_privkey = Some(CipherData::new(cipher, ciphertext));
            tx.put(&single.id.db_key(), &asset.serialize());
        }
        Ok(())
    }

    /// Registers an ECDH salt, persisting the account metadata. Returns the
    /// salt's index; idempotent for known salts.
    pub fn add_salt(&mut self, tx: &EncWriteTx, salt: [u8; 32]) -> Result<u32, WalletError> {
        let index = self.scheme.add_salt(salt)?;
        self.commit_meta(tx);
        Ok(index)
    }

    /// Vends the next unused index, growing the used watermark.
    pub fn vend_index(&mut self, tx: &EncWriteTx) -> u32 {
        let next = match self.highest_used_index {
            Some(index) => index + 1,
            None => 0,
        };
        self.highest_used_index = Some(next);
        self.commit_meta(tx);
        next
    }

    pub fn peek_next_index(&self) -> u32 {
        match self.highest_used_index {
            Some(index) => index + 1,
            None => 0,
        }
    }

    // ---- persistence --------------------------------------------------------

    pub fn commit_meta(&self, tx: &EncWriteTx) {
        tx.put(&self.meta_db_key(), &self.serialize_meta());
    }

    fn serialize_meta(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.put_u32(self.id);
        writer.put_u32(self.parent_id);
        writer.put_u32(self.highest_used_index.unwrap_or(NO_INDEX));
        let scheme = self.scheme.serialize();
        writer.put_var_bytes(&scheme);
        let root = self.root.serialize();
        writer.put_var_bytes(&root);
        writer.into_vec()
    }

    fn deserialize_meta(data: &[u8]) -> Result<Self, WalletError> {
        let mut reader = Reader::new(data);
        let id = reader.get_u32()?;
        let parent_id = reader.get_u32()?;
        let highest_used = reader.get_u32()?;
        let scheme = DerivationScheme::deserialize(reader.get_var_bytes()?)?;
        let root = Asset::deserialize(reader.get_var_bytes()?)?;
        Ok(Self {
            id,
            parent_id,
            root,
            scheme,
            assets: BTreeMap::new(),
            highest_used_index: if highest_used == NO_INDEX {
                None
            } else {
                Some(highest_used)
            },
        })
    }

    /// Loads the account and its derived assets from a logical view of the
    /// sub-database.
    pub fn load(
        view: &BTreeMap<Vec<u8>, Vec<u8>>,
        parent_id: u32,
        id: u32,
    ) -> Result<Self, WalletError> {
        let mut suffix = Vec::with_capacity(8);
        suffix.extend_from_slice(&parent_id.to_be_bytes());
        suffix.extend_from_slice(&id.to_be_bytes());
        let meta_key = prefixed_key(ASSET_ACCOUNT_PREFIX, &suffix);
        let meta = view.get(&meta_key).ok_or(WalletError::UnknownAccount)?;
        let mut account = Self::deserialize_meta(meta)?;

        let asset_prefix = prefixed_key(ASSET_PREFIX, &suffix);
        for (key, value) in view.range(asset_prefix.clone()..) {
            if !key.starts_with(&asset_prefix) {
                break;
            }
            let asset = Asset::deserialize(value)?;
            let index = asset.id().index;
            if index != ROOT_ASSET_INDEX {
                account.assets.insert(index, asset);
            }
        }
        Ok(account)
    }

    /// Root asset id for this account.
    pub fn root_asset_id(parent_id: u32, id: u32) -> AssetId {
        AssetId::new(parent_id, id, ROOT_ASSET_INDEX)
    }

    /// Copy with every private envelope stripped; chain state and salts are
    /// preserved.
    pub fn public_copy(&self) -> Self {
        let assets = self
            .assets
            .iter()
            .map(|(index, asset)| (*index, asset.public_copy()))
            .collect();
        Self {
            id: self.id,
            parent_id: self.parent_id,
            root: self.root.public_copy(),
            scheme: self.scheme.clone(),
            assets,
            highest_used_index: self.highest_used_index,
        }
    }

    /// Stages the metadata record and every derived asset into `tx`.
    pub fn persist_all(&self, tx: &EncWriteTx) {
        self.commit_meta(tx);
        for asset in self.assets.values() {
            tx.put(&asset.id().db_key(), &asset.serialize());
        }
    }
}
