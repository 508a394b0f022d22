//! A logical account: one or two asset-account chains (receive and change),
//! the address-type policy over them, and the hash lookup map the resolver
//! feeds from.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::accounts::asset_account::AssetAccount;
use crate::address::{AddressEntry, AddressType};
use crate::assets::AssetId;
use crate::dbkeys::{prefixed_key, ADDRESS_ACCOUNT_PREFIX};
use crate::decrypted_data::DecryptedDataContainer;
use crate::encode::{Reader, Writer};
use crate::error::WalletError;
use crate::io::encrypted_db::EncWriteTx;
use crate::network::NetworkConfig;

pub struct AddressAccount {
    id: u32,
    outer_account: u32,
    inner_account: u32,
    asset_accounts: BTreeMap<u32, AssetAccount>,
    address_types: BTreeSet<AddressType>,
    default_address_type: AddressType,
    used_addresses: BTreeMap<AssetId, AddressType>,
    lookup: u32,
    // hash -> (asset, type); rebuilt on load, never persisted
    address_hashes: HashMap<Vec<u8>, (AssetId, AddressType)>,
}

impl AddressAccount {
    pub fn new(
        id: u32,
        outer_account: u32,
        inner_account: u32,
        address_types: BTreeSet<AddressType>,
        default_address_type: AddressType,
        lookup: u32,
    ) -> Result<Self, WalletError> {
        if address_types.is_empty() {
            return Err(WalletError::AccountSetup("no address types"));
        }
        if !address_types.contains(&default_address_type) {
            return Err(WalletError::AccountSetup(
                "default type not in the account's type set",
            ));
        }
        for atype in &address_types {
            if !atype.is_legal() {
                return Err(WalletError::AccountSetup("illegal address type"));
            }
        }
        Ok(Self {
            id,
            outer_account,
            inner_account,
            asset_accounts: BTreeMap::new(),
            address_types,
            default_address_type,
            used_addresses: BTreeMap::new(),
            lookup,
            address_hashes: HashMap::new(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn outer_account_id(&self) -> u32 {
        self.outer_account
    }

    pub fn inner_account_id(&self) -> u32 {
        self.inner_account
    }

    pub fn lookup(&self) -> u32 {
        self.lookup
    }

    pub fn default_address_type(&self) -> AddressType {
        self.default_address_type
    }

    pub fn address_types(&self) -> &BTreeSet<AddressType> {
        &self.address_types
    }

    pub fn add_asset_account(&mut self, account: AssetAccount) -> Result<(), WalletError> {
        if account.parent_id() != self.id {
            return Err(WalletError::AccountSetup("asset account parent mismatch"));
        }
        self.asset_accounts.insert(account.id(), account);
        Ok(())
    }

    pub fn outer_account(&self) -> Result<&AssetAccount, WalletError> {
        self.asset_accounts
            .get(&self.outer_account)
            .ok_or(WalletError::UnknownAccount)
    }

    pub fn outer_account_mut(&mut self) -> Result<&mut AssetAccount, WalletError> {
        self.asset_accounts
            .get_mut(&self.outer_account)
            .ok_or(WalletError::UnknownAccount)
    }

    pub fn asset_account(&self, id: u32) -> Result<&AssetAccount, WalletError> {
        self.asset_accounts.get(&id).ok_or(WalletError::UnknownAccount)
    }

    pub fn asset_account_mut(&mut self, id: u32) -> Result<&mut AssetAccount, WalletError> {
        self.asset_accounts
            .get_mut(&id)
            .ok_or(WalletError::UnknownAccount)
    }

    pub fn asset_account_ids(&self) -> Vec<u32> {
        self.asset_accounts.keys().copied().collect()
    }

    pub fn asset_accounts(&self) -> impl Iterator<Item = &AssetAccount> {
        self.asset_accounts.values()
    }

    pub fn used_addresses(&self) -> &BTreeMap<AssetId, AddressType> {
        &self.used_addresses
    }

    /// The outer+inner invariant: both ids must be members of the node set.
    pub fn validate(&self) -> Result<(), WalletError> {
        if !self.asset_accounts.contains_key(&self.outer_account)
            || !self.asset_accounts.contains_key(&self.inner_account)
        {
            return Err(WalletError::AccountSetup(
                "outer/inner ids must name member accounts",
            ));
        }
        Ok(())
    }

    // ---- chains -------------------------------------------------------------

    pub fn extend_public_chain(
        &mut self,
        tx: &EncWriteTx,
        count: u32,
    ) -> Result<(), WalletError> {
        for account in self.asset_accounts.values_mut() {
            account.extend_public_chain(tx, count)?;
        }
        Ok(())
    }

    pub fn extend_private_chain(
        &mut self,
        container: &DecryptedDataContainer,
        tx: &EncWriteTx,
        count: u32,
    ) -> Result<(), WalletError> {
        for account in self.asset_accounts.values_mut() {
            account.extend_private_chain(container, tx, count)?;
        }
        Ok(())
    }

    // ---- address vending ----------------------------------------------------

    fn vend_from(
        &mut self,
        tx: &EncWriteTx,
        asset_account_id: u32,
        atype: Option<AddressType>,
        config: &NetworkConfig,
    ) -> Result<AddressEntry, WalletError> {
        let atype = atype.unwrap_or(self.default_address_type);
        if !self.address_types.contains(&atype) {
            return Err(WalletError::AccountSetup("type not enabled on account"));
        }

        let lookup = self.lookup;
        let account = self
            .asset_accounts
            .get_mut(&asset_account_id)
            .ok_or(WalletError::UnknownAccount)?;

        if account.peek_next_index() >= account.asset_count() {
            account.extend_public_chain(tx, lookup.max(1))?;
        }
        if account.peek_next_index() >= account.asset_count() {
            // ECDH chains cannot outgrow their salts
            return Err(WalletError::NoAsset);
        }

        let index = account.vend_index(tx);
        let asset = account.get_asset(index)?;
        let entry = AddressEntry::for_asset(asset, atype)?;

        self.used_addresses.insert(entry.asset_id(), atype);
        self.address_hashes
            .insert(entry.prefixed_hash(config), (entry.asset_id(), atype));
        self.commit_meta(tx);
        Ok(entry)
    }

    pub fn get_new_address(
        &mut self,
        tx: &EncWriteTx,
        atype: Option<AddressType>,
        config: &NetworkConfig,
    ) -> Result<AddressEntry, WalletError> {
        self.vend_from(tx, self.outer_account, atype, config)
    }

    pub fn get_new_change_address(
        &mut self,
        tx: &EncWriteTx,
        atype: Option<AddressType>,
        config: &NetworkConfig,
    ) -> Result<AddressEntry, WalletError> {
        self.vend_from(tx, self.inner_account, atype, config)
    }

    /// Non-consuming view of the next change address.
    pub fn peek_next_change_address(
        &mut self,
        tx: &EncWriteTx,
        config: &NetworkConfig,
    ) -> Result<AddressEntry, WalletError> {
        let lookup = self.lookup;
        let inner = self.inner_account;
        let account = self
            .asset_accounts
            .get_mut(&inner)
            .ok_or(WalletError::UnknownAccount)?;
        if account.peek_next_index() >= account.asset_count() {
            account.extend_public_chain(tx, lookup.max(1))?;
        }
        let index = account.peek_next_index();
        let asset = account.get_asset(index)?;
        AddressEntry::for_asset(asset, self.default_address_type)
    }

    /// Whether the requested type can be vended here.
    pub fn supports_type(&self, atype: AddressType) -> bool {
        self.address_types.contains(&atype)
    }

    /// Re-types an already vended address.
    pub fn update_address_entry_type(
        &mut self,
        tx: &EncWriteTx,
        asset_id: AssetId,
        atype: AddressType,
        config: &NetworkConfig,
    ) -> Result<(), WalletError> {
        if !self.address_types.contains(&atype) {
            return Err(WalletError::AccountSetup("type not enabled on account"));
        }
        if !self.used_addresses.contains_key(&asset_id) {
            return Err(WalletError::NoAsset);
        }
        self.used_addresses.insert(asset_id, atype);
        self.commit_meta(tx);
        self.update_address_hash_map(config);
        Ok(())
    }

    // ---- hash map -----------------------------------------------------------

    /// Rebuilds the hash→asset map over every derived asset and enabled type.
    pub fn update_address_hash_map(&mut self, config: &NetworkConfig) {
        self.address_hashes.clear();
        for account in self.asset_accounts.values() {
            for asset in account.assets() {
                for atype in &self.address_types {
                    if let Ok(entry) = AddressEntry::for_asset(asset, *atype) {
                        self.address_hashes
                            .insert(entry.prefixed_hash(config), (asset.id(), *atype));
                    }
                }
            }
        }
    }

    pub fn address_hash_map(&self) -> &HashMap<Vec<u8>, (AssetId, AddressType)> {
        &self.address_hashes
    }

    pub fn addr_hash_set(&self) -> BTreeSet<Vec<u8>> {
        self.address_hashes.keys().cloned().collect()
    }

    // ---- persistence --------------------------------------------------------

    fn meta_db_key(&self) -> Vec<u8> {
        prefixed_key(ADDRESS_ACCOUNT_PREFIX, &self.id.to_be_bytes())
    }

    pub fn commit_meta(&self, tx: &EncWriteTx) {
        tx.put(&self.meta_db_key(), &self.serialize_meta());
    }

    fn serialize_meta(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.put_u32(self.id);
        writer.put_u32(self.outer_account);
        writer.put_u32(self.inner_account);
        writer.put_u16(self.default_address_type.bits());
        writer.put_u32(self.lookup);
        writer.put_var_int(self.address_types.len() as u64);
        for atype in &self.address_types {
            writer.put_u16(atype.bits());
        }
        writer.put_var_int(self.used_addresses.len() as u64);
        for (asset_id, atype) in &self.used_addresses {
            writer.put_bytes(&asset_id.serialize());
            writer.put_u16(atype.bits());
        }
        writer.into_vec()
    }

    fn deserialize_meta(data: &[u8]) -> Result<Self, WalletError> {
        let mut reader = Reader::new(data);
        let id = reader.get_u32()?;
        let outer_account = reader.get_u32()?;
        let inner_account = reader.get_u32()?;
        let default_address_type = AddressType::from_bits(reader.get_u16()?)?;
        let lookup = reader.get_u32()?;

        let type_count = reader.get_var_int()?;
        let mut address_types = BTreeSet::new();
        for _ in 0..type_count {
            address_types.insert(AddressType::from_bits(reader.get_u16()?)?);
        }

        let used_count = reader.get_var_int()?;
        let mut used_addresses = BTreeMap::new();
        for _ in 0..used_count {
            let asset_id = crate::assets::AssetId::deserialize(reader.get_bytes(12)?)?;
            let atype = AddressType::from_bits(reader.get_u16()?)?;
            used_addresses.insert(asset_id, atype);
        }

        Ok(Self {
            id,
            outer_account,
            inner_account,
            asset_accounts: BTreeMap::new(),
            address_types,
            default_address_type,
            used_addresses,
            lookup,
            address_hashes: HashMap::new(),
        })
    }

    /// Loads the account, its asset accounts and their assets, and rebuilds
    /// the hash map.
    pub fn load(
        view: &BTreeMap<Vec<u8>, Vec<u8>>,
        id: u32,
        config: &NetworkConfig,
    ) -> Result<Self, WalletError> {
        let meta_key = prefixed_key(ADDRESS_ACCOUNT_PREFIX, &id.to_be_bytes());
        let meta = view.get(&meta_key).ok_or(WalletError::UnknownAccount)?;
        let mut account = Self::deserialize_meta(meta)?;

        // every asset-account record scoped under this account id
        let prefix = prefixed_key(crate::dbkeys::ASSET_ACCOUNT_PREFIX, &id.to_be_bytes());
        let mut member_ids = Vec::new();
        for (key, _) in view.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() == prefix.len() + 4 {
                member_ids.push(u32::from_be_bytes([
                    key[prefix.len()],
                    key[prefix.len() + 1],
                    key[prefix.len() + 2],
                    key[prefix.len() + 3],
                ]));
            }
        }
        for member_id in member_ids {
            let asset_account = AssetAccount::load(view, id, member_id)?;
            account.asset_accounts.insert(member_id, asset_account);
        }

        account.validate()?;
        account.update_address_hash_map(config);
        Ok(account)
    }

    /// True when any member chain carries private material.
    pub fn has_private_material(&self) -> bool {
        self.asset_accounts.values().any(|account| {
            account.root().has_private_key()
                || account.assets().any(|asset| asset.has_private_key())
        })
    }
}
